//! Streaming extraction API: emit each page's line items as it completes.
//!
//! Large invoices take a model call per page. [`InvoiceExtractor::extract_stream`]
//! yields a [`PageExtraction`] as soon as each page is normalized, so callers
//! can show partial results or write them incrementally. Pages are processed
//! sequentially, so items always arrive in page order.
//!
//! Fatal problems found before the first model call (not a PDF, unreadable
//! document) are returned as `Err` from `extract_stream` itself. A model
//! failure under [`crate::config::UpstreamPolicy::Abort`] is yielded as the
//! stream's last item.

use crate::error::InvoiceError;
use crate::extract::{InvoiceExtractor, PreparedDocument};
use crate::output::PageExtraction;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::reader::PageContent;
use futures::stream;
use std::pin::Pin;
use std::vec::IntoIter;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-page results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageExtraction, InvoiceError>> + Send>>;

struct StreamState {
    extractor: InvoiceExtractor,
    pages: IntoIter<PageContent>,
    normalizer: Normalizer,
    total_pages: usize,
    total_items: usize,
    finished: bool,
}

impl InvoiceExtractor {
    /// Extract a PDF, streaming pages as they are ready.
    ///
    /// # Returns
    /// - `Ok(PageStream)`: one `Result<PageExtraction, InvoiceError>` per page
    /// - `Err(InvoiceError)`: fatal error before any page was sent to the model
    pub async fn extract_stream(&self, pdf: &[u8], filename: &str) -> Result<PageStream, InvoiceError> {
        info!("Starting streaming extraction: {}", filename);

        let PreparedDocument {
            pages, normalizer, ..
        } = self.prepare(pdf, filename).await?;
        let total_pages = pages.len();

        if let Some(ref cb) = self.config().progress_callback {
            cb.on_extraction_start(total_pages);
        }

        let state = StreamState {
            extractor: self.clone(),
            pages: pages.into_iter(),
            normalizer,
            total_pages,
            total_items: 0,
            finished: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }

            let Some(page) = state.pages.next() else {
                state.finished = true;
                if let Some(ref cb) = state.extractor.config().progress_callback {
                    cb.on_extraction_complete(state.total_pages, state.total_items);
                }
                return None;
            };

            let result = state
                .extractor
                .process_page(&page, state.total_pages, &mut state.normalizer)
                .await;

            match &result {
                Ok(extraction) => state.total_items += extraction.items.len(),
                Err(_) => state.finished = true,
            }
            Some((result, state))
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, UpstreamPolicy};
    use crate::pipeline::llm::{ExtractionModel, ModelError, ModelReply, ModelRequest};
    use crate::pipeline::reader::{DocumentReader, RenderSettings};
    use async_trait::async_trait;
    use futures::StreamExt;
    use image::{DynamicImage, RgbaImage};
    use std::sync::Arc;

    struct TwoPages;

    impl DocumentReader for TwoPages {
        fn page_texts(&self, _pdf: &[u8], _password: Option<&str>) -> Result<Vec<String>, InvoiceError> {
            Ok(vec!["8471 18%".into(), String::new()])
        }

        fn read_pages(&self, _pdf: &[u8], _settings: &RenderSettings) -> Result<Vec<PageContent>, InvoiceError> {
            Ok((1..=2)
                .map(|n| PageContent {
                    page_number: n,
                    text: if n == 1 { "8471 18%".into() } else { String::new() },
                    image: DynamicImage::ImageRgba8(RgbaImage::new(4, 4)),
                })
                .collect())
        }
    }

    /// Answers page 1, fails page 2.
    struct FailsOnPageTwo;

    #[async_trait]
    impl ExtractionModel for FailsOnPageTwo {
        async fn extract(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
            if request.image.page_number == 2 {
                Err(ModelError("quota exceeded".into()))
            } else {
                Ok(ModelReply::text(r#"[{"Section 2_Transaction qty": 2}]"#))
            }
        }
    }

    fn extractor(policy: UpstreamPolicy) -> InvoiceExtractor {
        let config = ExtractionConfig::builder()
            .on_model_error(policy)
            .build()
            .unwrap();
        InvoiceExtractor::with_parts(Arc::new(TwoPages), Arc::new(FailsOnPageTwo), config)
    }

    #[tokio::test]
    async fn abort_ends_the_stream_with_the_error() {
        let stream = extractor(UpstreamPolicy::Abort)
            .extract_stream(b"%PDF", "inv.pdf")
            .await
            .unwrap();
        let results: Vec<_> = stream.collect().await;

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.report.page_num, 1);
        assert_eq!(first.items[0].hsn.as_deref(), Some("8471"));
        assert!(matches!(
            results[1],
            Err(InvoiceError::Upstream { page: 2, .. })
        ));
    }

    #[tokio::test]
    async fn placeholder_policy_streams_every_page_in_order() {
        let stream = extractor(UpstreamPolicy::Placeholder)
            .extract_stream(b"%PDF", "inv.pdf")
            .await
            .unwrap();
        let pages: Vec<PageExtraction> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].report.page_num, 1);
        assert_eq!(pages[1].report.page_num, 2);
        assert!(pages[1].report.is_degraded());
        assert!(pages[1].items[0].is_identity_only());
    }

    #[tokio::test]
    async fn non_pdf_name_fails_before_streaming() {
        let err = extractor(UpstreamPolicy::Abort)
            .extract_stream(b"%PDF", "inv.docx")
            .await
            .err()
            .unwrap();
        assert!(err.is_input_rejection());
    }
}
