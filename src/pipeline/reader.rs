//! Document reading: PDF bytes → per-page text and per-page rasters.
//!
//! [`DocumentReader`] is the seam between the pipeline and pdfium. The
//! orchestrator only ever sees the trait, which keeps the rest of the crate
//! testable without a pdfium shared library on the machine.
//!
//! Pdfium calls are blocking and CPU-heavy, so the async helpers
//! [`read_document`] and [`read_texts`] move them onto the blocking pool.

use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming a pdfium shared library (file or directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

const PDF_MAGIC: &[u8] = b"%PDF";
/// The header may follow leading junk (BOM, blank lines) within this window.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Raster settings derived from [`ExtractionConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

impl From<&ExtractionConfig> for RenderSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
        }
    }
}

/// One page as read from the document.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// 1-indexed.
    pub page_number: usize,
    /// Text layer; empty for scanned pages.
    pub text: String,
    pub image: DynamicImage,
}

/// Source of page text and page images for a PDF.
pub trait DocumentReader: Send + Sync {
    /// Text layer of every page, in order.
    fn page_texts(&self, pdf: &[u8], password: Option<&str>) -> Result<Vec<String>, InvoiceError>;

    /// Text and raster of every page, in order.
    ///
    /// A page that fails to render fails the whole document.
    fn read_pages(&self, pdf: &[u8], settings: &RenderSettings) -> Result<Vec<PageContent>, InvoiceError>;
}

/// Run [`DocumentReader::read_pages`] on the blocking pool.
pub async fn read_document(
    reader: Arc<dyn DocumentReader>,
    pdf: Vec<u8>,
    settings: RenderSettings,
) -> Result<Vec<PageContent>, InvoiceError> {
    tokio::task::spawn_blocking(move || reader.read_pages(&pdf, &settings))
        .await
        .map_err(|e| InvoiceError::Internal(format!("Render task panicked: {}", e)))?
}

/// Run [`DocumentReader::page_texts`] on the blocking pool.
pub async fn read_texts(
    reader: Arc<dyn DocumentReader>,
    pdf: Vec<u8>,
    password: Option<String>,
) -> Result<Vec<String>, InvoiceError> {
    tokio::task::spawn_blocking(move || reader.page_texts(&pdf, password.as_deref()))
        .await
        .map_err(|e| InvoiceError::Internal(format!("Text task panicked: {}", e)))?
}

/// Reject anything without a `%PDF` header in its first 1024 bytes.
pub fn check_pdf_magic(pdf: &[u8]) -> Result<(), InvoiceError> {
    let head = &pdf[..pdf.len().min(HEADER_SEARCH_WINDOW)];
    if head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        Ok(())
    } else {
        let shown = &pdf[..pdf.len().min(PDF_MAGIC.len())];
        Err(InvoiceError::DocumentRead {
            detail: format!("not a PDF (starts with {:?})", String::from_utf8_lossy(shown)),
        })
    }
}

/// pdfium-backed [`DocumentReader`].
///
/// Binds the library on every call, from `PDFIUM_LIB_PATH` when set and from
/// the system library search path otherwise.
#[derive(Debug, Clone, Default)]
pub struct PdfiumReader {
    library_path: Option<PathBuf>,
}

impl PdfiumReader {
    /// Reader honouring `PDFIUM_LIB_PATH`.
    pub fn from_env() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
        }
    }

    /// Reader bound to an explicit library file or directory.
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, InvoiceError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(library_file(path)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| InvoiceError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

impl DocumentReader for PdfiumReader {
    fn page_texts(&self, pdf: &[u8], password: Option<&str>) -> Result<Vec<String>, InvoiceError> {
        check_pdf_magic(pdf)?;
        let pdfium = self.bind()?;
        let document = open_document(&pdfium, pdf, password)?;

        document
            .pages()
            .iter()
            .enumerate()
            .map(|(idx, page)| page_text(&page, idx + 1))
            .collect()
    }

    fn read_pages(&self, pdf: &[u8], settings: &RenderSettings) -> Result<Vec<PageContent>, InvoiceError> {
        check_pdf_magic(pdf)?;
        let pdfium = self.bind()?;
        let document = open_document(&pdfium, pdf, settings.password.as_deref())?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let max_px = settings.max_rendered_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(settings.dpi as f32 / 72.0)
            .set_maximum_width(max_px)
            .set_maximum_height(max_px);

        let mut results = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            let text = page_text(&page, page_number)?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                InvoiceError::RasterisationFailed {
                    page: page_number,
                    detail: format!("{:?}", e),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px, {} chars of text",
                page_number,
                image.width(),
                image.height(),
                text.len()
            );

            results.push(PageContent {
                page_number,
                text,
                image,
            });
        }

        Ok(results)
    }
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, InvoiceError> {
    pdfium.load_pdf_from_byte_slice(pdf, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        let detail = if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                "incorrect password".to_string()
            } else {
                "document is password-protected".to_string()
            }
        } else {
            err_str
        };
        InvoiceError::DocumentRead { detail }
    })
}

fn page_text(page: &PdfPage<'_>, page_number: usize) -> Result<String, InvoiceError> {
    page.text()
        .map(|t| t.all())
        .map_err(|e| InvoiceError::DocumentRead {
            detail: format!("text layer of page {}: {:?}", page_number, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_check_accepts_pdf_header() {
        assert!(check_pdf_magic(b"%PDF-1.7\n...").is_ok());
    }

    #[test]
    fn magic_check_accepts_header_after_leading_bytes() {
        assert!(check_pdf_magic(b"\n%PDF-1.4\n").is_ok());
        assert!(check_pdf_magic(b"\xEF\xBB\xBF%PDF-1.7\n").is_ok());
        assert!(check_pdf_magic(b"Content-Type: application/pdf\r\n\r\n%PDF-1.5").is_ok());
    }

    #[test]
    fn magic_check_only_searches_the_first_kilobyte() {
        let mut late = vec![b' '; HEADER_SEARCH_WINDOW];
        late.extend_from_slice(b"%PDF-1.4");
        assert!(check_pdf_magic(&late).is_err());
    }

    #[test]
    fn magic_check_rejects_other_bytes() {
        let err = check_pdf_magic(b"PK\x03\x04zip").unwrap_err();
        assert!(matches!(err, InvoiceError::DocumentRead { .. }));
        assert!(check_pdf_magic(b"").is_err());
    }

    #[test]
    fn non_pdf_bytes_fail_before_binding() {
        // No pdfium library is needed to reject garbage.
        let reader = PdfiumReader::with_library_path("/nonexistent/libpdfium.so");
        let err = reader.page_texts(b"hello", None).unwrap_err();
        assert!(matches!(err, InvoiceError::DocumentRead { .. }));
    }

    #[test]
    fn missing_library_is_a_binding_error() {
        let reader = PdfiumReader::with_library_path("/nonexistent/libpdfium.so");
        let err = reader.page_texts(b"%PDF-1.4", None).unwrap_err();
        assert!(matches!(err, InvoiceError::PdfiumBindingFailed(_)));
    }

    #[test]
    fn settings_follow_config() {
        let config = ExtractionConfig::builder()
            .dpi(200)
            .password("s3cret")
            .build()
            .unwrap();
        let settings = RenderSettings::from(&config);
        assert_eq!(settings.dpi, 200);
        assert_eq!(settings.max_rendered_pixels, 2000);
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
    }
}
