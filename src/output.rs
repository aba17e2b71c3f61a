//! Output types: normalized line items, per-page reports and run statistics.

use crate::error::PageIssue;
use serde::{Deserialize, Serialize};

/// `status` stamped on every line item.
pub const STATUS_REVIEWING: &str = "reviewing";
/// `uploaded_from` stamped on every line item.
pub const UPLOADED_FROM_WEB: &str = "web";
/// `type` used when the model does not name the document type.
pub const DEFAULT_DOC_TYPE: &str = "Tax Invoice";

/// One normalized invoice line item.
///
/// Transaction fields keep the `section_2_transaction_*` wire names that
/// downstream review tools expect. Absent values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub title: String,
    pub doc_id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub uploaded_from: String,
    #[serde(default)]
    pub user_doc_id: Option<String>,
    #[serde(default)]
    pub doc_meta_data: Option<String>,
    #[serde(default)]
    pub folder_name: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    pub status: String,
    pub created_at_iso: String,
    pub modified_at_iso: String,

    #[serde(rename = "section_2_transaction_sort")]
    pub sort: i64,
    #[serde(rename = "section_2_transaction_number", default)]
    pub number: Option<String>,
    #[serde(rename = "section_2_transaction_rate", default)]
    pub rate: Option<f64>,
    /// Whole quantities serialize as JSON integers.
    #[serde(
        rename = "section_2_transaction_qty",
        default,
        serialize_with = "serialize_quantity"
    )]
    pub qty: Option<f64>,
    #[serde(rename = "section_2_transaction_gst", default)]
    pub gst: Option<f64>,
    #[serde(rename = "section_2_transaction_discount", default)]
    pub discount: Option<f64>,
    #[serde(rename = "section_2_transaction_hsn", default)]
    pub hsn: Option<String>,
    #[serde(rename = "section_2_transaction_mrp", default)]
    pub mrp: Option<f64>,

    /// 1-indexed page the item was read from.
    pub page_number: usize,
}

fn serialize_quantity<S: serde::Serializer>(qty: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match *qty {
        Some(q) if q.fract() == 0.0 && q.abs() < i64::MAX as f64 => serializer.serialize_some(&(q as i64)),
        Some(q) => serializer.serialize_some(&q),
        None => serializer.serialize_none(),
    }
}

impl InvoiceLineItem {
    /// `true` when no transaction field carries a value.
    ///
    /// Placeholder items for degraded pages always satisfy this; so does a
    /// model record that named nothing but identity fields.
    pub fn is_identity_only(&self) -> bool {
        self.number.is_none()
            && self.rate.is_none()
            && self.qty.is_none()
            && self.gst.is_none()
            && self.discount.is_none()
            && self.hsn.is_none()
            && self.mrp.is_none()
    }
}

/// How a single page was handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Line items this page contributed (1 for a placeholder).
    pub item_count: usize,
    /// Set when the page fell back to a placeholder.
    pub issue: Option<PageIssue>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    /// Model call retries spent on this page.
    pub retries: u32,
}

impl PageReport {
    pub fn is_degraded(&self) -> bool {
        self.issue.is_some()
    }
}

/// Aggregate statistics for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub total_items: usize,
    pub degraded_pages: usize,
    /// Entries found by the tax-code scanner.
    pub tax_codes_found: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of extracting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Every line item, in page order.
    pub items: Vec<InvoiceLineItem>,
    pub pages: Vec<PageReport>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn pages_processed(&self) -> usize {
        self.stats.total_pages
    }

    /// Human-readable one-line summary used by both front-ends.
    pub fn summary_message(&self) -> String {
        format!(
            "Successfully extracted {} invoice items from {} pages",
            self.total_items(),
            self.pages_processed()
        )
    }

    /// Items grouped by page number, in page order.
    pub fn items_by_page(&self) -> Vec<(usize, Vec<&InvoiceLineItem>)> {
        let mut grouped: Vec<(usize, Vec<&InvoiceLineItem>)> = Vec::new();
        for item in &self.items {
            match grouped.last_mut() {
                Some((page, items)) if *page == item.page_number => items.push(item),
                _ => grouped.push((item.page_number, vec![item])),
            }
        }
        grouped
    }

    /// Wrap the output in the wire envelope served by the HTTP API.
    pub fn into_response(self) -> InvoiceResponse {
        let message = self.summary_message();
        let total_items = self.total_items();
        let pages_processed = self.pages_processed();
        InvoiceResponse {
            success: true,
            message,
            data: self.items,
            total_items,
            pages_processed,
        }
    }
}

/// One page's share of a streamed extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    pub report: PageReport,
    pub items: Vec<InvoiceLineItem>,
}

/// JSON envelope for a successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<InvoiceLineItem>,
    pub total_items: usize,
    pub pages_processed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(page: usize, hsn: Option<&str>) -> InvoiceLineItem {
        InvoiceLineItem {
            title: "inv.pdf".into(),
            doc_id: "d-1".into(),
            doc_type: DEFAULT_DOC_TYPE.into(),
            uploaded_from: UPLOADED_FROM_WEB.into(),
            user_doc_id: None,
            doc_meta_data: None,
            folder_name: None,
            folder_id: None,
            status: STATUS_REVIEWING.into(),
            created_at_iso: "2026-10-19T10:00:00Z".into(),
            modified_at_iso: "2026-10-19T10:00:00Z".into(),
            sort: 1,
            number: None,
            rate: Some(120.5),
            qty: Some(2.0),
            gst: None,
            discount: None,
            hsn: hsn.map(str::to_string),
            mrp: None,
            page_number: page,
        }
    }

    #[test]
    fn wire_names_and_nulls() {
        let value = serde_json::to_value(item(2, Some("8471"))).unwrap();
        assert_eq!(value["type"], json!("Tax Invoice"));
        assert_eq!(value["section_2_transaction_hsn"], json!("8471"));
        assert_eq!(value["section_2_transaction_rate"], json!(120.5));
        assert_eq!(value["section_2_transaction_gst"], json!(null));
        assert_eq!(value["section_2_transaction_sort"], json!(1));
        assert_eq!(value["page_number"], json!(2));
        assert!(value.get("doc_type").is_none());
    }

    #[test]
    fn whole_quantities_serialize_as_integers() {
        let mut line = item(1, None);
        assert_eq!(serde_json::to_value(&line).unwrap()["section_2_transaction_qty"], json!(2));
        line.qty = Some(1.5);
        assert_eq!(serde_json::to_value(&line).unwrap()["section_2_transaction_qty"], json!(1.5));
        line.qty = None;
        assert_eq!(serde_json::to_value(&line).unwrap()["section_2_transaction_qty"], json!(null));
    }

    #[test]
    fn json_round_trip_keeps_numbers_and_nulls() {
        let original = item(1, None);
        let text = serde_json::to_string(&original).unwrap();
        let decoded: InvoiceLineItem = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.gst, None);
        assert_eq!(decoded.qty, Some(2.0));
    }

    #[test]
    fn items_group_by_page_in_order() {
        let output = ExtractionOutput {
            items: vec![item(1, None), item(1, None), item(2, None)],
            pages: Vec::new(),
            stats: ExtractionStats {
                total_pages: 2,
                ..Default::default()
            },
        };
        let grouped = output.items_by_page();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, 1);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].1.len(), 1);

        let response = output.into_response();
        assert!(response.success);
        assert_eq!(response.total_items, 3);
        assert_eq!(response.pages_processed, 2);
        assert_eq!(
            response.message,
            "Successfully extracted 3 invoice items from 2 pages"
        );
    }

    #[test]
    fn identity_only_detection() {
        let mut placeholder = item(1, None);
        placeholder.rate = None;
        placeholder.qty = None;
        assert!(placeholder.is_identity_only());
        assert!(!item(1, Some("1234")).is_identity_only());
    }
}
