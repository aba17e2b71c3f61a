//! Normalization: loosely-typed model records → [`InvoiceLineItem`].
//!
//! The model is asked for human-readable labels (`"Section 2_Transaction
//! rate"`) and answers with whatever types it likes: numbers as strings,
//! empty strings for unknown values, `null`, sometimes snake_case keys. Each
//! schema field here has an explicit lookup list and coercion rule, so no
//! model quirk can put a string into a numeric field or a zero where the
//! value was unknown.
//!
//! After mapping, missing HSN/GST values are filled from the document's
//! [`TaxCodeEntry`] list according to [`BackfillStrategy`].

use crate::config::BackfillStrategy;
use crate::output::{
    InvoiceLineItem, DEFAULT_DOC_TYPE, STATUS_REVIEWING, UPLOADED_FROM_WEB,
};
use crate::pipeline::response::{ParsedReply, RawModelRecord};
use crate::pipeline::taxcodes::TaxCodeEntry;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Record keys the model is prompted with.
pub mod labels {
    pub const SORT: &str = "Section 2_Transaction sort";
    pub const NUMBER: &str = "Section 2_Transaction number";
    pub const RATE: &str = "Section 2_Transaction rate";
    pub const QTY: &str = "Section 2_Transaction qty";
    pub const GST: &str = "Section 2_Transaction gst";
    pub const DISCOUNT: &str = "Section 2_Transaction discount";
    pub const HSN: &str = "Section 2_Transaction hsn";
    pub const MRP: &str = "Section 2_Transaction MRP";

    pub const TRANSACTION_LABELS: [&str; 8] = [SORT, NUMBER, RATE, QTY, GST, DISCOUNT, HSN, MRP];
}

// Lookup order per field: prompt label, wire name, bare name.
const KEYS_TITLE: &[&str] = &["title"];
const KEYS_DOC_ID: &[&str] = &["doc_id"];
const KEYS_TYPE: &[&str] = &["type", "doc_type"];
const KEYS_USER_DOC_ID: &[&str] = &["user_doc_id"];
const KEYS_DOC_META: &[&str] = &["doc_meta_data"];
const KEYS_FOLDER_NAME: &[&str] = &["folder_name"];
const KEYS_FOLDER_ID: &[&str] = &["folder_id"];
const KEYS_SORT: &[&str] = &[labels::SORT, "section_2_transaction_sort", "sort"];
const KEYS_NUMBER: &[&str] = &[labels::NUMBER, "section_2_transaction_number", "number"];
const KEYS_RATE: &[&str] = &[labels::RATE, "section_2_transaction_rate", "rate"];
const KEYS_QTY: &[&str] = &[labels::QTY, "section_2_transaction_qty", "qty"];
const KEYS_GST: &[&str] = &[labels::GST, "section_2_transaction_gst", "gst"];
const KEYS_DISCOUNT: &[&str] = &[
    labels::DISCOUNT,
    "section_2_transaction_discount",
    "discount",
];
const KEYS_HSN: &[&str] = &[labels::HSN, "section_2_transaction_hsn", "hsn"];
const KEYS_MRP: &[&str] = &[labels::MRP, "section_2_transaction_mrp", "mrp"];

const DEFAULT_SORT: i64 = 1;

/// Per-document normalizer.
///
/// Holds the scanner output and, for [`BackfillStrategy::Positional`], the
/// running line-item index across pages. Create one per document and feed it
/// pages in order.
#[derive(Debug, Clone)]
pub struct Normalizer {
    filename: String,
    tax_codes: Vec<TaxCodeEntry>,
    strategy: BackfillStrategy,
    next_position: usize,
}

impl Normalizer {
    pub fn new(
        filename: impl Into<String>,
        tax_codes: Vec<TaxCodeEntry>,
        strategy: BackfillStrategy,
    ) -> Self {
        Self {
            filename: filename.into(),
            tax_codes,
            strategy,
            next_position: 0,
        }
    }

    /// Normalize one page's parsed reply.
    ///
    /// A parse failure yields exactly one placeholder item.
    pub fn normalize_page(&mut self, page_number: usize, reply: &ParsedReply) -> Vec<InvoiceLineItem> {
        match reply {
            ParsedReply::Records(records) => records
                .iter()
                .map(|record| self.normalize_record(record, page_number))
                .collect(),
            ParsedReply::Single(record) => vec![self.normalize_record(record, page_number)],
            ParsedReply::Failure { .. } => vec![self.placeholder(page_number)],
        }
    }

    /// Identity-only item standing in for a page with no usable model output.
    pub fn placeholder(&self, page_number: usize) -> InvoiceLineItem {
        let now = timestamp();
        InvoiceLineItem {
            title: self.filename.clone(),
            doc_id: new_doc_id(),
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            uploaded_from: UPLOADED_FROM_WEB.to_string(),
            user_doc_id: None,
            doc_meta_data: None,
            folder_name: None,
            folder_id: None,
            status: STATUS_REVIEWING.to_string(),
            created_at_iso: now.clone(),
            modified_at_iso: now,
            sort: DEFAULT_SORT,
            number: None,
            rate: None,
            qty: None,
            gst: None,
            discount: None,
            hsn: None,
            mrp: None,
            page_number,
        }
    }

    fn normalize_record(&mut self, record: &RawModelRecord, page_number: usize) -> InvoiceLineItem {
        let now = timestamp();
        let mut item = InvoiceLineItem {
            title: lookup(record, KEYS_TITLE, coerce_text)
                .unwrap_or_else(|| self.filename.clone()),
            doc_id: lookup(record, KEYS_DOC_ID, coerce_text)
                .unwrap_or_else(new_doc_id),
            doc_type: lookup(record, KEYS_TYPE, coerce_text)
                .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
            uploaded_from: UPLOADED_FROM_WEB.to_string(),
            user_doc_id: lookup(record, KEYS_USER_DOC_ID, coerce_text),
            doc_meta_data: lookup(record, KEYS_DOC_META, coerce_text),
            folder_name: lookup(record, KEYS_FOLDER_NAME, coerce_text),
            folder_id: lookup(record, KEYS_FOLDER_ID, coerce_text),
            status: STATUS_REVIEWING.to_string(),
            created_at_iso: now.clone(),
            modified_at_iso: now,
            sort: lookup(record, KEYS_SORT, coerce_sort)
                .unwrap_or(DEFAULT_SORT),
            number: lookup(record, KEYS_NUMBER, coerce_code),
            rate: lookup(record, KEYS_RATE, coerce_number),
            qty: lookup(record, KEYS_QTY, coerce_number),
            gst: lookup(record, KEYS_GST, coerce_number),
            discount: lookup(record, KEYS_DISCOUNT, coerce_number),
            hsn: lookup(record, KEYS_HSN, coerce_code),
            mrp: lookup(record, KEYS_MRP, coerce_number),
            page_number,
        };

        self.backfill(&mut item);
        item
    }

    fn backfill(&mut self, item: &mut InvoiceLineItem) {
        match self.strategy {
            BackfillStrategy::FirstMatch => {
                if item.hsn.is_none() {
                    item.hsn = self.tax_codes.first().map(|e| e.code.clone());
                }
                if item.gst.is_none() {
                    item.gst = self.tax_codes.iter().find_map(TaxCodeEntry::nonzero_rate);
                }
            }
            BackfillStrategy::Positional => {
                let entry = self.tax_codes.get(self.next_position);
                self.next_position += 1;
                let Some(entry) = entry else {
                    return;
                };
                if item.hsn.is_none() {
                    item.hsn = Some(entry.code.clone());
                }
                if item.gst.is_none() {
                    item.gst = entry.nonzero_rate();
                }
            }
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_doc_id() -> String {
    Uuid::new_v4().to_string()
}

/// First usable value among the aliases in `keys`, tried in order.
///
/// An alias holding `null` or an empty string falls through to the next one.
fn lookup<T>(
    record: &RawModelRecord,
    keys: &[&str],
    coerce: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter().find_map(|wanted| {
        record
            .iter()
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(wanted))
            .find_map(|(_, value)| coerce(value))
    })
}

/// Free-text fields: strings, scalars, or nested JSON kept as compact text.
fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(a) if a.is_empty() => None,
        Value::Object(o) if o.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Code-like fields (HSN, part number): strings or numbers only.
fn coerce_code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric fields: present, parseable and non-zero, else absent.
fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_numeric_text(s)?,
        _ => return None,
    };
    (n.is_finite() && n != 0.0).then_some(n)
}

fn parse_numeric_text(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.strip_suffix('%').unwrap_or(&cleaned).trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// `sort` keeps the record's own integer, including zero.
fn coerce_sort(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawModelRecord {
        value.as_object().expect("object literal").clone()
    }

    fn codes() -> Vec<TaxCodeEntry> {
        vec![
            TaxCodeEntry {
                code: "1234".into(),
                rate: Some(18),
            },
            TaxCodeEntry {
                code: "5678".into(),
                rate: Some(5),
            },
        ]
    }

    #[test]
    fn labels_map_to_schema_fields() {
        let tax = codes();
        let mut n = Normalizer::new("inv.pdf", tax, BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "title": "ACME invoice 42",
            "doc_id": "INV-42",
            "type": "Retail Invoice",
            "Section 2_Transaction sort": "3",
            "Section 2_Transaction number": 7788,
            "Section 2_Transaction rate": "1,250.50",
            "Section 2_Transaction qty": 2,
            "Section 2_Transaction gst": "12%",
            "Section 2_Transaction discount": "",
            "Section 2_Transaction hsn": "8471",
            "Section 2_Transaction MRP": 2801.12
        }))]);

        let items = n.normalize_page(4, &reply);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "ACME invoice 42");
        assert_eq!(item.doc_id, "INV-42");
        assert_eq!(item.doc_type, "Retail Invoice");
        assert_eq!(item.sort, 3);
        assert_eq!(item.number.as_deref(), Some("7788"));
        assert_eq!(item.rate, Some(1250.5));
        assert_eq!(item.qty, Some(2.0));
        assert_eq!(item.gst, Some(12.0));
        assert_eq!(item.discount, None);
        assert_eq!(item.hsn.as_deref(), Some("8471"));
        assert_eq!(item.mrp, Some(2801.12));
        assert_eq!(item.page_number, 4);
    }

    #[test]
    fn defaults_and_fixed_fields() {
        let mut n = Normalizer::new("scan.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "status": "approved",
            "uploaded_from": "mobile",
            "created_at_iso": "1999-01-01T00:00:00",
            "title": "   "
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.title, "scan.pdf");
        assert_eq!(item.doc_type, "Tax Invoice");
        assert_eq!(item.status, "reviewing");
        assert_eq!(item.uploaded_from, "web");
        assert_ne!(item.created_at_iso, "1999-01-01T00:00:00");
        assert_eq!(item.created_at_iso, item.modified_at_iso);
        assert_eq!(item.sort, 1);
        assert!(Uuid::parse_str(&item.doc_id).is_ok());
    }

    #[test]
    fn zero_and_garbage_numbers_become_absent() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "Section 2_Transaction rate": 0,
            "Section 2_Transaction qty": "two",
            "Section 2_Transaction discount": null,
            "Section 2_Transaction MRP": {"value": 10}
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.rate, None);
        assert_eq!(item.qty, None);
        assert_eq!(item.discount, None);
        assert_eq!(item.mrp, None);
    }

    #[test]
    fn sort_is_used_verbatim_not_incremented() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![
            record(json!({})),
            record(json!({})),
            record(json!({"Section 2_Transaction sort": 9})),
            record(json!({"Section 2_Transaction sort": null})),
        ]);
        let sorts: Vec<i64> = n.normalize_page(1, &reply).iter().map(|i| i.sort).collect();
        assert_eq!(sorts, vec![1, 1, 9, 1]);
    }

    #[test]
    fn empty_hsn_is_backfilled_from_first_entry_for_every_item() {
        let tax = vec![TaxCodeEntry {
            code: "1234".into(),
            rate: Some(18),
        }];
        let mut n = Normalizer::new("x.pdf", tax, BackfillStrategy::FirstMatch);
        let page1 = ParsedReply::Records(vec![record(json!({"Section 2_Transaction hsn": ""}))]);
        let page2 = ParsedReply::Records(vec![record(json!({"Section 2_Transaction qty": 1}))]);

        let first = n.normalize_page(1, &page1).remove(0);
        let second = n.normalize_page(2, &page2).remove(0);

        assert_eq!(first.hsn.as_deref(), Some("1234"));
        assert_eq!(first.gst, Some(18.0));
        assert_eq!(second.hsn.as_deref(), Some("1234"));
        assert_eq!(second.gst, Some(18.0));
    }

    #[test]
    fn first_match_gst_skips_entries_without_rate() {
        let tax = vec![
            TaxCodeEntry {
                code: "1111".into(),
                rate: None,
            },
            TaxCodeEntry {
                code: "2222".into(),
                rate: Some(0),
            },
            TaxCodeEntry {
                code: "3333".into(),
                rate: Some(28),
            },
        ];
        let mut n = Normalizer::new("x.pdf", tax, BackfillStrategy::FirstMatch);
        let item = n
            .normalize_page(1, &ParsedReply::Single(record(json!({}))))
            .remove(0);
        assert_eq!(item.hsn.as_deref(), Some("1111"));
        assert_eq!(item.gst, Some(28.0));
    }

    #[test]
    fn model_values_are_not_overwritten_by_backfill() {
        let tax = codes();
        let mut n = Normalizer::new("x.pdf", tax, BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "Section 2_Transaction hsn": "9999",
            "Section 2_Transaction gst": 5
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.hsn.as_deref(), Some("9999"));
        assert_eq!(item.gst, Some(5.0));
    }

    #[test]
    fn positional_backfill_walks_the_list_across_pages() {
        let tax = codes();
        let mut n = Normalizer::new("x.pdf", tax, BackfillStrategy::Positional);
        let one = ParsedReply::Records(vec![record(json!({}))]);

        let a = n.normalize_page(1, &one).remove(0);
        let b = n.normalize_page(2, &one).remove(0);
        let c = n.normalize_page(3, &one).remove(0);

        assert_eq!(a.hsn.as_deref(), Some("1234"));
        assert_eq!(a.gst, Some(18.0));
        assert_eq!(b.hsn.as_deref(), Some("5678"));
        assert_eq!(b.gst, Some(5.0));
        assert_eq!(c.hsn, None);
        assert_eq!(c.gst, None);
    }

    #[test]
    fn parse_failure_yields_one_bare_placeholder() {
        let tax = codes();
        let mut n = Normalizer::new("broken.pdf", tax, BackfillStrategy::FirstMatch);
        let items = n.normalize_page(
            3,
            &ParsedReply::Failure {
                detail: "invalid JSON".into(),
            },
        );
        assert_eq!(items.len(), 1);
        let p = &items[0];
        assert_eq!(p.sort, 1);
        assert_eq!(p.page_number, 3);
        assert_eq!(p.title, "broken.pdf");
        assert!(p.is_identity_only());
    }

    #[test]
    fn single_object_is_mapped_like_an_array_element() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let items = n.normalize_page(
            2,
            &ParsedReply::Single(record(json!({"Section 2_Transaction rate": "45"}))),
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].rate, Some(45.0));
    }

    #[test]
    fn snake_case_and_case_insensitive_keys() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "section_2_transaction_mrp": "99.5",
            "SECTION 2_TRANSACTION QTY": 3,
            " hsn ": 30049099
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.mrp, Some(99.5));
        assert_eq!(item.qty, Some(3.0));
        assert_eq!(item.hsn.as_deref(), Some("30049099"));
    }

    #[test]
    fn nested_metadata_is_kept_as_json_text() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "doc_meta_data": {"vendor": "ACME"},
            "folder_id": 12
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.doc_meta_data.as_deref(), Some(r#"{"vendor":"ACME"}"#));
        assert_eq!(item.folder_id.as_deref(), Some("12"));
    }

    #[test]
    fn empty_alias_falls_through_to_the_next_one() {
        let mut n = Normalizer::new("x.pdf", Vec::new(), BackfillStrategy::FirstMatch);
        let reply = ParsedReply::Records(vec![record(json!({
            "Section 2_Transaction qty": null,
            "qty": 4,
            "Section 2_Transaction hsn": "",
            "section_2_transaction_hsn": "3004",
            "title": "  "
        }))]);
        let item = &n.normalize_page(1, &reply)[0];
        assert_eq!(item.qty, Some(4.0));
        assert_eq!(item.hsn.as_deref(), Some("3004"));
        assert_eq!(item.title, "x.pdf");
    }
}
