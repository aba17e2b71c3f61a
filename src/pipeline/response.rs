//! Model-reply parsing: dig a JSON array or object out of free-form text.
//!
//! Models wrap their JSON in prose, markdown fences or apologies despite the
//! prompt. Rather than cleaning the text, we slice from the first opening
//! bracket to the last closing one and hand that to `serde_json`. Bracket
//! balance is not checked, so a stray `]` in trailing commentary widens the
//! slice and the decode fails; that page then degrades to a placeholder.

use serde_json::{Map, Value};
use tracing::warn;

/// One line item as the model wrote it: label → arbitrary JSON value.
pub type RawModelRecord = Map<String, Value>;

/// What a model reply decoded to.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    /// A JSON array; non-object elements have been dropped.
    Records(Vec<RawModelRecord>),
    /// A bare JSON object.
    Single(RawModelRecord),
    /// No decodable JSON; `detail` says why.
    Failure { detail: String },
}

impl ParsedReply {
    pub fn is_failure(&self) -> bool {
        matches!(self, ParsedReply::Failure { .. })
    }
}

/// Parse a raw model reply.
pub fn parse_reply(text: &str) -> ParsedReply {
    let Some(slice) = json_slice(text) else {
        return ParsedReply::Failure {
            detail: "no JSON array or object found in model output".to_string(),
        };
    };

    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(values)) => {
            let total = values.len();
            let records: Vec<RawModelRecord> = values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            if total > 0 && records.is_empty() {
                return ParsedReply::Failure {
                    detail: format!("array of {total} element(s) held no JSON objects"),
                };
            }
            if records.len() < total {
                warn!(
                    "Dropped {} non-object element(s) from model array",
                    total - records.len()
                );
            }
            ParsedReply::Records(records)
        }
        Ok(Value::Object(map)) => ParsedReply::Single(map),
        Ok(other) => ParsedReply::Failure {
            detail: format!("expected a JSON array or object, got {}", json_kind(&other)),
        },
        Err(e) => ParsedReply::Failure {
            detail: format!("invalid JSON: {e}"),
        },
    }
}

/// Locate `[ … ]`, falling back to `{ … }` only when the text has no `[`.
fn json_slice(text: &str) -> Option<&str> {
    let (open, close) = if text.contains('[') { ('[', ']') } else { ('{', '}') };
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
