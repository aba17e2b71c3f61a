//! Tax-code scanner: pair HSN-like codes with nearby GST percentages.
//!
//! Works on the PDF text layer, not on the model output. Each line holding a
//! 4–8 digit token yields one [`TaxCodeEntry`]; its rate is the first
//! `NN%` token on the same line, else on one of the next two lines of the
//! same page. The result is a flat list in reading order and says nothing
//! about which line item a code belongs to.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lines after the code line that may still hold its rate.
const RATE_LOOKAHEAD_LINES: usize = 2;

static RE_TAX_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]{4,8}\b").unwrap());
static RE_RATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]{1,2})\s*%").unwrap());

/// One scanned (code, rate) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxCodeEntry {
    pub code: String,
    pub rate: Option<u32>,
}

impl TaxCodeEntry {
    /// Rate as a line-item number, treating `0%` as absent.
    pub fn nonzero_rate(&self) -> Option<f64> {
        self.rate.filter(|r| *r != 0).map(f64::from)
    }
}

/// Scan every page's text, in page order.
pub fn scan_pages<S: AsRef<str>>(pages: &[S]) -> Vec<TaxCodeEntry> {
    pages
        .iter()
        .flat_map(|page| scan_page(page.as_ref()))
        .collect()
}

/// Scan a single page. Rate lookahead stops at the end of the page.
pub fn scan_page(text: &str) -> Vec<TaxCodeEntry> {
    let lines: Vec<&str> = text.lines().collect();
    let mut entries = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(code) = RE_TAX_CODE.find(line) else {
            continue;
        };

        let rate = find_rate(line).or_else(|| {
            lines
                .iter()
                .skip(idx + 1)
                .take(RATE_LOOKAHEAD_LINES)
                .find_map(|next| find_rate(next))
        });

        entries.push(TaxCodeEntry {
            code: code.as_str().to_string(),
            rate,
        });
    }

    entries
}

fn find_rate(line: &str) -> Option<u32> {
    RE_RATE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
