//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//!                  ┌──▶ taxcodes (page text) ─────────────────┐
//! input ──▶ reader ┤                                           ▼
//! (URL/path) (pdfium) └──▶ encode ──▶ llm ──▶ response ──▶ normalize
//!                          (base64)   (VLM)   (JSON slice)   (schema + backfill)
//! ```
//!
//! 1. [`input`]: resolve a path or URL to PDF bytes and a filename
//! 2. [`reader`]: page text and page rasters; pdfium work runs in
//!    `spawn_blocking`
//! 3. [`taxcodes`]: pair HSN-like codes with nearby GST percentages
//! 4. [`encode`]: PNG-encode and base64-wrap each page image
//! 5. [`llm`]: the model call with optional retry and timeout
//! 6. [`response`]: dig the JSON array or object out of the reply
//! 7. [`normalize`]: map loose records onto the line-item schema

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod reader;
pub mod response;
pub mod taxcodes;
