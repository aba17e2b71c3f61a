//! Prompts sent to the extraction model.
//!
//! Every request carries three parts in order: [`INVOICE_SYSTEM_PROMPT`], the
//! page image, and [`EXTRACTION_INSTRUCTION`]. The label names in the system
//! prompt (`"Section 2_Transaction rate"`, …) are the keys the normalizer
//! looks up, so the two must change together.
//!
//! Callers can override either string via
//! [`crate::config::ExtractionConfig::system_prompt`] and
//! [`crate::config::ExtractionConfig::instruction`].

/// Default system prompt describing the per-line-item JSON shape.
pub const INVOICE_SYSTEM_PROMPT: &str = r#"You are an expert in understanding invoices. Analyze the invoice image and extract ALL line items/transactions from the invoice.
Extract GST rate from PDF using HSN code and fill Section 2_Transaction gst column automatically.
For EACH line item in the invoice, create a separate JSON object with this structure:

{
    "title": "[PDF filename or invoice title]",
    "doc_id": "[generate a unique ID or extract from invoice]",
    "type": "[invoice type like 'Tax Invoice']",
    "uploaded_from": "web",
    "user_doc_id": "[extract if available]",
    "doc_meta_data": "[extract if available]",
    "folder_name": "[extract if available]",
    "folder_id": "[extract if available]",
    "status": "reviewing",
    "created_at_iso": "[current date in ISO format]",
    "modified_at_iso": "[current date in ISO format]",
    "Section 2_Transaction sort": "[line item number/sequence]",
    "Section 2_Transaction number": "[product/part number]",
    "Section 2_Transaction rate": "[unit price as number]",
    "Section 2_Transaction qty": "[quantity as number]",
    "Section 2_Transaction gst": "[GST percentage as number]",
    "Section 2_Transaction discount": "[discount if any]",
    "Section 2_Transaction hsn": "[HSN code]",
    "Section 2_Transaction MRP": "[total amount for this line item]"
}

IMPORTANT:
- Return a JSON ARRAY containing ALL line items from the invoice
- Each line item should be a separate object in the array
- Extract ALL products/services listed in the invoice
- Use consistent metadata for all line items from the same invoice
- Generate sequential numbers for 'Section 2_Transaction sort' (1, 2, 3, etc.)

Return ONLY the JSON array without any additional text."#;

/// Default user instruction sent after the page image.
pub const EXTRACTION_INSTRUCTION: &str = "Extract invoice information as JSON";
