//! Image encoding: `DynamicImage` → base64 PNG for the model request.
//!
//! PNG keeps rendered text crisp; JPEG artefacts around small digits are the
//! fastest way to get a wrong quantity or HSN code back from a vision model.

use crate::error::InvoiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME_TYPE: &str = "image/png";

/// A page raster ready to attach to a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed.
    pub page_number: usize,
    /// Base64 (standard alphabet, padded) PNG bytes.
    pub data: String,
    pub mime_type: &'static str,
}

/// Encode a rendered page as a base64 PNG.
pub fn encode_page(page_number: usize, img: &DynamicImage) -> Result<PageImage, InvoiceError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| InvoiceError::RasterisationFailed {
            page: page_number,
            detail: format!("PNG encoding failed: {}", e),
        })?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", page_number, data.len());

    Ok(PageImage {
        page_number,
        data,
        mime_type: PNG_MIME_TYPE,
    })
}
