//! Recognition engine interface.

pub mod tesseract;

use crate::{prelude::*, rasterize::PageBitmap, result::TextBlock};

/// Interface to a recognition backend.
///
/// Implementations must be safe to share across concurrent page tasks; the
/// pipeline holds one engine behind an `Arc` and uses it for every page.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text on one page bitmap.
    ///
    /// Returns the recognized blocks in reading order, with raw engine
    /// confidences normalized to `0.0..=1.0`. Zero blocks is a valid result
    /// (a blank page), not an error.
    async fn recognize(&self, bitmap: &PageBitmap, language_hint: &str) -> Result<Vec<TextBlock>>;
}
