//! Result records returned to callers.

use schemars::JsonSchema;

use crate::prelude::*;

/// Separator inserted between page texts in [`DocumentResult::full_text`].
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// An axis-aligned pixel rectangle on a page bitmap.
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    /// The smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.w).max(other.x + other.w);
        let bottom = (self.y + self.h).max(other.y + other.h);
        BoundingBox {
            x,
            y,
            w: right - x,
            h: bottom - y,
        }
    }
}

/// One recognized run of text on a page.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TextBlock {
    /// The recognized text.
    pub text: String,

    /// Where the text sits on the page bitmap, in pixels.
    pub bbox: BoundingBox,

    /// Engine confidence, normalized to `0.0..=1.0`.
    pub confidence: f64,

    /// The position of this block in the page's reading order.
    pub rank: usize,
}

/// The result of processing one page.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PageResult {
    /// The 0-based page index within the document.
    pub index: usize,

    /// The text of all blocks on this page, in reading order.
    pub text: String,

    /// The mean block confidence. Omitted for failed pages and for pages
    /// with no recognized blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// The recognized blocks, in reading order.
    pub blocks: Vec<TextBlock>,

    /// Did this page fail to rasterize or recognize?
    pub failed: bool,
}

impl PageResult {
    /// Build the result for a successfully recognized page.
    ///
    /// Engine confidences outside `0.0..=1.0` are clamped into range, with a
    /// warning pushed onto `warnings` for the page. Zero blocks is a valid
    /// outcome, not a failure.
    pub fn from_blocks(
        index: usize,
        mut blocks: Vec<TextBlock>,
        warnings: &mut Vec<String>,
    ) -> PageResult {
        let mut clamped = false;
        for block in &mut blocks {
            if !(0.0..=1.0).contains(&block.confidence) {
                block.confidence = if block.confidence.is_nan() {
                    0.0
                } else {
                    block.confidence.clamp(0.0, 1.0)
                };
                clamped = true;
            }
        }
        if clamped {
            warnings.push(format!(
                "page {index}: engine confidence outside 0.0-1.0 was clamped"
            ));
        }

        let text = blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let confidence = if blocks.is_empty() {
            None
        } else {
            Some(blocks.iter().map(|block| block.confidence).sum::<f64>() / blocks.len() as f64)
        };
        PageResult {
            index,
            text,
            confidence,
            blocks,
            failed: false,
        }
    }

    /// Build the placeholder result for a page that failed.
    pub fn failed(index: usize) -> PageResult {
        PageResult {
            index,
            text: String::new(),
            confidence: None,
            blocks: vec![],
            failed: true,
        }
    }
}

/// The overall outcome of a processing run.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page was recognized.
    Success,

    /// Some pages were recognized; others failed or were never reached.
    Partial,

    /// No page was recognized.
    Failed,
}

/// The result of processing one document.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DocumentResult {
    /// The unique ID assigned to this processing run.
    pub document_id: String,

    /// The overall outcome.
    pub status: DocumentStatus,

    /// Per-page results, sorted by page index.
    pub pages: Vec<PageResult>,

    /// All page texts joined with [`PAGE_BREAK`], failed pages included as
    /// empty segments.
    pub full_text: String,

    /// The mean of per-page confidences, over pages that have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Anything non-fatal the caller should know about.
    pub warnings: Vec<String>,
}
