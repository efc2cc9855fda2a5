//! Turn scanned PDFs and images into page-ordered OCR text.
//!
//! The [`pipeline::Pipeline`] takes a raw document payload, rasterizes each
//! page, runs a recognition engine over the page bitmaps concurrently, and
//! reassembles the per-page results in page order:
//!
//! ```no_run
//! use scandoc::{ProcessOptions, Pipeline, engine::tesseract::TesseractEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = TesseractEngine::new().await?;
//! let pipeline = Pipeline::new(engine);
//! let payload = tokio::fs::read("scan.pdf").await?;
//! let result = pipeline
//!     .process(payload, "application/pdf", &ProcessOptions::default())
//!     .await?;
//! println!("{}", result.full_text);
//! # Ok(())
//! # }
//! ```
//!
//! Individual pages that cannot be processed degrade the result to
//! `partial` instead of failing the document; see [`error::ProcessingError`]
//! for the failures that abort a run outright.

pub mod aggregate;
pub mod async_utils;
pub mod cmd;
pub mod config;
pub mod cpu_limit;
pub mod document;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod rasterize;
pub mod result;
#[cfg(test)]
mod test_util;
pub mod ui;

pub use self::{
    config::ProcessOptions,
    engine::OcrEngine,
    error::ProcessingError,
    pipeline::Pipeline,
    result::{DocumentResult, DocumentStatus, PageResult, TextBlock},
};
