//! The processing error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors that can abort or degrade a processing run.
///
/// Most of these are document-scoped and abort the run. The two page-scoped
/// variants, [`ProcessingError::PageRaster`] and
/// [`ProcessingError::Recognition`], are recovered by the pipeline: they mark
/// a single page as failed and the run continues.
///
/// Underlying causes are flattened into `reason` strings rather than chained,
/// so the taxonomy stays stable no matter which backend produced the failure.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The payload size or page count exceeds a configured limit.
    #[error("document too large: {actual} {dimension} exceeds the limit of {limit}")]
    DocumentTooLarge {
        actual: u64,
        limit: u64,
        /// Which limit was hit, either `"bytes"` or `"pages"`.
        dimension: &'static str,
    },

    /// The payload could not be opened or its pages could not be counted.
    #[error("corrupt document: {reason}")]
    CorruptDocument { reason: String },

    /// The payload is in a format we do not support.
    #[error("unsupported format: {detected}")]
    UnsupportedFormat { detected: String },

    /// A single page could not be rasterized.
    #[error("page {page} could not be rasterized: {reason}")]
    PageRaster { page: usize, reason: String },

    /// A single page could not be recognized.
    #[error("page {page} could not be recognized: {reason}")]
    Recognition { page: usize, reason: String },

    /// The whole-document budget expired before any page completed.
    #[error("document processing timed out after {budget:?}")]
    DocumentTimeout { budget: Duration },

    /// The recognition backend could not be used at all.
    #[error("internal engine failure: {reason}")]
    InternalEngineFailure { reason: String },
}

impl ProcessingError {
    /// Is this error scoped to a single page rather than the whole document?
    pub fn is_page_scoped(&self) -> bool {
        matches!(
            self,
            ProcessingError::PageRaster { .. } | ProcessingError::Recognition { .. }
        )
    }

    /// The page this error is scoped to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            ProcessingError::PageRaster { page, .. }
            | ProcessingError::Recognition { page, .. } => Some(*page),
            _ => None,
        }
    }
}
