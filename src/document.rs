//! Document loading and page enumeration.

use std::{
    collections::BTreeMap,
    io::Cursor,
    sync::{Arc, Mutex},
};

use tempfile::NamedTempFile;
use tiff::decoder::Decoder;
use tokio::process::Command;
use uuid::Uuid;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    config::ProcessOptions,
    error::ProcessingError,
    prelude::*,
};

/// How a payload is organized into pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentKind {
    /// A PDF, rasterized one page at a time with poppler.
    Pdf,

    /// A TIFF, which may hold several images.
    Tiff,

    /// A single raster image (PNG or JPEG).
    SingleImage,
}

/// The lifecycle of one processing run.
///
/// Transitions move strictly forward in declaration order, except that any
/// state may move to `Failed`. The rasterizing and recognizing phases
/// overlap per page; the document-level state records the furthest phase
/// entered.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ProcessingState {
    Received,
    Loading,
    Rasterizing,
    Recognizing,
    Aggregating,
    Done,
    Failed,
}

/// A loaded document, ready for rasterization.
///
/// Loading validates the payload and counts pages, but never decodes pixel
/// data. The payload is held in memory for the lifetime of the run; PDF
/// payloads are additionally spooled to a temporary file so the poppler
/// tools can read them.
#[derive(Debug)]
pub struct Document {
    /// The unique ID assigned to this processing run.
    pub id: String,

    /// What kind of payload we loaded.
    pub kind: DocumentKind,

    /// The raw payload bytes, shared with rasterization tasks.
    pub payload: Arc<Vec<u8>>,

    /// The media type the caller claimed to be sending, if any.
    pub declared_type: String,

    /// The media type we actually detected.
    pub detected_type: String,

    /// The number of pages in the document.
    pub page_count: usize,

    /// Warnings collected while loading.
    pub warnings: Vec<String>,

    /// The on-disk copy of a PDF payload. Deleted when the document is
    /// dropped.
    spool: Option<NamedTempFile>,

    state: Mutex<ProcessingState>,
}

impl Document {
    /// Open a payload and work out how many pages it holds.
    ///
    /// The real content type is sniffed from the payload bytes; a declared
    /// type that disagrees produces a warning, never an error.
    #[instrument(level = "debug", skip_all, fields(declared_type = declared_type, size = payload.len()))]
    pub async fn load(
        payload: Vec<u8>,
        declared_type: &str,
        options: &ProcessOptions,
    ) -> Result<Document, ProcessingError> {
        if payload.is_empty() {
            return Err(ProcessingError::CorruptDocument {
                reason: "empty payload".to_owned(),
            });
        }
        if payload.len() as u64 > options.max_payload_bytes {
            return Err(ProcessingError::DocumentTooLarge {
                actual: payload.len() as u64,
                limit: options.max_payload_bytes,
                dimension: "bytes",
            });
        }

        // Never trust the declared type.
        let detected_type = match infer::get(&payload) {
            Some(kind) => kind.mime_type().to_owned(),
            None => {
                return Err(ProcessingError::UnsupportedFormat {
                    detected: "unknown".to_owned(),
                });
            }
        };
        let kind = match detected_type.as_str() {
            "application/pdf" => DocumentKind::Pdf,
            "image/tiff" => DocumentKind::Tiff,
            "image/png" | "image/jpeg" => DocumentKind::SingleImage,
            other => {
                return Err(ProcessingError::UnsupportedFormat {
                    detected: other.to_owned(),
                });
            }
        };

        let mut warnings = vec![];
        if !declared_type.is_empty() && declared_type != detected_type {
            warnings.push(format!(
                "declared type {declared_type} does not match detected type {detected_type}"
            ));
        }

        let mut document = Document {
            id: Uuid::new_v4().to_string(),
            kind,
            payload: Arc::new(payload),
            declared_type: declared_type.to_owned(),
            detected_type,
            page_count: 0,
            warnings,
            spool: None,
            state: Mutex::new(ProcessingState::Received),
        };
        document.advance(ProcessingState::Loading);

        if document.kind == DocumentKind::Pdf {
            document.spool = Some(
                spool_payload(&document.payload)
                    .await
                    .map_err(|err| ProcessingError::InternalEngineFailure {
                        reason: format!("{err:#}"),
                    })?,
            );
        }

        document.page_count = match document.kind {
            DocumentKind::Pdf => {
                let spool_path = document
                    .spool
                    .as_ref()
                    .map(|spool| spool.path().to_owned())
                    .ok_or_else(|| ProcessingError::InternalEngineFailure {
                        reason: "PDF payload was not spooled".to_owned(),
                    })?;
                pdf_page_count(&spool_path)
                    .await
                    .map_err(|err| ProcessingError::CorruptDocument {
                        reason: format!("{err:#}"),
                    })?
            }
            DocumentKind::Tiff => tiff_page_count(document.payload.clone())
                .await
                .map_err(|err| ProcessingError::CorruptDocument {
                    reason: format!("{err:#}"),
                })?,
            DocumentKind::SingleImage => 1,
        };
        if document.page_count == 0 {
            return Err(ProcessingError::CorruptDocument {
                reason: "document has no pages".to_owned(),
            });
        }

        debug!(
            id = %document.id,
            detected_type = %document.detected_type,
            pages = document.page_count,
            "loaded document",
        );
        Ok(document)
    }

    /// The on-disk path of a spooled PDF payload.
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_ref().map(|spool| spool.path())
    }

    /// The current processing state.
    pub fn state(&self) -> ProcessingState {
        *self.state.lock().expect("lock poisoned")
    }

    /// Advance the processing state.
    ///
    /// Transitions are forward-only, except that any state may move to
    /// [`ProcessingState::Failed`].
    pub fn advance(&self, next: ProcessingState) {
        let mut state = self.state.lock().expect("lock poisoned");
        debug_assert!(
            next == ProcessingState::Failed || *state < next,
            "cannot move from {:?} to {:?}",
            *state,
            next,
        );
        trace!(id = %self.id, from = ?*state, to = ?next, "document state change");
        *state = next;
    }
}

/// Write a payload to a temporary file for tools that want a path.
async fn spool_payload(payload: &Arc<Vec<u8>>) -> Result<NamedTempFile> {
    let spool = NamedTempFile::with_prefix("scandoc")
        .context("failed to create spool file")?;
    tokio::fs::write(spool.path(), payload.as_slice())
        .await
        .context("failed to write spool file")?;
    Ok(spool)
}

/// Get the number of pages in a PDF file, without rasterizing anything.
async fn pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // `pdfinfo` prints "key: value" lines.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let properties = stdout
        .lines()
        .filter_map(|line| {
            line.split_once(':')
                .map(|(key, value)| (key.trim(), value.trim()))
        })
        .collect::<BTreeMap<_, _>>();
    properties
        .get("Pages")
        .context("pdfinfo did not report a page count")?
        .parse::<usize>()
        .context("pdfinfo reported an unparseable page count")
}

/// Count the directories in a TIFF payload, without decoding pixel data.
async fn tiff_page_count(payload: Arc<Vec<u8>>) -> Result<usize> {
    spawn_blocking_propagating_panics(move || {
        let mut decoder =
            Decoder::new(Cursor::new(&payload[..])).context("failed to open TIFF payload")?;
        // The first directory is read when the decoder is opened.
        let mut count = 1;
        while decoder.more_images() {
            decoder
                .next_image()
                .with_context(|| format!("failed to read TIFF directory {count}"))?;
            count += 1;
        }
        Ok(count)
    })
    .await
}
