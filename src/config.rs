//! Options controlling a processing run.

use std::time::Duration;

use clap::Args;

/// The lowest DPI we will rasterize at.
pub const MIN_DPI: u32 = 72;

/// The highest DPI we will rasterize at.
pub const MAX_DPI: u32 = 600;

/// The default rasterization DPI.
pub const DEFAULT_DPI: u32 = 200;

/// The default language hint passed to the OCR engine.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// The largest payload we accept by default (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// The default per-page budget, in seconds.
pub const DEFAULT_PER_PAGE_TIMEOUT_SECS: u64 = 120;

/// The default whole-document budget, in seconds.
pub const DEFAULT_DOCUMENT_TIMEOUT_SECS: u64 = 600;

/// Options controlling one processing run.
///
/// These double as CLI arguments for the `process` subcommand. Library
/// callers can start from [`ProcessOptions::default`], which matches the CLI
/// defaults.
#[derive(Args, Clone, Debug)]
pub struct ProcessOptions {
    /// The DPI to rasterize pages at. Values outside 72-600 are clamped.
    #[clap(long, default_value_t = DEFAULT_DPI)]
    pub dpi: u32,

    /// The language hint to pass to the OCR engine.
    #[clap(long = "lang", default_value = DEFAULT_LANGUAGE)]
    pub language_hint: String,

    /// Reject documents with more than this many pages.
    #[clap(long)]
    pub max_pages: Option<u64>,

    /// Reject payloads larger than this many bytes.
    #[clap(long, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: u64,

    /// Give up on a single page after this many seconds. 0 disables the
    /// limit.
    #[clap(long, default_value_t = DEFAULT_PER_PAGE_TIMEOUT_SECS)]
    pub per_page_timeout: u64,

    /// Give up on the whole document after this many seconds. 0 disables
    /// the limit.
    #[clap(long, default_value_t = DEFAULT_DOCUMENT_TIMEOUT_SECS)]
    pub document_timeout: u64,

    /// The maximum number of pages to process at once. Defaults to the
    /// number of logical CPUs.
    #[clap(short = 'j', long = "jobs")]
    pub max_concurrency: Option<usize>,
}

impl ProcessOptions {
    /// The DPI to rasterize at, clamped to the supported range.
    ///
    /// Pushes a warning onto `warnings` when the requested value was out of
    /// range.
    pub fn clamped_dpi(&self, warnings: &mut Vec<String>) -> u32 {
        if (MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            self.dpi
        } else {
            let clamped = self.dpi.clamp(MIN_DPI, MAX_DPI);
            warnings.push(format!(
                "requested {} dpi is outside {MIN_DPI}-{MAX_DPI}, using {clamped} dpi",
                self.dpi
            ));
            clamped
        }
    }

    /// The per-page budget, if one is set.
    pub fn per_page_budget(&self) -> Option<Duration> {
        (self.per_page_timeout > 0).then(|| Duration::from_secs(self.per_page_timeout))
    }

    /// The whole-document budget, if one is set.
    pub fn document_budget(&self) -> Option<Duration> {
        (self.document_timeout > 0).then(|| Duration::from_secs(self.document_timeout))
    }

    /// How many pages may be in flight at once.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            language_hint: DEFAULT_LANGUAGE.to_owned(),
            max_pages: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            per_page_timeout: DEFAULT_PER_PAGE_TIMEOUT_SECS,
            document_timeout: DEFAULT_DOCUMENT_TIMEOUT_SECS,
            max_concurrency: None,
        }
    }
}
