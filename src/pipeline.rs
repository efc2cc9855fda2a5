//! The processing pipeline.

use std::{sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::time::{Instant, timeout, timeout_at};

use crate::{
    aggregate::aggregate,
    config::ProcessOptions,
    document::{Document, ProcessingState},
    engine::OcrEngine,
    error::ProcessingError,
    prelude::*,
    rasterize::rasterize_page,
    result::{DocumentResult, PageResult},
};

/// Coordinates one processing run per [`Pipeline::process`] call.
///
/// The pipeline owns nothing but the recognition engine, which is shared
/// across runs and across the concurrent page tasks within a run. Runs are
/// independent; a single pipeline can serve many callers at once.
pub struct Pipeline {
    engine: Arc<dyn OcrEngine>,
}

impl Pipeline {
    /// Create a pipeline around a recognition engine.
    pub fn new(engine: Arc<dyn OcrEngine>) -> Pipeline {
        Pipeline { engine }
    }

    /// Process one document payload end to end.
    ///
    /// Pages are rasterized and recognized concurrently, up to the
    /// configured limit, and reassembled in page order. Page-scoped failures
    /// degrade individual pages and downgrade the status; document-scoped
    /// failures abort the run with a typed error.
    #[instrument(level = "debug", skip_all, fields(declared_type = declared_type, size = payload.len()))]
    pub async fn process(
        &self,
        payload: Vec<u8>,
        declared_type: &str,
        options: &ProcessOptions,
    ) -> Result<DocumentResult, ProcessingError> {
        // The document budget covers loading as well as page processing, so
        // the loader runs under the same deadline as the page stream. A load
        // that outlasts the whole budget has completed zero pages, which is
        // the timeout-as-error case.
        let budget = options
            .document_budget()
            .map(|budget| (budget, Instant::now() + budget));

        let load = Document::load(payload, declared_type, options);
        let mut document = match budget {
            Some((budget, deadline)) => match timeout_at(deadline, load).await {
                Ok(loaded) => loaded?,
                Err(_) => return Err(ProcessingError::DocumentTimeout { budget }),
            },
            None => load.await?,
        };
        let mut warnings = std::mem::take(&mut document.warnings);
        let dpi = options.clamped_dpi(&mut warnings);

        // Check the page limit before rasterizing anything.
        if let Some(max_pages) = options.max_pages
            && document.page_count as u64 > max_pages
        {
            document.advance(ProcessingState::Failed);
            return Err(ProcessingError::DocumentTooLarge {
                actual: document.page_count as u64,
                limit: max_pages,
                dimension: "pages",
            });
        }

        // Fan out one task per page. The stream is lazy; nothing runs until
        // we start draining it.
        document.advance(ProcessingState::Rasterizing);
        let document = &document;
        let page_budget = options.per_page_budget();
        let mut units = futures::stream::iter(0..document.page_count)
            .map(|page_index| {
                let engine = self.engine.clone();
                process_page(
                    engine,
                    document,
                    page_index,
                    dpi,
                    options.language_hint.as_str(),
                    page_budget,
                )
            })
            .buffer_unordered(options.effective_concurrency());

        document.advance(ProcessingState::Recognizing);
        let mut pages = Vec::with_capacity(document.page_count);
        let mut timed_out = false;
        loop {
            let next = match budget {
                Some((_, deadline)) => match timeout_at(deadline, units.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => units.next().await,
            };
            match next {
                Some((page, page_warnings)) => {
                    warnings.extend(page_warnings);
                    pages.push(page);
                }
                None => break,
            }
        }
        // Dropping the stream cancels any pages still in flight.
        drop(units);

        if timed_out
            && let Some((budget, _)) = budget
        {
            if pages.is_empty() {
                document.advance(ProcessingState::Failed);
                return Err(ProcessingError::DocumentTimeout { budget });
            }
            warnings.push(format!(
                "document budget of {budget:?} expired with {}/{} pages processed",
                pages.len(),
                document.page_count
            ));
        }

        document.advance(ProcessingState::Aggregating);
        let result = aggregate(&document.id, document.page_count, pages, warnings);
        document.advance(ProcessingState::Done);
        debug!(id = %document.id, status = ?result.status, "processed document");
        Ok(result)
    }
}

/// Rasterize and recognize one page, under the page budget.
///
/// Never fails: a page that cannot be processed becomes a failed
/// [`PageResult`] plus a warning, and the rest of the document carries on.
#[instrument(level = "debug", skip_all, fields(id = %document.id, page = page_index))]
async fn process_page(
    engine: Arc<dyn OcrEngine>,
    document: &Document,
    page_index: usize,
    dpi: u32,
    language_hint: &str,
    budget: Option<Duration>,
) -> (PageResult, Vec<String>) {
    let task = process_page_inner(engine, document, page_index, dpi, language_hint);
    let outcome = match budget {
        Some(budget) => match timeout(budget, task).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProcessingError::Recognition {
                page: page_index,
                reason: format!("page exceeded its {budget:?} budget"),
            }),
        },
        None => task.await,
    };
    match outcome {
        Ok((page, warnings)) => (page, warnings),
        Err(err) => {
            warn!(page = page_index, "{err}");
            (PageResult::failed(page_index), vec![err.to_string()])
        }
    }
}

/// The fallible interior of [`process_page`].
async fn process_page_inner(
    engine: Arc<dyn OcrEngine>,
    document: &Document,
    page_index: usize,
    dpi: u32,
    language_hint: &str,
) -> Result<(PageResult, Vec<String>), ProcessingError> {
    let bitmap = rasterize_page(document, page_index, dpi)
        .await
        .map_err(|err| ProcessingError::PageRaster {
            page: page_index,
            reason: format!("{err:#}"),
        })?;

    let blocks = engine
        .recognize(&bitmap, language_hint)
        .await
        .map_err(|err| ProcessingError::Recognition {
            page: page_index,
            reason: format!("{err:#}"),
        })?;
    // Bitmaps can be large; release this one before assembling the result.
    drop(bitmap);

    let mut warnings = vec![];
    let page = PageResult::from_blocks(page_index, blocks, &mut warnings);
    Ok((page, warnings))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use super::*;
    use crate::{
        rasterize::PageBitmap,
        result::{BoundingBox, DocumentStatus, TextBlock},
        test_util::{png_bytes, tiff_bytes, tiff_bytes_with_cmyk_pages},
    };

    fn block_for(bitmap: &PageBitmap, confidence: f64) -> TextBlock {
        TextBlock {
            text: format!("page {}", bitmap.page_index),
            bbox: BoundingBox {
                x: 0,
                y: 0,
                w: bitmap.width,
                h: 12,
            },
            confidence,
            rank: 0,
        }
    }

    /// Engine that recognizes every page as "page N".
    struct StaticEngine;

    #[async_trait]
    impl OcrEngine for StaticEngine {
        async fn recognize(
            &self,
            bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            Ok(vec![block_for(bitmap, 0.9)])
        }
    }

    /// Engine that fails on one specific page.
    struct FailOnPage(usize);

    #[async_trait]
    impl OcrEngine for FailOnPage {
        async fn recognize(
            &self,
            bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            if bitmap.page_index == self.0 {
                bail!("synthetic recognition failure");
            }
            Ok(vec![block_for(bitmap, 0.9)])
        }
    }

    /// Engine that stalls on one specific page.
    struct SleepOnPage {
        slow_page: usize,
        delay: Duration,
    }

    #[async_trait]
    impl OcrEngine for SleepOnPage {
        async fn recognize(
            &self,
            bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            if bitmap.page_index == self.slow_page {
                tokio::time::sleep(self.delay).await;
            }
            Ok(vec![block_for(bitmap, 0.9)])
        }
    }

    /// Engine that counts how many times it was called.
    struct CountingEngine(Arc<AtomicUsize>);

    #[async_trait]
    impl OcrEngine for CountingEngine {
        async fn recognize(
            &self,
            bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![block_for(bitmap, 0.9)])
        }
    }

    /// Engine that recognizes nothing at all.
    struct EmptyEngine;

    #[async_trait]
    impl OcrEngine for EmptyEngine {
        async fn recognize(
            &self,
            _bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            Ok(vec![])
        }
    }

    /// Engine that reports a fixed confidence for every page.
    struct FixedConfidence(f64);

    #[async_trait]
    impl OcrEngine for FixedConfidence {
        async fn recognize(
            &self,
            bitmap: &PageBitmap,
            _language_hint: &str,
        ) -> Result<Vec<TextBlock>> {
            Ok(vec![block_for(bitmap, self.0)])
        }
    }

    #[tokio::test]
    async fn pages_come_back_in_order() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let result = pipeline
            .process(tiff_bytes(3, 24, 16), "image/tiff", &ProcessOptions::default())
            .await?;
        assert_eq!(result.status, DocumentStatus::Success);
        assert_eq!(
            result.pages.iter().map(|page| page.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            result.full_text,
            "page 0\n\n--- Page Break ---\n\npage 1\n\n--- Page Break ---\n\npage 2"
        );
        assert!(result.warnings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn one_failing_page_degrades_to_partial() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(FailOnPage(1)));
        let result = pipeline
            .process(tiff_bytes(3, 24, 16), "image/tiff", &ProcessOptions::default())
            .await?;
        assert_eq!(result.status, DocumentStatus::Partial);
        assert!(result.pages[1].failed);
        assert!(!result.pages[0].failed);
        assert!(!result.pages[2].failed);
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("page 1"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn one_unrasterizable_page_degrades_to_partial() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let payload = tiff_bytes_with_cmyk_pages(&[false, true, false], 16, 10);
        let result = pipeline
            .process(payload, "image/tiff", &ProcessOptions::default())
            .await?;
        assert_eq!(result.status, DocumentStatus::Partial);
        assert!(result.pages[1].failed);
        assert_eq!(result.pages[1].text, "");
        assert!(!result.pages[0].failed);
        assert!(!result.pages[2].failed);
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("could not be rasterized"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_payload_is_corrupt() {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let err = pipeline
            .process(vec![], "application/pdf", &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::CorruptDocument { .. }));
    }

    #[tokio::test]
    async fn page_limit_rejects_before_any_recognition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(Arc::new(CountingEngine(calls.clone())));
        let options = ProcessOptions {
            max_pages: Some(2),
            ..Default::default()
        };
        let err = pipeline
            .process(tiff_bytes(3, 24, 16), "image/tiff", &options)
            .await
            .unwrap_err();
        match err {
            ProcessingError::DocumentTooLarge {
                actual,
                limit,
                dimension,
            } => {
                assert_eq!((actual, limit, dimension), (3, 2, "pages"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn document_timeout_keeps_completed_pages() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(SleepOnPage {
            slow_page: 1,
            delay: Duration::from_secs(3),
        }));
        let options = ProcessOptions {
            document_timeout: 1,
            max_concurrency: Some(1),
            ..Default::default()
        };
        let result = pipeline
            .process(tiff_bytes(3, 24, 16), "image/tiff", &options)
            .await?;
        assert_eq!(result.status, DocumentStatus::Partial);
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].index, 0);
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("document budget"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn document_timeout_with_no_pages_is_an_error() {
        let pipeline = Pipeline::new(Arc::new(SleepOnPage {
            slow_page: 0,
            delay: Duration::from_secs(3),
        }));
        let options = ProcessOptions {
            document_timeout: 1,
            max_concurrency: Some(1),
            ..Default::default()
        };
        let err = pipeline
            .process(tiff_bytes(2, 24, 16), "image/tiff", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::DocumentTimeout { .. }));
    }

    #[tokio::test]
    async fn page_timeout_only_fails_the_slow_page() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(SleepOnPage {
            slow_page: 1,
            delay: Duration::from_secs(3),
        }));
        let options = ProcessOptions {
            per_page_timeout: 1,
            document_timeout: 0,
            ..Default::default()
        };
        let result = pipeline
            .process(tiff_bytes(3, 24, 16), "image/tiff", &options)
            .await?;
        assert_eq!(result.status, DocumentStatus::Partial);
        assert!(result.pages[1].failed);
        assert!(!result.pages[0].failed);
        assert!(!result.pages[2].failed);
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("budget"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn processing_is_idempotent_for_fixed_inputs() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let payload = tiff_bytes(2, 24, 16);
        let options = ProcessOptions::default();
        let first = pipeline
            .process(payload.clone(), "image/tiff", &options)
            .await?;
        let second = pipeline.process(payload, "image/tiff", &options).await?;
        // Document IDs are per-run; everything else must match.
        assert_eq!(first.status, second.status);
        assert_eq!(first.full_text, second.full_text);
        assert_eq!(first.pages, second.pages);
        Ok(())
    }

    #[tokio::test]
    async fn blank_pages_are_valid() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(EmptyEngine));
        let result = pipeline
            .process(png_bytes(16, 16), "image/png", &ProcessOptions::default())
            .await?;
        assert_eq!(result.status, DocumentStatus::Success);
        assert_eq!(result.full_text, "");
        assert_eq!(result.confidence, None);
        Ok(())
    }

    #[tokio::test]
    async fn engine_confidence_is_clamped_with_a_warning() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(FixedConfidence(1.5)));
        let result = pipeline
            .process(png_bytes(16, 16), "image/png", &ProcessOptions::default())
            .await?;
        assert_eq!(result.status, DocumentStatus::Success);
        assert_eq!(result.pages[0].blocks[0].confidence, 1.0);
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("confidence"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn loader_warnings_reach_the_result() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let result = pipeline
            .process(png_bytes(16, 16), "application/pdf", &ProcessOptions::default())
            .await?;
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("does not match"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn dpi_clamp_warning_reaches_the_result() -> Result<()> {
        let pipeline = Pipeline::new(Arc::new(StaticEngine));
        let options = ProcessOptions {
            dpi: 1200,
            ..Default::default()
        };
        let result = pipeline
            .process(png_bytes(16, 16), "image/png", &options)
            .await?;
        assert!(result.warnings.iter().any(|warning| warning.contains("dpi")));
        Ok(())
    }
}
