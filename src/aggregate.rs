//! Assembly of per-page results into a document result.

use crate::{
    prelude::*,
    result::{DocumentResult, DocumentStatus, PAGE_BREAK, PageResult},
};

/// Merge per-page results into a single [`DocumentResult`].
///
/// Results may arrive in any completion order; they are re-sorted by page
/// index here. `expected_pages` is the document's page count: when fewer
/// results than that are present (the run timed out), the outcome can be at
/// best `partial`, and the missing pages simply aren't listed.
#[instrument(level = "debug", skip_all, fields(document_id = %document_id, pages = results.len()))]
pub fn aggregate(
    document_id: &str,
    expected_pages: usize,
    mut results: Vec<PageResult>,
    warnings: Vec<String>,
) -> DocumentResult {
    results.sort_by_key(|page| page.index);

    let good_page_count = results.iter().filter(|page| !page.failed).count();
    let status = if good_page_count == 0 {
        DocumentStatus::Failed
    } else if good_page_count == expected_pages {
        DocumentStatus::Success
    } else {
        DocumentStatus::Partial
    };

    let full_text = results
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK);

    let confidences = results
        .iter()
        .filter_map(|page| page.confidence)
        .collect::<Vec<_>>();
    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    DocumentResult {
        document_id: document_id.to_owned(),
        status,
        pages: results,
        full_text,
        confidence,
        warnings,
    }
}
