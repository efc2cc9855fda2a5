//! OCR engine support using the `tesseract` CLI tool.

use std::sync::Arc;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::with_cpu_semaphore,
    error::ProcessingError,
    prelude::*,
    rasterize::PageBitmap,
    result::{BoundingBox, TextBlock},
};

use super::OcrEngine;

/// An OCR engine that shells out to `tesseract`.
///
/// We ask tesseract for TSV output, which reports every detected word with
/// its pixel box and a 0-100 confidence, and group the words back into
/// line-level blocks.
#[non_exhaustive]
pub struct TesseractEngine {}

impl TesseractEngine {
    /// Create a new engine, checking that the `tesseract` binary works.
    #[allow(clippy::new_ret_no_self)]
    pub async fn new() -> Result<Arc<dyn OcrEngine>, ProcessingError> {
        let output = Command::new("tesseract")
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ProcessingError::InternalEngineFailure {
                reason: format!("cannot run tesseract (is it installed?): {err}"),
            })?;
        check_for_command_failure("tesseract", &output, None).map_err(|err| {
            ProcessingError::InternalEngineFailure {
                reason: format!("{err:#}"),
            }
        })?;
        Ok(Arc::new(TesseractEngine {}))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(page = bitmap.page_index))]
    async fn recognize(&self, bitmap: &PageBitmap, language_hint: &str) -> Result<Vec<TextBlock>> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("scandoc-ocr")
            .context("failed to create temporary directory")?;
        let input_path = tmpdir.path().join("input.png");
        let output_base = tmpdir.path().join("output");
        tokio::fs::write(&input_path, &bitmap.png)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract in TSV mode.
        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&input_path)
                .arg(&output_base)
                .arg("-l")
                .arg(language_hint)
                .arg("--dpi")
                .arg(bitmap.dpi.to_string())
                .arg("tsv")
                .kill_on_drop(true)
                .output()
                .await
                .context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract output file")?;
        parse_tsv(&tsv)
    }
}

/// One word row from tesseract's TSV output.
struct TsvWord {
    block: u32,
    par: u32,
    line: u32,
    bbox: BoundingBox,
    conf: f64,
    text: String,
}

impl TsvWord {
    fn same_line(&self, other: &TsvWord) -> bool {
        (self.block, self.par, self.line) == (other.block, other.par, other.line)
    }
}

/// Parse tesseract TSV output into line-level text blocks.
///
/// The TSV columns are `level page_num block_num par_num line_num word_num
/// left top width height conf text`. Level 5 rows are words; everything
/// else describes layout and carries a confidence of -1.
fn parse_tsv(tsv: &str) -> Result<Vec<TextBlock>> {
    let mut words = vec![];
    for (row, line) in tsv.lines().enumerate().skip(1) {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let conf = parse_field::<f64>(fields[10], "conf", row)?;
        let text = fields[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }
        words.push(TsvWord {
            block: parse_field(fields[2], "block_num", row)?,
            par: parse_field(fields[3], "par_num", row)?,
            line: parse_field(fields[4], "line_num", row)?,
            bbox: BoundingBox {
                x: parse_field::<i64>(fields[6], "left", row)?.max(0) as u32,
                y: parse_field::<i64>(fields[7], "top", row)?.max(0) as u32,
                w: parse_field::<i64>(fields[8], "width", row)?.max(0) as u32,
                h: parse_field::<i64>(fields[9], "height", row)?.max(0) as u32,
            },
            conf,
            text: text.to_owned(),
        });
    }

    // Merge consecutive words on the same line into one block.
    let mut blocks: Vec<TextBlock> = vec![];
    let mut line_words: Vec<TsvWord> = vec![];
    for word in words {
        if let Some(last) = line_words.last()
            && !last.same_line(&word)
        {
            push_line(&mut blocks, &line_words);
            line_words.clear();
        }
        line_words.push(word);
    }
    push_line(&mut blocks, &line_words);
    Ok(blocks)
}

/// Parse one TSV field, reporting the row it came from on failure.
fn parse_field<T: std::str::FromStr>(value: &str, name: &str, row: usize) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("bad {name} value {value:?} in tesseract TSV row {row}"))
}

/// Merge one line's words into a [`TextBlock`] and append it.
fn push_line(blocks: &mut Vec<TextBlock>, words: &[TsvWord]) {
    let Some(first) = words.first() else {
        return;
    };
    let mut bbox = first.bbox;
    for word in &words[1..] {
        bbox = bbox.union(&word.bbox);
    }
    let text = words
        .iter()
        .map(|word| word.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    // Tesseract confidences run 0-100.
    let confidence = words.iter().map(|word| word.conf).sum::<f64>() / words.len() as f64 / 100.0;
    blocks.push(TextBlock {
        text,
        bbox,
        confidence,
        rank: blocks.len(),
    });
}
