//! Page rasterization.
//!
//! Every input kind is reduced to the same thing here: a PNG bitmap per
//! page, so the recognition engine only ever sees one input format.

use std::{io::Cursor, sync::LazyLock};

use anyhow::{anyhow, bail};
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tiff::{
    ColorType,
    decoder::{Decoder, DecodingResult},
};
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    document::{Document, DocumentKind},
    prelude::*,
};

/// Errors printed by the poppler tools that we treat as fatal.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Errors printed by the poppler tools that are survivable in practice.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error: xref num").expect("failed to compile regex"));

/// Does this line of poppler output describe a fatal error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A rasterized page, encoded as PNG.
#[derive(Clone, Debug)]
pub struct PageBitmap {
    /// The 0-based page index this bitmap came from.
    pub page_index: usize,

    /// The pixel width.
    pub width: u32,

    /// The pixel height.
    pub height: u32,

    /// The DPI the page was rasterized at.
    pub dpi: u32,

    /// The PNG-encoded pixels.
    pub png: Vec<u8>,
}

/// Rasterize one page of a document to a PNG bitmap.
///
/// Rasterization is deterministic: the same document, page index and DPI
/// always produce the same bitmap.
#[instrument(level = "debug", skip_all, fields(id = %document.id, page = page_index, dpi = dpi))]
pub async fn rasterize_page(
    document: &Document,
    page_index: usize,
    dpi: u32,
) -> Result<PageBitmap> {
    if page_index >= document.page_count {
        return Err(anyhow!(
            "page {} is out of range for a {}-page document",
            page_index,
            document.page_count
        ));
    }
    match document.kind {
        DocumentKind::Pdf => rasterize_pdf_page(document, page_index, dpi).await,
        DocumentKind::Tiff => rasterize_tiff_page(document, page_index, dpi).await,
        DocumentKind::SingleImage => rasterize_single_image(document, page_index, dpi).await,
    }
}

/// Rasterize one PDF page using `pdftocairo`.
async fn rasterize_pdf_page(
    document: &Document,
    page_index: usize,
    dpi: u32,
) -> Result<PageBitmap> {
    let pdf_path = document
        .spool_path()
        .context("PDF payload was not spooled")?;

    // `pdftocairo` numbers pages from 1. With `-singlefile` it writes
    // exactly `<base>.png`, instead of appending a padded page number.
    let page_number = (page_index + 1).to_string();
    let tmpdir = tempfile::TempDir::with_prefix("scandoc-raster")
        .context("failed to create temporary directory")?;
    let out_base = tmpdir.path().join("page");
    let out_path = tmpdir.path().join("page.png");

    let output = with_cpu_semaphore(|| async {
        Command::new("pdftocairo")
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg(pdf_path)
            .arg(&out_base)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run pdftocairo on {}", pdf_path.display()))
    })
    .await?;
    check_for_command_failure("pdftocairo", &output, Some(is_error_line))?;

    let png = tokio::fs::read(&out_path)
        .await
        .with_context(|| format!("failed to read {}", out_path.display()))?;
    let (width, height) = png_dimensions(&png)?;
    Ok(PageBitmap {
        page_index,
        width,
        height,
        dpi,
        png,
    })
}

/// Decode one TIFF directory and re-encode it as PNG.
async fn rasterize_tiff_page(
    document: &Document,
    page_index: usize,
    dpi: u32,
) -> Result<PageBitmap> {
    let payload = document.payload.clone();
    spawn_blocking_propagating_panics(move || {
        let mut decoder =
            Decoder::new(Cursor::new(&payload[..])).context("failed to open TIFF payload")?;
        for _ in 0..page_index {
            if !decoder.more_images() {
                bail!("TIFF payload ended before directory {page_index}");
            }
            decoder
                .next_image()
                .with_context(|| format!("failed to seek to TIFF directory {page_index}"))?;
        }

        let (width, height) = decoder
            .dimensions()
            .with_context(|| format!("failed to read dimensions of TIFF directory {page_index}"))?;
        let color_type = decoder
            .colortype()
            .with_context(|| format!("failed to read color type of TIFF directory {page_index}"))?;
        let decoded = decoder
            .read_image()
            .with_context(|| format!("failed to decode TIFF directory {page_index}"))?;
        let image = tiff_to_image(decoded, color_type, width, height)?;
        Ok(PageBitmap {
            page_index,
            width,
            height,
            dpi,
            png: encode_png(&image)?,
        })
    })
    .await
}

/// Decode a single-image payload and re-encode it as PNG.
async fn rasterize_single_image(
    document: &Document,
    page_index: usize,
    dpi: u32,
) -> Result<PageBitmap> {
    let payload = document.payload.clone();
    spawn_blocking_propagating_panics(move || {
        let image = image::load_from_memory(&payload).context("failed to decode image payload")?;
        Ok(PageBitmap {
            page_index,
            width: image.width(),
            height: image.height(),
            dpi,
            png: encode_png(&image)?,
        })
    })
    .await
}

/// Convert one decoded TIFF directory to a [`DynamicImage`].
fn tiff_to_image(
    decoded: DecodingResult,
    color_type: ColorType,
    width: u32,
    height: u32,
) -> Result<DynamicImage> {
    let image = match (decoded, color_type) {
        (DecodingResult::U8(data), ColorType::Gray(_)) => {
            image::GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8)
        }
        (DecodingResult::U8(data), ColorType::RGB(_)) => {
            image::RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8)
        }
        (DecodingResult::U8(data), ColorType::RGBA(_)) => {
            image::RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8)
        }
        (
            DecodingResult::U16(data),
            color_type @ (ColorType::Gray(_) | ColorType::RGB(_) | ColorType::RGBA(_)),
        ) => {
            // Scanners sometimes emit 16-bit samples. OCR does not need the
            // extra depth, so keep the high byte.
            let data = data
                .into_iter()
                .map(|value| (value >> 8) as u8)
                .collect::<Vec<u8>>();
            return tiff_to_image(DecodingResult::U8(data), color_type, width, height);
        }
        (_, color_type) => {
            bail!("unsupported TIFF sample format for color type {color_type:?}");
        }
    };
    image.context("TIFF directory dimensions do not match its data")
}

/// Encode an image as PNG.
fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(png)
}

/// Read the dimensions of a PNG without decoding the pixel data.
fn png_dimensions(png: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(png))
        .with_guessed_format()
        .context("failed to detect image format")?
        .into_dimensions()
        .context("failed to read image dimensions")
}
