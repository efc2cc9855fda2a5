//! Fixture builders shared between unit tests.
//!
//! Everything here is generated in-process, so the test suite does not need
//! binary fixture files checked in.

use std::io::Cursor;

use tiff::encoder::{TiffEncoder, colortype};

/// A gray checkerboard PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::GrayImage::from_fn(width, height, |x, y| {
        image::Luma([if (x + y) % 2 == 0 { 0xFF } else { 0x00 }])
    });
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .expect("failed to encode PNG");
    png
}

/// A multi-page TIFF with identical gray pages.
pub fn tiff_bytes(pages: usize, width: u32, height: u32) -> Vec<u8> {
    tiff_bytes_with_widths(&vec![width; pages], height)
}

/// A multi-page TIFF with one gray page per entry in `widths`.
pub fn tiff_bytes_with_widths(widths: &[u32], height: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut cursor).expect("failed to create TIFF encoder");
    for &width in widths {
        let data = vec![0x80u8; (width * height) as usize];
        encoder
            .write_image::<colortype::Gray8>(width, height, &data)
            .expect("failed to encode TIFF page");
    }
    drop(encoder);
    cursor.into_inner()
}

/// A multi-page TIFF where the pages flagged in `cmyk` use CMYK samples,
/// which the rasterizer does not support.
pub fn tiff_bytes_with_cmyk_pages(cmyk: &[bool], width: u32, height: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut cursor).expect("failed to create TIFF encoder");
    for &cmyk_page in cmyk {
        if cmyk_page {
            let data = vec![0x80u8; (width * height * 4) as usize];
            encoder
                .write_image::<colortype::CMYK8>(width, height, &data)
                .expect("failed to encode TIFF page");
        } else {
            let data = vec![0x80u8; (width * height) as usize];
            encoder
                .write_image::<colortype::Gray8>(width, height, &data)
                .expect("failed to encode TIFF page");
        }
    }
    drop(encoder);
    cursor.into_inner()
}

/// A valid PDF with the requested number of blank US Letter pages.
pub fn minimal_pdf(pages: usize) -> Vec<u8> {
    let kids = (0..pages)
        .map(|page| format!("{} 0 R", page + 3))
        .collect::<Vec<_>>()
        .join(" ");
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
        format!("<< /Type /Pages /Kids [{kids}] /Count {pages} >>"),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_owned());
    }

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = vec![];
    for (number, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", number + 1).as_bytes());
    }
    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}
