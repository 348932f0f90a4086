//! Container header probing.
//!
//! The `image` decoders hand back pixels but drop a few facts the metadata
//! output needs. This reads them straight from the headers:
//!
//! - JPEG: progressive (SOF2/6/10/14), chroma subsampling from the SOF
//!   component sampling factors, JFIF density from APP0
//! - PNG: Adam7 interlacing and palette bit depth from IHDR, density from pHYs
//! - EXIF (JPEG, PNG, TIFF, WebP): orientation and resolution, read with
//!   `kamadak-exif`
//!
//! Anything unreadable is simply left out.

use image::ImageFormat;
use std::io::Cursor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInfo {
    pub interlaced: bool,
    pub chroma_subsampling: Option<String>,
    pub palette_bit_depth: Option<u8>,
    pub orientation: Option<u16>,
    /// Horizontal resolution in pixels per millimetre.
    pub resolution: Option<f64>,
}

pub fn probe(data: &[u8], format: ImageFormat) -> HeaderInfo {
    let mut info = match format {
        ImageFormat::Jpeg => probe_jpeg(data),
        ImageFormat::Png => probe_png(data),
        _ => HeaderInfo::default(),
    };
    if matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Tiff | ImageFormat::WebP
    ) {
        apply_exif(data, &mut info);
    }
    info
}

const MM_PER_INCH: f64 = 25.4;

// ---------------------------------------------------------------------------
// JPEG: walk markers up to start-of-scan
// ---------------------------------------------------------------------------

const JFIF_HEADER: &[u8] = b"JFIF\0";

fn probe_jpeg(data: &[u8]) -> HeaderInfo {
    let mut info = HeaderInfo::default();
    let mut pos = 2; // skip SOI

    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        // Fill bytes and markers without a length field
        if marker == 0xFF || marker == 0x00 {
            pos += 1;
            continue;
        }
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        // SOS (0xDA) or EOI: entropy-coded data follows
        if marker == 0xDA || marker == 0xD9 {
            break;
        }

        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + seg_len).min(data.len());
        let segment = data.get(seg_start..seg_end).unwrap_or(&[]);

        match marker {
            // SOFn, excluding DHT (C4), JPG (C8) and DAC (CC)
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                info.interlaced = matches!(marker, 0xC2 | 0xC6 | 0xCA | 0xCE);
                info.chroma_subsampling = chroma_label(segment);
            }
            0xE0 if segment.starts_with(JFIF_HEADER) => {
                info.resolution = jfif_density(&segment[JFIF_HEADER.len()..]);
            }
            _ => {}
        }

        pos += 2 + seg_len;
    }

    info
}

/// Derive a `J:a:b` label from a SOF segment.
///
/// Layout: precision (1), height (2), width (2), component count (1), then
/// per component: id (1), `H<<4 | V` sampling (1), quant table (1).
fn chroma_label(sof: &[u8]) -> Option<String> {
    let count = *sof.get(5)? as usize;
    if count < 3 {
        return None;
    }
    let sampling = |i: usize| -> Option<(u8, u8)> {
        let byte = *sof.get(6 + i * 3 + 1)?;
        Some((byte >> 4, byte & 0x0F))
    };
    let (yh, yv) = sampling(0)?;
    let (ch, cv) = sampling(1)?;
    if ch == 0 || cv == 0 {
        return None;
    }
    let label = match (yh / ch, yv / cv) {
        (1, 1) => "4:4:4",
        (2, 1) => "4:2:2",
        (2, 2) => "4:2:0",
        (4, 1) => "4:1:1",
        (1, 2) => "4:4:0",
        _ => return None,
    };
    Some(if count == 4 {
        format!("{label}:4")
    } else {
        label.to_string()
    })
}

/// JFIF APP0 body after the identifier: version (2), units (1),
/// X density (2), Y density (2). Units 0 only give an aspect ratio.
fn jfif_density(body: &[u8]) -> Option<f64> {
    let units = *body.get(2)?;
    let x = f64::from(u16::from_be_bytes([*body.get(3)?, *body.get(4)?]));
    match units {
        1 if x > 0.0 => Some(x / MM_PER_INCH),
        2 if x > 0.0 => Some(x / 10.0),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// PNG: IHDR is always the first chunk, pHYs comes before IDAT
// ---------------------------------------------------------------------------

const PNG_COLOR_TYPE_PALETTE: u8 = 3;
const PNG_SIGNATURE_LEN: usize = 8;

fn probe_png(data: &[u8]) -> HeaderInfo {
    // signature (8) + length (4) + "IHDR" (4) + width (4) + height (4)
    // then bit depth, colour type, compression, filter, interlace
    let mut info = HeaderInfo::default();
    if data.len() < 29 || &data[12..16] != b"IHDR" {
        return info;
    }
    let bit_depth = data[24];
    let color_type = data[25];
    info.interlaced = data[28] == 1;
    if color_type == PNG_COLOR_TYPE_PALETTE {
        info.palette_bit_depth = Some(bit_depth);
    }
    info.resolution = png_density(data);
    info
}

/// Walk chunks up to the first IDAT looking for pHYs: X pixels per unit (4),
/// Y pixels per unit (4), unit (1, where 1 is the metre).
fn png_density(data: &[u8]) -> Option<f64> {
    let mut pos = PNG_SIGNATURE_LEN;
    while let Some(header) = data.get(pos..pos + 8) {
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = &header[4..8];
        let body = pos + 8;
        match kind {
            b"IDAT" | b"IEND" => return None,
            b"pHYs" => {
                let phys = data.get(body..body + 9)?;
                let x = u32::from_be_bytes([phys[0], phys[1], phys[2], phys[3]]);
                return (phys[8] == 1 && x > 0).then(|| f64::from(x) / 1000.0);
            }
            _ => pos = body.checked_add(len)?.checked_add(4)?,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// EXIF
// ---------------------------------------------------------------------------

/// Fill orientation and resolution from an EXIF block, if the container has one.
fn apply_exif(data: &[u8], info: &mut HeaderInfo) {
    let Ok(exif) = exif::Reader::new().read_from_container(&mut Cursor::new(data)) else {
        return;
    };

    if let Some(orientation) = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
    {
        info.orientation = Some(orientation as u16);
    }

    let x_res = exif
        .get_field(exif::Tag::XResolution, exif::In::PRIMARY)
        .and_then(|f| match f.value {
            exif::Value::Rational(ref vals) => vals.first().copied(),
            _ => None,
        })
        .filter(|r| r.denom != 0 && r.num != 0)
        .map(|r| r.to_f64());
    // Absent unit means inches
    let unit = exif
        .get_field(exif::Tag::ResolutionUnit, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(2);
    let resolution = x_res.and_then(|res| match unit {
        2 => Some(res / MM_PER_INCH),
        3 => Some(res / 10.0),
        _ => None,
    });
    if resolution.is_some() {
        info.resolution = resolution;
    }
}
