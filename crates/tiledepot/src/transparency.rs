//! Fully-transparent PNG detection
//!
//! Stores configured with `store_transparent = false` must not persist a
//! PNG whose every alpha sample is zero. Alpha can only exist for color
//! types 4 and 6, or for types 0/2/3 via a tRNS chunk, so the chunk headers
//! are inspected first and the image is decoded only when those cheap
//! checks are inconclusive.

use std::io::ErrorKind;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Whether `data` is a PNG in which every alpha sample is zero.
///
/// Non-PNG or undecodable payloads report `false`: suppression only fires
/// on proof of full transparency.
pub fn is_fully_transparent(data: &[u8]) -> bool {
    if !data.starts_with(&PNG_MAGIC) {
        return false;
    }

    match color_type(data) {
        // Grayscale/RGB/palette without tRNS cannot carry alpha at all.
        Some(0) | Some(2) | Some(3) if !has_trns_chunk(data) => false,
        Some(_) => decode_and_check(data).unwrap_or(false),
        None => false,
    }
}

/// IHDR color type (10th byte of the IHDR data, right after the signature)
fn color_type(data: &[u8]) -> Option<u8> {
    // 8 signature + 4 length + 4 "IHDR" + width(4) + height(4) + depth(1)
    if data.len() > 25 && &data[12..16] == b"IHDR" {
        Some(data[25])
    } else {
        None
    }
}

/// Walk the chunk list looking for tRNS before the image data
fn has_trns_chunk(data: &[u8]) -> bool {
    let mut pos = 8usize;
    while pos + 8 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let kind = &data[pos + 4..pos + 8];
        match kind {
            b"tRNS" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {}
        }
        pos = match pos.checked_add(12 + len as usize) {
            Some(next) => next,
            None => return false,
        };
    }
    false
}

fn decode_and_check(data: &[u8]) -> std::io::Result<bool> {
    let mut decoder = png::Decoder::new(data);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    let pixels = &buf[..info.buffer_size()];

    let stride = match info.color_type {
        png::ColorType::Rgba => 4,
        png::ColorType::GrayscaleAlpha => 2,
        // No alpha channel survived expansion: the image is opaque.
        _ => return Ok(false),
    };

    Ok(pixels
        .chunks_exact(stride)
        .all(|px| px[stride - 1] == 0))
}
