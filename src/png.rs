use std::io::Read;

use crate::deflate::zlib_deflate;
use crate::error::ClinicpadError;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    // RGB plane plus a separate alpha plane, for the soft-mask embed path.
    Preserve,
    // Composite over opaque white and drop alpha; the flattened embed path
    // declares no soft mask.
    FlattenWhite,
}

#[derive(Debug, Clone)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    // zlib-deflated interleaved RGB triplets, row-major, no padding.
    pub data: Vec<u8>,
    // zlib-deflated 8-bit alpha plane, present only under AlphaMode::Preserve.
    pub alpha: Option<Vec<u8>>,
}

// Decodes an 8-bit RGBA PNG (color type 6 only) and re-deflates the pixel
// planes for direct embedding as PDF image streams. Chunk CRCs are skipped,
// a deliberate simplification: the payload either inflates and unfilters
// cleanly or the decode fails outright.
pub fn decode(bytes: &[u8], mode: AlphaMode) -> Result<PngImage, ClinicpadError> {
    let (width, height, rgba) = decode_rgba(bytes)?;
    let (rgb, alpha) = split_planes(&rgba, mode);
    Ok(PngImage {
        width,
        height,
        data: zlib_deflate(&rgb),
        alpha: alpha.as_deref().map(zlib_deflate),
    })
}

// Separates unfiltered RGBA into the planes the embed path stores: RGB plus
// alpha under Preserve, white-flattened RGB alone under FlattenWhite. Planes
// come back raw; the caller deflates them.
pub(crate) fn split_planes(rgba: &[u8], mode: AlphaMode) -> (Vec<u8>, Option<Vec<u8>>) {
    let pixels = rgba.len() / BYTES_PER_PIXEL;
    match mode {
        AlphaMode::Preserve => {
            let mut rgb = Vec::with_capacity(pixels * 3);
            let mut alpha = Vec::with_capacity(pixels);
            for px in rgba.chunks_exact(BYTES_PER_PIXEL) {
                rgb.extend_from_slice(&px[..3]);
                alpha.push(px[3]);
            }
            (rgb, Some(alpha))
        }
        AlphaMode::FlattenWhite => {
            let mut rgb = Vec::with_capacity(pixels * 3);
            for px in rgba.chunks_exact(BYTES_PER_PIXEL) {
                let a = px[3];
                rgb.push(composite_over_white(px[0], a));
                rgb.push(composite_over_white(px[1], a));
                rgb.push(composite_over_white(px[2], a));
            }
            (rgb, None)
        }
    }
}

// out = fg * a/255 + 255 * (1 - a/255), integer arithmetic with rounding.
fn composite_over_white(fg: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((fg as u32 * a + 255 * (255 - a) + 127) / 255) as u8
}

pub(crate) fn decode_rgba(bytes: &[u8]) -> Result<(u32, u32, Vec<u8>), ClinicpadError> {
    let header = parse_chunks(bytes)?;

    let mut raw = Vec::new();
    flate2::read::ZlibDecoder::new(&header.idat[..])
        .read_to_end(&mut raw)
        .map_err(|err| ClinicpadError::Inflate(err.to_string()))?;

    let width = header.width as usize;
    let height = header.height as usize;
    // Dimensions come straight from IHDR; the expected size is computed
    // checked so absurd declared dimensions fail instead of overflowing.
    let stride = width
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or(ClinicpadError::Truncated)?;
    let expected = stride
        .checked_add(1)
        .and_then(|row| row.checked_mul(height))
        .ok_or(ClinicpadError::Truncated)?;
    if raw.len() < expected {
        return Err(ClinicpadError::Truncated);
    }

    let rgba = unfilter(&raw, stride, height)?;
    Ok((header.width, header.height, rgba))
}

struct PngHeader {
    width: u32,
    height: u32,
    idat: Vec<u8>,
}

// Chunk walk: 4-byte big-endian length, 4-byte type, payload, 4-byte CRC
// (present but never verified). IDAT payloads are concatenated before
// inflating, since encoders may split the compressed stream arbitrarily.
fn parse_chunks(bytes: &[u8]) -> Result<PngHeader, ClinicpadError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(ClinicpadError::InvalidFormat);
    }

    let mut width = 0u32;
    let mut height = 0u32;
    let mut seen_ihdr = false;
    let mut idat = Vec::new();

    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let length = read_be_u32(bytes, pos) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let payload_start = pos + 8;
        let payload_end = payload_start
            .checked_add(length)
            .ok_or(ClinicpadError::Truncated)?;
        if payload_end + 4 > bytes.len() {
            return Err(ClinicpadError::Truncated);
        }

        match kind {
            b"IHDR" => {
                if length < 13 {
                    return Err(ClinicpadError::CorruptHeader);
                }
                width = read_be_u32(bytes, payload_start);
                height = read_be_u32(bytes, payload_start + 4);
                let bit_depth = bytes[payload_start + 8];
                let color_type = bytes[payload_start + 9];
                if bit_depth != 8 || color_type != 6 {
                    return Err(ClinicpadError::UnsupportedFormat {
                        bit_depth,
                        color_type,
                    });
                }
                if width == 0 || height == 0 {
                    return Err(ClinicpadError::CorruptHeader);
                }
                seen_ihdr = true;
            }
            b"IDAT" => idat.extend_from_slice(&bytes[payload_start..payload_end]),
            b"IEND" => break,
            _ => {}
        }

        pos = payload_end + 4;
    }

    if !seen_ihdr {
        return Err(ClinicpadError::CorruptHeader);
    }

    Ok(PngHeader {
        width,
        height,
        idat,
    })
}

fn read_be_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

// Reverses the per-scanline filter. Each scanline is a 1-byte filter type
// followed by `stride` filtered bytes; decoded rows feed the next row's
// Up/Average/Paeth as the "previous row" state, local to this call.
fn unfilter(raw: &[u8], stride: usize, height: usize) -> Result<Vec<u8>, ClinicpadError> {
    let mut out = vec![0u8; stride * height];

    for y in 0..height {
        let line = y * (stride + 1);
        let filter = raw[line];
        let src = &raw[line + 1..line + 1 + stride];

        let (done, rest) = out.split_at_mut(y * stride);
        let cur = &mut rest[..stride];
        let prev = if y == 0 {
            None
        } else {
            Some(&done[(y - 1) * stride..])
        };

        match filter {
            0 => cur.copy_from_slice(src),
            1 => {
                for i in 0..stride {
                    let left = if i >= BYTES_PER_PIXEL {
                        cur[i - BYTES_PER_PIXEL]
                    } else {
                        0
                    };
                    cur[i] = src[i].wrapping_add(left);
                }
            }
            2 => {
                for i in 0..stride {
                    let up = prev.map_or(0, |p| p[i]);
                    cur[i] = src[i].wrapping_add(up);
                }
            }
            3 => {
                for i in 0..stride {
                    let left = if i >= BYTES_PER_PIXEL {
                        cur[i - BYTES_PER_PIXEL]
                    } else {
                        0
                    };
                    let up = prev.map_or(0, |p| p[i]);
                    let avg = ((left as u16 + up as u16) / 2) as u8;
                    cur[i] = src[i].wrapping_add(avg);
                }
            }
            4 => {
                for i in 0..stride {
                    let left = if i >= BYTES_PER_PIXEL {
                        cur[i - BYTES_PER_PIXEL]
                    } else {
                        0
                    };
                    let up = prev.map_or(0, |p| p[i]);
                    let up_left = if i >= BYTES_PER_PIXEL {
                        prev.map_or(0, |p| p[i - BYTES_PER_PIXEL])
                    } else {
                        0
                    };
                    cur[i] = src[i].wrapping_add(paeth(left, up, up_left));
                }
            }
            other => return Err(ClinicpadError::UnsupportedFilter(other)),
        }
    }

    Ok(out)
}

// Standard Paeth predictor: closest of left/up/up-left, preferring left on
// ties, then up.
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flate2_deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).expect("deflate write");
        enc.finish().expect("deflate finish")
    }

    fn flate2_inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .expect("inflate");
        out
    }

    // CRC fields are deliberately garbage: the decoder never checks them.
    fn chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        out
    }

    fn ihdr(width: u32, height: u32, bit_depth: u8, color_type: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&[bit_depth, color_type, 0, 0, 0]);
        chunk(b"IHDR", &payload)
    }

    // Scanlines arrive pre-filtered: each row is (filter_byte, filtered bytes).
    fn png_from_scanlines(width: u32, height: u32, rows: &[(u8, &[u8])]) -> Vec<u8> {
        let mut raw = Vec::new();
        for (filter, data) in rows {
            raw.push(*filter);
            raw.extend_from_slice(data);
        }
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend_from_slice(&ihdr(width, height, 8, 6));
        out.extend_from_slice(&chunk(b"IDAT", &flate2_deflate(&raw)));
        out.extend_from_slice(&chunk(b"IEND", &[]));
        out
    }

    fn rgba_of(bytes: &[u8]) -> Vec<u8> {
        let (_, _, rgba) = decode_rgba(bytes).expect("decode");
        rgba
    }

    #[test]
    fn none_filter_roundtrips_rgba() {
        let row0 = [10, 20, 30, 40, 50, 60, 70, 80];
        let row1 = [1, 2, 3, 4, 5, 6, 7, 8];
        let png = png_from_scanlines(2, 2, &[(0, &row0), (0, &row1)]);
        let mut expected = row0.to_vec();
        expected.extend_from_slice(&row1);
        assert_eq!(rgba_of(&png), expected);
    }

    #[test]
    fn sub_filter_adds_left_pixel() {
        // Decoded: (10,20,30,40) (15,25,35,45) / (100,110,120,130) (90,100,110,120)
        let row0 = [10, 20, 30, 40, 5, 5, 5, 5];
        let row1 = [100, 110, 120, 130, 246, 246, 246, 246];
        let png = png_from_scanlines(2, 2, &[(1, &row0), (1, &row1)]);
        assert_eq!(
            rgba_of(&png),
            vec![10, 20, 30, 40, 15, 25, 35, 45, 100, 110, 120, 130, 90, 100, 110, 120]
        );
    }

    #[test]
    fn up_filter_adds_previous_row() {
        let row0 = [1, 2, 3, 4, 5, 6, 7, 8];
        let row1 = [10, 10, 10, 10, 10, 10, 10, 10];
        let png = png_from_scanlines(2, 2, &[(0, &row0), (2, &row1)]);
        assert_eq!(
            rgba_of(&png),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 11, 12, 13, 14, 15, 16, 17, 18]
        );
    }

    #[test]
    fn average_filter_floors_left_up_mean() {
        let row0 = [2, 4, 6, 8, 10, 12, 14, 16];
        let row1 = [1, 1, 1, 1, 1, 1, 1, 1];
        let png = png_from_scanlines(2, 2, &[(0, &row0), (3, &row1)]);
        assert_eq!(
            rgba_of(&png),
            vec![2, 4, 6, 8, 10, 12, 14, 16, 2, 3, 4, 5, 7, 8, 10, 11]
        );
    }

    #[test]
    fn paeth_filter_reference_rows() {
        let row0 = [10, 20, 30, 40, 50, 60, 70, 80];
        let row1 = [1, 1, 1, 1, 1, 1, 1, 1];
        let png = png_from_scanlines(2, 2, &[(0, &row0), (4, &row1)]);
        assert_eq!(
            rgba_of(&png),
            vec![10, 20, 30, 40, 50, 60, 70, 80, 11, 21, 31, 41, 51, 61, 71, 81]
        );
    }

    #[test]
    fn paeth_prefers_left_then_up_on_ties() {
        assert_eq!(paeth(3, 0, 0), 3);
        assert_eq!(paeth(0, 3, 0), 3);
        // pa == pb: left wins.
        assert_eq!(paeth(0, 0, 3), 0);
        assert_eq!(paeth(7, 7, 7), 7);
    }

    #[test]
    fn flattens_alpha_over_white() {
        // Transparent black, opaque color, half-alpha black.
        let row: &[u8] = &[0, 0, 0, 0, 10, 20, 30, 255, 0, 0, 0, 128];
        let png = png_from_scanlines(3, 1, &[(0, row)]);
        let image = decode(&png, AlphaMode::FlattenWhite).expect("decode");
        assert!(image.alpha.is_none());
        let rgb = flate2_inflate(&image.data);
        assert_eq!(&rgb[..6], &[255, 255, 255, 10, 20, 30]);
        for ch in &rgb[6..9] {
            assert!((127..=129).contains(ch), "half alpha gave {}", ch);
        }
    }

    #[test]
    fn preserves_separate_alpha_plane() {
        let row: &[u8] = &[1, 2, 3, 9, 4, 5, 6, 200];
        let png = png_from_scanlines(2, 1, &[(0, row)]);
        let image = decode(&png, AlphaMode::Preserve).expect("decode");
        assert_eq!(flate2_inflate(&image.data), vec![1, 2, 3, 4, 5, 6]);
        let alpha = image.alpha.expect("alpha plane");
        assert_eq!(flate2_inflate(&alpha), vec![9, 200]);
    }

    #[test]
    fn plane_lengths_match_dimensions() {
        let rows: Vec<u8> = (0..4 * 3 * 4).map(|i| i as u8).collect();
        let png = png_from_scanlines(
            3,
            4,
            &[
                (0, &rows[0..12]),
                (0, &rows[12..24]),
                (0, &rows[24..36]),
                (0, &rows[36..48]),
            ],
        );
        let image = decode(&png, AlphaMode::Preserve).expect("decode");
        assert_eq!(flate2_inflate(&image.data).len(), 3 * 4 * 3);
        assert_eq!(flate2_inflate(&image.alpha.expect("alpha")).len(), 3 * 4);
    }

    #[test]
    fn rejects_bad_signature() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode(&bytes, AlphaMode::FlattenWhite),
            Err(ClinicpadError::InvalidFormat)
        ));
    }

    #[test]
    fn rejects_truecolor_without_alpha() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(2, 2, 8, 2));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::UnsupportedFormat {
                bit_depth: 8,
                color_type: 2
            })
        ));
    }

    #[test]
    fn rejects_sixteen_bit_depth() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(2, 2, 16, 6));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::UnsupportedFormat {
                bit_depth: 16,
                color_type: 6
            })
        ));
    }

    #[test]
    fn rejects_unknown_scanline_filter() {
        let row = [0u8; 8];
        let png = png_from_scanlines(2, 1, &[(5, &row)]);
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::UnsupportedFilter(5))
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(0, 2, 8, 6));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::CorruptHeader)
        ));
    }

    #[test]
    fn rejects_missing_ihdr() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&chunk(b"IDAT", &flate2_deflate(&[0u8; 9])));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::CorruptHeader)
        ));
    }

    #[test]
    fn rejects_chunk_past_end_of_buffer() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(2, 1, 8, 6));
        // IDAT declares 1000 payload bytes but provides none.
        png.extend_from_slice(&1000u32.to_be_bytes());
        png.extend_from_slice(b"IDAT");
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::Truncated)
        ));
    }

    #[test]
    fn rejects_short_pixel_data() {
        // Declared 2x2 but carries a single 2-pixel scanline.
        let row = [0u8; 8];
        let mut raw = vec![0u8];
        raw.extend_from_slice(&row);
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(2, 2, 8, 6));
        png.extend_from_slice(&chunk(b"IDAT", &flate2_deflate(&raw)));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::Truncated)
        ));
    }

    #[test]
    fn rejects_absurd_declared_dimensions() {
        // 0xFFFFFFFF squared overflows any size computation; the decoder
        // must return Truncated, not panic, on the tiny real payload.
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(u32::MAX, u32::MAX, 8, 6));
        png.extend_from_slice(&chunk(b"IDAT", &flate2_deflate(&[0u8; 9])));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::Truncated)
        ));
    }

    #[test]
    fn rejects_undecodable_idat() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(1, 1, 8, 6));
        png.extend_from_slice(&chunk(b"IDAT", &[0x00, 0x11, 0x22]));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png, AlphaMode::FlattenWhite),
            Err(ClinicpadError::Inflate(_))
        ));
    }

    #[test]
    fn concatenates_split_idat_chunks() {
        let row0 = [10, 20, 30, 40, 50, 60, 70, 80];
        let row1 = [1, 2, 3, 4, 5, 6, 7, 8];
        let whole = png_from_scanlines(2, 2, &[(0, &row0), (0, &row1)]);

        let mut raw = vec![0u8];
        raw.extend_from_slice(&row0);
        raw.push(0);
        raw.extend_from_slice(&row1);
        let compressed = flate2_deflate(&raw);
        let mid = compressed.len() / 2;

        let mut split = PNG_SIGNATURE.to_vec();
        split.extend_from_slice(&ihdr(2, 2, 8, 6));
        split.extend_from_slice(&chunk(b"IDAT", &compressed[..mid]));
        split.extend_from_slice(&chunk(b"IDAT", &compressed[mid..]));
        split.extend_from_slice(&chunk(b"IEND", &[]));

        assert_eq!(rgba_of(&split), rgba_of(&whole));
    }

    #[test]
    fn skips_ancillary_chunks() {
        let row = [9u8, 8, 7, 6, 5, 4, 3, 2];
        let mut raw = vec![0u8];
        raw.extend_from_slice(&row);

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&ihdr(2, 1, 8, 6));
        png.extend_from_slice(&chunk(b"tEXt", b"Software\0clinicpad"));
        png.extend_from_slice(&chunk(b"IDAT", &flate2_deflate(&raw)));
        png.extend_from_slice(&chunk(b"IEND", &[]));

        assert_eq!(rgba_of(&png), row.to_vec());
    }

    #[test]
    fn agrees_with_reference_encoder() {
        // The image crate picks per-row adaptive filters, exercising the
        // reversal paths on encoder-chosen data.
        let reference = image::RgbaImage::from_fn(16, 16, |x, y| {
            image::Rgba([
                (x * 16) as u8,
                (y * 16) as u8,
                (x * y) as u8,
                255 - (x + y) as u8,
            ])
        });
        let mut encoded = Vec::new();
        reference
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Png,
            )
            .expect("encode");

        let (width, height, rgba) = decode_rgba(&encoded).expect("decode");
        assert_eq!((width, height), (16, 16));
        assert_eq!(rgba, reference.into_raw());
    }
}
