use crate::canvas::{Command, Document, Page};
use crate::font::{Font, win_ansi_byte};
use crate::png::PngImage;
use crate::types::{Color, Pt};
use fixed::types::I32F32;
use std::collections::BTreeMap;

const PDF_HEADER: &[u8] = b"%PDF-1.4\n";
// Four high bytes after the version line mark the file as binary for
// byte-range scanners.
const PDF_BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

const PDF_CATALOG_ID: u32 = 1;
const PDF_PAGES_ID: u32 = 2;
const PDF_RESOURCES_ID: u32 = 3;

// The serialized span between "<id> 0 obj" and "endobj". Bodies are byte
// buffers, not text: image streams carry raw deflated data.
#[derive(Debug, Clone)]
pub struct PdfObject {
    pub id: u32,
    pub body: Vec<u8>,
}

// A decoded raster registered for embedding, keyed by the resource id the
// canvas commands reference.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub resource_id: String,
    pub image: PngImage,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriterStats {
    pub object_count: usize,
    pub content_stream_bytes: usize,
}

// Serializes a finished object list into a complete PDF file. Objects must
// carry dense ids starting at 1; they are sorted by id, wrapped, and their
// byte offsets derived by one prefix-sum pass before the xref is emitted.
pub fn serialize(objects: Vec<PdfObject>, root_id: u32) -> Vec<u8> {
    let mut objects = objects;
    objects.sort_by_key(|obj| obj.id);

    let mut wrapped: Vec<Vec<u8>> = Vec::with_capacity(objects.len());
    let mut total = PDF_HEADER.len() + PDF_BINARY_MARKER.len();
    for obj in &objects {
        let mut buf = Vec::with_capacity(obj.body.len() + 32);
        buf.extend_from_slice(format!("{} 0 obj\n", obj.id).as_bytes());
        buf.extend_from_slice(&obj.body);
        buf.extend_from_slice(b"\nendobj\n");
        total += buf.len();
        wrapped.push(buf);
    }

    let mut out: Vec<u8> = Vec::with_capacity(total + 32 * objects.len() + 128);
    out.extend_from_slice(PDF_HEADER);
    out.extend_from_slice(PDF_BINARY_MARKER);

    let mut offsets = Vec::with_capacity(wrapped.len());
    let mut offset = out.len();
    for buf in &wrapped {
        offsets.push(offset);
        offset += buf.len();
    }
    for buf in &wrapped {
        out.extend_from_slice(buf);
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for object_offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", object_offset).as_bytes());
    }

    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF",
            objects.len() + 1,
            root_id,
            xref_start
        )
        .as_bytes(),
    );

    out
}

pub fn write_document(document: &Document, images: &[EmbeddedImage]) -> Vec<u8> {
    write_document_with_stats(document, images).0
}

// Object layout: catalog, pages, shared resources, the two standard fonts,
// then image (+ soft mask) objects in registration order, then one content
// stream and page object per page. All ids dense, assigned in that order, so
// identical input yields identical bytes.
pub(crate) fn write_document_with_stats(
    document: &Document,
    images: &[EmbeddedImage],
) -> (Vec<u8>, WriterStats) {
    let f1_id = PDF_RESOURCES_ID + 1;
    let f2_id = PDF_RESOURCES_ID + 2;
    let mut next_id = f2_id + 1;

    let mut objects: Vec<PdfObject> = Vec::new();
    let mut image_names: BTreeMap<String, String> = BTreeMap::new();
    let mut xobject_entries: Vec<(String, u32)> = Vec::new();

    for (index, embedded) in images.iter().enumerate() {
        let image_id = next_id;
        next_id += 1;
        let smask_id = if embedded.image.alpha.is_some() {
            let id = next_id;
            next_id += 1;
            Some(id)
        } else {
            None
        };

        let name = format!("Im{}", index + 1);
        image_names.insert(embedded.resource_id.clone(), name.clone());
        xobject_entries.push((name, image_id));

        objects.push(PdfObject {
            id: image_id,
            body: image_object(&embedded.image, smask_id),
        });
        if let (Some(id), Some(alpha)) = (smask_id, embedded.image.alpha.as_ref()) {
            objects.push(PdfObject {
                id,
                body: smask_object(&embedded.image, alpha),
            });
        }
    }

    let mut stats = WriterStats::default();
    let mut kids: Vec<String> = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let content_id = next_id;
        let page_id = next_id + 1;
        next_id += 2;

        let content = render_page(page, document.page_size.height, &image_names);
        stats.content_stream_bytes += content.len();
        objects.push(PdfObject {
            id: content_id,
            body: stream_object(format!("<< /Length {} >>", content.len()), content.into_bytes()),
        });

        objects.push(PdfObject {
            id: page_id,
            body: format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
                PDF_PAGES_ID,
                fmt_pt(document.page_size.width),
                fmt_pt(document.page_size.height),
                PDF_RESOURCES_ID,
                content_id
            )
            .into_bytes(),
        });
        kids.push(format!("{} 0 R", page_id));
    }

    objects.push(PdfObject {
        id: PDF_CATALOG_ID,
        body: format!("<< /Type /Catalog /Pages {} 0 R >>", PDF_PAGES_ID).into_bytes(),
    });
    objects.push(PdfObject {
        id: PDF_PAGES_ID,
        body: format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            kids.len()
        )
        .into_bytes(),
    });

    let mut resources = format!(
        "<< /Font << /{} {} 0 R /{} {} 0 R >>",
        Font::Helvetica.resource_name(),
        f1_id,
        Font::HelveticaBold.resource_name(),
        f2_id
    );
    if !xobject_entries.is_empty() {
        resources.push_str(" /XObject <<");
        for (name, id) in &xobject_entries {
            resources.push_str(&format!(" /{} {} 0 R", name, id));
        }
        resources.push_str(" >>");
    }
    resources.push_str(" >>");
    objects.push(PdfObject {
        id: PDF_RESOURCES_ID,
        body: resources.into_bytes(),
    });

    objects.push(PdfObject {
        id: f1_id,
        body: font_object(Font::Helvetica).into_bytes(),
    });
    objects.push(PdfObject {
        id: f2_id,
        body: font_object(Font::HelveticaBold).into_bytes(),
    });

    stats.object_count = objects.len();
    (serialize(objects, PDF_CATALOG_ID), stats)
}

fn font_object(font: Font) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        font.base_name()
    )
}

// << dict >> stream ... endstream with /Length equal to the exact payload
// byte count; the newline after "stream" and before "endstream" are framing,
// not payload.
fn stream_object(dict: String, payload: Vec<u8>) -> Vec<u8> {
    let mut body = Vec::with_capacity(dict.len() + payload.len() + 20);
    body.extend_from_slice(dict.as_bytes());
    body.extend_from_slice(b"\nstream\n");
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\nendstream");
    body
}

fn image_object(image: &PngImage, smask_id: Option<u32>) -> Vec<u8> {
    let smask = smask_id
        .map(|id| format!(" /SMask {} 0 R", id))
        .unwrap_or_default();
    let dict = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode{} /Length {} >>",
        image.width,
        image.height,
        smask,
        image.data.len()
    );
    stream_object(dict, image.data.clone())
}

fn smask_object(image: &PngImage, alpha: &[u8]) -> Vec<u8> {
    let dict = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Filter /FlateDecode /Length {} >>",
        image.width,
        image.height,
        alpha.len()
    );
    stream_object(dict, alpha.to_vec())
}

// Replays recorded commands as content-stream operators. Commands are in
// top-left-origin space; PDF is bottom-left, so y flips against the page
// height here and nowhere else.
fn render_page(page: &Page, page_height: Pt, image_names: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    let mut current_font = Font::Helvetica;
    let mut current_font_size = Pt::from_f32(12.0);

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::SetFillColor(color) => {
                out.push_str(&format!(
                    "{} {} {} rg\n",
                    fmt(color.r),
                    fmt(color.g),
                    fmt(color.b)
                ));
            }
            Command::SetStrokeColor(color) => {
                out.push_str(&format!(
                    "{} {} {} RG\n",
                    fmt(color.r),
                    fmt(color.g),
                    fmt(color.b)
                ));
            }
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", fmt_pt(*width)));
            }
            Command::SetFont(font) => {
                current_font = *font;
            }
            Command::SetFontSize(size) => {
                current_font_size = *size;
            }
            Command::FillRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nf\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nS\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::Line { x1, y1, x2, y2 } => {
                out.push_str(&format!(
                    "{} {} m\n{} {} l\nS\n",
                    fmt_pt(*x1),
                    fmt_pt(page_height - *y1),
                    fmt_pt(*x2),
                    fmt_pt(page_height - *y2)
                ));
            }
            Command::Text { x, y, text } => {
                out.push_str("BT\n");
                out.push_str(&format!(
                    "/{} {} Tf\n",
                    current_font.resource_name(),
                    fmt_pt(current_font_size)
                ));
                out.push_str(&format!(
                    "{} {} Td\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - current_font_size)
                ));
                let encoded = encode_winansi_pdf_string(text);
                out.push_str(&format!("({}) Tj\n", encoded.text));
                out.push_str("ET\n");
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                if let Some(name) = image_names.get(resource_id) {
                    let draw_y = page_height - *y - *height;
                    out.push_str("q\n");
                    out.push_str(&format!(
                        "{} 0 0 {} {} {} cm\n",
                        fmt_pt(*width),
                        fmt_pt(*height),
                        fmt_pt(*x),
                        fmt_pt(draw_y)
                    ));
                    out.push_str(&format!("/{} Do\n", name));
                    out.push_str("Q\n");
                }
            }
        }
    }

    out
}

pub(crate) struct WinAnsiEncoded {
    pub text: String,
    pub replaced: usize,
}

// Maps each char to its WinAnsi byte ('?' when the encoding has no slot,
// counted in `replaced`), then escapes for literal-string syntax: backslash
// and parens escaped, CR/LF escaped, control and high bytes in octal.
pub(crate) fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match win_ansi_byte(ch) {
            Some(byte) => byte,
            None => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

// Milli-unit decimal with trailing zeros trimmed: "40", "40.5", "41.125".
fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}
