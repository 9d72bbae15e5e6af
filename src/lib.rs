mod assets;
mod budget;
mod canvas;
mod debug;
mod deflate;
mod error;
mod font;
mod layout;
mod metrics;
mod pdf;
mod pdfinspect;
mod perf;
pub mod png;
mod prescription;
mod types;

pub use assets::{ImageSource, ResolvedImage, resolve as resolve_image};
pub use budget::{BudgetItem, BudgetOptions};
pub use canvas::{Canvas, Command, Document, Page};
use debug::{DebugLogger, json_escape};
pub use error::ClinicpadError;
pub use font::{Font, measure_text};
pub use metrics::DocumentMetrics;
pub use pdf::{EmbeddedImage, PdfObject, serialize, write_document};
pub use pdfinspect::{InspectionReport, InspectionWarning, WarningCode, inspect_pdf_bytes};
use perf::PerfLogger;
pub use png::{AlphaMode, PngImage};
pub use prescription::PrescriptionOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
pub use types::{Color, Margins, Pt, Rect, Size};

// Engine handle: page geometry plus the opt-in diagnostic loggers. All
// per-call state lives on the stack of the generation call, so one handle
// can serve concurrent callers.
pub struct Clinicpad {
    page_size: Size,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

#[derive(Clone)]
pub struct ClinicpadBuilder {
    page_size: Size,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

impl ClinicpadBuilder {
    pub fn new() -> Self {
        Self {
            page_size: Size::a4(),
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn debug_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Clinicpad, ClinicpadError> {
        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(Arc::new(PerfLogger::new(path)?)),
            None => None,
        };
        Ok(Clinicpad {
            page_size: self.page_size,
            debug,
            perf,
        })
    }
}

impl Default for ClinicpadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Clinicpad {
    pub fn builder() -> ClinicpadBuilder {
        ClinicpadBuilder::new()
    }

    pub fn prescription_pdf(
        &self,
        options: &PrescriptionOptions,
    ) -> Result<Vec<u8>, ClinicpadError> {
        self.prescription_pdf_with_metrics(options)
            .map(|(bytes, _)| bytes)
    }

    pub fn prescription_pdf_with_metrics(
        &self,
        options: &PrescriptionOptions,
    ) -> Result<(Vec<u8>, DocumentMetrics), ClinicpadError> {
        let mut metrics = DocumentMetrics::default();

        // Signatures flatten over white; the prescription embed path
        // declares no soft mask.
        let signature = match options.signature.as_ref() {
            Some(source) => {
                Some(self.prepare_image(source, AlphaMode::FlattenWhite, &mut metrics)?)
            }
            None => None,
        };

        let t_layout = Instant::now();
        let (document, wrap_lines) =
            prescription::compose(options, self.page_size, signature.as_ref());
        self.log_span("layout", t_layout);
        metrics.wrap_lines = wrap_lines;

        let images: Vec<EmbeddedImage> = signature
            .map(|image| EmbeddedImage {
                resource_id: prescription::SIGNATURE_RESOURCE_ID.to_string(),
                image,
            })
            .into_iter()
            .collect();

        let bytes = self.serialize_document(&document, &images, "prescription", &mut metrics);
        Ok((bytes, metrics))
    }

    pub fn budget_pdf(&self, options: &BudgetOptions) -> Result<Vec<u8>, ClinicpadError> {
        self.budget_pdf_with_metrics(options).map(|(bytes, _)| bytes)
    }

    pub fn budget_pdf_with_metrics(
        &self,
        options: &BudgetOptions,
    ) -> Result<(Vec<u8>, DocumentMetrics), ClinicpadError> {
        let mut metrics = DocumentMetrics::default();

        // Logos keep their transparency as a grayscale soft mask.
        let logo = match options.logo.as_ref() {
            Some(source) => Some(self.prepare_image(source, AlphaMode::Preserve, &mut metrics)?),
            None => None,
        };

        let t_layout = Instant::now();
        let (document, wrap_lines) = budget::compose(options, self.page_size, logo.as_ref());
        self.log_span("layout", t_layout);
        metrics.wrap_lines = wrap_lines;

        let images: Vec<EmbeddedImage> = logo
            .map(|image| EmbeddedImage {
                resource_id: budget::LOGO_RESOURCE_ID.to_string(),
                image,
            })
            .into_iter()
            .collect();

        let bytes = self.serialize_document(&document, &images, "budget", &mut metrics);
        Ok((bytes, metrics))
    }

    // Resolve → decode → split planes → deflate, with each stage timed and
    // the accept/reject outcome attested in the debug log.
    fn prepare_image(
        &self,
        source: &ImageSource,
        mode: AlphaMode,
        metrics: &mut DocumentMetrics,
    ) -> Result<PngImage, ClinicpadError> {
        let resolved = assets::resolve(source)?;

        let t_decode = Instant::now();
        let decoded = png::decode_rgba(&resolved.bytes);
        self.log_span("png_decode", t_decode);

        let (width, height, rgba) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                if let Some(logger) = self.debug.as_deref() {
                    logger.log_event(
                        "png.decode.rejected",
                        &format!(
                            "\"sha256\":\"{}\",\"error\":\"{}\"",
                            resolved.sha256,
                            json_escape(&err.to_string())
                        ),
                    );
                    logger.flush();
                }
                return Err(err);
            }
        };

        let (rgb, alpha) = png::split_planes(&rgba, mode);

        let t_deflate = Instant::now();
        let data = deflate::zlib_deflate(&rgb);
        let alpha = alpha.as_deref().map(deflate::zlib_deflate);
        self.log_span("deflate", t_deflate);

        let chunks = deflate::chunk_count(rgb.len())
            + alpha.as_ref().map_or(0, |_| deflate::chunk_count((width as usize) * (height as usize)));
        if let Some(logger) = self.perf.as_deref() {
            logger.log_counts("deflate", &[("chunks", chunks as u64)]);
        }

        metrics.png_width = width;
        metrics.png_height = height;
        metrics.image_bytes_deflated =
            data.len() + alpha.as_ref().map_or(0, |plane| plane.len());
        metrics.deflate_chunks = chunks;
        metrics.asset_sha256 = Some(resolved.sha256.clone());

        if let Some(logger) = self.debug.as_deref() {
            logger.log_event(
                "png.decode.accepted",
                &format!(
                    "\"width\":{},\"height\":{},\"sha256\":\"{}\",\"deflated_bytes\":{}",
                    width,
                    height,
                    resolved.sha256,
                    metrics.image_bytes_deflated
                ),
            );
        }

        Ok(PngImage {
            width,
            height,
            data,
            alpha,
        })
    }

    fn serialize_document(
        &self,
        document: &Document,
        images: &[EmbeddedImage],
        kind: &str,
        metrics: &mut DocumentMetrics,
    ) -> Vec<u8> {
        let t_serialize = Instant::now();
        let (bytes, stats) = pdf::write_document_with_stats(document, images);
        self.log_span("serialize", t_serialize);

        metrics.content_stream_bytes = stats.content_stream_bytes;
        metrics.object_count = stats.object_count;
        metrics.pdf_bytes = bytes.len();

        if let Some(logger) = self.debug.as_deref() {
            if !images.is_empty() {
                logger.log_event(
                    "image.embedded",
                    &format!("\"kind\":\"{}\",\"count\":{}", json_escape(kind), images.len()),
                );
            }
            logger.log_event(
                "document.built",
                &format!(
                    "\"kind\":\"{}\",\"pdf_bytes\":{},\"object_count\":{},\"wrap_lines\":{}",
                    json_escape(kind),
                    metrics.pdf_bytes,
                    metrics.object_count,
                    metrics.wrap_lines
                ),
            );
            logger.flush();
        }
        if let Some(logger) = self.perf.as_deref() {
            logger.flush();
        }

        bytes
    }

    fn log_span(&self, name: &str, started: Instant) {
        if let Some(logger) = self.perf.as_deref() {
            logger.log_span_us(name, started.elapsed().as_micros() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::io::Read;

    fn engine() -> Clinicpad {
        Clinicpad::builder().build().expect("engine")
    }

    fn encode_rgba_png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
        let mut out = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode fixture");
        out
    }

    fn prescription_options() -> PrescriptionOptions {
        PrescriptionOptions {
            patient_name: "Ana P\u{e9}rez".to_string(),
            patient_dni: "30111222".to_string(),
            professional_name: "Dr. Mario Paz".to_string(),
            professional_license: "MN 5555".to_string(),
            clinic_name: Some("Cl\u{ed}nica Norte".to_string()),
            diagnosis: None,
            medication_text: "Ibuprofeno 400mg (cada 8hs)".to_string(),
            issued_at: "12/03/2026".to_string(),
            signature: Some(ImageSource::Png(encode_rgba_png(64, 64, [255, 0, 0, 255]))),
        }
    }

    fn budget_options() -> BudgetOptions {
        BudgetOptions {
            patient_name: "Ana P\u{e9}rez".to_string(),
            patient_dni: "30111222".to_string(),
            professional_name: "Dr. Mario Paz".to_string(),
            clinic_name: None,
            issued_at: "12/03/2026".to_string(),
            items: vec![
                BudgetItem {
                    practice: "Endodoncia".to_string(),
                    description: "Tratamiento de conducto pieza 36".to_string(),
                    amount_cents: 123_450,
                },
                BudgetItem {
                    practice: "Corona".to_string(),
                    description: "Corona de porcelana sobre pieza tratada".to_string(),
                    amount_cents: 80_000,
                },
            ],
            notes: Some("Se\u{f1}a del 50% al iniciar.".to_string()),
            logo: Some(ImageSource::Png(encode_rgba_png(32, 16, [0, 0, 128, 200]))),
        }
    }

    fn find_token(bytes: &[u8], token: &[u8]) -> Option<usize> {
        bytes.windows(token.len()).position(|w| w == token)
    }

    #[test]
    fn prescription_escapes_parentheses_and_embeds_image() {
        let bytes = engine()
            .prescription_pdf(&prescription_options())
            .expect("generate");
        assert!(find_token(&bytes, b"\\(cada 8hs\\)").is_some());
        assert!(find_token(&bytes, b"/Width 64 /Height 64").is_some());
        // Flattened signatures carry no soft mask.
        assert!(find_token(&bytes, b"/SMask").is_none());
        // "Pérez" serializes through WinAnsi with an octal escape.
        assert!(find_token(&bytes, b"P\\351rez").is_some());
    }

    #[test]
    fn prescription_is_byte_identical_across_calls() {
        let engine = engine();
        let options = prescription_options();
        let first = engine.prescription_pdf(&options).expect("first");
        let second = engine.prescription_pdf(&options).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn budget_is_byte_identical_across_calls() {
        let engine = engine();
        let options = budget_options();
        let first = engine.budget_pdf(&options).expect("first");
        let second = engine.budget_pdf(&options).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn budget_logo_keeps_alpha_as_soft_mask() {
        let bytes = engine().budget_pdf(&budget_options()).expect("generate");
        assert!(find_token(&bytes, b"/Width 32 /Height 16").is_some());
        assert!(find_token(&bytes, b"/SMask").is_some());
        assert!(find_token(&bytes, b"/ColorSpace /DeviceGray").is_some());
    }

    #[test]
    fn generated_documents_inspect_clean() {
        let engine = engine();
        for bytes in [
            engine.prescription_pdf(&prescription_options()).expect("rx"),
            engine.budget_pdf(&budget_options()).expect("budget"),
        ] {
            let report = inspect_pdf_bytes(&bytes);
            assert!(report.is_clean(), "warnings: {:?}", report.warnings);
            assert_eq!(report.pdf_version, "1.4");
            assert_eq!(report.page_count, 1);
        }
    }

    #[test]
    fn embedded_image_stream_inflates_to_flat_red() {
        let bytes = engine()
            .prescription_pdf(&prescription_options())
            .expect("generate");
        let parsed = lopdf::Document::load_mem(&bytes).expect("lopdf load");
        let mut found = false;
        for (_, object) in parsed.objects.iter() {
            let Ok(stream) = object.as_stream() else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(|v| v.as_name())
                .map(|name| name == b"Image")
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            let mut rgb = Vec::new();
            flate2::read::ZlibDecoder::new(&stream.content[..])
                .read_to_end(&mut rgb)
                .expect("inflate image stream");
            assert_eq!(rgb.len(), 64 * 64 * 3);
            assert!(rgb.chunks_exact(3).all(|px| px == [255, 0, 0]));
            found = true;
        }
        assert!(found, "image xobject present");
    }

    #[test]
    fn data_uri_signature_matches_raw_bytes() {
        let engine = engine();
        let png = encode_rgba_png(64, 64, [255, 0, 0, 255]);
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );

        let mut raw = prescription_options();
        raw.signature = Some(ImageSource::Png(png));
        let mut via_uri = prescription_options();
        via_uri.signature = Some(ImageSource::DataUri(uri));

        assert_eq!(
            engine.prescription_pdf(&raw).expect("raw"),
            engine.prescription_pdf(&via_uri).expect("uri")
        );
    }

    #[test]
    fn metrics_report_image_and_output_sizes() {
        let (bytes, metrics) = engine()
            .prescription_pdf_with_metrics(&prescription_options())
            .expect("generate");
        assert_eq!(metrics.png_width, 64);
        assert_eq!(metrics.png_height, 64);
        assert_eq!(metrics.pdf_bytes, bytes.len());
        assert!(metrics.image_bytes_deflated > 0);
        assert!(metrics.content_stream_bytes > 0);
        assert!(metrics.object_count >= 8);
        assert!(metrics.wrap_lines >= 1);
        assert_eq!(metrics.deflate_chunks, 1);
        assert_eq!(metrics.asset_sha256.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn metrics_without_image_leave_png_fields_zero() {
        let mut options = prescription_options();
        options.signature = None;
        let (_, metrics) = engine()
            .prescription_pdf_with_metrics(&options)
            .expect("generate");
        assert_eq!(metrics.png_width, 0);
        assert_eq!(metrics.asset_sha256, None);
        assert!(metrics.pdf_bytes > 0);
    }

    #[test]
    fn bad_signature_fails_without_partial_output() {
        let mut options = prescription_options();
        options.signature = Some(ImageSource::Png(b"definitely not a png".to_vec()));
        assert!(matches!(
            engine().prescription_pdf(&options),
            Err(ClinicpadError::InvalidFormat)
        ));
    }

    #[test]
    fn grayscale_png_is_rejected_as_unsupported() {
        let image = image::GrayImage::from_pixel(8, 8, image::Luma([128]));
        let mut encoded = Vec::new();
        image
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Png,
            )
            .expect("encode fixture");
        let mut options = prescription_options();
        options.signature = Some(ImageSource::Png(encoded));
        assert!(matches!(
            engine().prescription_pdf(&options),
            Err(ClinicpadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn debug_log_attests_decode_and_build() {
        let path = std::env::temp_dir().join(format!(
            "clinicpad_lib_debug_{}.jsonl",
            std::process::id()
        ));
        let engine = Clinicpad::builder()
            .debug_log_path(&path)
            .build()
            .expect("engine");
        engine
            .prescription_pdf(&prescription_options())
            .expect("generate");

        let text = std::fs::read_to_string(&path).expect("read log");
        assert!(text.contains("\"event\":\"png.decode.accepted\""));
        assert!(text.contains("\"event\":\"image.embedded\""));
        assert!(text.contains("\"event\":\"document.built\""));
        assert!(text.contains("\"width\":64"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn perf_log_records_hot_spans() {
        let path = std::env::temp_dir().join(format!(
            "clinicpad_lib_perf_{}.jsonl",
            std::process::id()
        ));
        {
            let engine = Clinicpad::builder()
                .perf_log_path(&path)
                .build()
                .expect("engine");
            engine.budget_pdf(&budget_options()).expect("generate");
        }
        let text = std::fs::read_to_string(&path).expect("read log");
        for span in ["png_decode", "deflate", "layout", "serialize"] {
            assert!(
                text.contains(&format!("\"name\":\"{span}\"")),
                "span {span} missing"
            );
        }
        assert!(text.contains("\"name\":\"deflate.chunks\""));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn custom_page_size_flows_into_media_box() {
        let engine = Clinicpad::builder()
            .page_size(Size {
                width: Pt::from_i32(612),
                height: Pt::from_i32(792),
            })
            .build()
            .expect("engine");
        let mut options = prescription_options();
        options.signature = None;
        let bytes = engine.prescription_pdf(&options).expect("generate");
        assert!(find_token(&bytes, b"/MediaBox [0 0 612 792]").is_some());
    }
}
