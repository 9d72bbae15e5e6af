use crate::assets::ImageSource;
use crate::canvas::{Canvas, Document};
use crate::font::{Font, measure_text};
use crate::layout::{BODY_SIZE, Composer, HEADING_SIZE, LABEL_INSET, frame_within};
use crate::png::PngImage;
use crate::types::{Color, Margins, Pt, Rect, Size};

pub(crate) const SIGNATURE_RESOURCE_ID: &str = "signature";

const MARGIN: f32 = 40.0;
const SIGNATURE_LINE_HALF_WIDTH: f32 = 90.0;
// The signature image scales to fit this box, sitting on the rule.
const SIGNATURE_MAX_WIDTH: f32 = 160.0;
const SIGNATURE_MAX_HEIGHT: f32 = 60.0;

#[derive(Debug, Clone)]
pub struct PrescriptionOptions {
    pub patient_name: String,
    pub patient_dni: String,
    pub professional_name: String,
    pub professional_license: String,
    pub clinic_name: Option<String>,
    pub diagnosis: Option<String>,
    // Free text; '\n' breaks are honored.
    pub medication_text: String,
    // Pre-formatted by the caller so generation stays clock-free.
    pub issued_at: String,
    pub signature: Option<ImageSource>,
}

// Lays out the single prescription page. The signature (if any) arrives
// already decoded; only its dimensions matter here, for aspect-fit scaling.
pub(crate) fn compose(
    options: &PrescriptionOptions,
    page_size: Size,
    signature: Option<&PngImage>,
) -> (Document, usize) {
    let mut canvas = Canvas::new(page_size);
    let frame = page_frame(page_size);
    draw_frame(&mut canvas, frame);

    let wrap_lines;
    {
        let mut composer = Composer::new(&mut canvas, frame);
        composer.advance(Pt::from_f32(24.0));

        if let Some(clinic) = options.clinic_name.as_deref() {
            composer.centered(Font::HelveticaBold, Pt::from_f32(14.0), clinic);
            composer.advance(Pt::from_f32(4.0));
        }
        composer.title("Receta");
        composer.advance(Pt::from_f32(10.0));

        composer.labeled_row("Fecha:", &options.issued_at);
        composer.labeled_row("Paciente:", &options.patient_name);
        composer.labeled_row("DNI:", &options.patient_dni);
        if let Some(diagnosis) = options.diagnosis.as_deref() {
            composer.labeled_row("Diagn\u{f3}stico:", diagnosis);
        }
        composer.advance(Pt::from_f32(8.0));
        composer.rule(
            frame.x + Pt::from_f32(LABEL_INSET),
            frame.x + frame.width - Pt::from_f32(LABEL_INSET),
        );

        composer.heading("Rp/");
        let text_x = frame.x + Pt::from_f32(LABEL_INSET);
        let text_width = frame.width - Pt::from_f32(LABEL_INSET * 2.0);
        composer.paragraph(
            Font::Helvetica,
            Pt::from_f32(BODY_SIZE),
            text_x,
            text_width,
            &options.medication_text,
        );

        wrap_lines = composer.wrap_lines();
    }

    draw_signature_block(&mut canvas, frame, options, signature);

    (canvas.finish(), wrap_lines)
}

fn page_frame(page_size: Size) -> Rect {
    frame_within(page_size, Margins::all(MARGIN))
}

fn draw_frame(canvas: &mut Canvas, frame: Rect) {
    canvas.set_fill_color(Color::rgb(0.97, 0.97, 0.97));
    canvas.fill_rect(frame.x, frame.y, frame.width, frame.height);
    canvas.set_stroke_color(Color::BLACK);
    canvas.set_line_width(Pt::from_f32(1.0));
    canvas.stroke_rect(frame.x, frame.y, frame.width, frame.height);
    canvas.set_fill_color(Color::BLACK);
}

// Anchored to the bottom of the frame regardless of how much medication text
// ran above: a stroked rule, the scaled signature image sitting on it, and
// the professional's name and license beneath.
fn draw_signature_block(
    canvas: &mut Canvas,
    frame: Rect,
    options: &PrescriptionOptions,
    signature: Option<&PngImage>,
) {
    let center_x = frame.x + frame.width / 2;
    let line_y = frame.y + frame.height - Pt::from_f32(60.0);
    let half = Pt::from_f32(SIGNATURE_LINE_HALF_WIDTH);

    if let Some(image) = signature {
        let (width, height) = fit_image(
            image,
            Pt::from_f32(SIGNATURE_MAX_WIDTH),
            Pt::from_f32(SIGNATURE_MAX_HEIGHT),
        );
        canvas.draw_image(
            center_x - width / 2,
            line_y - height,
            width,
            height,
            SIGNATURE_RESOURCE_ID,
        );
    }

    canvas.set_line_width(Pt::from_f32(1.0));
    canvas.line(center_x - half, line_y, center_x + half, line_y);

    let name_size = Pt::from_f32(10.0);
    canvas.set_font(Font::HelveticaBold);
    canvas.set_font_size(name_size);
    let name_width = measure_text(Font::HelveticaBold, name_size, &options.professional_name);
    canvas.text(
        center_x - name_width / 2,
        line_y + Pt::from_f32(6.0),
        options.professional_name.clone(),
    );

    let license = format!("Mat. {}", options.professional_license);
    canvas.set_font(Font::Helvetica);
    let license_width = measure_text(Font::Helvetica, name_size, &license);
    canvas.text(
        center_x - license_width / 2,
        line_y + Pt::from_f32(6.0) + Pt::from_f32(HEADING_SIZE),
        license,
    );
}

// Aspect-preserving fit into a max box; small images are not upscaled.
pub(crate) fn fit_image(image: &PngImage, max_width: Pt, max_height: Pt) -> (Pt, Pt) {
    let w = image.width as f32;
    let h = image.height as f32;
    let scale = (max_width.to_f32() / w)
        .min(max_height.to_f32() / h)
        .min(1.0);
    (Pt::from_f32(w * scale), Pt::from_f32(h * scale))
}
