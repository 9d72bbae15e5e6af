use crate::assets::ImageSource;
use crate::canvas::{Canvas, Document};
use crate::font::{Font, measure_text};
use crate::layout::{BODY_SIZE, Composer, LABEL_INSET, frame_within};
use crate::png::PngImage;
use crate::prescription::fit_image;
use crate::types::{Color, Margins, Pt, Rect, Size};

pub(crate) const LOGO_RESOURCE_ID: &str = "logo";

const MARGIN: f32 = 40.0;
// Table columns relative to the frame's left edge.
const PRACTICE_X: f32 = LABEL_INSET;
const DESCRIPTION_X: f32 = 150.0;
const AMOUNT_RIGHT_INSET: f32 = LABEL_INSET;
const DESCRIPTION_WIDTH: f32 = 230.0;
const ROW_GAP: f32 = 4.0;

const LOGO_MAX_WIDTH: f32 = 120.0;
const LOGO_MAX_HEIGHT: f32 = 48.0;

#[derive(Debug, Clone)]
pub struct BudgetItem {
    pub practice: String,
    pub description: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct BudgetOptions {
    pub patient_name: String,
    pub patient_dni: String,
    pub professional_name: String,
    pub clinic_name: Option<String>,
    // Pre-formatted by the caller so generation stays clock-free.
    pub issued_at: String,
    pub items: Vec<BudgetItem>,
    pub notes: Option<String>,
    pub logo: Option<ImageSource>,
}

// Integer cents in, "$ 1234.50" out. Money never touches floating point.
pub(crate) fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}$ {}.{:02}", sign, abs / 100, abs % 100)
}

pub(crate) fn compose(
    options: &BudgetOptions,
    page_size: Size,
    logo: Option<&PngImage>,
) -> (Document, usize) {
    let mut canvas = Canvas::new(page_size);
    let frame = page_frame(page_size);
    draw_frame(&mut canvas, frame);

    if let Some(image) = logo {
        let (width, height) = fit_image(
            image,
            Pt::from_f32(LOGO_MAX_WIDTH),
            Pt::from_f32(LOGO_MAX_HEIGHT),
        );
        canvas.draw_image(
            frame.x + frame.width - Pt::from_f32(LABEL_INSET) - width,
            frame.y + Pt::from_f32(14.0),
            width,
            height,
            LOGO_RESOURCE_ID,
        );
    }

    let mut composer = Composer::new(&mut canvas, frame);
    composer.advance(Pt::from_f32(24.0));

    if let Some(clinic) = options.clinic_name.as_deref() {
        composer.centered(Font::HelveticaBold, Pt::from_f32(14.0), clinic);
        composer.advance(Pt::from_f32(4.0));
    }
    composer.title("Presupuesto");
    composer.advance(Pt::from_f32(10.0));

    composer.labeled_row("Fecha:", &options.issued_at);
    composer.labeled_row("Paciente:", &options.patient_name);
    composer.labeled_row("DNI:", &options.patient_dni);
    composer.labeled_row("Profesional:", &options.professional_name);
    composer.advance(Pt::from_f32(8.0));

    draw_items_table(&mut composer, frame, &options.items);

    if let Some(notes) = options.notes.as_deref() {
        composer.advance(Pt::from_f32(12.0));
        composer.heading("Observaciones");
        composer.paragraph(
            Font::Helvetica,
            Pt::from_f32(BODY_SIZE),
            frame.x + Pt::from_f32(LABEL_INSET),
            frame.width - Pt::from_f32(LABEL_INSET * 2.0),
            notes,
        );
    }

    let wrap_lines = composer.wrap_lines();
    drop(composer);

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

// Practice | wrapped description | right-aligned amount, one stanza per
// item, then a rule and the computed total.
fn draw_items_table(composer: &mut Composer<'_>, frame: Rect, items: &[BudgetItem]) {
    let size = Pt::from_f32(BODY_SIZE);
    let line_height = Composer::line_height(size);
    let practice_x = frame.x + Pt::from_f32(PRACTICE_X);
    let description_x = frame.x + Pt::from_f32(DESCRIPTION_X);
    let description_width = Pt::from_f32(DESCRIPTION_WIDTH);
    let amount_right = frame.x + frame.width - Pt::from_f32(AMOUNT_RIGHT_INSET);

    // Header row.
    let y = composer.cursor_y();
    {
        let canvas = composer.canvas();
        canvas.set_font(Font::HelveticaBold);
        canvas.set_font_size(size);
        canvas.text(practice_x, y, "Pr\u{e1}ctica");
        canvas.text(description_x, y, "Descripci\u{f3}n");
        let header = "Importe";
        let width = measure_text(Font::HelveticaBold, size, header);
        canvas.text(amount_right - width, y, header);
    }
    composer.advance(line_height);
    composer.rule(practice_x, amount_right);

    let mut total: i64 = 0;
    for item in items {
        total += item.amount_cents;
        let row_top = composer.cursor_y();
        {
            let canvas = composer.canvas();
            canvas.set_font(Font::Helvetica);
            canvas.set_font_size(size);
            canvas.text(practice_x, row_top, item.practice.clone());
            let amount = format_cents(item.amount_cents);
            let width = measure_text(Font::Helvetica, size, &amount);
            canvas.text(amount_right - width, row_top, amount);
        }
        composer.paragraph(Font::Helvetica, size, description_x, description_width, &item.description);
        composer.advance(Pt::from_f32(ROW_GAP));
    }

    composer.advance(Pt::from_f32(4.0));
    composer.rule(practice_x, amount_right);

    let y = composer.cursor_y();
    {
        let canvas = composer.canvas();
        canvas.set_font(Font::HelveticaBold);
        canvas.set_font_size(size);
        canvas.text(description_x, y, "Total");
        let amount = format_cents(total);
        let width = measure_text(Font::HelveticaBold, size, &amount);
        canvas.text(amount_right - width, y, amount);
    }
    composer.advance(line_height);
}
