use crate::canvas::Canvas;
use crate::font::{Font, measure_text};
use crate::types::{Margins, Pt, Rect, Size};

// Column insets shared by both document types: labels sit 20pt inside the
// frame, values in a second fixed column.
pub(crate) const LABEL_INSET: f32 = 20.0;
pub(crate) const VALUE_INSET: f32 = 130.0;

pub(crate) const TITLE_SIZE: f32 = 18.0;
pub(crate) const HEADING_SIZE: f32 = 12.0;
pub(crate) const BODY_SIZE: f32 = 11.0;

// The drawable rect left inside a page after its margins.
pub(crate) fn frame_within(page_size: Size, margins: Margins) -> Rect {
    Rect {
        x: margins.left,
        y: margins.top,
        width: page_size.width - margins.left - margins.right,
        height: page_size.height - margins.top - margins.bottom,
    }
}

// Greedy word wrap against real AFM widths: words pack onto a line while the
// measured candidate still fits; the overflowing word starts the next line
// (an oversized single word still gets a line of its own). Explicit '\n'
// forces a break. Empty input yields exactly one empty line, never zero, so
// the vertical cursor always advances.
pub(crate) fn wrap_text(font: Font, size: Pt, max_width: Pt, text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for segment in text.split('\n') {
        let mut current = String::new();
        for word in segment.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
                continue;
            }
            let candidate = format!("{current} {word}");
            if measure_text(font, size, &candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    lines
}

// One downward cursor over a page rect; blocks are emitted top to bottom
// with no backtracking.
pub(crate) struct Composer<'a> {
    canvas: &'a mut Canvas,
    bounds: Rect,
    cursor_y: Pt,
    wrap_lines: usize,
}

impl<'a> Composer<'a> {
    pub fn new(canvas: &'a mut Canvas, bounds: Rect) -> Self {
        let cursor_y = bounds.y;
        Self {
            canvas,
            bounds,
            cursor_y,
            wrap_lines: 0,
        }
    }

    pub fn cursor_y(&self) -> Pt {
        self.cursor_y
    }

    pub fn wrap_lines(&self) -> usize {
        self.wrap_lines
    }

    pub fn canvas(&mut self) -> &mut Canvas {
        &mut *self.canvas
    }

    pub fn advance(&mut self, dy: Pt) {
        self.cursor_y += dy;
    }

    pub fn line_height(size: Pt) -> Pt {
        // 1.4x leading, the ratio the source documents were set with.
        size.mul_ratio(7, 5)
    }

    fn label_x(&self) -> Pt {
        self.bounds.x + Pt::from_f32(LABEL_INSET)
    }

    pub fn centered(&mut self, font: Font, size: Pt, text: &str) {
        self.canvas.set_font(font);
        self.canvas.set_font_size(size);
        let width = measure_text(font, size, text);
        let x = self.bounds.x + (self.bounds.width - width) / 2;
        self.canvas.text(x, self.cursor_y, text);
        self.advance(Self::line_height(size));
    }

    pub fn title(&mut self, text: &str) {
        self.centered(Font::HelveticaBold, Pt::from_f32(TITLE_SIZE), text);
    }

    pub fn heading(&mut self, text: &str) {
        let size = Pt::from_f32(HEADING_SIZE);
        self.canvas.set_font(Font::HelveticaBold);
        self.canvas.set_font_size(size);
        self.canvas.text(self.label_x(), self.cursor_y, text);
        self.advance(Self::line_height(size));
    }

    // Bold label in the fixed label column, regular value in the value
    // column. Values are single-line by contract (names, ids, dates).
    pub fn labeled_row(&mut self, label: &str, value: &str) {
        let size = Pt::from_f32(BODY_SIZE);
        self.canvas.set_font(Font::HelveticaBold);
        self.canvas.set_font_size(size);
        self.canvas.text(self.label_x(), self.cursor_y, label);
        self.canvas.set_font(Font::Helvetica);
        self.canvas
            .text(self.bounds.x + Pt::from_f32(VALUE_INSET), self.cursor_y, value);
        self.advance(Self::line_height(size));
    }

    pub fn paragraph(&mut self, font: Font, size: Pt, x: Pt, width: Pt, text: &str) {
        self.canvas.set_font(font);
        self.canvas.set_font_size(size);
        let lines = wrap_text(font, size, width, text);
        self.wrap_lines += lines.len();
        for line in lines {
            self.canvas.text(x, self.cursor_y, line);
            self.advance(Self::line_height(size));
        }
    }

    pub fn rule(&mut self, x1: Pt, x2: Pt) {
        self.canvas.set_line_width(Pt::from_f32(0.5));
        self.canvas.line(x1, self.cursor_y, x2, self.cursor_y);
        self.advance(Pt::from_f32(8.0));
    }
}
