//! Flowing text layout for generated pages (certificate, signer summary)

use crate::coords::PageBox;
use crate::document::PdfDocument;
use crate::error::RenderError;
use crate::text::{text_op, text_width, truncate_to_width};

const LEADING: f64 = 1.35;

/// Writes lines top to bottom, starting a new page when one fills up
pub struct PageWriter {
    page: PageBox,
    margin: f64,
    cursor: f64,
    current: String,
    finished: Vec<String>,
}

impl PageWriter {
    pub fn new(page: PageBox, margin: f64) -> Self {
        Self {
            page,
            margin,
            cursor: page.y + page.height - margin,
            current: String::new(),
            finished: Vec::new(),
        }
    }

    fn left(&self) -> f64 {
        self.page.x + self.margin
    }

    fn usable_width(&self) -> f64 {
        self.page.width - 2.0 * self.margin
    }

    fn ensure(&mut self, height: f64) {
        if self.cursor - height < self.page.y + self.margin && !self.current.is_empty() {
            self.finished.push(std::mem::take(&mut self.current));
            self.cursor = self.page.y + self.page.height - self.margin;
        }
    }

    /// One line of text, truncated to the usable width
    pub fn line(&mut self, text: &str, size: f64) {
        self.indented(text, size, 0.0);
    }

    pub fn indented(&mut self, text: &str, size: f64, indent: f64) {
        let height = size * LEADING;
        self.ensure(height);
        self.cursor -= height;
        let fitted = truncate_to_width(text, size, self.usable_width() - indent);
        self.current
            .push_str(&text_op(self.left() + indent, self.cursor, size, &fitted));
    }

    /// Text wrapped on word boundaries
    pub fn paragraph(&mut self, text: &str, size: f64, indent: f64) {
        for line in wrap(text, size, self.usable_width() - indent) {
            self.indented(&line, size, indent);
        }
    }

    pub fn gap(&mut self, height: f64) {
        self.cursor -= height;
    }

    /// Thin horizontal rule across the usable width
    pub fn rule(&mut self) {
        self.ensure(8.0);
        self.cursor -= 4.0;
        self.current.push_str(&format!(
            "q 0.6 G 0.5 w {:.2} {:.2} m {:.2} {:.2} l S Q\n",
            self.left(),
            self.cursor,
            self.left() + self.usable_width(),
            self.cursor
        ));
        self.cursor -= 4.0;
    }

    pub fn into_pages(mut self) -> Vec<String> {
        if !self.current.is_empty() || self.finished.is_empty() {
            self.finished.push(self.current);
        }
        self.finished
    }
}

/// Greedy word wrap; words wider than the line are truncated
pub fn wrap(text: &str, size: f64, width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };

        if text_width(&candidate, size) <= width {
            current = candidate;
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current = truncate_to_width(word, size, width);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Append one page per laid-out page content
pub fn append_text_pages(
    pdf: &mut PdfDocument,
    size: PageBox,
    pages: Vec<String>,
) -> Result<(), RenderError> {
    for content in pages {
        let number = pdf.append_page(size)?;
        let page_id = pdf.page_id(number)?;
        pdf.add_font(page_id)?;
        pdf.overlay(page_id, content.into_bytes())?;
    }
    Ok(())
}
