//! Text helpers for the built-in Helvetica font

/// Resource name of the Helvetica font added to touched pages
pub const FONT_NAME: &str = "EsF1";

/// Average Helvetica glyph advance as a fraction of the font size
const AVG_GLYPH_WIDTH: f64 = 0.52;

/// Escape a string for use inside a PDF literal string
pub fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            '\n' | '\r' | '\t' => " ".to_string(),
            _ if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "?".to_string(), // Helvetica without embedding has no glyphs beyond ASCII
        })
        .collect()
}

/// Font size for a box of the given height: 60% of it, capped
pub fn font_size_for(box_height: f64, cap: f64) -> f64 {
    (box_height * 0.6).min(cap).max(0.0)
}

/// Estimated rendered width of `text`
pub fn text_width(text: &str, font_size: f64) -> f64 {
    text.chars().count() as f64 * font_size * AVG_GLYPH_WIDTH
}

/// Cut `text` so it fits `max_width`, marking the cut with "..."
pub fn truncate_to_width(text: &str, font_size: f64, max_width: f64) -> String {
    if font_size <= 0.0 || max_width <= 0.0 {
        return String::new();
    }
    if text_width(text, font_size) <= max_width {
        return text.to_string();
    }

    let per_char = font_size * AVG_GLYPH_WIDTH;
    let capacity = (max_width / per_char).floor() as usize;
    if capacity <= 3 {
        return text.chars().take(capacity).collect();
    }

    let mut cut: String = text.chars().take(capacity - 3).collect();
    cut.push_str("...");
    cut
}

/// `BT ... ET` block drawing one line of text with its baseline at `(x, y)`
pub fn text_op(x: f64, y: f64, font_size: f64, text: &str) -> String {
    format!(
        "BT /{} {:.2} Tf {:.2} {:.2} Td ({}) Tj ET\n",
        FONT_NAME,
        font_size,
        x,
        y,
        escape_pdf_string(text)
    )
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: escaping parentheses produces one escape per paren
        #[test]
        fn escape_parentheses_correct(s in ".*") {
            let escaped = escape_pdf_string(&s);
            let orig_open = s.chars().filter(|&c| c == '(').count();
            let orig_close = s.chars().filter(|&c| c == ')').count();

            prop_assert_eq!(orig_open, escaped.matches("\\(").count());
            prop_assert_eq!(orig_close, escaped.matches("\\)").count());
            prop_assert!(escaped.is_ascii());
        }

        /// Property: truncated text never exceeds the width budget
        #[test]
        fn truncated_text_fits(s in "[a-zA-Z ]{0,200}", size in 4.0f64..24.0, width in 10.0f64..500.0) {
            let cut = truncate_to_width(&s, size, width);
            prop_assert!(text_width(&cut, size) <= width + 1e-9);
        }
    }
}
