//! Coordinate mapping from normalized field boxes to PDF user space
//!
//! Fields are stored as percentages of the page (origin top-left); PDF user
//! space has its origin at the bottom-left of the MediaBox.

/// Page MediaBox as origin plus size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageBox {
    pub fn letter() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 612.0,
            height: 792.0,
        }
    }

    /// From a `[x1, y1, x2, y2]` rectangle; corners may come in any order
    pub fn from_corners(rect: [f64; 4]) -> Self {
        let [x1, y1, x2, y2] = rect;
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn as_rect(&self) -> PdfRect {
        PdfRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Rectangle in PDF user space (bottom-left origin)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PdfRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Shrink on every side; never below zero size
    pub fn inset(&self, amount: f64) -> PdfRect {
        let dx = amount.min(self.width / 2.0);
        let dy = amount.min(self.height / 2.0);
        PdfRect {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width - 2.0 * dx,
            height: self.height - 2.0 * dy,
        }
    }

    /// Intersection with the page, `None` if nothing is left
    pub fn clip_to(&self, page: &PageBox) -> Option<PdfRect> {
        let x1 = self.x.max(page.x);
        let y1 = self.y.max(page.y);
        let x2 = self.right().min(page.x + page.width);
        let y2 = self.top().min(page.y + page.height);

        let clipped = PdfRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        };
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }
}

/// Convert a percentage box (top-left origin) to PDF user space, unclipped
pub fn field_to_pdf(page: &PageBox, x_pct: f64, y_pct: f64, w_pct: f64, h_pct: f64) -> PdfRect {
    let width = w_pct / 100.0 * page.width;
    let height = h_pct / 100.0 * page.height;

    // Flip Y axis
    let x = page.x + x_pct / 100.0 * page.width;
    let y = page.y + page.height - y_pct / 100.0 * page.height - height;

    PdfRect {
        x,
        y,
        width,
        height,
    }
}

/// Map a field box onto the page, clipping whatever falls outside it.
///
/// Returns `None` for boxes with non-finite inputs or no area left on the page.
pub fn map_field(page: &PageBox, x_pct: f64, y_pct: f64, w_pct: f64, h_pct: f64) -> Option<PdfRect> {
    if ![x_pct, y_pct, w_pct, h_pct].iter().all(|v| v.is_finite()) {
        return None;
    }
    field_to_pdf(page, x_pct, y_pct, w_pct, h_pct).clip_to(page)
}

/// Largest rectangle with the image's aspect ratio that fits `target`,
/// centered inside it
pub fn fit_image(target: &PdfRect, image_width: u32, image_height: u32) -> PdfRect {
    if image_width == 0 || image_height == 0 || target.is_empty() {
        return *target;
    }

    let scale = (target.width / image_width as f64).min(target.height / image_height as f64);
    let width = image_width as f64 * scale;
    let height = image_height as f64 * scale;

    PdfRect {
        x: target.x + (target.width - width) / 2.0,
        y: target.y + (target.height - height) / 2.0,
        width,
        height,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: a mapped field always lies within the page
        #[test]
        fn mapped_field_within_page(
            x in -50.0f64..150.0,
            y in -50.0f64..150.0,
            w in 0.0f64..200.0,
            h in 0.0f64..200.0,
        ) {
            let page = PageBox::letter();
            if let Some(rect) = map_field(&page, x, y, w, h) {
                prop_assert!(rect.x >= page.x - 1e-9);
                prop_assert!(rect.y >= page.y - 1e-9);
                prop_assert!(rect.right() <= page.width + 1e-9);
                prop_assert!(rect.top() <= page.height + 1e-9);
                prop_assert!(!rect.is_empty());
            }
        }

        /// Property: a fitted image keeps its aspect ratio and stays inside
        #[test]
        fn fitted_image_preserves_aspect(
            img_w in 1u32..4000,
            img_h in 1u32..4000,
            w in 1.0f64..600.0,
            h in 1.0f64..800.0,
        ) {
            let target = PdfRect { x: 10.0, y: 10.0, width: w, height: h };
            let fitted = fit_image(&target, img_w, img_h);

            prop_assert!(fitted.width <= target.width + 1e-6);
            prop_assert!(fitted.height <= target.height + 1e-6);
            prop_assert!(fitted.x >= target.x - 1e-6);
            prop_assert!(fitted.y >= target.y - 1e-6);

            let expected = img_w as f64 / img_h as f64;
            let actual = fitted.width / fitted.height;
            prop_assert!((expected - actual).abs() / expected < 1e-6);
        }
    }
}
