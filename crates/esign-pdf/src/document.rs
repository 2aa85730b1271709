//! PDF access and overlay plumbing over lopdf

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::coords::PageBox;
use crate::error::RenderError;
use crate::raster::EmbeddedImage;
use crate::text::FONT_NAME;

/// Wrapper around `lopdf::Document` with the operations the renderer needs
pub struct PdfDocument {
    doc: Document,
}

impl PdfDocument {
    /// Load a PDF from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RenderError> {
        let doc = Document::load_mem(bytes).map_err(|e| RenderError::Parse(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Empty document with a catalog and an empty page tree
    pub fn blank() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        Self { doc }
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Page object id for a 1-based page number
    pub fn page_id(&self, page_number: u32) -> Result<ObjectId, RenderError> {
        self.doc
            .get_pages()
            .get(&page_number)
            .copied()
            .ok_or(RenderError::PageNotFound(page_number))
    }

    /// MediaBox of a page, inherited through the page tree if needed
    pub fn page_box(&self, page_number: u32) -> Result<PageBox, RenderError> {
        let mut current = Some(self.page_id(page_number)?);
        while let Some(id) = current {
            let dict = self.doc.get_dictionary(id)?;
            if let Some(rect) = dict.get(b"MediaBox").ok().and_then(|o| self.parse_rect(o)) {
                return Ok(PageBox::from_corners(rect));
            }
            current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
        }

        // Default to US Letter size
        Ok(PageBox::letter())
    }

    fn parse_rect(&self, obj: &Object) -> Option<[f64; 4]> {
        let arr = match obj {
            Object::Reference(id) => self.doc.get_object(*id).ok()?.as_array().ok()?,
            other => other.as_array().ok()?,
        };
        if arr.len() != 4 {
            return None;
        }

        let mut values = [0.0f64; 4];
        for (i, obj) in arr.iter().enumerate() {
            values[i] = self.extract_number(obj)?;
        }
        Some(values)
    }

    fn extract_number(&self, obj: &Object) -> Option<f64> {
        match obj {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r as f64),
            Object::Reference(id) => self.extract_number(self.doc.get_object(*id).ok()?),
            _ => None,
        }
    }

    /// Append a blank page of the given size; returns its page number
    pub fn append_page(&mut self, size: PageBox) -> Result<u32, RenderError> {
        let pages_id = self.pages_root()?;
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::from(size.x as f32),
                Object::from(size.y as f32),
                Object::from((size.x + size.width) as f32),
                Object::from((size.y + size.height) as f32),
            ],
            "Resources" => dictionary! {},
            "Contents" => Vec::<Object>::new(),
        });

        let pages = self.doc.get_dictionary_mut(pages_id)?;
        let count = pages.get(b"Count").and_then(|c| c.as_i64()).unwrap_or(0);
        match pages.get_mut(b"Kids") {
            Ok(Object::Array(kids)) => kids.push(Object::Reference(page_id)),
            _ => pages.set("Kids", vec![Object::Reference(page_id)]),
        }
        pages.set("Count", count + 1);

        Ok(self.page_count())
    }

    fn pages_root(&self) -> Result<ObjectId, RenderError> {
        let catalog = self.doc.catalog()?;
        catalog
            .get(b"Pages")
            .and_then(|p| p.as_reference())
            .map_err(|_| RenderError::Structure("catalog has no page tree".into()))
    }

    /// Register the overlay font on a page
    pub fn add_font(&mut self, page_id: ObjectId) -> Result<(), RenderError> {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        };
        self.set_resource(page_id, b"Font", FONT_NAME, Object::Dictionary(font))
    }

    /// Store an image XObject (with its alpha as SMask); returns its id
    pub fn embed_image(&mut self, image: &EmbeddedImage) -> ObjectId {
        let smask_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            image.alpha.clone(),
        ));
        self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
                "SMask" => smask_id,
            },
            image.rgb.clone(),
        ))
    }

    /// Make an embedded XObject drawable on a page under `name`
    pub fn use_xobject(
        &mut self,
        page_id: ObjectId,
        name: &str,
        xobject_id: ObjectId,
    ) -> Result<(), RenderError> {
        self.set_resource(page_id, b"XObject", name, Object::Reference(xobject_id))
    }

    /// Set `/Resources/<category>/<name>` on a page.
    ///
    /// The page gets its own resolved copy of its (possibly inherited or
    /// shared) resources so other pages are left untouched.
    fn set_resource(
        &mut self,
        page_id: ObjectId,
        category: &[u8],
        name: &str,
        value: Object,
    ) -> Result<(), RenderError> {
        let mut resources = self.resolved_resources(page_id)?;
        let mut entries = match resources.get(category) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => self.doc.get_dictionary(*id)?.clone(),
            _ => Dictionary::new(),
        };
        entries.set(name, value);
        resources.set(category.to_vec(), Object::Dictionary(entries));

        self.doc
            .get_dictionary_mut(page_id)?
            .set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    fn resolved_resources(&self, page_id: ObjectId) -> Result<Dictionary, RenderError> {
        let mut current = Some(page_id);
        while let Some(id) = current {
            let dict = self.doc.get_dictionary(id)?;
            match dict.get(b"Resources") {
                Ok(Object::Dictionary(res)) => return Ok(res.clone()),
                Ok(Object::Reference(res_id)) => {
                    return Ok(self.doc.get_dictionary(*res_id)?.clone())
                }
                _ => {}
            }
            current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
        }
        Ok(Dictionary::new())
    }

    /// Draw `content` over a page.
    ///
    /// The existing content is wrapped in `q`/`Q` so any graphics state it
    /// leaves behind does not leak into the overlay.
    pub fn overlay(&mut self, page_id: ObjectId, content: Vec<u8>) -> Result<(), RenderError> {
        let existing: Vec<Object> = match self.doc.get_dictionary(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut contents = Vec::with_capacity(existing.len() + 2);
        if !existing.is_empty() {
            let open = self
                .doc
                .add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
            contents.push(Object::Reference(open));
            contents.extend(existing);
        }

        let mut body = if contents.is_empty() {
            Vec::new()
        } else {
            b"\nQ\n".to_vec()
        };
        body.extend_from_slice(&content);
        let overlay = self.doc.add_object(Stream::new(dictionary! {}, body));
        contents.push(Object::Reference(overlay));

        self.doc
            .get_dictionary_mut(page_id)?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    /// Serialize the document
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, RenderError> {
        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| RenderError::Write(e.to_string()))?;
        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Minimal PDF with `pages` Letter pages, each carrying a line of text
    pub fn create_test_pdf(pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for n in 1..=pages {
            let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", n);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! {
                        "F1" => dictionary! {
                            "Type" => "Font",
                            "Subtype" => "Type1",
                            "BaseFont" => "Times-Roman",
                        },
                    },
                },
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::create_test_pdf;
    use super::*;

    #[test]
    fn test_inherited_media_box() {
        let pdf = PdfDocument::from_bytes(&create_test_pdf(2)).unwrap();
        assert_eq!(pdf.page_count(), 2);
        assert_eq!(pdf.page_box(2).unwrap(), PageBox::letter());
        assert!(matches!(pdf.page_box(3), Err(RenderError::PageNotFound(3))));
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(
            PdfDocument::from_bytes(b"not a pdf"),
            Err(RenderError::Parse(_))
        ));
    }

    #[test]
    fn test_append_page() {
        let mut pdf = PdfDocument::from_bytes(&create_test_pdf(1)).unwrap();
        let number = pdf
            .append_page(PageBox::from_corners([0.0, 0.0, 595.0, 842.0]))
            .unwrap();
        assert_eq!(number, 2);

        let bytes = pdf.save_to_bytes().unwrap();
        let reloaded = PdfDocument::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.page_count(), 2);
        let size = reloaded.page_box(2).unwrap();
        assert!((size.width - 595.0).abs() < 0.01);
    }

    #[test]
    fn test_font_keeps_inherited_resources() {
        let mut pdf = PdfDocument::from_bytes(&create_test_pdf(2)).unwrap();
        let page_id = pdf.page_id(1).unwrap();
        pdf.add_font(page_id).unwrap();

        let resources = pdf.resolved_resources(page_id).unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(FONT_NAME.as_bytes()));

        // Page 2 still only sees the inherited font
        let other = pdf.resolved_resources(pdf.page_id(2).unwrap()).unwrap();
        let other_fonts = other.get(b"Font").unwrap().as_dict().unwrap();
        assert!(!other_fonts.has(FONT_NAME.as_bytes()));
    }

    #[test]
    fn test_overlay_wraps_existing_content() {
        let mut pdf = PdfDocument::from_bytes(&create_test_pdf(1)).unwrap();
        let page_id = pdf.page_id(1).unwrap();
        pdf.overlay(page_id, b"0 0 m 10 10 l S\n".to_vec()).unwrap();

        let content = pdf.doc.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.starts_with("q\n"));
        assert!(text.contains("(Page 1) Tj"));
        assert!(text.contains("Q\n0 0 m 10 10 l S"));
    }
}
