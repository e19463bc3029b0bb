use pdf_writer::{Filter, Finish, Name, Pdf, Rect, Ref};
use tracing::debug;

use crate::render::Slide;

const IMAGE_NAME: Name<'static> = Name(b"Im1");
const FONT_NAME: Name<'static> = Name(b"F1");

/// Finalized output document.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.page_count == 0
    }
}

/// Appends slides to a PDF in the order they arrive.
///
/// Each slide's JPEG is written out as soon as it is pushed, so only the
/// encoded document is held in memory. The page tree is written by
/// [`DocumentAssembler::finish`].
pub struct DocumentAssembler {
    pdf: Pdf,
    next_ref: Ref,
    catalog_id: Ref,
    page_tree_id: Ref,
    font_id: Ref,
    pages: Vec<Ref>,
}

impl DocumentAssembler {
    pub fn new() -> Self {
        let mut next_ref = Ref::new(1);
        let catalog_id = next_ref.bump();
        let page_tree_id = next_ref.bump();
        let font_id = next_ref.bump();

        let mut pdf = Pdf::new();
        pdf.type1_font(font_id).base_font(Name(b"Helvetica"));

        Self {
            pdf,
            next_ref,
            catalog_id,
            page_tree_id,
            font_id,
            pages: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn push(&mut self, slide: Slide) {
        let page_id = self.next_ref.bump();
        let image_id = self.next_ref.bump();
        let content_id = self.next_ref.bump();

        let mut image = self.pdf.image_xobject(image_id, &slide.jpeg);
        image.filter(Filter::DctDecode);
        image.width(slide.width as i32);
        image.height(slide.height as i32);
        image.color_space().device_rgb();
        image.bits_per_component(8);
        image.finish();

        let content = slide.content_stream(IMAGE_NAME, FONT_NAME);
        self.pdf.stream(content_id, &content);

        let mut page = self.pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, slide.width as f32, slide.height as f32));
        page.parent(self.page_tree_id);
        page.contents(content_id);
        let mut resources = page.resources();
        resources.x_objects().pair(IMAGE_NAME, image_id);
        resources.fonts().pair(FONT_NAME, self.font_id);
        resources.finish();
        page.finish();

        self.pages.push(page_id);
        debug!(
            page = self.pages.len(),
            frame_index = slide.frame_index,
            label = %slide.label,
            "page appended"
        );
    }

    /// Writes the catalog and page tree. An assembler with no pages still
    /// yields a well-formed document with an empty page tree.
    pub fn finish(mut self) -> Document {
        let page_count = self.pages.len();
        self.pdf.catalog(self.catalog_id).pages(self.page_tree_id);
        self.pdf
            .pages(self.page_tree_id)
            .kids(self.pages.iter().copied())
            .count(page_count as i32);
        Document {
            bytes: self.pdf.finish(),
            page_count,
        }
    }
}

impl Default for DocumentAssembler {
    fn default() -> Self {
        Self::new()
    }
}
