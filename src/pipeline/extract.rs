//! Extraction seams: how the pipeline reads PDFs.
//!
//! Two traits decouple the pipeline from concrete engines:
//!
//! * [`TextExtraction`] — positioned text access for documents with a real
//!   text layer. Implemented by [`crate::pipeline::pdfium::PdfiumExtractor`];
//!   tests substitute in-memory fakes.
//! * [`OcrConversion`] — whole-document OCR for scanned PDFs. No
//!   implementation ships in this crate: OCR engines are heavyweight and
//!   deployment-specific, so callers plug their own in through
//!   [`crate::ConversionConfig`].

use crate::error::PdfmdError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A word with its position and font size on the page.
///
/// Coordinates follow the extraction backend's convention: `x` grows
/// rightward from the left edge, `y` grows downward from the top edge,
/// both in PDF points (1/72 inch).
#[derive(Debug, Clone, PartialEq)]
pub struct WordToken {
    pub text: String,
    /// Distance from the page's left edge to the word's left edge.
    pub x: f32,
    /// Distance from the page's top edge to the word's top edge.
    pub y: f32,
    /// Approximate font size in points, derived from glyph heights.
    pub size: f32,
}

/// A table as extracted: rows of optional cells. `None` marks a cell the
/// backend could not read (merged regions, detection gaps).
pub type RawTable = Vec<Vec<Option<String>>>;

/// Read access to a PDF's text layer.
pub trait TextExtraction: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> Result<usize, PdfmdError>;

    /// Plain text of one page (0-indexed).
    fn page_text(&self, index: usize) -> Result<String, PdfmdError>;

    /// Positioned words of one page, in the order the backend reports them.
    fn page_words(&self, index: usize) -> Result<Vec<WordToken>, PdfmdError>;

    /// Tables detected on one page. Empty if the backend found none.
    fn page_tables(&self, index: usize) -> Result<Vec<RawTable>, PdfmdError>;
}

/// Parameters handed to the OCR backend for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSession {
    /// Languages to recognise, most likely first (ISO 639-1).
    pub languages: Vec<String>,
}

/// What an OCR backend produced for a document.
///
/// Backends differ in what they can return: some emit Markdown directly,
/// some only raw text, broken ones neither. The strategy layer prefers
/// `markdown`, falls back to `raw_text` with a note, and fails only when
/// both are missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrOutput {
    pub markdown: Option<String>,
    pub raw_text: Option<String>,
    /// Pages the backend processed.
    pub pages: usize,
    /// Figures or embedded images the backend extracted alongside text.
    pub images_extracted: usize,
}

/// Whole-document OCR for scanned PDFs.
pub trait OcrConversion: Send + Sync {
    fn convert_document(
        &self,
        path: &Path,
        session: &OcrSession,
    ) -> Result<OcrOutput, PdfmdError>;
}
