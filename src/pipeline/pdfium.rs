//! pdfium-backed text extraction.
//!
//! ## Why reopen the document per call?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally; its document handles are neither `Send`
//! nor `Sync`. Holding only the path and rebinding per call keeps
//! [`PdfiumExtractor`] freely shareable across threads, at the cost of a
//! re-open per operation — negligible next to the extraction work itself,
//! and the conversion layer batches all extraction for a document into one
//! `spawn_blocking` region anyway.
//!
//! ## Binding
//!
//! pdfium is loaded at runtime: first the system library, then a
//! `libpdfium` sitting in the working directory. Failure is reported as
//! [`PdfmdError::ExtractorUnavailable`] with installation guidance instead
//! of panicking.

use crate::error::PdfmdError;
use crate::pipeline::extract::{RawTable, TextExtraction, WordToken};
use crate::pipeline::table::detect_tables;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// [`TextExtraction`] implementation over pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    path: PathBuf,
}

impl PdfiumExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bind() -> Result<Pdfium, PdfmdError> {
        let bindings = Pdfium::bind_to_system_library()
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            })
            .map_err(|e| PdfmdError::ExtractorUnavailable(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(&self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, PdfmdError> {
        pdfium.load_pdf_from_file(&self.path, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                PdfmdError::PasswordRequired {
                    path: self.path.clone(),
                }
            } else {
                PdfmdError::CorruptPdf {
                    path: self.path.clone(),
                    detail: err_str,
                }
            }
        })
    }

    fn with_page<T>(
        &self,
        index: usize,
        f: impl FnOnce(&PdfPage) -> Result<T, PdfmdError>,
    ) -> Result<T, PdfmdError> {
        let pdfium = Self::bind()?;
        let document = self.load(&pdfium)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if index >= total {
            return Err(PdfmdError::PageOutOfRange {
                page: index + 1,
                total,
            });
        }
        let page = pages.get(index as u16).map_err(|e| PdfmdError::CorruptPdf {
            path: self.path.clone(),
            detail: format!("{:?}", e),
        })?;
        f(&page)
    }

    fn page_error(&self, e: PdfiumError) -> PdfmdError {
        PdfmdError::CorruptPdf {
            path: self.path.clone(),
            detail: format!("{:?}", e),
        }
    }
}

impl TextExtraction for PdfiumExtractor {
    fn page_count(&self) -> Result<usize, PdfmdError> {
        let pdfium = Self::bind()?;
        let document = self.load(&pdfium)?;
        Ok(document.pages().len() as usize)
    }

    fn page_text(&self, index: usize) -> Result<String, PdfmdError> {
        self.with_page(index, |page| {
            let text = page.text().map_err(|e| self.page_error(e))?;
            Ok(text.all())
        })
    }

    fn page_words(&self, index: usize) -> Result<Vec<WordToken>, PdfmdError> {
        self.with_page(index, |page| {
            let words = collect_words(page).map_err(|e| self.page_error(e))?;
            debug!(page = index + 1, words = words.len(), "extracted word tokens");
            Ok(words)
        })
    }

    fn page_tables(&self, index: usize) -> Result<Vec<RawTable>, PdfmdError> {
        let words = self.page_words(index)?;
        Ok(detect_tables(&words))
    }
}

/// Vertical slack when deciding whether two characters share a line.
const SAME_LINE_TOLERANCE: f32 = 2.0;

/// Assemble characters into word tokens.
///
/// pdfium reports characters bottom-up; tokens come out top-down (`y`
/// grows downward) to match the [`WordToken`] contract. A word ends at
/// whitespace, at a vertical jump, or at a horizontal gap wider than a
/// quarter of the running font size — roughly the width of a space glyph.
#[allow(deprecated)] // PdfRect field access deprecated in 0.8.28, removed in 0.9.0
fn collect_words(page: &PdfPage) -> Result<Vec<WordToken>, PdfiumError> {
    let text = page.text()?;
    let page_height = page.height().value;

    struct Partial {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        end_x: f32,
        last_y: f32,
    }

    fn flush(current: &mut Option<Partial>, words: &mut Vec<WordToken>) {
        if let Some(p) = current.take() {
            if !p.text.is_empty() {
                words.push(WordToken {
                    text: p.text,
                    x: p.x,
                    y: p.y,
                    size: p.size,
                });
            }
        }
    }

    let mut words: Vec<WordToken> = Vec::new();
    let mut current: Option<Partial> = None;

    for ch in text.chars().iter() {
        let (Some(unicode), Ok(rect)) = (ch.unicode_char(), ch.tight_bounds()) else {
            continue;
        };
        if unicode.is_whitespace() {
            flush(&mut current, &mut words);
            continue;
        }

        let left = rect.left.value;
        let right = rect.right.value;
        let height = (rect.top.value - rect.bottom.value).abs();
        let y_top = page_height - rect.top.value;

        let starts_new_word = match current.as_ref() {
            None => true,
            Some(p) => {
                let gap = left - p.end_x;
                let space_width = (p.size * 0.25).max(0.5);
                let new_line = (y_top - p.last_y).abs() > SAME_LINE_TOLERANCE;
                new_line || gap > space_width
            }
        };

        if starts_new_word {
            flush(&mut current, &mut words);
            current = Some(Partial {
                text: unicode.to_string(),
                x: left,
                y: y_top,
                size: height,
                end_x: right,
                last_y: y_top,
            });
        } else if let Some(p) = current.as_mut() {
            p.text.push(unicode);
            p.size = p.size.max(height);
            p.end_x = right;
            p.last_y = y_top;
        }
    }
    flush(&mut current, &mut words);

    Ok(words)
}
