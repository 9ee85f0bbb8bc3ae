//! Pipeline stages for adaptive PDF-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different extraction backend, an external
//! OCR engine) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ strategy ──▶ structure + table
//! (path)    (pdfium)    (dispatch)   (lines → Markdown)
//! ```
//!
//! 1. [`extract`]   — trait seams for text extraction and OCR, plus the
//!    positioned-word and raw-table types the rest of the pipeline consumes
//! 2. [`pdfium`]    — the pdfium-render implementation of [`extract::TextExtraction`];
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`strategy`]  — pick native / OCR / hybrid from the detected type and
//!    run the chosen path over the whole document
//! 4. [`structure`] — rebuild headings, lists and paragraphs from positioned
//!    words on one page
//! 5. [`table`]     — render an extracted cell grid as a GFM pipe table
pub mod extract;
pub mod pdfium;
pub mod strategy;
pub mod structure;
pub mod table;
