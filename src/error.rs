//! Error types for the pdfmd library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PdfmdError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, no usable extraction backend, conversion strategy
//!   failed outright). Returned as `Err(PdfmdError)` from the top-level
//!   `convert*` functions.
//!
//! * [`StepError`] — **Non-fatal**: one step of the pipeline misbehaved
//!   (type detection errored, the validator was unreachable) but the
//!   conversion itself produced output. Recorded on
//!   [`crate::convert::ConversionOutcome`] and in the tracker's
//!   `conversion_errors` table so nothing is silently swallowed.
//!
//! Fatal strategy failures are *also* written to the tracker before being
//! returned, so a failed document leaves an auditable row behind.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfmd library.
///
/// Step-level problems that still leave usable output use [`StepError`]
/// and are recorded on [`crate::convert::ConversionOutcome`] rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum PdfmdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Reading the input file failed partway through (hashing, copying).
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; encrypted documents are not supported.
    #[error("PDF '{path}' is encrypted.\nDecrypt it first: qpdf --password=PW --decrypt input.pdf output.pdf")]
    PasswordRequired { path: PathBuf },

    /// Requested page index exceeds the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Strategy errors ───────────────────────────────────────────────────
    /// The selected conversion strategy failed for the whole document.
    ///
    /// A matching row is written to the tracker's `conversion_errors`
    /// table (error type `{strategy}_failed`) before this is returned.
    #[error("{strategy} conversion failed: {detail}")]
    StrategyFailed { strategy: String, detail: String },

    /// Document needs OCR but no OCR backend is configured.
    #[error(
        "Document is scanned but no OCR backend is configured.\n\
Provide one with ConversionConfig::builder().ocr(...), or force the\n\
text-layer strategy with --strategy native if the scan has hidden text."
    )]
    OcrUnavailable,

    /// The OCR backend ran but returned neither Markdown nor raw text.
    #[error("OCR produced no usable output: {detail}")]
    EmptyOcrOutput { detail: String },

    // ── Tracker errors ────────────────────────────────────────────────────
    /// SQLite conversion tracker operation failed.
    #[error("Conversion tracker error: {0}")]
    Tracker(#[from] rusqlite::Error),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown or report file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not copy the input into the originals directory.
    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
pdfmd reads PDFs through PDFium, loaded at runtime.\n\
  • Install a system libpdfium, or\n\
  • download a release from https://github.com/bblanchon/pdfium-binaries\n\
    and place libpdfium in the working directory.\n"
    )]
    ExtractorUnavailable(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal problem in one pipeline step.
///
/// Stored on [`crate::convert::ConversionOutcome`] and logged to the
/// tracker. The conversion continues past these; only
/// [`PdfmdError`] aborts it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StepError {
    /// Type detection raised; the document was treated as unknown and
    /// converted with the text-layer strategy.
    #[error("PDF type detection failed: {detail}")]
    Detection { detail: String },

    /// A conversion strategy failed. Mirrors the fatal
    /// [`PdfmdError::StrategyFailed`] for the tracker record.
    #[error("{strategy} conversion failed: {detail}")]
    Conversion { strategy: String, detail: String },

    /// The external validator was skipped or failed mid-run.
    #[error("Markdown validation failed: {detail}")]
    Validation { detail: String },
}

impl StepError {
    /// Pipeline step name for the tracker's `step` column.
    pub fn step(&self) -> &'static str {
        match self {
            StepError::Detection { .. } => "detection",
            StepError::Conversion { .. } => "conversion",
            StepError::Validation { .. } => "validation",
        }
    }

    /// Error type key for the tracker's `error_type` column, e.g.
    /// `native_failed` for a failed text-layer conversion.
    pub fn error_type(&self) -> String {
        match self {
            StepError::Detection { .. } => "detection_failed".into(),
            StepError::Conversion { strategy, .. } => format!("{strategy}_failed"),
            StepError::Validation { .. } => "validation_failed".into(),
        }
    }

    /// Human-readable message for the tracker's `error_message` column.
    pub fn message(&self) -> String {
        match self {
            StepError::Detection { detail }
            | StepError::Conversion { detail, .. }
            | StepError::Validation { detail } => detail.clone(),
        }
    }
}
