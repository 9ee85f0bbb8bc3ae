//! # pdfmd
//!
//! Adaptive PDF-to-Markdown conversion for academic documents.
//!
//! ## Why this crate?
//!
//! One extraction strategy cannot serve a corpus of real theses and
//! papers. A born-digital dissertation has a perfectly good text layer
//! that deserves structure-aware extraction; a 1990s scan has nothing but
//! page images and needs OCR; plenty of documents are both. This crate
//! detects which kind of document it is looking at, dispatches the right
//! routine, then normalises whatever came out into consistent Markdown —
//! and keeps SQLite books on every conversion so a batch run over ten
//! thousand PDFs is auditable and never converts the same bytes twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Check     magic bytes, SHA-256, duplicate lookup in SQLite
//!  ├─ 2. Detect    sample pages via pdfium → native / scanned / mixed
//!  ├─ 3. Profile   institution, citation style, document type
//!  ├─ 4. Convert   structured text extraction, or the OCR backend
//!  ├─ 5. Normalise cleanup → headings → hierarchy → rewrite → fuse lines
//!  ├─ 6. Review    optional local Ollama model scores the result
//!  └─ 7. Record    markdown + side report on disk, row in the tracker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfmd::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let outcome = convert("thesis.pdf", &config).await?;
//!     println!("{}", outcome.markdown);
//!     eprintln!(
//!         "{} pages, type {}, fidelity {:?}",
//!         outcome.pages, outcome.pdf_type, outcome.fidelity
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfmd` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdfmd = { version = "0.3", default-features = false }
//! ```
//!
//! ## Scanned documents
//!
//! OCR engines are heavy, so none is bundled. Scanned documents need an
//! [`OcrConversion`] backend injected via
//! [`ConversionConfig::builder()`](ConversionConfig); without one they
//! fail with [`PdfmdError::OcrUnavailable`]. Everything else — detection,
//! native extraction, tables, normalisation, tracking, validation — works
//! out of the box on top of a runtime-loaded pdfium.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod classify;
pub mod config;
pub mod convert;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod store;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use classify::{ClassifierPolicy, ClassifierReport, PdfType};
pub use config::{ConversionConfig, ConversionConfigBuilder, PageSeparator};
pub use convert::{
    convert, convert_from_bytes, convert_sync, convert_to_file, inspect, ConversionOutcome,
};
pub use error::{PdfmdError, StepError};
pub use normalize::{FidelityReport, NormalizeChange};
pub use pipeline::extract::{
    OcrConversion, OcrOutput, OcrSession, RawTable, TextExtraction, WordToken,
};
pub use pipeline::strategy::StrategyKind;
pub use profile::{
    detect_profile, find_profile, ConversionProfile, ProfileDetection, BUILTIN_PROFILES,
};
pub use progress::{ConversionProgress, NoopProgress};
pub use store::{ConversionRecord, ConversionTracker, TrackerStats};
pub use validate::{OllamaClient, QualityJudgement, ValidationReport};
