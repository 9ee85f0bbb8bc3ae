//! Configuration types for adaptive PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across threads, log them next to a conversion
//! record, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::classify::ClassifierPolicy;
use crate::error::PdfmdError;
use crate::pipeline::extract::{OcrConversion, TextExtraction};
use crate::pipeline::strategy::StrategyKind;
use crate::pipeline::structure::ReconstructorPolicy;
use crate::progress::ConversionProgress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for an adaptive PDF-to-Markdown conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfmd::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .quick_detection(true)
///     .validate(false)
///     .ocr_languages(["es", "en"])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Sample only the first 3 pages during type detection instead of up
    /// to 10. Default: false.
    ///
    /// Quick mode is 3× faster on large scans and almost always reaches the
    /// same verdict: a thesis that is scanned on page 1 is scanned on page 9
    /// too. Full mode earns its keep on mixed documents, where a native
    /// cover page followed by scanned chapters only shows up past page 3.
    pub quick_detection: bool,

    /// Force a conversion strategy instead of trusting type detection.
    /// Default: None (detect, then dispatch).
    ///
    /// Useful when detection misclassifies, e.g. a scan with an invisible
    /// OCR text layer looks native but the layer is garbage. Forcing a
    /// strategy skips nothing else: tracking, normalisation and validation
    /// still run.
    pub strategy: Option<StrategyKind>,

    /// Run the Markdown normaliser after conversion. Default: true.
    ///
    /// Disabling gives the raw reconstructed Markdown, useful when
    /// debugging why a heading was promoted or a line merged.
    pub normalize: bool,

    /// Ask a local Ollama model to review the output. Default: true.
    ///
    /// The validator is advisory: an unreachable endpoint downgrades to a
    /// warning and the conversion proceeds. See [`crate::validate`].
    pub validate: bool,

    /// Base URL of the Ollama endpoint. Default: `http://localhost:11434`.
    pub ollama_url: String,

    /// Ollama model used for validation. Default: `gemma3:12b`.
    pub ollama_model: String,

    /// Force a named conversion profile. Default: None (auto-detect from
    /// the document text; falls back to the generic academic profile).
    pub profile: Option<String>,

    /// Location of the SQLite conversion tracker. Default: None, which
    /// places `conversions.db` next to the output file.
    pub db_path: Option<PathBuf>,

    /// Record conversions in the tracker. Default: true.
    ///
    /// The tracker is what makes duplicate detection work; disabling it
    /// also disables the re-conversion short-circuit.
    pub track_conversions: bool,

    /// Re-convert even when the tracker already holds a successful
    /// conversion of the same bytes. Default: false.
    pub force: bool,

    /// Copy each input PDF into this directory before converting.
    /// Default: None (no copy).
    ///
    /// Batch pipelines point this at an `originals/` archive so the exact
    /// bytes that produced a given Markdown file are always recoverable.
    pub originals_dir: Option<PathBuf>,

    /// OCR backend used for scanned documents. Default: None.
    ///
    /// Without one, scanned documents fail with
    /// [`PdfmdError::OcrUnavailable`]. The trait seam keeps heavyweight
    /// OCR engines out of this crate's dependency tree.
    pub ocr: Option<Arc<dyn OcrConversion>>,

    /// Text-layer extraction backend. Default: None, which opens the
    /// document with the bundled PDFium binding. Integration tests and
    /// exotic deployments substitute their own implementation here.
    pub extractor: Option<Arc<dyn TextExtraction>>,

    /// Languages passed to the OCR backend, most likely first.
    /// Default: `["es", "en"]`.
    pub ocr_languages: Vec<String>,

    /// Page separator in assembled Markdown output. Default: HorizontalRule.
    ///
    /// The normaliser strips bare rules in its cleanup phase, so the
    /// separator is visible in raw output but does not survive into
    /// normalised documents.
    pub page_separator: PageSeparator,

    /// Type-detection thresholds. Defaults carry the documented contract;
    /// see [`ClassifierPolicy`].
    pub classifier: ClassifierPolicy,

    /// Structure-reconstruction tuning. Defaults carry the documented
    /// contract; see [`ReconstructorPolicy`].
    pub reconstructor: ReconstructorPolicy,

    /// Progress observer, called from the conversion worker. Default: None.
    pub progress: Option<Arc<dyn ConversionProgress>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quick_detection: false,
            strategy: None,
            normalize: true,
            validate: true,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "gemma3:12b".to_string(),
            profile: None,
            db_path: None,
            track_conversions: true,
            force: false,
            originals_dir: None,
            ocr: None,
            extractor: None,
            ocr_languages: vec!["es".to_string(), "en".to_string()],
            page_separator: PageSeparator::HorizontalRule,
            classifier: ClassifierPolicy::default(),
            reconstructor: ReconstructorPolicy::default(),
            progress: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("quick_detection", &self.quick_detection)
            .field("strategy", &self.strategy)
            .field("normalize", &self.normalize)
            .field("validate", &self.validate)
            .field("ollama_url", &self.ollama_url)
            .field("ollama_model", &self.ollama_model)
            .field("profile", &self.profile)
            .field("db_path", &self.db_path)
            .field("track_conversions", &self.track_conversions)
            .field("force", &self.force)
            .field("originals_dir", &self.originals_dir)
            .field("ocr", &self.ocr.as_ref().map(|_| "<dyn OcrConversion>"))
            .field(
                "extractor",
                &self.extractor.as_ref().map(|_| "<dyn TextExtraction>"),
            )
            .field("ocr_languages", &self.ocr_languages)
            .field("page_separator", &self.page_separator)
            .field("classifier", &self.classifier)
            .field("reconstructor", &self.reconstructor)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn quick_detection(mut self, v: bool) -> Self {
        self.config.quick_detection = v;
        self
    }

    pub fn strategy(mut self, s: StrategyKind) -> Self {
        self.config.strategy = Some(s);
        self
    }

    pub fn normalize(mut self, v: bool) -> Self {
        self.config.normalize = v;
        self
    }

    pub fn validate(mut self, v: bool) -> Self {
        self.config.validate = v;
        self
    }

    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_url = url.into();
        self
    }

    pub fn ollama_model(mut self, model: impl Into<String>) -> Self {
        self.config.ollama_model = model.into();
        self
    }

    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.config.profile = Some(name.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    pub fn track_conversions(mut self, v: bool) -> Self {
        self.config.track_conversions = v;
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn originals_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.originals_dir = Some(dir.into());
        self
    }

    pub fn ocr(mut self, backend: Arc<dyn OcrConversion>) -> Self {
        self.config.ocr = Some(backend);
        self
    }

    pub fn extractor(mut self, backend: Arc<dyn TextExtraction>) -> Self {
        self.config.extractor = Some(backend);
        self
    }

    pub fn ocr_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ocr_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn classifier(mut self, policy: ClassifierPolicy) -> Self {
        self.config.classifier = policy;
        self
    }

    pub fn reconstructor(mut self, policy: ReconstructorPolicy) -> Self {
        self.config.reconstructor = policy;
        self
    }

    pub fn progress(mut self, observer: Arc<dyn ConversionProgress>) -> Self {
        self.config.progress = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, PdfmdError> {
        let c = &self.config;
        if c.validate && c.ollama_url.is_empty() {
            return Err(PdfmdError::InvalidConfig(
                "Ollama URL must not be empty while validation is enabled".into(),
            ));
        }
        if c.ocr_languages.is_empty() {
            return Err(PdfmdError::InvalidConfig(
                "At least one OCR language is required".into(),
            ));
        }
        if let Some(name) = &c.profile {
            if crate::profile::find_profile(name).is_none() {
                let known: Vec<&str> = crate::profile::BUILTIN_PROFILES
                    .iter()
                    .map(|p| p.name)
                    .collect();
                return Err(PdfmdError::InvalidConfig(format!(
                    "unknown conversion profile '{}' (known: {})",
                    name,
                    known.join(", ")
                )));
            }
        }
        c.classifier.validate().map_err(PdfmdError::InvalidConfig)?;
        c.reconstructor
            .validate()
            .map_err(PdfmdError::InvalidConfig)?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n".
    None,
    /// Horizontal rule: "\n\n---\n\n". (default)
    #[default]
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
