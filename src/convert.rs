//! Adaptive conversion entry points.
//!
//! One call runs the whole pipeline: input checks, duplicate detection,
//! type detection, strategy dispatch, normalisation, optional LLM review
//! and tracker bookkeeping. The public API is async like the rest of the
//! crate, but extraction itself is synchronous pdfium work and runs on a
//! blocking worker thread, so the caller's runtime stays responsive while
//! a 300-page thesis is pulled apart.
//!
//! ## Failure policy
//!
//! Only a problem that leaves no usable output aborts a conversion:
//! missing input, broken PDF, failed strategy. Everything else — a
//! detection error, an unreachable validator — degrades to a
//! [`StepError`] on [`ConversionOutcome::warnings`] plus a row in the
//! tracker's `conversion_errors` table, and the conversion carries on.

use crate::classify::{self, ClassifierReport, PdfType};
use crate::config::ConversionConfig;
use crate::error::{PdfmdError, StepError};
use crate::normalize::{self, FidelityReport, NormalizeChange};
use crate::pipeline::extract::TextExtraction;
use crate::pipeline::pdfium::PdfiumExtractor;
use crate::pipeline::strategy::{self, StrategyKind, StrategyOutput};
use crate::profile::{self, ConversionProfile, ProfileDetection};
use crate::store::{compute_hash, ConversionRecord, ConversionTracker, SuccessRecord};
use crate::validate::{self, ValidationReport};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything one conversion produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    /// The converted (and, unless disabled, normalised) Markdown.
    pub markdown: String,
    /// Detected document type, or the type implied by a forced strategy.
    pub pdf_type: PdfType,
    /// Routine that produced the Markdown. A mixed document reports
    /// `Native` — that is what the hybrid fallback ran. `None` only on a
    /// duplicate reuse of a row without a recorded strategy.
    pub strategy: Option<StrategyKind>,
    /// Pages in the document.
    pub pages: usize,
    /// Tables rendered into the output. Zero on duplicate reuse — the
    /// stored row only keeps a boolean.
    pub tables_extracted: usize,
    /// Full type-detection report. `None` when the strategy was forced
    /// or the outcome is a duplicate reuse.
    pub detection: Option<ClassifierReport>,
    /// Conversion profile that was applied.
    pub profile: Option<String>,
    /// Structural fidelity of the output; `None` when normalisation was
    /// disabled.
    pub fidelity: Option<FidelityReport>,
    /// Audit trail of normaliser edits.
    pub changes: Vec<NormalizeChange>,
    /// LLM review, when validation ran and the endpoint answered.
    pub validation: Option<ValidationReport>,
    /// The input's bytes were converted before; this outcome was
    /// rehydrated from the tracker instead of re-converting.
    pub duplicate: bool,
    /// Tracker row behind this conversion; `None` when tracking is off.
    pub conversion_id: Option<i64>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
    /// Non-fatal problems, in the order they occurred.
    pub warnings: Vec<StepError>,
}

/// Convert a PDF to Markdown.
///
/// This is the primary library entry point. The returned
/// [`ConversionOutcome`] carries the Markdown plus everything learned on
/// the way: detection report, profile, normaliser audit trail, fidelity,
/// LLM review and tracker row id.
///
/// # Errors
///
/// Fatal problems only — missing or unreadable input, a corrupt or
/// encrypted document, a strategy that produced nothing, tracker I/O.
/// Non-fatal problems land on [`ConversionOutcome::warnings`].
pub async fn convert(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, PdfmdError> {
    convert_inner(input.as_ref(), None, config).await
}

/// Convert a PDF and write the Markdown to `output`.
///
/// The Markdown is written atomically (temp file + rename). When
/// normalisation is enabled, a `{stem}_report.json` with the fidelity
/// result and the first normaliser changes is written beside it. The
/// tracker records `output` as the conversion's `markdown_path`, which
/// is what a later duplicate of the same bytes reuses.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, PdfmdError> {
    convert_inner(input.as_ref(), Some(output.as_ref()), config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, PdfmdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PdfmdError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(input, config))
}

/// Detect a document's type without converting it.
///
/// Runs only the classifier; nothing is written and nothing is recorded.
pub async fn inspect(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ClassifierReport, PdfmdError> {
    let path = input.as_ref().to_path_buf();
    precheck_input(&path)?;
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let extractor: Arc<dyn TextExtraction> = match &config.extractor {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(PdfiumExtractor::new(&path)),
        };
        classify::classify(extractor.as_ref(), &config.classifier, config.quick_detection)
    })
    .await
    .map_err(|e| PdfmdError::Internal(format!("inspection worker panicked: {e}")))
}

/// Convert PDF bytes in memory to Markdown.
///
/// The bytes are spooled to a managed [`tempfile`] that pdfium can open;
/// it is cleaned up automatically on return or panic. Duplicate detection
/// still works — it hashes content, not paths — but the tracker will
/// record the temporary file's name.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutcome, PdfmdError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| PdfmdError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| PdfmdError::Internal(format!("tempfile write: {e}")))?;
    // `tmp` is dropped (and the file deleted) when `convert` returns
    convert(tmp.path(), config).await
}

// ── The pipeline ─────────────────────────────────────────────────────────

async fn convert_inner(
    input: &Path,
    output: Option<&Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, PdfmdError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", input.display());

    // ── Step 1: Check the input ──────────────────────────────────────────
    let size_bytes = precheck_input(input)?;

    // ── Step 2: Archive the original ─────────────────────────────────────
    // Conversion proceeds from the archived copy, so the recorded path
    // stays valid after the inbox is cleaned out.
    let pdf_path = match &config.originals_dir {
        Some(dir) => archive_original(input, dir).await?,
        None => input.to_path_buf(),
    };

    // ── Step 3: Tracker and duplicate detection ──────────────────────────
    let tracker = if config.track_conversions {
        Some(ConversionTracker::open(&tracker_db_path(
            input, output, config,
        ))?)
    } else {
        None
    };

    let mut conversion_id = None;
    if let Some(t) = &tracker {
        let hash_input = pdf_path.clone();
        let hash = tokio::task::spawn_blocking(move || compute_hash(&hash_input))
            .await
            .map_err(|e| PdfmdError::Internal(format!("hashing task panicked: {e}")))??;
        debug!(hash = %hash, "input hashed");

        if !config.force {
            if let Some(prior) = t.find_by_hash(&hash)? {
                if prior.is_reusable() {
                    if let Some(outcome) = reuse_prior(&prior, output, total_start).await? {
                        info!(
                            id = prior.id,
                            hash = %hash,
                            "already converted; reusing recorded output"
                        );
                        if let Some(obs) = &config.progress {
                            obs.on_complete(outcome.elapsed_ms);
                        }
                        return Ok(outcome);
                    }
                    warn!(id = prior.id, "recorded markdown is gone; re-converting");
                }
            }
        }

        conversion_id = Some(t.begin(&pdf_path, &hash, size_bytes)?);
    }

    // ── Step 4: Detect and convert ───────────────────────────────────────
    // One blocking region for all pdfium work: detection, profile
    // sampling and extraction each reopen the document, and none of it
    // is async.
    let worker_path = pdf_path.clone();
    let worker_config = config.clone();
    let mut pass = tokio::task::spawn_blocking(move || run_pipeline(&worker_path, &worker_config))
        .await
        .map_err(|e| PdfmdError::Internal(format!("conversion worker panicked: {e}")))?;

    let mut warnings = Vec::new();
    if let Some(step) = pass.detection_warning.take() {
        if let (Some(t), Some(id)) = (&tracker, conversion_id) {
            t.add_error(id, &step)?;
        }
        warnings.push(step);
    }

    let strategy_output = match pass.result {
        Ok(out) => out,
        Err(e) => {
            if let (Some(t), Some(id)) = (&tracker, conversion_id) {
                let step = StepError::Conversion {
                    strategy: pass.attempted.as_str().to_string(),
                    detail: e.to_string(),
                };
                if let Err(tracker_err) = t
                    .add_error(id, &step)
                    .and_then(|_| t.mark_failed(id, &step.message()))
                {
                    warn!(error = %tracker_err, "could not record the failure");
                }
            }
            return Err(e);
        }
    };
    let StrategyOutput {
        markdown: raw_markdown,
        strategy: ran,
        pages,
        tables_extracted,
        mut notes,
    } = strategy_output;

    // ── Step 5: Normalise ────────────────────────────────────────────────
    let (markdown, normalized) = if config.normalize {
        let report = normalize::normalize(&raw_markdown);
        if let Some(obs) = &config.progress {
            obs.on_normalized(report.changes.len(), report.fidelity.fidelity_score);
        }
        if report.fidelity.fidelity_score < pass.profile.fidelity_threshold {
            warn!(
                score = report.fidelity.fidelity_score,
                threshold = pass.profile.fidelity_threshold,
                profile = pass.profile.name,
                "fidelity below the profile's threshold"
            );
            notes.insert("low_fidelity".into(), json!(true));
        }
        (report.markdown.clone(), Some(report))
    } else {
        (raw_markdown, None)
    };

    // ── Step 6: Assemble tracker notes ───────────────────────────────────
    if let Some(kind) = config.strategy {
        notes.insert("forced_strategy".into(), json!(kind.as_str()));
    }
    if let Some(report) = &pass.detection {
        notes.insert(
            "detection".into(),
            serde_json::to_value(report).unwrap_or(Value::Null),
        );
    }
    if let Some(found) = &pass.profile_detection {
        notes.insert(
            "profile_detection".into(),
            serde_json::to_value(found).unwrap_or(Value::Null),
        );
    }

    // ── Step 7: Write output files ───────────────────────────────────────
    if let Some(out_path) = output {
        write_atomic(out_path, markdown.as_bytes(), "md.tmp").await?;
        info!(path = %out_path.display(), "wrote Markdown");
        if let Some(report) = &normalized {
            let report_path = side_report_path(out_path);
            let body = serde_json::to_string_pretty(&report.side_report())
                .map_err(|e| PdfmdError::Internal(format!("side report: {e}")))?;
            write_atomic(&report_path, body.as_bytes(), "json.tmp").await?;
            debug!(path = %report_path.display(), "wrote side report");
        }
    }

    // ── Step 8: LLM review ───────────────────────────────────────────────
    let mut validation = None;
    if config.validate {
        match validate::review_if_available(&markdown, config).await {
            Ok(Some(report)) => {
                if let (Some(t), Some(id)) = (&tracker, conversion_id) {
                    t.add_validation_report(id, &report, &config.ollama_model)?;
                }
                if let Some(obs) = &config.progress {
                    obs.on_validated(report.quality_score());
                }
                validation = Some(report);
            }
            Ok(None) => {
                let step = StepError::Validation {
                    detail: format!(
                        "Ollama not reachable at {}; review skipped",
                        config.ollama_url
                    ),
                };
                if let (Some(t), Some(id)) = (&tracker, conversion_id) {
                    t.add_error(id, &step)?;
                }
                warnings.push(step);
            }
            Err(step) => {
                warn!(error = %step, "Markdown review failed");
                if let (Some(t), Some(id)) = (&tracker, conversion_id) {
                    t.add_error(id, &step)?;
                }
                warnings.push(step);
            }
        }
    }

    // ── Step 9: Record success ───────────────────────────────────────────
    let elapsed = total_start.elapsed();
    if let (Some(t), Some(id)) = (&tracker, conversion_id) {
        let record = SuccessRecord {
            markdown_path: output.map(Path::to_path_buf),
            pdf_type: pass.pdf_type.as_str().to_string(),
            strategy: ran.as_str().to_string(),
            profile_used: Some(pass.profile.name.to_string()),
            pages: pages as u32,
            has_tables: tables_extracted > 0,
            fidelity_score: normalized
                .as_ref()
                .map(|n| f64::from(n.fidelity.fidelity_score)),
            conversion_time_seconds: elapsed.as_secs_f64(),
            notes: Some(Value::Object(notes).to_string()),
        };
        t.mark_success(id, &record)?;
    }

    if let Some(obs) = &config.progress {
        obs.on_complete(elapsed.as_millis() as u64);
    }
    info!(
        pdf_type = %pass.pdf_type,
        strategy = %ran,
        pages,
        tables = tables_extracted,
        elapsed_ms = elapsed.as_millis() as u64,
        "conversion complete"
    );

    Ok(ConversionOutcome {
        markdown,
        pdf_type: pass.pdf_type,
        strategy: Some(ran),
        pages,
        tables_extracted,
        detection: pass.detection,
        profile: Some(pass.profile.name.to_string()),
        fidelity: normalized.as_ref().map(|n| n.fidelity.clone()),
        changes: normalized.map(|n| n.changes).unwrap_or_default(),
        validation,
        duplicate: false,
        conversion_id,
        elapsed_ms: elapsed.as_millis() as u64,
        warnings,
    })
}

/// What the blocking worker learned and produced.
struct PipelinePass {
    detection: Option<ClassifierReport>,
    detection_warning: Option<StepError>,
    pdf_type: PdfType,
    profile: &'static ConversionProfile,
    profile_detection: Option<ProfileDetection>,
    attempted: StrategyKind,
    result: Result<StrategyOutput, PdfmdError>,
}

/// Detection, profile sampling and strategy dispatch, all on one blocking
/// thread.
fn run_pipeline(pdf_path: &Path, config: &ConversionConfig) -> PipelinePass {
    let extractor: Arc<dyn TextExtraction> = match &config.extractor {
        Some(backend) => Arc::clone(backend),
        None => Arc::new(PdfiumExtractor::new(pdf_path)),
    };

    let (detection, pdf_type) = match config.strategy {
        Some(kind) => {
            info!(strategy = %kind, "strategy forced; skipping type detection");
            (None, forced_type(kind))
        }
        None => {
            let report =
                classify::classify(extractor.as_ref(), &config.classifier, config.quick_detection);
            let pdf_type = report.pdf_type;
            (Some(report), pdf_type)
        }
    };
    let detection_warning = detection
        .as_ref()
        .and_then(|r| r.error.as_ref())
        .map(|detail| StepError::Detection {
            detail: detail.clone(),
        });

    if let Some(obs) = &config.progress {
        let total = detection.as_ref().map_or(0, |r| r.total_pages);
        obs.on_type_detected(pdf_type.as_str(), total);
    }

    let (profile, profile_detection) = resolve_profile(config, extractor.as_ref());

    let attempted = config
        .strategy
        .unwrap_or_else(|| StrategyKind::for_type(pdf_type));
    let result = strategy::dispatch(attempted, extractor.as_ref(), pdf_path, config);

    PipelinePass {
        detection,
        detection_warning,
        pdf_type,
        profile,
        profile_detection,
        attempted,
        result,
    }
}

/// Map a forced strategy back to the document type it implies, for the
/// tracker's `pdf_type` column.
fn forced_type(kind: StrategyKind) -> PdfType {
    match kind {
        StrategyKind::Native => PdfType::Native,
        StrategyKind::Ocr => PdfType::Scanned,
        StrategyKind::Hybrid => PdfType::Mixed,
    }
}

/// A forced profile name wins; otherwise sample the document text.
fn resolve_profile(
    config: &ConversionConfig,
    extractor: &dyn TextExtraction,
) -> (&'static ConversionProfile, Option<ProfileDetection>) {
    if let Some(name) = &config.profile {
        match profile::find_profile(name) {
            Some(found) => {
                debug!(profile = found.name, "profile forced");
                return (found, None);
            }
            None => warn!(profile = %name, "unknown profile name; detecting instead"),
        }
    }
    let detection = profile::detect_profile(extractor, config.quick_detection);
    info!(
        profile = detection.profile,
        confidence = detection.confidence,
        "profile detected"
    );
    let found = profile::find_profile(detection.profile).unwrap_or_else(profile::default_profile);
    (found, Some(detection))
}

/// Try to rehydrate an outcome from a previously recorded conversion.
///
/// Returns `Ok(None)` when the row has no readable markdown, in which
/// case the caller converts from scratch.
async fn reuse_prior(
    prior: &ConversionRecord,
    output: Option<&Path>,
    started: Instant,
) -> Result<Option<ConversionOutcome>, PdfmdError> {
    let md_path = match &prior.markdown_path {
        Some(p) => p,
        None => return Ok(None),
    };
    let markdown = match tokio::fs::read_to_string(md_path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %md_path.display(), error = %e, "recorded markdown unreadable");
            return Ok(None);
        }
    };
    if let Some(out_path) = output {
        if out_path != md_path.as_path() {
            write_atomic(out_path, markdown.as_bytes(), "md.tmp").await?;
        }
    }
    Ok(Some(ConversionOutcome {
        markdown,
        pdf_type: PdfType::from_name(&prior.pdf_type),
        strategy: prior.strategy.as_deref().and_then(|s| s.parse().ok()),
        pages: prior.pages.unwrap_or(0) as usize,
        tables_extracted: 0,
        detection: None,
        profile: prior.profile_used.clone(),
        fidelity: None,
        changes: Vec::new(),
        validation: None,
        duplicate: true,
        conversion_id: Some(prior.id),
        elapsed_ms: started.elapsed().as_millis() as u64,
        warnings: Vec::new(),
    }))
}

// ── Input and output plumbing ────────────────────────────────────────────

/// Validate that the input exists, is readable and starts with the PDF
/// magic; returns its size for the tracker.
fn precheck_input(path: &Path) -> Result<u64, PdfmdError> {
    let meta = std::fs::metadata(path).map_err(|e| input_io_error(path, e))?;
    let mut file = std::fs::File::open(path).map_err(|e| input_io_error(path, e))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => {}
        // Shorter than four bytes cannot be a PDF either way.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(PdfmdError::NotAPdf {
                path: path.to_path_buf(),
                magic,
            })
        }
        Err(e) => {
            return Err(PdfmdError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }
    if &magic != b"%PDF" {
        return Err(PdfmdError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(meta.len())
}

fn input_io_error(path: &Path, e: std::io::Error) -> PdfmdError {
    match e.kind() {
        std::io::ErrorKind::NotFound => PdfmdError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => PdfmdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PdfmdError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

/// Copy the input into the originals directory and return the copy's
/// path. An existing copy is kept as-is.
async fn archive_original(input: &Path, dir: &Path) -> Result<PathBuf, PdfmdError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PdfmdError::CopyFailed {
            from: input.to_path_buf(),
            to: dir.to_path_buf(),
            source: e,
        })?;
    let file_name = input.file_name().ok_or_else(|| {
        PdfmdError::Internal(format!("input path has no file name: {}", input.display()))
    })?;
    let target = dir.join(file_name);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        debug!(path = %target.display(), "original already archived");
        return Ok(target);
    }
    tokio::fs::copy(input, &target)
        .await
        .map_err(|e| PdfmdError::CopyFailed {
            from: input.to_path_buf(),
            to: target.clone(),
            source: e,
        })?;
    info!(path = %target.display(), "archived original");
    Ok(target)
}

/// An explicit `db_path` wins; otherwise the tracker sits next to the
/// output, or next to the input when converting to memory.
fn tracker_db_path(input: &Path, output: Option<&Path>, config: &ConversionConfig) -> PathBuf {
    if let Some(path) = &config.db_path {
        return path.clone();
    }
    let anchor = output.unwrap_or(input);
    match anchor.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("conversions.db"),
        _ => PathBuf::from("conversions.db"),
    }
}

/// `thesis.md` → `thesis_report.json`, next to the output.
fn side_report_path(md_path: &Path) -> PathBuf {
    let stem = md_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    md_path.with_file_name(format!("{stem}_report.json"))
}

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written file.
async fn write_atomic(path: &Path, bytes: &[u8], tmp_extension: &str) -> Result<(), PdfmdError> {
    let write_err = |e: std::io::Error| PdfmdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }
    let tmp = path.with_extension(tmp_extension);
    tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
