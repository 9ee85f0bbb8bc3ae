//! LLM-assisted quality review of converted Markdown via a local
//! [Ollama](https://ollama.com) server.
//!
//! This is the optional last step of the pipeline. The reviewer is asked to
//! grade an excerpt of the output and reply with a small JSON object; the
//! reply is stored on the conversion outcome and in the tracker's
//! `validation_reports` table. It is **advisory only** — nothing in the
//! pipeline changes the Markdown based on what the model says.
//!
//! Local models do not always comply with "reply in JSON". A reply that
//! fails to parse is kept verbatim as [`ValidationReport::Raw`] rather than
//! being thrown away.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConversionConfig;
use crate::error::StepError;

/// Liveness probe budget. A local server answers `/api/tags` in
/// milliseconds; anything slower is treated as "not running".
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Generation budget for one review call.
const REVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// How much of the Markdown the reviewer sees. Counted in characters, not
/// bytes, so multi-byte text is never split mid-character.
const PROMPT_EXCERPT_CHARS: usize = 2000;

/// The fields the reviewer is asked to produce.
///
/// Every field is optional: models routinely omit keys, and a partial
/// judgement is still worth recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityJudgement {
    /// Overall quality estimate, 0–100.
    pub quality_score: Option<f64>,
    /// Did the reviewer find headings / document structure?
    pub has_structure: Option<bool>,
    /// Did the reviewer find tables?
    pub has_tables: Option<bool>,
    /// Free-form list of problems the reviewer noticed.
    #[serde(default)]
    pub issues: Vec<String>,
    /// One-line summary of the document.
    pub summary: Option<String>,
}

/// Outcome of one review call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ValidationReport {
    /// The model replied with parseable JSON.
    Judged(QualityJudgement),
    /// The model replied with something else; kept verbatim.
    Raw { raw_response: String },
}

impl ValidationReport {
    /// Quality score if the model produced one.
    pub fn quality_score(&self) -> Option<f64> {
        match self {
            ValidationReport::Judged(j) => j.quality_score,
            ValidationReport::Raw { .. } => None,
        }
    }

    /// Structure verdict if the model produced one.
    pub fn has_structure(&self) -> Option<bool> {
        match self {
            ValidationReport::Judged(j) => j.has_structure,
            ValidationReport::Raw { .. } => None,
        }
    }

    /// Table verdict if the model produced one.
    pub fn has_tables(&self) -> Option<bool> {
        match self {
            ValidationReport::Judged(j) => j.has_tables,
            ValidationReport::Raw { .. } => None,
        }
    }
}

/// Minimal slice of Ollama's `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for one Ollama server + model pair.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`) and
    /// a model name (e.g. `gemma3:12b`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        // Trailing slash would produce "//api/generate".
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            model: model.into(),
        }
    }

    /// Client configured from [`ConversionConfig`]'s `ollama_url` and
    /// `ollama_model`.
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.ollama_model.clone())
    }

    /// The model this client asks for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Probe `/api/tags` to see whether the server is up.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "Ollama probe failed");
                false
            }
        }
    }

    /// Ask the model to review `markdown`.
    ///
    /// Fails with [`StepError::Validation`] on transport errors, non-2xx
    /// responses, or an unreadable response body. A model reply that is
    /// merely *not JSON* is not an error — it comes back as
    /// [`ValidationReport::Raw`].
    pub async fn review(&self, markdown: &str) -> Result<ValidationReport, StepError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": build_prompt(markdown),
            "stream": false,
        });

        let resp = self
            .client
            .post(&url)
            .timeout(REVIEW_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| StepError::Validation {
                detail: format!("request to {url} failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(StepError::Validation {
                detail: format!("Ollama returned HTTP {}", resp.status()),
            });
        }

        let payload: GenerateResponse = resp.json().await.map_err(|e| StepError::Validation {
            detail: format!("unreadable Ollama response: {e}"),
        })?;

        let report = parse_report(&payload.response);
        if let Some(score) = report.quality_score() {
            debug!(model = %self.model, score, "Markdown review complete");
        } else {
            debug!(model = %self.model, "Markdown review returned no score");
        }
        Ok(report)
    }
}

/// Review `markdown` if validation is worth attempting.
///
/// Returns `Ok(None)` when the server does not answer the liveness probe —
/// a machine without Ollama installed is normal operation, not an error.
/// An up-but-failing server *is* an error and surfaces as
/// [`StepError::Validation`] so the caller can record it.
pub async fn review_if_available(
    markdown: &str,
    config: &ConversionConfig,
) -> Result<Option<ValidationReport>, StepError> {
    let client = OllamaClient::from_config(config);
    if !client.is_reachable().await {
        warn!(url = %config.ollama_url, "Ollama not reachable; skipping Markdown review");
        return Ok(None);
    }
    client.review(markdown).await.map(Some)
}

/// The review prompt. Spanish, matching the corpus this pipeline was built
/// for; the JSON skeleton pins the reply format.
fn build_prompt(markdown: &str) -> String {
    let excerpt: String = markdown.chars().take(PROMPT_EXCERPT_CHARS).collect();
    format!(
        "Analiza este Markdown extraído de un PDF y responde en JSON:\n\n\
         Markdown (primeros 2000 caracteres):\n\
         ```markdown\n\
         {excerpt}\n\
         ```\n\n\
         Responde SOLO con JSON válido:\n\
         {{\n\
         \x20 \"quality_score\": <0-100>,\n\
         \x20 \"has_structure\": <true/false>,\n\
         \x20 \"has_tables\": <true/false>,\n\
         \x20 \"issues\": [\"lista\", \"de\", \"problemas\"],\n\
         \x20 \"summary\": \"resumen de 1 línea\"\n\
         }}\n"
    )
}

/// Parse a model reply. JSON object → [`ValidationReport::Judged`];
/// anything else → [`ValidationReport::Raw`].
fn parse_report(text: &str) -> ValidationReport {
    match serde_json::from_str::<QualityJudgement>(text.trim()) {
        Ok(judged) => ValidationReport::Judged(judged),
        Err(e) => {
            debug!(error = %e, "review reply is not JSON; keeping raw text");
            ValidationReport::Raw {
                raw_response: text.to_string(),
            }
        }
    }
}
