use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backends;
pub mod config_file;
pub mod descriptor;
pub mod estimator;
pub mod limiter;
pub mod monitor;
pub mod orchestrator;
pub mod pacing;
pub mod retry;
pub mod routing;
pub mod sink;

// Re-export for convenience
pub use backends::{BackendError, ModelBackend};
pub use descriptor::{BackendDescriptor, DescriptorTable};
pub use limiter::ConcurrencyLimiter;
pub use monitor::{ExtractionMonitor, SessionSummary};
pub use orchestrator::{Orchestrator, OrchestratorConfig, extract_all};
pub use retry::BackoffPolicy;
pub use routing::{ComplexityTier, FallbackChain, build_chain, route};
pub use sink::{AttemptRecord, AttemptSink, JsonlFileSink};

/// Identifier for a known extraction backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    OpenAi,
    Anthropic,
    Gemini,
    /// Locally hosted model. Zero-priced.
    Ollama,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::OpenAi,
        BackendId::Anthropic,
        BackendId::Gemini,
        BackendId::Ollama,
    ];

    /// Canonical lowercase name, matching the config-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::OpenAi => "openai",
            BackendId::Anthropic => "anthropic",
            BackendId::Gemini => "gemini",
            BackendId::Ollama => "ollama",
        }
    }

    /// Parse a config-file backend name (case-insensitive).
    pub fn parse(name: &str) -> Option<BackendId> {
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target schema for one extraction: what the backend is asked to produce.
///
/// Validation is structural only (JSON object with the required top-level
/// fields present). The persisted shape of extracted business data is the
/// caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Schema name, e.g. "financial_terms".
    pub name: String,
    /// Prompt text describing the schema to the model. Counted by the usage
    /// estimator alongside the content.
    pub prompt: String,
    /// Top-level fields that must be present in the output object.
    pub required_fields: Vec<String>,
}

impl SchemaDescriptor {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        required_fields: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            required_fields,
        }
    }

    /// Check that `value` conforms to this schema.
    pub fn validate(&self, value: &serde_json::Value) -> Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("expected JSON object for schema '{}'", self.name))?;
        for field in &self.required_fields {
            if !obj.contains_key(field) {
                return Err(format!(
                    "missing required field '{}' for schema '{}'",
                    field, self.name
                ));
            }
        }
        Ok(())
    }
}

/// One end-to-end extraction request.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Logical section identifier, e.g. "risk_factors".
    pub section_id: String,
    /// Already-extracted plain text content for the section.
    pub content: String,
    pub schema: SchemaDescriptor,
    /// Preferred backend hint. `None` routes by section complexity.
    pub preferred: Option<BackendId>,
}

/// Outcome of a single call to a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// Record of one concrete call to one backend. Immutable once finalized.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub backend: BackendId,
    /// 1-based index within this backend's retry budget.
    pub attempt: u32,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Estimated usage units. Present only on success.
    pub units: Option<u64>,
}

/// The outcome of one end-to-end request, successful or not.
///
/// Invariant: if `winner` is set, the final attempt in `attempts` is that
/// backend's single `Success` record.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub section_id: String,
    /// Every attempt made, in the order they ran, across the whole chain.
    pub attempts: Vec<ExtractionAttempt>,
    /// Backend that produced the value. `None` when the chain was exhausted.
    pub winner: Option<BackendId>,
    pub value: Option<serde_json::Value>,
    pub elapsed: Duration,
    /// Estimated cost of the winning attempt, in USD. Zero on failure and for
    /// zero-priced backends.
    pub cost_usd: f64,
    /// Error detail from the last failed attempt, if any.
    pub last_error: Option<String>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.winner.is_some()
    }

    /// Attempts made against one specific backend, in order.
    pub fn attempts_for(&self, backend: BackendId) -> impl Iterator<Item = &ExtractionAttempt> {
        self.attempts.iter().filter(move |a| a.backend == backend)
    }
}

/// Errors that surface to the orchestrator's caller.
///
/// Retryable backend failures are consumed inside the retrying executor and
/// fatal backend failures only skip to the next chain entry; neither is ever
/// returned from [`Orchestrator::extract`].
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Every backend in the fallback chain failed. Carries the complete
    /// result so the caller can inspect every attempt that was made.
    #[error("fallback chain exhausted for section '{}': {}",
        .0.section_id,
        .0.last_error.as_deref().unwrap_or("no attempts made"))]
    ChainExhausted(Box<ExtractionResult>),

    /// Unknown preferred backend, empty descriptor table, or similar
    /// construction-time misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_id_round_trips_through_parse() {
        for id in BackendId::ALL {
            assert_eq!(BackendId::parse(id.as_str()), Some(id));
        }
        assert_eq!(BackendId::parse("OpenAI"), Some(BackendId::OpenAi));
        assert_eq!(BackendId::parse(" gemini "), Some(BackendId::Gemini));
        assert_eq!(BackendId::parse("mistral"), None);
    }

    #[test]
    fn schema_validate_accepts_conforming_object() {
        let schema = SchemaDescriptor::new(
            "parties",
            "Extract the contracting parties.",
            vec!["buyer".into(), "seller".into()],
        );
        let value = serde_json::json!({"buyer": "Acme", "seller": "Globex", "extra": 1});
        assert!(schema.validate(&value).is_ok());
    }

    #[test]
    fn schema_validate_rejects_missing_field() {
        let schema = SchemaDescriptor::new("parties", "", vec!["buyer".into(), "seller".into()]);
        let value = serde_json::json!({"buyer": "Acme"});
        let err = schema.validate(&value).unwrap_err();
        assert!(err.contains("seller"), "unexpected message: {err}");
    }

    #[test]
    fn schema_validate_rejects_non_object() {
        let schema = SchemaDescriptor::new("parties", "", vec![]);
        assert!(schema.validate(&serde_json::json!("a string")).is_err());
        assert!(schema.validate(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn chain_exhausted_display_includes_section_and_error() {
        let result = ExtractionResult {
            section_id: "risk_factors".into(),
            attempts: vec![],
            winner: None,
            value: None,
            elapsed: Duration::ZERO,
            cost_usd: 0.0,
            last_error: Some("transport error: connection refused".into()),
        };
        let err = ExtractError::ChainExhausted(Box::new(result));
        let msg = err.to_string();
        assert!(msg.contains("risk_factors"));
        assert!(msg.contains("connection refused"));
    }
}
