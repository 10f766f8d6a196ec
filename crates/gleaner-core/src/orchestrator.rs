//! The extraction orchestrator: routing, admission, fallback, accounting.
//!
//! One orchestrator instance owns the limiter, the pacers, and the monitor,
//! and serves every request submitted to it. A request holds exactly one
//! concurrency permit from admission until its result is final, however many
//! backends the fallback chain ends up visiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backends::ModelBackend;
use crate::config_file::ConfigFile;
use crate::descriptor::DescriptorTable;
use crate::estimator::cost_usd;
use crate::limiter::ConcurrencyLimiter;
use crate::monitor::ExtractionMonitor;
use crate::pacing::BackendPacers;
use crate::retry::{BackoffPolicy, execute_with_retry};
use crate::routing::{build_chain, route};
use crate::sink::{AttemptSink, JsonlFileSink};
use crate::{BackendId, ExtractError, ExtractionRequest, ExtractionResult};

/// Tunable orchestrator parameters.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum requests with in-flight backend work at once.
    pub max_concurrency: usize,
    /// Retry budget per backend, including the first attempt.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Backends excluded from every fallback chain.
    pub disabled_backends: Vec<BackendId>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            disabled_backends: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overlaid with whatever the config file specifies.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        let mut config = Self::default();
        if let Some(ref c) = file.concurrency {
            if let Some(n) = c.max_concurrency {
                config.max_concurrency = n;
            }
            if let Some(n) = c.max_attempts {
                config.max_attempts = n;
            }
            if let Some(secs) = c.backoff_floor_secs {
                config.backoff.floor = Duration::from_secs(secs);
            }
            if let Some(secs) = c.backoff_ceiling_secs {
                config.backoff.ceiling = Duration::from_secs(secs);
            }
        }
        if let Some(ref backends) = file.backends
            && let Some(ref disabled) = backends.disabled
        {
            config.disabled_backends = disabled
                .iter()
                .filter_map(|name| BackendId::parse(name))
                .collect();
        }
        config
    }
}

/// Multi-backend extraction front door. See [`Orchestrator::extract`].
pub struct Orchestrator {
    descriptors: DescriptorTable,
    backends: HashMap<BackendId, Arc<dyn ModelBackend>>,
    limiter: ConcurrencyLimiter,
    pacers: BackendPacers,
    monitor: ExtractionMonitor,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        descriptors: DescriptorTable,
        backends: HashMap<BackendId, Arc<dyn ModelBackend>>,
        config: OrchestratorConfig,
    ) -> Result<Self, ExtractError> {
        Self::with_sink(descriptors, backends, config, None)
    }

    /// Full constructor: an optional sink receives every finalized attempt.
    pub fn with_sink(
        descriptors: DescriptorTable,
        backends: HashMap<BackendId, Arc<dyn ModelBackend>>,
        config: OrchestratorConfig,
        sink: Option<Arc<dyn AttemptSink>>,
    ) -> Result<Self, ExtractError> {
        if descriptors.is_empty() {
            return Err(ExtractError::Configuration(
                "descriptor table is empty; every backend is disabled".into(),
            ));
        }
        if backends.is_empty() {
            return Err(ExtractError::Configuration(
                "no backends registered".into(),
            ));
        }
        Ok(Self {
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            pacers: BackendPacers::new(),
            monitor: ExtractionMonitor::new(sink),
            descriptors,
            backends,
            config,
        })
    }

    /// Build an orchestrator from an on-disk config: descriptor overrides,
    /// disabled backends, concurrency limits, and the JSONL attempt sink.
    /// An unopenable sink path degrades to in-memory monitoring only.
    pub fn from_config_file(
        file: &ConfigFile,
        backends: HashMap<BackendId, Arc<dyn ModelBackend>>,
    ) -> Result<Self, ExtractError> {
        let descriptors = match file.backends {
            Some(ref b) => DescriptorTable::from_config(b),
            None => DescriptorTable::builtin(),
        };
        let sink = file
            .monitor
            .as_ref()
            .and_then(|m| m.sink_path.as_ref())
            .and_then(|path| match JsonlFileSink::open(path) {
                Ok(sink) => Some(Arc::new(sink) as Arc<dyn AttemptSink>),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path, "could not open attempt sink");
                    None
                }
            });
        Self::with_sink(descriptors, backends, OrchestratorConfig::from_config_file(file), sink)
    }

    pub fn monitor(&self) -> &ExtractionMonitor {
        &self.monitor
    }

    /// Requests currently holding a concurrency permit.
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Run one extraction end to end: route, admit, walk the fallback chain.
    ///
    /// On success the result names the winning backend and carries every
    /// attempt made along the way. When every chain entry fails (or the
    /// request is cancelled), the same complete result comes back inside
    /// [`ExtractError::ChainExhausted`]. Cancellation never hangs: it is
    /// honored while waiting for admission, mid-call, and between retries.
    pub async fn extract(
        &self,
        request: ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractError> {
        let preferred = match request.preferred {
            Some(hint) => {
                // An explicit hint for an unconfigured backend is a caller
                // bug; a routed default just falls through the chain filter.
                self.descriptors.require(hint)?;
                hint
            }
            None => route(&request.section_id),
        };

        let chain = build_chain(preferred)
            .retain(|id| {
                self.backends.contains_key(&id)
                    && self.descriptors.contains(id)
                    && !self.config.disabled_backends.contains(&id)
            })
            .ok_or_else(|| {
                ExtractError::Configuration(format!(
                    "no usable backend in fallback chain for section '{}'",
                    request.section_id
                ))
            })?;

        let start = Instant::now();

        let rejected = |elapsed: Duration| {
            let result = ExtractionResult {
                section_id: request.section_id.clone(),
                attempts: Vec::new(),
                winner: None,
                value: None,
                elapsed,
                cost_usd: 0.0,
                last_error: Some("request cancelled before admission".into()),
            };
            self.monitor.record_result(&result);
            ExtractError::ChainExhausted(Box::new(result))
        };

        if cancel.is_cancelled() {
            return Err(rejected(start.elapsed()));
        }
        let _permit = tokio::select! {
            permit = self.limiter.acquire() => permit,
            () = cancel.cancelled() => return Err(rejected(start.elapsed())),
        };

        tracing::debug!(
            section = %request.section_id,
            preferred = %preferred,
            chain_len = chain.len(),
            "extraction admitted"
        );

        let mut attempts = Vec::new();
        let mut last_error: Option<String> = None;

        for backend_id in &chain {
            if cancel.is_cancelled() {
                break;
            }
            // Retained entries are always registered and configured.
            let backend = &self.backends[&backend_id];
            let descriptor = self.descriptors.require(backend_id)?;
            let pacer = self.pacers.get(backend_id);

            let on_attempt = |attempt: &crate::ExtractionAttempt| {
                let cost = match attempt.units {
                    Some(units) => cost_usd(units, descriptor),
                    None => 0.0,
                };
                self.monitor.record_attempt(&request.section_id, attempt, cost);
            };

            let outcome = execute_with_retry(
                backend.as_ref(),
                descriptor,
                &request.content,
                &request.schema,
                self.config.max_attempts,
                &self.config.backoff,
                pacer,
                cancel,
                &on_attempt,
            )
            .await;

            if let Some(err) = outcome.attempts.iter().rev().find_map(|a| a.error.clone()) {
                last_error = Some(err);
            }
            let winning_units = outcome.attempts.last().and_then(|a| a.units);
            attempts.extend(outcome.attempts);

            if let Some(value) = outcome.value {
                let result = ExtractionResult {
                    section_id: request.section_id,
                    attempts,
                    winner: Some(backend_id),
                    value: Some(value),
                    elapsed: start.elapsed(),
                    cost_usd: cost_usd(winning_units.unwrap_or(0), descriptor),
                    last_error,
                };
                self.monitor.record_result(&result);
                tracing::info!(
                    section = %result.section_id,
                    winner = %backend_id,
                    attempts = result.attempts.len(),
                    "extraction succeeded"
                );
                return Ok(result);
            }

            tracing::debug!(
                section = %request.section_id,
                backend = %backend_id,
                "backend exhausted, falling back"
            );
        }

        let result = ExtractionResult {
            section_id: request.section_id,
            attempts,
            winner: None,
            value: None,
            elapsed: start.elapsed(),
            cost_usd: 0.0,
            last_error,
        };
        self.monitor.record_result(&result);
        Err(ExtractError::ChainExhausted(Box::new(result)))
    }
}

/// Run many extractions concurrently, bounded by the orchestrator's limiter.
/// Results come back in request order.
pub async fn extract_all(
    orchestrator: Arc<Orchestrator>,
    requests: Vec<ExtractionRequest>,
    cancel: &CancellationToken,
) -> Vec<Result<ExtractionResult, ExtractError>> {
    let total = requests.len();
    let mut join_set = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        join_set.spawn(async move { (index, orchestrator.extract(request, &cancel).await) });
    }

    let mut slots: Vec<Option<Result<ExtractionResult, ExtractError>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) => tracing::error!(error = %err, "extraction task failed to join"),
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(ExtractError::Configuration(
                    "extraction task panicked".into(),
                ))
            })
        })
        .collect()
}
