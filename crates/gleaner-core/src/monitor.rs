//! Extraction monitoring: per-backend and per-section rolling statistics,
//! session summaries, and error-frequency analysis.
//!
//! Every finalized attempt is recorded synchronously, so monitoring state is
//! never behind the result the caller receives. Aggregates are sharded maps
//! updated read-modify-write under their shard lock; nothing is ever rolled
//! back, including attempts from cancelled requests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::sink::{AttemptRecord, AttemptSink};
use crate::{AttemptOutcome, BackendId, ExtractionAttempt, ExtractionResult};

/// Bounded ring of recent error messages kept per backend.
pub const RECENT_ERRORS_CAP: usize = 32;

/// Rolling statistics for one backend. Reset only by [`ExtractionMonitor::clear`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub total_units: u64,
    pub total_cost_usd: f64,
    /// Most recent raw error messages, newest last, capped at
    /// [`RECENT_ERRORS_CAP`].
    pub recent_errors: VecDeque<String>,
}

impl BackendStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Per-section outcome tally.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SectionTally {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Aggregated occurrences of one normalized error message.
#[derive(Debug, Clone, Default)]
struct ErrorAgg {
    count: u64,
    backends: BTreeSet<BackendId>,
    sections: BTreeSet<String>,
}

/// One entry of [`ExtractionMonitor::error_analysis`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrequency {
    /// Normalized message (lowercased, digit runs collapsed).
    pub message: String,
    pub count: u64,
    pub backends: Vec<BackendId>,
    pub sections: Vec<String>,
}

/// Per-backend breakdown in a [`SessionSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct BackendBreakdown {
    pub backend: BackendId,
    pub stats: BackendStats,
}

/// Per-section breakdown in a [`SessionSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct SectionBreakdown {
    pub section_id: String,
    pub tally: SectionTally,
}

/// Point-in-time read-only projection over everything recorded so far.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    /// Fraction of requests that produced a value. Zero when nothing ran.
    pub success_rate: f64,
    pub attempts_total: u64,
    pub total_units: u64,
    pub total_cost_usd: f64,
    pub sink_failures: u64,
    pub backends: Vec<BackendBreakdown>,
    pub sections: Vec<SectionBreakdown>,
}

/// Records every attempt and serves summaries. One monitor per orchestrator
/// instance; safe under concurrent recording from many requests.
pub struct ExtractionMonitor {
    backends: DashMap<BackendId, BackendStats>,
    sections: DashMap<String, SectionTally>,
    errors: DashMap<String, ErrorAgg>,
    requests_total: AtomicU64,
    requests_succeeded: AtomicU64,
    sink: Option<Arc<dyn AttemptSink>>,
    sink_failures: AtomicU64,
}

impl ExtractionMonitor {
    pub fn new(sink: Option<Arc<dyn AttemptSink>>) -> Self {
        Self {
            backends: DashMap::new(),
            sections: DashMap::new(),
            errors: DashMap::new(),
            requests_total: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            sink,
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Record one finalized attempt. Called synchronously by the executor
    /// before the caller sees the attempt in its result.
    pub fn record_attempt(&self, section_id: &str, attempt: &ExtractionAttempt, cost_usd: f64) {
        {
            let mut stats = self.backends.entry(attempt.backend).or_default();
            stats.attempts += 1;
            stats.total_duration += attempt.elapsed;
            match attempt.outcome {
                AttemptOutcome::Success => {
                    stats.successes += 1;
                    stats.total_units += attempt.units.unwrap_or(0);
                    stats.total_cost_usd += cost_usd;
                }
                AttemptOutcome::RetryableFailure | AttemptOutcome::FatalFailure => {
                    stats.failures += 1;
                    if let Some(ref err) = attempt.error {
                        if stats.recent_errors.len() == RECENT_ERRORS_CAP {
                            stats.recent_errors.pop_front();
                        }
                        stats.recent_errors.push_back(err.clone());
                    }
                }
            }
        }

        {
            let mut tally = self.sections.entry(section_id.to_string()).or_default();
            tally.attempts += 1;
            match attempt.outcome {
                AttemptOutcome::Success => tally.successes += 1,
                _ => tally.failures += 1,
            }
        }

        if attempt.outcome != AttemptOutcome::Success
            && let Some(ref err) = attempt.error
        {
            let mut agg = self.errors.entry(normalize_error(err)).or_default();
            agg.count += 1;
            agg.backends.insert(attempt.backend);
            agg.sections.insert(section_id.to_string());
        }

        self.append_to_sink(section_id, attempt, cost_usd);
    }

    /// Record the completion of one end-to-end request.
    pub fn record_result(&self, result: &ExtractionResult) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if result.is_success() {
            self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sink writes must never abort the caller's extraction: failures are
    /// swallowed and counted.
    fn append_to_sink(&self, section_id: &str, attempt: &ExtractionAttempt, cost_usd: f64) {
        let Some(ref sink) = self.sink else {
            return;
        };
        let record = AttemptRecord::from_attempt(section_id, attempt, cost_usd);
        if let Err(err) = sink.append(&record) {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, section = section_id, "attempt sink write failed");
        }
    }

    /// Number of sink writes that failed and were swallowed.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Snapshot of everything recorded so far.
    pub fn session_summary(&self) -> SessionSummary {
        let mut backends: Vec<BackendBreakdown> = self
            .backends
            .iter()
            .map(|entry| BackendBreakdown {
                backend: *entry.key(),
                stats: entry.value().clone(),
            })
            .collect();
        backends.sort_by_key(|b| b.backend);

        let mut sections: Vec<SectionBreakdown> = self
            .sections
            .iter()
            .map(|entry| SectionBreakdown {
                section_id: entry.key().clone(),
                tally: entry.value().clone(),
            })
            .collect();
        sections.sort_by(|a, b| a.section_id.cmp(&b.section_id));

        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let requests_succeeded = self.requests_succeeded.load(Ordering::Relaxed);
        let success_rate = if requests_total == 0 {
            0.0
        } else {
            requests_succeeded as f64 / requests_total as f64
        };

        SessionSummary {
            requests_total,
            requests_succeeded,
            success_rate,
            attempts_total: backends.iter().map(|b| b.stats.attempts).sum(),
            total_units: backends.iter().map(|b| b.stats.total_units).sum(),
            total_cost_usd: backends.iter().map(|b| b.stats.total_cost_usd).sum(),
            sink_failures: self.sink_failures(),
            backends,
            sections,
        }
    }

    /// Frequency-ranked normalized error messages, most common first,
    /// capped to `top_n`. Ties break alphabetically for determinism.
    pub fn error_analysis(&self, top_n: usize) -> Vec<ErrorFrequency> {
        let mut entries: Vec<ErrorFrequency> = self
            .errors
            .iter()
            .map(|entry| ErrorFrequency {
                message: entry.key().clone(),
                count: entry.value().count,
                backends: entry.value().backends.iter().copied().collect(),
                sections: entry.value().sections.iter().cloned().collect(),
            })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        entries.truncate(top_n);
        entries
    }

    /// Drop all accumulated state. Stats otherwise persist for the life of
    /// the orchestrator.
    pub fn clear(&self) {
        self.backends.clear();
        self.sections.clear();
        self.errors.clear();
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_succeeded.store(0, Ordering::Relaxed);
        self.sink_failures.store(0, Ordering::Relaxed);
    }
}

/// Normalize an error message for grouping: lowercase, digit runs collapsed
/// to `#`, whitespace collapsed, truncated to 120 chars.
pub fn normalize_error(message: &str) -> String {
    let mut out = String::with_capacity(message.len().min(120));
    let mut last_was_digit = false;
    let mut last_was_space = false;
    for c in message.trim().chars() {
        if out.len() >= 120 {
            break;
        }
        if c.is_ascii_digit() {
            if !last_was_digit {
                out.push('#');
            }
            last_was_digit = true;
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_digit = false;
            last_was_space = true;
        } else {
            out.extend(c.to_lowercase());
            last_was_digit = false;
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}
