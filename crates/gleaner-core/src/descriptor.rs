//! Static per-backend configuration: limits, timeouts, and pricing.
//!
//! The table is built once at orchestrator construction (built-in defaults,
//! optionally overlaid with config-file values) and shared read-only. No
//! module-level singletons.

use std::collections::HashMap;
use std::time::Duration;

use crate::config_file::BackendsConfig;
use crate::{BackendId, ExtractError};

/// Immutable description of one backend: identity, size limits, per-call
/// timeout, and price per million usage units.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub display_name: String,
    /// Content longer than this is truncated before the call.
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    pub call_timeout: Duration,
    /// USD per million estimated units. Zero for locally hosted models.
    pub usd_per_million_units: f64,
}

/// Read-only lookup table of backend descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    map: HashMap<BackendId, BackendDescriptor>,
}

impl DescriptorTable {
    /// Built-in defaults for every known backend.
    pub fn builtin() -> Self {
        let mut map = HashMap::new();
        for d in [
            BackendDescriptor {
                id: BackendId::OpenAi,
                display_name: "OpenAI GPT-4o".into(),
                max_input_chars: 96_000,
                max_output_tokens: 4_096,
                call_timeout: Duration::from_secs(60),
                usd_per_million_units: 2.50,
            },
            BackendDescriptor {
                id: BackendId::Anthropic,
                display_name: "Claude Sonnet".into(),
                max_input_chars: 160_000,
                max_output_tokens: 8_192,
                call_timeout: Duration::from_secs(90),
                usd_per_million_units: 3.00,
            },
            BackendDescriptor {
                id: BackendId::Gemini,
                display_name: "Gemini Flash".into(),
                max_input_chars: 200_000,
                max_output_tokens: 8_192,
                call_timeout: Duration::from_secs(60),
                usd_per_million_units: 0.10,
            },
            BackendDescriptor {
                id: BackendId::Ollama,
                display_name: "Ollama (local)".into(),
                max_input_chars: 24_000,
                max_output_tokens: 2_048,
                // Local models can be slow; generous timeout.
                call_timeout: Duration::from_secs(300),
                usd_per_million_units: 0.0,
            },
        ] {
            map.insert(d.id, d);
        }
        Self { map }
    }

    /// Built-in defaults with config-file overrides applied: per-backend
    /// price/timeout/size overrides first, then disabled backends removed.
    pub fn from_config(config: &BackendsConfig) -> Self {
        let mut table = Self::builtin();

        for over in config.overrides.as_deref().unwrap_or_default() {
            let Some(id) = BackendId::parse(&over.name) else {
                tracing::warn!(name = %over.name, "ignoring override for unknown backend");
                continue;
            };
            if let Some(d) = table.map.get_mut(&id) {
                if let Some(price) = over.usd_per_million_units {
                    d.usd_per_million_units = price;
                }
                if let Some(secs) = over.call_timeout_secs {
                    d.call_timeout = Duration::from_secs(secs);
                }
                if let Some(chars) = over.max_input_chars {
                    d.max_input_chars = chars;
                }
                if let Some(tokens) = over.max_output_tokens {
                    d.max_output_tokens = tokens;
                }
            }
        }

        for name in config.disabled.as_deref().unwrap_or_default() {
            if let Some(id) = BackendId::parse(name) {
                table.map.remove(&id);
            }
        }

        table
    }

    pub fn get(&self, id: BackendId) -> Option<&BackendDescriptor> {
        self.map.get(&id)
    }

    /// Like [`get`](Self::get) but missing entries are a configuration error.
    pub fn require(&self, id: BackendId) -> Result<&BackendDescriptor, ExtractError> {
        self.map.get(&id).ok_or_else(|| {
            ExtractError::Configuration(format!("no descriptor configured for backend '{id}'"))
        })
    }

    pub fn contains(&self, id: BackendId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::{BackendOverride, BackendsConfig};

    #[test]
    fn builtin_covers_every_backend() {
        let table = DescriptorTable::builtin();
        for id in BackendId::ALL {
            assert!(table.contains(id), "missing descriptor for {id}");
        }
        assert_eq!(table.len(), BackendId::ALL.len());
    }

    #[test]
    fn local_backend_is_zero_priced() {
        let table = DescriptorTable::builtin();
        let ollama = table.get(BackendId::Ollama).unwrap();
        assert_eq!(ollama.usd_per_million_units, 0.0);
    }

    #[test]
    fn require_unknown_is_configuration_error() {
        let config = BackendsConfig {
            disabled: Some(vec!["gemini".into()]),
            overrides: None,
        };
        let table = DescriptorTable::from_config(&config);
        let err = table.require(BackendId::Gemini).unwrap_err();
        assert!(matches!(err, ExtractError::Configuration(_)));
    }

    #[test]
    fn override_changes_price_and_timeout() {
        let config = BackendsConfig {
            disabled: None,
            overrides: Some(vec![BackendOverride {
                name: "openai".into(),
                usd_per_million_units: Some(1.25),
                call_timeout_secs: Some(30),
                max_input_chars: None,
                max_output_tokens: None,
            }]),
        };
        let table = DescriptorTable::from_config(&config);
        let openai = table.get(BackendId::OpenAi).unwrap();
        assert_eq!(openai.usd_per_million_units, 1.25);
        assert_eq!(openai.call_timeout, Duration::from_secs(30));
        // Untouched fields keep their defaults.
        assert_eq!(openai.max_output_tokens, 4_096);
    }

    #[test]
    fn unknown_override_name_is_ignored() {
        let config = BackendsConfig {
            disabled: None,
            overrides: Some(vec![BackendOverride {
                name: "mistral".into(),
                usd_per_million_units: Some(9.0),
                call_timeout_secs: None,
                max_input_chars: None,
                max_output_tokens: None,
            }]),
        };
        let table = DescriptorTable::from_config(&config);
        assert_eq!(table.len(), BackendId::ALL.len());
    }
}
