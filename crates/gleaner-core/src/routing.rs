//! Section complexity routing and fallback chain construction.
//!
//! Both halves are pure: a static section-id → tier table picks the
//! preferred backend, and each preferred backend has a fixed, hand-specified
//! fallback order. Nothing here depends on runtime state.

use crate::BackendId;

/// Expected extraction difficulty for a logical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

/// Static complexity assignments. Sections not listed default to Medium.
const SECTION_TIERS: &[(&str, ComplexityTier)] = &[
    ("cover", ComplexityTier::Low),
    ("signatures", ComplexityTier::Low),
    ("exhibits", ComplexityTier::Low),
    ("parties", ComplexityTier::Low),
    ("definitions", ComplexityTier::Medium),
    ("termination", ComplexityTier::Medium),
    ("governance", ComplexityTier::Medium),
    ("management_discussion", ComplexityTier::High),
    ("risk_factors", ComplexityTier::High),
    ("financial_terms", ComplexityTier::High),
    ("indemnification", ComplexityTier::High),
    ("related_transactions", ComplexityTier::High),
];

/// Look up the complexity tier for a section. Total: unmapped ids are Medium.
pub fn tier_for_section(section_id: &str) -> ComplexityTier {
    SECTION_TIERS
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(section_id))
        .map(|(_, tier)| *tier)
        .unwrap_or(ComplexityTier::Medium)
}

/// Preferred backend for a complexity tier.
///
/// Low-complexity sections go to the cheapest hosted model, high-complexity
/// sections to the strongest one.
pub fn preferred_for_tier(tier: ComplexityTier) -> BackendId {
    match tier {
        ComplexityTier::Low => BackendId::Gemini,
        ComplexityTier::Medium => BackendId::OpenAi,
        ComplexityTier::High => BackendId::Anthropic,
    }
}

/// Route a section id to its preferred backend. Deterministic and total.
pub fn route(section_id: &str) -> BackendId {
    preferred_for_tier(tier_for_section(section_id))
}

/// Ordered, duplicate-free list of backends to try for one request.
/// The preferred backend is always first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain(Vec<BackendId>);

impl FallbackChain {
    pub fn preferred(&self) -> BackendId {
        self.0[0]
    }

    pub fn order(&self) -> &[BackendId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop entries not accepted by `keep`, preserving order. Returns `None`
    /// if nothing survives.
    pub fn retain(&self, keep: impl Fn(BackendId) -> bool) -> Option<FallbackChain> {
        let kept: Vec<BackendId> = self.0.iter().copied().filter(|id| keep(*id)).collect();
        if kept.is_empty() {
            None
        } else {
            Some(FallbackChain(kept))
        }
    }
}

impl<'a> IntoIterator for &'a FallbackChain {
    type Item = BackendId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, BackendId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

/// Build the fallback chain for a preferred backend.
///
/// Orders are hand-specified per backend rather than a generic permutation:
/// the cheap hosted model falls back to OpenAI before Anthropic, the local
/// model escalates through hosted models by cost, and the hosted flagships
/// prefer each other before the cheap tier. Ollama is always the terminal
/// free-of-charge entry for hosted preferreds.
pub fn build_chain(preferred: BackendId) -> FallbackChain {
    use BackendId::*;
    let order = match preferred {
        OpenAi => vec![OpenAi, Anthropic, Gemini, Ollama],
        Anthropic => vec![Anthropic, OpenAi, Gemini, Ollama],
        Gemini => vec![Gemini, OpenAi, Anthropic, Ollama],
        Ollama => vec![Ollama, Gemini, OpenAi, Anthropic],
    };
    FallbackChain(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_sections_get_their_tier() {
        assert_eq!(tier_for_section("cover"), ComplexityTier::Low);
        assert_eq!(tier_for_section("risk_factors"), ComplexityTier::High);
        assert_eq!(tier_for_section("RISK_FACTORS"), ComplexityTier::High);
    }

    #[test]
    fn unmapped_sections_default_to_medium() {
        assert_eq!(tier_for_section("somewhere_new"), ComplexityTier::Medium);
        assert_eq!(tier_for_section(""), ComplexityTier::Medium);
    }

    #[test]
    fn route_is_total_and_deterministic() {
        for section in ["cover", "risk_factors", "unmapped", "definitions"] {
            assert_eq!(route(section), route(section));
        }
        assert_eq!(route("cover"), BackendId::Gemini);
        assert_eq!(route("risk_factors"), BackendId::Anthropic);
        assert_eq!(route("unmapped"), BackendId::OpenAi);
    }

    #[test]
    fn chain_places_preferred_first() {
        for id in BackendId::ALL {
            let chain = build_chain(id);
            assert_eq!(chain.preferred(), id);
        }
    }

    #[test]
    fn chain_has_no_duplicates_and_covers_all_backends() {
        for id in BackendId::ALL {
            let chain = build_chain(id);
            let mut seen = std::collections::HashSet::new();
            for backend in &chain {
                assert!(seen.insert(backend), "duplicate {backend} in chain for {id}");
            }
            assert_eq!(chain.len(), BackendId::ALL.len());
        }
    }

    #[test]
    fn chain_is_deterministic_across_calls() {
        for id in BackendId::ALL {
            assert_eq!(build_chain(id), build_chain(id));
        }
    }

    #[test]
    fn retain_preserves_order_and_rejects_empty() {
        let chain = build_chain(BackendId::OpenAi);
        let kept = chain
            .retain(|id| id != BackendId::Anthropic)
            .expect("non-empty");
        assert_eq!(
            kept.order(),
            &[BackendId::OpenAi, BackendId::Gemini, BackendId::Ollama]
        );
        assert!(chain.retain(|_| false).is_none());
    }
}
