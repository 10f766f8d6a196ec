//! Coarse usage estimation and cost conversion.
//!
//! The unit estimate is a character-count heuristic, not a billing-grade
//! token count. Callers must not treat it as authoritative.

use crate::SchemaDescriptor;
use crate::descriptor::BackendDescriptor;

/// Approximate characters per usage unit for English-ish prose.
pub const CHARS_PER_UNIT: usize = 4;

/// Estimate the usage units one call will consume: combined length of the
/// content and the schema prompt, divided by [`CHARS_PER_UNIT`]. Always at
/// least 1.
pub fn estimate_units(content: &str, schema: &SchemaDescriptor) -> u64 {
    let chars = content.len() + schema.prompt.len();
    (chars / CHARS_PER_UNIT).max(1) as u64
}

/// Convert a unit estimate to USD for the given backend. Zero-priced
/// backends cost zero regardless of units.
pub fn cost_usd(units: u64, descriptor: &BackendDescriptor) -> f64 {
    units as f64 * descriptor.usd_per_million_units / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorTable;
    use crate::BackendId;

    fn schema(prompt: &str) -> SchemaDescriptor {
        SchemaDescriptor::new("t", prompt, vec![])
    }

    #[test]
    fn estimate_scales_with_length() {
        let s = schema("");
        assert_eq!(estimate_units("abcd", &s), 1);
        assert_eq!(estimate_units(&"x".repeat(400), &s), 100);
    }

    #[test]
    fn estimate_includes_schema_prompt() {
        let short = estimate_units("abcd", &schema(""));
        let with_prompt = estimate_units("abcd", &schema(&"p".repeat(400)));
        assert!(with_prompt > short);
    }

    #[test]
    fn estimate_never_zero() {
        assert_eq!(estimate_units("", &schema("")), 1);
    }

    #[test]
    fn cost_is_monotonic_in_units() {
        let table = DescriptorTable::builtin();
        let openai = table.get(BackendId::OpenAi).unwrap();
        let mut prev = 0.0;
        for units in [1u64, 10, 1_000, 1_000_000] {
            let cost = cost_usd(units, openai);
            assert!(cost > prev, "cost must grow with units");
            prev = cost;
        }
    }

    #[test]
    fn zero_priced_backend_costs_zero() {
        let table = DescriptorTable::builtin();
        let ollama = table.get(BackendId::Ollama).unwrap();
        assert_eq!(cost_usd(0, ollama), 0.0);
        assert_eq!(cost_usd(u64::MAX, ollama), 0.0);
    }

    #[test]
    fn million_units_costs_listed_price() {
        let table = DescriptorTable::builtin();
        let openai = table.get(BackendId::OpenAi).unwrap();
        let cost = cost_usd(1_000_000, openai);
        assert!((cost - openai.usd_per_million_units).abs() < 1e-9);
    }
}
