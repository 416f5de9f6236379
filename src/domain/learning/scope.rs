use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The full set of dimensions the lesson miner is allowed to slice on.
/// A scope subset is a partial assignment over (a subset of) these keys;
/// mining descends the lattice one dimension at a time, in this order,
/// so that results are reproducible across runs.
pub const SCOPE_DIMS: &[&str] = &[
    "curator",
    "chain",
    "mcap_bucket",
    "vol_bucket",
    "age_bucket",
    "intent",
    "mcap_vol_ratio_bucket",
    "market_family",
    "timeframe",
    "a_mode",
    "e_mode",
    "macro_phase",
    "meso_phase",
    "micro_phase",
    "bucket_leader",
    "bucket_rank_position",
];

/// A trade event's full scope tags. Stored as a JSON object; only keys in
/// [`SCOPE_DIMS`] participate in mining, but the map may carry extra keys
/// that callers tolerate silently (an event missing any dimension entirely
/// is still minable on the dimensions it does carry).
pub type ScopeMap = BTreeMap<String, String>;

/// A partial scope assignment identifying one node of the mining lattice.
/// Empty means "no constraint" — the top-level (pattern_key, action_category)
/// slice with no further narrowing.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeSubset(pub BTreeMap<String, String>);

impl ScopeSubset {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(&self, dim: &str, value: &str) -> Self {
        let mut next = self.0.clone();
        next.insert(dim.to_string(), value.to_string());
        Self(next)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Stable string key for grouping/upsert conflict targets.
    pub fn canonical_key(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_order_independent_of_insertion() {
        let a = ScopeSubset::empty().with("chain", "solana").with("curator", "zx");
        let b = ScopeSubset::empty().with("curator", "zx").with("chain", "solana");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn depth_tracks_assignment_count() {
        let s = ScopeSubset::empty().with("chain", "solana").with("mcap_bucket", "mid");
        assert_eq!(s.depth(), 2);
    }
}
