//! Cross-method contribution: what each method recovers alone, and what
//! every method agrees on.

use std::collections::{BTreeMap, BTreeSet};

use super::matched_keys;
use crate::models::{ContributionAnalysis, Granularity, RecoveryResult};

/// Unique and consensus keys across methods at one granularity.
///
/// With no methods both sets are empty. Methods sharing a name are merged.
pub fn contribution_analysis(granularity: Granularity, results: &[RecoveryResult]) -> ContributionAnalysis {
    let mut per_method: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (method, keys) in matched_keys(results, granularity) {
        per_method
            .entry(method.to_string())
            .or_default()
            .extend(keys.iter().cloned());
    }

    let mut unique = BTreeMap::new();
    for (method, keys) in &per_method {
        let others: BTreeSet<&String> = per_method
            .iter()
            .filter(|(m, _)| *m != method)
            .flat_map(|(_, k)| k)
            .collect();
        let own: BTreeSet<String> = keys.iter().filter(|k| !others.contains(k)).cloned().collect();
        unique.insert(method.clone(), own);
    }

    let consensus = per_method
        .values()
        .cloned()
        .reduce(|acc, keys| acc.intersection(&keys).cloned().collect())
        .unwrap_or_default();

    ContributionAnalysis {
        granularity,
        unique,
        consensus,
    }
}
