//! Aggregate cross-substance summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::report::SubstanceReport;
use crate::accumulator::GatewayStats;
use crate::models::Granularity;

/// Mean recovery of one method across substances with ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: String,
    pub substances: usize,
    pub mean_exact_text: f64,
    pub mean_concept: f64,
    pub mean_chapter: f64,
}

impl MethodSummary {
    pub fn mean(&self, granularity: Granularity) -> f64 {
        match granularity {
            Granularity::ExactText => self.mean_exact_text,
            Granularity::Concept => self.mean_concept,
            Granularity::Chapter => self.mean_chapter,
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: String,
    pub substances: usize,
    /// Substances that produced no accumulation outcome
    pub failed_substances: Vec<String>,
    /// Substances whose reference set was empty
    pub no_ground_truth: Vec<String>,
    pub confirmed: usize,
    pub exhausted: usize,
    pub pending: usize,
    pub cancelled: bool,
    pub methods: Vec<MethodSummary>,
    pub gateway: Option<GatewayStats>,
}

impl RunSummary {
    pub fn from_reports(run_id: impl Into<String>, reports: &[SubstanceReport]) -> Self {
        let mut summary = Self {
            run_id: run_id.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            substances: reports.len(),
            failed_substances: Vec::new(),
            no_ground_truth: Vec::new(),
            confirmed: 0,
            exhausted: 0,
            pending: 0,
            cancelled: false,
            methods: Vec::new(),
            gateway: None,
        };

        // method -> (count, [exact, concept, chapter] sums)
        let mut rates: BTreeMap<String, (usize, [f64; 3])> = BTreeMap::new();

        for report in reports {
            if report.is_failed() {
                summary.failed_substances.push(report.substance.clone());
            }
            if let Some(outcome) = &report.accumulation {
                summary.confirmed += outcome.confirmed().len();
                summary.exhausted += outcome.exhausted().len();
                summary.pending += outcome.pending().len();
                summary.cancelled |= outcome.cancelled;
            }
            let Some(recovery) = &report.recovery else {
                continue;
            };
            if recovery.no_ground_truth && !summary.no_ground_truth.contains(&report.substance) {
                summary.no_ground_truth.push(report.substance.clone());
            }
            for result in &recovery.results {
                if result.no_ground_truth {
                    if !summary.no_ground_truth.contains(&report.substance) {
                        summary.no_ground_truth.push(report.substance.clone());
                    }
                    continue;
                }
                let entry = rates.entry(result.method.clone()).or_insert((0, [0.0; 3]));
                entry.0 += 1;
                for (i, g) in Granularity::ALL.iter().enumerate() {
                    entry.1[i] += result.recovery_rate(*g);
                }
            }
        }

        summary.methods = rates
            .into_iter()
            .map(|(method, (n, sums))| MethodSummary {
                method,
                substances: n,
                mean_exact_text: sums[0] / n as f64,
                mean_concept: sums[1] / n as f64,
                mean_chapter: sums[2] / n as f64,
            })
            .collect();
        summary
    }

    pub fn with_gateway(mut self, stats: GatewayStats) -> Self {
        self.gateway = Some(stats);
        self
    }

    pub fn method(&self, method: &str) -> Option<&MethodSummary> {
        self.methods.iter().find(|m| m.method == method)
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
