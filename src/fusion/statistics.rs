//! Batch-level signal statistics attached to every fusion result

use crate::fusion::diversity::{ConfidenceStats, VoteCounts};
use crate::types::AdvisorySignal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Descriptive statistics over one advisory batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalStatistics {
    pub total_signals: usize,
    pub distribution: VoteCounts,
    pub confidence_stats: ConfidenceStats,
    /// Composite 0-1 quality estimate of the batch.
    pub quality_score: f64,
    /// Normalized entropy of the class distribution (0 = unanimous).
    pub diversity_index: f64,
    /// Share of the batch held by the most voted class.
    pub consensus_level: f64,
}

impl SignalStatistics {
    pub fn compute(signals: &[AdvisorySignal]) -> Self {
        if signals.is_empty() {
            return Self::default();
        }

        let distribution = VoteCounts::tally(signals);
        let confidences: Vec<f64> = signals.iter().map(|s| s.confidence()).collect();
        let confidence_stats = ConfidenceStats::compute(&confidences);

        let quality_score = quality(signals, &distribution, &confidence_stats);
        let diversity_index = entropy(&distribution);
        let consensus_level = distribution.max_ratio();

        Self {
            total_signals: signals.len(),
            distribution,
            confidence_stats,
            quality_score,
            diversity_index,
            consensus_level,
        }
    }
}

fn quality(
    signals: &[AdvisorySignal],
    distribution: &VoteCounts,
    stats: &ConfidenceStats,
) -> f64 {
    let base = stats.mean;
    let consistency_bonus = (1.0 - stats.stdev).max(0.0) * 0.2;
    let diversity_bonus = distribution.present_classes().len() as f64 / 3.0 * 0.1;

    let unique_providers: HashSet<&str> = signals.iter().map(|s| s.provider()).collect();
    let provider_bonus = (unique_providers.len() as f64 / 4.0).min(0.1) * 0.1;

    (base + consistency_bonus + diversity_bonus + provider_bonus).min(1.0)
}

fn entropy(distribution: &VoteCounts) -> f64 {
    let total = distribution.total();
    if total == 0 {
        return 0.0;
    }

    let mut entropy = 0.0;
    for count in [distribution.buy, distribution.sell, distribution.hold] {
        if count > 0 {
            let p = count as f64 / total as f64;
            entropy -= p * p.ln();
        }
    }

    // Normalize by the three-class maximum.
    (entropy / 3.0_f64.ln()).min(1.0)
}
