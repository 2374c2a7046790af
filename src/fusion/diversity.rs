//! Signal diversity analysis
//!
//! A homogeneous advisory batch (everyone says the same thing with the same
//! conviction) is treated with suspicion: unanimous providers are often
//! echoing the same upstream narrative. The analyzer quantifies disagreement
//! and flags batches that warrant a forced-diversity intervention.

use crate::types::{AdvisorySignal, SignalClass};
use serde::{Deserialize, Serialize};

/// Per-class vote counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
}

impl VoteCounts {
    pub fn tally(signals: &[AdvisorySignal]) -> Self {
        let mut counts = Self::default();
        for signal in signals {
            *counts.get_mut(signal.class()) += 1;
        }
        counts
    }

    pub fn get(&self, class: SignalClass) -> usize {
        match class {
            SignalClass::Buy => self.buy,
            SignalClass::Sell => self.sell,
            SignalClass::Hold => self.hold,
        }
    }

    fn get_mut(&mut self, class: SignalClass) -> &mut usize {
        match class {
            SignalClass::Buy => &mut self.buy,
            SignalClass::Sell => &mut self.sell,
            SignalClass::Hold => &mut self.hold,
        }
    }

    pub fn total(&self) -> usize {
        self.buy + self.sell + self.hold
    }

    /// Classes with at least one vote, in canonical order.
    pub fn present_classes(&self) -> Vec<SignalClass> {
        SignalClass::ALL
            .into_iter()
            .filter(|c| self.get(*c) > 0)
            .collect()
    }

    /// Share of the batch held by the most voted class.
    pub fn max_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.buy.max(self.sell).max(self.hold) as f64 / total as f64
    }
}

/// Summary statistics over a set of confidence values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

impl ConfidenceStats {
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Self {
            mean,
            stdev: variance.sqrt(),
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Result of analyzing one advisory batch. Ephemeral: recomputed per fusion
/// call and embedded in the [`FusionResult`](crate::fusion::FusionResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityAnalysis {
    /// 0 = unanimous, 1 = maximally spread
    pub diversity_score: f64,
    pub is_homogeneous: bool,
    pub unique_classes: Vec<SignalClass>,
    pub distribution: VoteCounts,
    pub confidence_stats: ConfidenceStats,
    pub requires_intervention: bool,
    pub summary: String,
}

impl DiversityAnalysis {
    /// Analyze a batch. Pure: identical input yields identical output.
    pub fn analyze(signals: &[AdvisorySignal]) -> Self {
        if signals.len() < 2 {
            return Self {
                diversity_score: 0.0,
                is_homogeneous: true,
                unique_classes: signals.iter().map(|s| s.class()).collect(),
                distribution: VoteCounts::tally(signals),
                confidence_stats: ConfidenceStats::default(),
                requires_intervention: false,
                summary: "insufficient signals".to_string(),
            };
        }

        let distribution = VoteCounts::tally(signals);
        let unique_classes = distribution.present_classes();
        let confidences: Vec<f64> = signals.iter().map(|s| s.confidence()).collect();
        let confidence_stats = ConfidenceStats::compute(&confidences);

        let signal_diversity = unique_classes.len() as f64 / 3.0;
        let confidence_diversity = (confidence_stats.stdev / 0.2).min(1.0);
        let diversity_score = (signal_diversity + confidence_diversity) / 2.0;

        let is_homogeneous = (unique_classes.len() == 1 && confidence_stats.stdev < 0.15)
            || diversity_score < 0.3;
        let requires_intervention = is_homogeneous && signals.len() >= 2;

        let summary = if is_homogeneous {
            "signals highly aligned".to_string()
        } else {
            "signals disagree".to_string()
        };

        Self {
            diversity_score,
            is_homogeneous,
            unique_classes,
            distribution,
            confidence_stats,
            requires_intervention,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(class: SignalClass, confidence: f64) -> AdvisorySignal {
        AdvisorySignal::new("test", class, confidence, "").unwrap()
    }

    #[test]
    fn test_insufficient_signals() {
        let analysis = DiversityAnalysis::analyze(&[]);
        assert_eq!(analysis.diversity_score, 0.0);
        assert!(analysis.is_homogeneous);
        assert!(!analysis.requires_intervention);
        assert_eq!(analysis.summary, "insufficient signals");

        let one = [signal(SignalClass::Buy, 0.9)];
        let analysis = DiversityAnalysis::analyze(&one);
        assert!(!analysis.requires_intervention);
    }

    #[test]
    fn test_unanimous_batch_requires_intervention() {
        let batch: Vec<_> = [0.82, 0.85, 0.80, 0.84, 0.81]
            .iter()
            .map(|&c| signal(SignalClass::Buy, c))
            .collect();

        let analysis = DiversityAnalysis::analyze(&batch);
        assert!(analysis.is_homogeneous);
        assert!(analysis.requires_intervention);
        assert_eq!(analysis.unique_classes, vec![SignalClass::Buy]);
        assert_eq!(analysis.distribution.buy, 5);
    }

    #[test]
    fn test_even_split_is_diverse() {
        let batch = vec![
            signal(SignalClass::Buy, 0.9),
            signal(SignalClass::Sell, 0.5),
            signal(SignalClass::Hold, 0.3),
        ];

        let analysis = DiversityAnalysis::analyze(&batch);
        assert!(analysis.diversity_score > 0.6);
        assert!(!analysis.is_homogeneous);
        assert!(!analysis.requires_intervention);
    }

    #[test]
    fn test_analyze_is_pure() {
        let batch = vec![
            signal(SignalClass::Buy, 0.9),
            signal(SignalClass::Sell, 0.4),
        ];

        let first = DiversityAnalysis::analyze(&batch);
        let second = DiversityAnalysis::analyze(&batch);
        assert_eq!(first.diversity_score, second.diversity_score);
        assert_eq!(first.distribution, second.distribution);
        assert_eq!(first.confidence_stats, second.confidence_stats);
    }

    #[test]
    fn test_confidence_stats() {
        let stats = ConfidenceStats::compute(&[0.2, 0.4, 0.6]);
        assert!((stats.mean - 0.4).abs() < 1e-9);
        assert!((stats.min - 0.2).abs() < 1e-9);
        assert!((stats.max - 0.6).abs() < 1e-9);
        assert!(stats.stdev > 0.16 && stats.stdev < 0.17);
    }
}
