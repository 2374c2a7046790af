//! Forced-diversity intervention
//!
//! When an advisory batch is unanimous, one signal is deliberately flipped
//! to a different class before the vote is trusted. The mutation is logged
//! and applied at most once per fusion call; the fusion engine caps the
//! follow-up re-fusion at a single extra pass.

use crate::types::{AdvisorySignal, SignalClass};
use rand::Rng;
use tracing::warn;

/// Injectable randomness so interventions can be replayed deterministically.
pub trait RandomSource {
    /// Uniform value in [0, 1).
    fn next_unit(&mut self) -> f64;

    /// Uniform index in [0, len). `len` is always non-zero here.
    fn next_index(&mut self, len: usize) -> usize;
}

/// Production source backed by the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&mut self) -> f64 {
        rand::rng().random_range(0.0..1.0)
    }

    fn next_index(&mut self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Deterministic source that replays scripted draws; for tests and replay.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    units: Vec<f64>,
    indices: Vec<usize>,
    unit_pos: usize,
    index_pos: usize,
}

impl ScriptedRandom {
    pub fn new(units: Vec<f64>, indices: Vec<usize>) -> Self {
        Self {
            units,
            indices,
            unit_pos: 0,
            index_pos: 0,
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn next_unit(&mut self) -> f64 {
        let value = self.units.get(self.unit_pos).copied().unwrap_or(0.5);
        self.unit_pos += 1;
        value
    }

    fn next_index(&mut self, len: usize) -> usize {
        let value = self.indices.get(self.index_pos).copied().unwrap_or(0);
        self.index_pos += 1;
        value % len
    }
}

/// Details of an applied intervention, for logging and result annotation.
#[derive(Debug, Clone)]
pub struct InterventionRecord {
    pub provider: String,
    pub old_class: SignalClass,
    pub new_class: SignalClass,
    pub old_confidence: f64,
    pub new_confidence: f64,
}

/// Flip one signal of a homogeneous batch to a non-dominant class and
/// perturb its confidence. The batch must be non-empty.
pub fn apply(signals: &mut [AdvisorySignal], rng: &mut dyn RandomSource) -> InterventionRecord {
    debug_assert!(!signals.is_empty());

    let dominant = signals[0].class();
    let alternatives: Vec<SignalClass> = SignalClass::ALL
        .into_iter()
        .filter(|c| *c != dominant)
        .collect();

    let target = rng.next_index(signals.len());
    let new_class = alternatives[rng.next_index(alternatives.len())];

    let old_class = signals[target].class();
    let old_confidence = signals[target].confidence();

    // Perturb by a factor in [0.8, 1.2], then clamp into [0.4, 0.8].
    let factor = 0.8 + rng.next_unit() * 0.4;
    let new_confidence = (old_confidence * factor).clamp(0.4, 0.8);

    signals[target].apply_override(new_class, new_confidence);

    let record = InterventionRecord {
        provider: signals[target].provider().to_string(),
        old_class,
        new_class,
        old_confidence,
        new_confidence,
    };

    warn!(
        "Diversity intervention: {} reassigned {} -> {} (confidence {:.2} -> {:.2})",
        record.provider, record.old_class, record.new_class,
        record.old_confidence, record.new_confidence
    );

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unanimous_batch() -> Vec<AdvisorySignal> {
        ["alpha", "beta", "gamma"]
            .iter()
            .map(|p| AdvisorySignal::new(*p, SignalClass::Buy, 0.85, "").unwrap())
            .collect()
    }

    #[test]
    fn test_scripted_intervention_is_reproducible() {
        for _ in 0..2 {
            let mut batch = unanimous_batch();
            let mut rng = ScriptedRandom::new(vec![0.5], vec![1, 0]);
            let record = apply(&mut batch, &mut rng);

            assert_eq!(record.provider, "beta");
            assert_eq!(record.old_class, SignalClass::Buy);
            assert_eq!(record.new_class, SignalClass::Sell);
            assert_eq!(batch[1].class(), SignalClass::Sell);
            // 0.85 * (0.8 + 0.5 * 0.4) = 0.85, clamped to 0.8
            assert!((batch[1].confidence() - 0.8).abs() < 1e-9);
        }
    }

    #[test]
    fn test_never_reassigns_to_dominant_class() {
        for index_choice in 0..2 {
            let mut batch = unanimous_batch();
            let mut rng = ScriptedRandom::new(vec![0.0], vec![0, index_choice]);
            let record = apply(&mut batch, &mut rng);
            assert_ne!(record.new_class, SignalClass::Buy);
        }
    }

    #[test]
    fn test_confidence_clamped_to_band() {
        let mut batch =
            vec![AdvisorySignal::new("alpha", SignalClass::Hold, 0.05, "").unwrap()];
        let mut rng = ScriptedRandom::new(vec![0.0], vec![0, 0]);
        let record = apply(&mut batch, &mut rng);
        assert!((record.new_confidence - 0.4).abs() < 1e-9);

        let mut batch =
            vec![AdvisorySignal::new("alpha", SignalClass::Hold, 1.0, "").unwrap()];
        let mut rng = ScriptedRandom::new(vec![1.0], vec![0, 0]);
        let record = apply(&mut batch, &mut rng);
        assert!((record.new_confidence - 0.8).abs() < 1e-9);
    }
}
