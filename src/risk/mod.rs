//! Position risk management
//!
//! Two independent protection layers run side by side: the staged
//! trailing-stop state machine and the consolidation profit lock. The
//! [`RiskEvaluator`] facade feeds both from one price tick and hands back
//! their outputs separately; it never merges the two action streams, since
//! which stop wins is an execution-layer decision.

mod consolidation;
mod stop_manager;

#[cfg(test)]
mod tests;

pub use consolidation::{
    CandleWindow, ConsolidationDetector, ConsolidationStatus, LockDecision, Observation,
    ProfitLockGate,
};
pub use stop_manager::{
    PositionRiskState, PositionSummary, RiskStage, StopAdjustment, TrailingStopManager,
};

use crate::config::Config;
use crate::types::PositionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the risk layer has to say about one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickAssessment {
    /// Staged stop-machine recommendation.
    pub stop: StopAdjustment,
    /// Consolidation profit lock, present only when it fires.
    pub lock: Option<LockDecision>,
    /// Rolling-window consolidation reading for this tick.
    pub consolidation: Observation,
}

/// Facade over the stop machine, the consolidation detector and the
/// profit-lock gate.
#[derive(Debug)]
pub struct RiskEvaluator {
    stops: TrailingStopManager,
    detector: ConsolidationDetector,
    lock_gate: ProfitLockGate,
}

impl RiskEvaluator {
    pub fn new(config: &Config) -> Self {
        Self {
            stops: TrailingStopManager::new(config.trailing_stop.clone()),
            detector: ConsolidationDetector::new(config.consolidation.clone()),
            lock_gate: ProfitLockGate::new(config.profit_lock.clone()),
        }
    }

    /// Evaluate one price tick. The candle window is optional; without it
    /// the profit-lock gate is skipped.
    pub fn evaluate_tick(
        &mut self,
        position: &PositionSnapshot,
        current_price: f64,
        window: Option<&CandleWindow>,
        now: DateTime<Utc>,
    ) -> TickAssessment {
        if self.detector.should_exit(current_price, now) {
            self.detector.reset();
        }
        let consolidation = self.detector.observe(current_price, now);

        let stop = self.stops.evaluate(position, current_price);

        let lock = window
            .map(|w| self.lock_gate.should_lock(position, current_price, w))
            .filter(|decision| decision.should_lock);

        TickAssessment {
            stop,
            lock,
            consolidation,
        }
    }

    pub fn position_summary(&self, position_id: &str) -> PositionSummary {
        self.stops.position_summary(position_id)
    }

    pub fn reset_position(&mut self, position_id: &str) {
        self.stops.reset_position(position_id);
    }

    pub fn consolidation_status(&self, now: DateTime<Utc>) -> ConsolidationStatus {
        self.detector.status(now)
    }
}

impl Default for RiskEvaluator {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
