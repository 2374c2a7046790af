//! Staged trailing-stop state machine
//!
//! Tracks one risk state per position id and recomputes the protective stop
//! every tick from the signed P&L fraction. Stages only escalate protection;
//! the machine emits stop levels and never places orders itself.

use crate::config::TrailingStopConfig;
use crate::types::{PositionSnapshot, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Protection stage of a tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStage {
    Initial,
    Breakeven,
    ProfitLock,
    AggressiveLock,
    Trailing,
}

/// Mutable per-position risk state. Created on first evaluation, removed by
/// [`TrailingStopManager::reset_position`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRiskState {
    pub stage: RiskStage,
    /// Best P&L fraction ever observed for this position.
    pub highest_pnl: f64,
    /// Profit fraction currently locked in by the stop, if any.
    pub locked_profit: f64,
    pub last_adjustment: Option<DateTime<Utc>>,
}

impl Default for PositionRiskState {
    fn default() -> Self {
        Self {
            stage: RiskStage::Initial,
            highest_pnl: 0.0,
            locked_profit: 0.0,
            last_adjustment: None,
        }
    }
}

/// Recommended stop adjustment for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAdjustment {
    pub should_adjust: bool,
    pub action: Option<String>,
    pub new_stop_loss: Option<f64>,
    pub trigger: Option<String>,
    pub reason: String,
    pub stage: Option<RiskStage>,
    pub locked_profit: Option<f64>,
}

impl StopAdjustment {
    fn none(reason: &str) -> Self {
        Self {
            should_adjust: false,
            action: None,
            new_stop_loss: None,
            trigger: None,
            reason: reason.to_string(),
            stage: None,
            locked_profit: None,
        }
    }
}

/// Summary of the tracked state of one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub position_id: String,
    pub current_stage: RiskStage,
    pub highest_pnl: f64,
    pub locked_profit: f64,
    pub last_adjustment: Option<DateTime<Utc>>,
}

/// Staged trailing-stop manager. Single writer per position id.
#[derive(Debug)]
pub struct TrailingStopManager {
    config: TrailingStopConfig,
    states: HashMap<String, PositionRiskState>,
}

impl TrailingStopManager {
    pub fn new(config: TrailingStopConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Evaluate one price tick for a position and return the recommended
    /// stop adjustment. Updates the per-position state in place.
    pub fn evaluate(&mut self, position: &PositionSnapshot, current_price: f64) -> StopAdjustment {
        if position.size <= 0.0 {
            return StopAdjustment::none("no open position");
        }
        if position.entry_price <= 0.0 {
            return StopAdjustment::none("invalid entry price");
        }

        let pnl = position.pnl_fraction(current_price);
        let state = self.states.entry(position.id.clone()).or_default();

        if pnl > state.highest_pnl {
            state.highest_pnl = pnl;
        }

        let adjustment = adjust_by_stage(&self.config, position, current_price, pnl, state);
        state.last_adjustment = Some(Utc::now());
        adjustment
    }

    /// Snapshot of the tracked state for one position id.
    pub fn position_summary(&self, position_id: &str) -> PositionSummary {
        let state = self.states.get(position_id).cloned().unwrap_or_default();
        PositionSummary {
            position_id: position_id.to_string(),
            current_stage: state.stage,
            highest_pnl: state.highest_pnl,
            locked_profit: state.locked_profit,
            last_adjustment: state.last_adjustment,
        }
    }

    /// Drop the tracked state for a closed position.
    pub fn reset_position(&mut self, position_id: &str) {
        if self.states.remove(position_id).is_some() {
            info!("Reset risk state for position {}", position_id);
        }
    }
}

impl Default for TrailingStopManager {
    fn default() -> Self {
        Self::new(TrailingStopConfig::default())
    }
}

fn adjust_by_stage(
    config: &TrailingStopConfig,
    position: &PositionSnapshot,
    current_price: f64,
    pnl: f64,
    state: &mut PositionRiskState,
) -> StopAdjustment {
    let entry = position.entry_price;
    let side = position.side;

    if pnl >= config.breakeven_at && state.stage == RiskStage::Initial {
        let stop = breakeven_stop(entry, side);
        state.stage = RiskStage::Breakeven;
        info!(
            "Breakeven protection: pnl {:.2}%, stop moved to {:.6}",
            pnl * 100.0,
            stop
        );
        return StopAdjustment {
            should_adjust: true,
            action: Some("UPDATE_STOP_LOSS".to_string()),
            new_stop_loss: Some(stop),
            trigger: Some("breakeven".to_string()),
            reason: format!("breakeven reached at {:.2}% profit", pnl * 100.0),
            stage: Some(RiskStage::Breakeven),
            locked_profit: None,
        };
    }

    if pnl >= config.lock_profit_at {
        let (locked, offset, stage) = if pnl >= config.aggressive_lock_at {
            let locked = pnl * 0.8;
            let offset = (locked - config.conservative_distance).max(0.0);
            (locked, offset, RiskStage::AggressiveLock)
        } else {
            let locked = pnl * 0.7;
            let offset = (locked - config.trailing_distance).max(0.0);
            (locked, offset, RiskStage::ProfitLock)
        };

        state.stage = stage;
        state.locked_profit = locked;

        let stop = locked_stop(entry, offset, side);
        info!(
            "Profit lock: pnl {:.2}%, locking {:.2}%",
            pnl * 100.0,
            locked * 100.0
        );
        return StopAdjustment {
            should_adjust: true,
            action: Some("UPDATE_STOP_LOSS".to_string()),
            new_stop_loss: Some(stop),
            trigger: Some("profit_lock".to_string()),
            reason: format!("profit lock triggered at {:.2}% profit", pnl * 100.0),
            stage: Some(stage),
            locked_profit: Some(locked),
        };
    }

    if pnl > 0.0 {
        let stop = trailing_stop(config, current_price, entry, side, pnl);
        state.stage = RiskStage::Trailing;
        return StopAdjustment {
            should_adjust: true,
            action: Some("UPDATE_STOP_LOSS".to_string()),
            new_stop_loss: Some(stop),
            trigger: Some("trailing".to_string()),
            reason: format!("standard trailing stop at {:.2}% profit", pnl * 100.0),
            stage: Some(RiskStage::Trailing),
            locked_profit: None,
        };
    }

    StopAdjustment::none("no adjustment condition met")
}

fn breakeven_stop(entry: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry * 1.001,
        Side::Short => entry * 0.999,
    }
}

fn locked_stop(entry: f64, offset: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry * (1.0 + offset),
        Side::Short => entry * (1.0 - offset),
    }
}

fn trailing_stop(
    config: &TrailingStopConfig,
    current_price: f64,
    entry: f64,
    side: Side,
    pnl: f64,
) -> f64 {
    // Tighter distance when deep in profit, looser near breakeven.
    let distance = if pnl > 0.05 {
        config.trailing_distance * 0.8
    } else if pnl > 0.02 {
        config.trailing_distance
    } else {
        config.trailing_distance * 1.2
    };

    match side {
        Side::Long => {
            let stop = current_price * (1.0 - distance);
            stop.max(entry * 1.001)
        }
        Side::Short => {
            let stop = current_price * (1.0 + distance);
            stop.min(entry * 0.999)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> PositionSnapshot {
        PositionSnapshot {
            id: "pos-1".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            size: 1.0,
        }
    }

    #[test]
    fn test_rejects_empty_or_invalid_position() {
        let mut manager = TrailingStopManager::default();

        let mut closed = long_position();
        closed.size = 0.0;
        let adj = manager.evaluate(&closed, 105.0);
        assert!(!adj.should_adjust);
        assert_eq!(adj.reason, "no open position");

        let mut bad = long_position();
        bad.entry_price = 0.0;
        let adj = manager.evaluate(&bad, 105.0);
        assert!(!adj.should_adjust);
        assert_eq!(adj.reason, "invalid entry price");
    }

    #[test]
    fn test_breakeven_fires_once_from_initial() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        let adj = manager.evaluate(&position, 101.5);
        assert!(adj.should_adjust);
        assert_eq!(adj.trigger.as_deref(), Some("breakeven"));
        assert!((adj.new_stop_loss.unwrap() - 100.1).abs() < 1e-9);
        assert_eq!(adj.stage, Some(RiskStage::Breakeven));

        // Same pnl band on the next tick: stage is no longer Initial, so the
        // trailing branch takes over instead.
        let adj = manager.evaluate(&position, 101.5);
        assert_eq!(adj.trigger.as_deref(), Some("trailing"));
    }

    #[test]
    fn test_standard_profit_lock() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        let adj = manager.evaluate(&position, 104.0);
        assert_eq!(adj.trigger.as_deref(), Some("profit_lock"));
        assert_eq!(adj.stage, Some(RiskStage::ProfitLock));
        // locked = 0.04 * 0.7 = 0.028; offset = 0.028 - 0.015 = 0.013
        assert!((adj.locked_profit.unwrap() - 0.028).abs() < 1e-9);
        assert!((adj.new_stop_loss.unwrap() - 101.3).abs() < 1e-9);
    }

    #[test]
    fn test_aggressive_profit_lock() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        let adj = manager.evaluate(&position, 106.0);
        assert_eq!(adj.stage, Some(RiskStage::AggressiveLock));
        // locked = 0.06 * 0.8 = 0.048; offset = 0.048 - 0.02 = 0.028
        assert!((adj.locked_profit.unwrap() - 0.048).abs() < 1e-9);
        assert!((adj.new_stop_loss.unwrap() - 102.8).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_floor_for_long() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        // pnl = 0.5%: distance = 0.015 * 1.2 = 0.018, raw stop = 98.691,
        // floored at the breakeven stop 100.1.
        let adj = manager.evaluate(&position, 100.5);
        assert_eq!(adj.trigger.as_deref(), Some("trailing"));
        assert!((adj.new_stop_loss.unwrap() - 100.1).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_cap_for_short() {
        let mut manager = TrailingStopManager::default();
        let position = PositionSnapshot {
            id: "pos-2".to_string(),
            side: Side::Short,
            entry_price: 100.0,
            size: 1.0,
        };

        // pnl = 0.5%: raw stop = 99.5 * 1.018 = 101.291, capped at 99.9.
        let adj = manager.evaluate(&position, 99.5);
        assert!((adj.new_stop_loss.unwrap() - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_losing_position_not_adjusted() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        let adj = manager.evaluate(&position, 98.0);
        assert!(!adj.should_adjust);
        assert_eq!(adj.reason, "no adjustment condition met");

        // The watermark stays at zero for a losing position.
        let summary = manager.position_summary("pos-1");
        assert_eq!(summary.highest_pnl, 0.0);
    }

    #[test]
    fn test_highest_pnl_watermark_is_monotonic() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        for price in [101.0, 104.0, 106.0, 103.0, 100.5] {
            manager.evaluate(&position, price);
        }

        let summary = manager.position_summary("pos-1");
        assert!((summary.highest_pnl - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_reset_position_forgets_state() {
        let mut manager = TrailingStopManager::default();
        let position = long_position();

        manager.evaluate(&position, 106.0);
        assert_eq!(
            manager.position_summary("pos-1").current_stage,
            RiskStage::AggressiveLock
        );

        manager.reset_position("pos-1");
        assert_eq!(
            manager.position_summary("pos-1").current_stage,
            RiskStage::Initial
        );
    }
}
