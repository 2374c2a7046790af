//! Integration tests for risk evaluation

use super::*;
use crate::types::{PositionSnapshot, Side};
use chrono::{Duration, TimeZone, Utc};

fn long_position(entry: f64) -> PositionSnapshot {
    PositionSnapshot {
        id: "pos-1".to_string(),
        side: Side::Long,
        entry_price: entry,
        size: 1.0,
    }
}

fn quiet_window() -> CandleWindow {
    let close = vec![101.0, 101.3, 101.1, 101.4, 101.2, 101.2];
    CandleWindow {
        high: close.iter().map(|c| c + 0.15).collect(),
        low: close.iter().map(|c| c - 0.15).collect(),
        close,
        volume: vec![
            1_100_000.0,
            1_150_000.0,
            1_050_000.0,
            1_200_000.0,
            1_100_000.0,
            1_200_000.0,
        ],
    }
}

#[test]
fn test_stop_levels_tighten_as_profit_grows() {
    let mut manager = TrailingStopManager::default();
    let position = long_position(100.0);

    // Prices rising through every stage: breakeven, trailing, standard
    // lock, aggressive lock, deeper aggressive lock.
    let prices = [101.0, 102.0, 104.0, 106.0, 108.0];
    let mut last_stop = f64::NEG_INFINITY;

    for price in prices {
        let adjustment = manager.evaluate(&position, price);
        assert!(adjustment.should_adjust, "no adjustment at {}", price);
        let stop = adjustment.new_stop_loss.unwrap();
        assert!(
            stop >= last_stop,
            "stop loosened from {} to {} at price {}",
            last_stop,
            stop,
            price
        );
        // A long stop never sits above the market.
        assert!(stop < price);
        last_stop = stop;
    }

    let summary = manager.position_summary("pos-1");
    assert_eq!(summary.current_stage, RiskStage::AggressiveLock);
    assert!((summary.highest_pnl - 0.08).abs() < 1e-9);
}

#[test]
fn test_stage_progression_through_full_cycle() {
    let mut manager = TrailingStopManager::default();
    let position = long_position(100.0);

    let breakeven = manager.evaluate(&position, 101.2);
    assert_eq!(breakeven.stage, Some(RiskStage::Breakeven));

    let lock = manager.evaluate(&position, 103.5);
    assert_eq!(lock.stage, Some(RiskStage::ProfitLock));
    assert!((lock.locked_profit.unwrap() - 0.035 * 0.7).abs() < 1e-9);

    let aggressive = manager.evaluate(&position, 107.0);
    assert_eq!(aggressive.stage, Some(RiskStage::AggressiveLock));

    // Price fades back under the lock threshold: trailing takes over, but
    // the high-water mark remembers the peak.
    let faded = manager.evaluate(&position, 102.0);
    assert_eq!(faded.stage, Some(RiskStage::Trailing));
    assert!((manager.position_summary("pos-1").highest_pnl - 0.07).abs() < 1e-9);
}

#[test]
fn test_evaluator_returns_stop_and_lock_separately() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let assessment = evaluator.evaluate_tick(&position, 101.2, Some(&quiet_window()), now);

    // 1.2% profit: the staged machine moves to breakeven while the lock
    // gate independently fires on the quiet window.
    assert!(assessment.stop.should_adjust);
    assert_eq!(assessment.stop.stage, Some(RiskStage::Breakeven));

    let lock = assessment.lock.expect("lock should fire");
    assert_eq!(lock.gates_passed, 5);
    assert!((lock.new_stop_loss.unwrap() - 100.96).abs() < 1e-9);

    // The two recommendations disagree on the stop level; both are
    // reported and neither is merged away.
    assert_ne!(assessment.stop.new_stop_loss, lock.new_stop_loss);
}

#[test]
fn test_evaluator_skips_lock_without_window() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let assessment = evaluator.evaluate_tick(&position, 101.2, None, now);
    assert!(assessment.stop.should_adjust);
    assert!(assessment.lock.is_none());
}

#[test]
fn test_evaluator_suppresses_non_firing_lock() {
    let mut evaluator = RiskEvaluator::default();
    // Barely above water: the lock trigger needs more than 1%.
    let position = long_position(100.9);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let assessment = evaluator.evaluate_tick(&position, 101.2, Some(&quiet_window()), now);
    assert!(assessment.lock.is_none());
}

#[test]
fn test_evaluator_tracks_consolidation_over_ticks() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    let mut last = None;
    for i in 0..=40 {
        let assessment =
            evaluator.evaluate_tick(&position, 100.5, None, t0 + Duration::minutes(2 * i));
        last = Some(assessment);
    }

    let assessment = last.unwrap();
    assert!(assessment.consolidation.is_consolidating);
    assert!(evaluator.consolidation_status(t0 + Duration::minutes(80)).is_active);
}

#[test]
fn test_evaluator_resets_consolidation_on_breakout() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    for i in 0..=40 {
        evaluator.evaluate_tick(&position, 100.5, None, t0 + Duration::minutes(2 * i));
    }
    assert!(evaluator.consolidation_status(t0 + Duration::minutes(80)).is_active);

    // A 5% jump resets the detector before the tick is recorded.
    let after = evaluator.evaluate_tick(&position, 105.5, None, t0 + Duration::minutes(82));
    assert!(!after.consolidation.is_consolidating);
    assert!(!evaluator
        .consolidation_status(t0 + Duration::minutes(82))
        .is_active);
}

#[test]
fn test_reset_position_passthrough() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    evaluator.evaluate_tick(&position, 106.0, None, now);
    assert_eq!(
        evaluator.position_summary("pos-1").current_stage,
        RiskStage::AggressiveLock
    );

    evaluator.reset_position("pos-1");
    assert_eq!(
        evaluator.position_summary("pos-1").current_stage,
        RiskStage::Initial
    );
}

#[test]
fn test_tick_assessment_serializes() {
    let mut evaluator = RiskEvaluator::default();
    let position = long_position(100.0);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let assessment = evaluator.evaluate_tick(&position, 101.2, Some(&quiet_window()), now);
    let json = serde_json::to_string_pretty(&assessment).unwrap();
    assert!(json.contains("\"stop\""));
    assert!(json.contains("\"lock\""));
}
