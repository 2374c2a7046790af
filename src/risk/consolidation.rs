//! Sideways-market detection and consolidation profit lock
//!
//! Two cooperating pieces: a rolling-window [`ConsolidationDetector`] that
//! tracks whether price action has flattened out, and a [`ProfitLockGate`]
//! that scores one candle window against six gates and recommends locking
//! most of the open profit when a profitable position sits in a dead market.
//! The gate runs independently of the staged stop machine; reconciling the
//! two action streams is the caller's job.

use crate::config::{ConsolidationConfig, ProfitLockConfig};
use crate::types::{PositionSnapshot, Side};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One tick's observation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub is_consolidating: bool,
    /// Range of the last window as a percent of the window low.
    pub price_range_pct: f64,
    pub duration_minutes: f64,
    pub data_points: usize,
}

/// Snapshot of the detector state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationStatus {
    pub is_active: bool,
    pub duration_minutes: f64,
    pub partial_close_done: bool,
    pub start_price: f64,
    pub current_price: f64,
    pub price_range_pct: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub data_points: usize,
}

/// Rolling-window sideways-market detector.
///
/// Callers pass the observation time explicitly so replays and tests are
/// deterministic; production feeds `Utc::now()`.
#[derive(Debug)]
pub struct ConsolidationDetector {
    config: ConsolidationConfig,
    prices: Vec<f64>,
    timestamps: Vec<DateTime<Utc>>,
    active: bool,
    start_time: Option<DateTime<Utc>>,
    start_price: f64,
    partial_close_done: bool,
}

impl ConsolidationDetector {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self {
            config,
            prices: Vec::new(),
            timestamps: Vec::new(),
            active: false,
            start_time: None,
            start_price: 0.0,
            partial_close_done: false,
        }
    }

    /// Record one price tick and reassess the consolidation state.
    pub fn observe(&mut self, price: f64, now: DateTime<Utc>) -> Observation {
        if price > 0.0 {
            self.prices.push(price);
            self.timestamps.push(now);
        }
        self.prune(now);

        let window = self.config.window_points;
        if self.prices.len() < window {
            return Observation {
                is_consolidating: false,
                price_range_pct: 0.0,
                duration_minutes: 0.0,
                data_points: self.prices.len(),
            };
        }

        let range_pct = self.window_range_pct();
        let in_range = range_pct < self.config.range_threshold_pct;

        if in_range {
            if self.start_time.is_none() {
                self.start_time = Some(now);
                self.start_price = price;
            }
        } else if self.active || self.start_time.is_some() {
            self.end(now);
        }

        let duration = self.duration_minutes(now);
        let is_consolidating = in_range && duration >= self.config.min_duration_mins as f64;

        if is_consolidating && !self.active {
            self.active = true;
            self.partial_close_done = false;
            info!(
                "Consolidation detected, start price {:.6}, range {:.2}%",
                self.start_price, range_pct
            );
        }

        Observation {
            is_consolidating,
            price_range_pct: range_pct,
            duration_minutes: duration,
            data_points: self.prices.len(),
        }
    }

    /// Whether an active consolidation should be abandoned: price broke out
    /// of the band or the phase has dragged on past the timeout.
    pub fn should_exit(&self, current_price: f64, now: DateTime<Utc>) -> bool {
        if !self.active || current_price <= 0.0 {
            return false;
        }

        if self.start_price > 0.0 {
            let move_pct =
                (current_price - self.start_price).abs() / self.start_price * 100.0;
            if move_pct > self.config.breakout_pct {
                info!("Breakout of {:.2}% ends consolidation", move_pct);
                return true;
            }
        }

        if self.duration_minutes(now) > self.config.timeout_mins as f64 {
            info!("Consolidation timed out");
            return true;
        }

        false
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn partial_close_done(&self) -> bool {
        self.partial_close_done
    }

    /// Record that a partial close was taken during this consolidation so it
    /// is not recommended twice.
    pub fn mark_partial_close(&mut self) {
        self.partial_close_done = true;
    }

    pub fn status(&self, now: DateTime<Utc>) -> ConsolidationStatus {
        ConsolidationStatus {
            is_active: self.active,
            duration_minutes: self.duration_minutes(now),
            partial_close_done: self.partial_close_done,
            start_price: self.start_price,
            current_price: self.prices.last().copied().unwrap_or(0.0),
            price_range_pct: if self.prices.len() >= 2 {
                self.window_range_pct()
            } else {
                0.0
            },
            start_time: self.start_time,
            last_update: self.timestamps.last().copied(),
            data_points: self.prices.len(),
        }
    }

    /// Forget everything, including the rolling window.
    pub fn reset(&mut self) {
        self.prices.clear();
        self.timestamps.clear();
        self.end_silent();
    }

    fn end(&mut self, now: DateTime<Utc>) {
        if self.active {
            info!(
                "Consolidation ended after {:.1} minutes",
                self.duration_minutes(now)
            );
        }
        self.end_silent();
    }

    fn end_silent(&mut self) {
        self.active = false;
        self.start_time = None;
        self.start_price = 0.0;
        self.partial_close_done = false;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(self.config.retention_mins as i64);
        let keep_from = self.timestamps.partition_point(|ts| *ts < cutoff);
        if keep_from > 0 {
            self.prices.drain(..keep_from);
            self.timestamps.drain(..keep_from);
        }
    }

    fn window_range_pct(&self) -> f64 {
        let window = self.config.window_points.min(self.prices.len());
        let recent = &self.prices[self.prices.len() - window..];
        let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
        if min > 0.0 {
            (max - min) / min * 100.0
        } else {
            0.0
        }
    }

    fn duration_minutes(&self, now: DateTime<Utc>) -> f64 {
        match self.start_time {
            Some(start) => (now - start).num_seconds() as f64 / 60.0,
            None => 0.0,
        }
    }
}

impl Default for ConsolidationDetector {
    fn default() -> Self {
        Self::new(ConsolidationConfig::default())
    }
}

/// Parallel OHLCV-style series consumed by the profit-lock gates. The last
/// element of each series is the most recent candle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandleWindow {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

/// Outcome of one profit-lock evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDecision {
    pub should_lock: bool,
    pub gates_passed: usize,
    pub new_stop_loss: Option<f64>,
    pub reason: String,
    pub pnl: f64,
}

impl LockDecision {
    fn rejected(reason: &str, pnl: f64, gates_passed: usize) -> Self {
        Self {
            should_lock: false,
            gates_passed,
            new_stop_loss: None,
            reason: reason.to_string(),
            pnl,
        }
    }
}

/// Six-gate consolidation profit lock.
#[derive(Debug)]
pub struct ProfitLockGate {
    config: ProfitLockConfig,
}

impl ProfitLockGate {
    pub fn new(config: ProfitLockConfig) -> Self {
        Self { config }
    }

    /// Score a profitable position against the six gates and decide whether
    /// to lock most of the open profit.
    pub fn should_lock(
        &self,
        position: &PositionSnapshot,
        current_price: f64,
        window: &CandleWindow,
    ) -> LockDecision {
        if position.size <= 0.0 {
            return LockDecision::rejected("no open position", 0.0, 0);
        }
        if position.entry_price <= 0.0 || current_price <= 0.0 {
            return LockDecision::rejected("invalid price data", 0.0, 0);
        }

        let pnl = position.pnl_fraction(current_price);

        let gates = [
            self.gate_profit(pnl),
            self.gate_volatility(window),
            self.gate_channel(window),
            self.gate_sr_density(window),
            self.gate_stability(window),
            self.gate_volume(window),
        ];
        let gates_passed = gates.iter().filter(|g| **g).count();

        let should_lock =
            pnl > self.config.lock_trigger_pct && gates_passed >= self.config.min_gates_passed;

        if !should_lock {
            return LockDecision::rejected(
                &format!(
                    "lock conditions not met ({}/6 gates, pnl {:.2}%)",
                    gates_passed,
                    pnl * 100.0
                ),
                pnl,
                gates_passed,
            );
        }

        let locked = pnl * self.config.locked_fraction;
        let stop = match position.side {
            Side::Long => position.entry_price * (1.0 + locked),
            Side::Short => position.entry_price * (1.0 - locked),
        };

        info!(
            "Consolidation profit lock: {}/6 gates, locking {:.2}% of entry",
            gates_passed,
            locked * 100.0
        );

        LockDecision {
            should_lock: true,
            gates_passed,
            new_stop_loss: Some(stop),
            reason: format!(
                "consolidation lock at {:.2}% profit ({}/6 gates)",
                pnl * 100.0,
                gates_passed
            ),
            pnl,
        }
    }

    fn gate_profit(&self, pnl: f64) -> bool {
        pnl >= self.config.min_profit_pct
    }

    /// Recent ATR as a percent of the last close, against an adaptive
    /// threshold: tighter in quiet regimes, looser in volatile ones.
    fn gate_volatility(&self, window: &CandleWindow) -> bool {
        let n = self.config.lookback_periods;
        if window.high.len() < n || window.low.len() < n || window.close.len() < n {
            return false;
        }

        let highs = tail(&window.high, n);
        let lows = tail(&window.low, n);
        let closes = tail(&window.close, n);

        let Some(&last_close) = closes.last() else {
            return false;
        };
        if last_close <= 0.0 {
            return false;
        }

        let atr = average_true_range(highs, lows, closes);
        let volatility_pct = atr / last_close * 100.0;

        let mut threshold = self.config.consolidation_threshold;
        if volatility_pct < 1.0 {
            threshold *= 0.8;
        } else if volatility_pct > 3.0 {
            threshold *= 1.2;
        }

        volatility_pct <= threshold * 100.0
    }

    fn gate_channel(&self, window: &CandleWindow) -> bool {
        let n = self.config.lookback_periods;
        if window.close.len() < n {
            return false;
        }
        let closes = tail(&window.close, n);
        let max = closes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = closes.iter().cloned().fold(f64::INFINITY, f64::min);
        if max <= 0.0 {
            return false;
        }
        (max - min) / max <= self.config.consolidation_threshold
    }

    /// Share of the recent closes acting as local pivots. A dense pivot
    /// field means choppy, contested price action rather than a quiet drift.
    fn gate_sr_density(&self, window: &CandleWindow) -> bool {
        let n = self.config.lookback_periods;
        if window.close.len() < n {
            return false;
        }
        let closes = tail(&window.close, n);
        if closes.len() < 3 {
            return false;
        }

        let mut supports = 0usize;
        let mut resistances = 0usize;
        for i in 1..closes.len() - 1 {
            if closes[i] < closes[i - 1] && closes[i] < closes[i + 1] {
                supports += 1;
            } else if closes[i] > closes[i - 1] && closes[i] > closes[i + 1] {
                resistances += 1;
            }
        }

        let density = (supports as f64 / closes.len() as f64
            + resistances as f64 / closes.len() as f64)
            / 2.0;
        density <= self.config.max_sr_density
    }

    fn gate_stability(&self, window: &CandleWindow) -> bool {
        let n = self.config.lookback_periods;
        if window.close.len() < n {
            return false;
        }
        let closes = tail(&window.close, n);
        let mean = closes.iter().sum::<f64>() / closes.len() as f64;
        if mean <= 0.0 {
            return false;
        }
        let variance =
            closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / closes.len() as f64;
        variance.sqrt() / mean <= self.config.breakout_threshold
    }

    fn gate_volume(&self, window: &CandleWindow) -> bool {
        let n = self.config.lookback_periods;
        if window.volume.len() < n {
            return false;
        }
        let volumes = tail(&window.volume, n);
        let avg = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let Some(&current) = volumes.last() else {
            return false;
        };
        if avg <= 0.0 || current <= 0.0 {
            return false;
        }
        current >= self.config.min_volume && current / avg >= 0.5
    }
}

impl Default for ProfitLockGate {
    fn default() -> Self {
        Self::new(ProfitLockConfig::default())
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// Mean true range over the window, skipping the first candle which has no
/// previous close.
fn average_true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> f64 {
    if highs.len() < 2 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 1..highs.len() {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        sum += tr;
        count += 1;
    }
    sum / count as f64
}
