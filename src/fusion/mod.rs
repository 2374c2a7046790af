//! Signal Fusion Engine
//!
//! Combines a batch of independent advisory signals into one trading
//! decision. The pipeline per evaluation cycle:
//!
//! ```text
//! advisory signals ──► diversity analysis ──► consensus ladder ──► decision
//!        │                     │                     ▲
//!        │ (batch empty)       │ (over-aligned)      │
//!        ▼                     ▼                     │
//! technical fallback    forced intervention ── one re-fusion pass
//! ```
//!
//! The engine is pure with respect to I/O: it performs no network or disk
//! access and is driven entirely by the inputs of a single call.

mod diversity;
mod fallback;
mod intervention;
mod statistics;


pub use diversity::{ConfidenceStats, DiversityAnalysis, VoteCounts};
pub use fallback::{FallbackGenerator, FallbackSignal};
pub use intervention::{InterventionRecord, RandomSource, ScriptedRandom, ThreadRandom};
pub use statistics::SignalStatistics;

use crate::config::FusionConfig;
use crate::types::{AdvisorySignal, SignalClass, TechnicalContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How the final decision was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// No advisory signals; synthesized from technical context.
    Fallback,
    /// Exactly one advisory signal, passed through.
    Single,
    /// Multi-signal consensus voting.
    Voting,
}

/// Per-class aggregated confidence.
///
/// The divisor is the whole batch size, not the per-class vote count, so a
/// class with few votes is diluted by the silence of the others. That
/// dilution is a deliberate property of the vote; preserve it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassConfidences {
    pub buy: f64,
    pub sell: f64,
    pub hold: f64,
}

impl ClassConfidences {
    fn aggregate(signals: &[AdvisorySignal]) -> Self {
        let mut sums = Self::default();
        for signal in signals {
            match signal.class() {
                SignalClass::Buy => sums.buy += signal.confidence(),
                SignalClass::Sell => sums.sell += signal.confidence(),
                SignalClass::Hold => sums.hold += signal.confidence(),
            }
        }
        let n = signals.len() as f64;
        if n > 0.0 {
            sums.buy /= n;
            sums.sell /= n;
            sums.hold /= n;
        }
        sums
    }

    pub fn get(&self, class: SignalClass) -> f64 {
        match class {
            SignalClass::Buy => self.buy,
            SignalClass::Sell => self.sell,
            SignalClass::Hold => self.hold,
        }
    }
}

/// Final fused trading decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub class: SignalClass,
    pub confidence: f64,
    pub reason: String,
    /// Providers that contributed signals.
    pub providers: Vec<String>,
    pub method: FusionMethod,
    pub votes: VoteCounts,
    pub confidences: ClassConfidences,
    pub diversity: DiversityAnalysis,
    pub statistics: SignalStatistics,
    /// Present when the decision came from the technical fallback.
    pub fallback: Option<FallbackSignal>,
    /// True when a forced-diversity intervention mutated the batch.
    pub intervention_applied: bool,
}

/// Per-class confidence multipliers derived from technical context.
/// Each band (RSI, volatility, trend) contributes multiplicatively; the
/// final value is clamped to [0.5, 1.5]. Absent context is neutral.
#[derive(Debug, Clone, Copy)]
struct DynamicMultipliers {
    buy: f64,
    sell: f64,
    hold: f64,
}

impl DynamicMultipliers {
    const NEUTRAL: Self = Self {
        buy: 1.0,
        sell: 1.0,
        hold: 1.0,
    };

    fn from_context(context: Option<&TechnicalContext>) -> Self {
        let Some(ctx) = context else {
            return Self::NEUTRAL;
        };

        let mut m = Self::NEUTRAL;

        if let Some(rsi) = ctx.rsi {
            if rsi < 30.0 {
                m.buy *= 1.3;
                m.sell *= 0.7;
                m.hold *= 0.8;
            } else if rsi > 70.0 {
                m.buy *= 0.7;
                m.sell *= 1.3;
                m.hold *= 0.8;
            } else if (35.0..=65.0).contains(&rsi) {
                m.hold *= 1.1;
            }
        }

        if let Some(atr_pct) = ctx.atr_pct {
            if atr_pct < 0.5 {
                m.buy *= 0.8;
                m.sell *= 0.8;
                m.hold *= 1.2;
            } else if atr_pct < 1.0 {
                m.buy *= 0.9;
                m.sell *= 0.9;
                m.hold *= 1.1;
            } else if atr_pct > 3.0 {
                m.buy *= 1.1;
                m.sell *= 1.1;
                m.hold *= 0.9;
            }
        }

        let trend = ctx.trend.as_deref().unwrap_or("").to_ascii_lowercase();
        if trend.contains("bullish") {
            m.buy *= 1.2;
            m.sell *= 0.8;
            m.hold *= 0.9;
        } else if trend.contains("bearish") {
            m.buy *= 0.8;
            m.sell *= 1.2;
            m.hold *= 0.9;
        } else if trend.contains("sideways") || trend.contains("consolidation") {
            m.buy *= 0.9;
            m.sell *= 0.9;
            m.hold *= 1.3;
        }

        m.buy = m.buy.clamp(0.5, 1.5);
        m.sell = m.sell.clamp(0.5, 1.5);
        m.hold = m.hold.clamp(0.5, 1.5);
        m
    }
}

/// Signal Fusion Engine
pub struct FusionEngine {
    config: FusionConfig,
    fallback: FallbackGenerator,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            fallback: FallbackGenerator::new(),
        }
    }

    /// Fuse an advisory batch into one decision.
    ///
    /// `successful_providers` / `total_providers` describe how many of the
    /// configured advisory sources actually answered this cycle; a low
    /// success rate discounts the final confidence.
    ///
    /// If the original batch is flagged as over-aligned, one signal is
    /// mutated (see [`intervention`]) and fusion runs exactly once more on
    /// the perturbed batch — never a second time, even if the result is
    /// still homogeneous.
    pub fn fuse(
        &self,
        signals: Vec<AdvisorySignal>,
        context: Option<&TechnicalContext>,
        successful_providers: usize,
        total_providers: usize,
        rng: &mut dyn RandomSource,
    ) -> FusionResult {
        info!("Fusing {} advisory signals", signals.len());

        let diversity = DiversityAnalysis::analyze(&signals);

        if diversity.requires_intervention {
            warn!("Advisory batch over-aligned (score {:.2}); forcing diversity", diversity.diversity_score);
            let mut adjusted = signals;
            intervention::apply(&mut adjusted, rng);

            let rediversity = DiversityAnalysis::analyze(&adjusted);
            let mut result = self.fuse_once(
                &adjusted,
                context,
                successful_providers,
                total_providers,
                rediversity,
            );
            result.intervention_applied = true;
            return result;
        }

        self.fuse_once(&signals, context, successful_providers, total_providers, diversity)
    }

    fn fuse_once(
        &self,
        signals: &[AdvisorySignal],
        context: Option<&TechnicalContext>,
        successful_providers: usize,
        total_providers: usize,
        diversity: DiversityAnalysis,
    ) -> FusionResult {
        let statistics = SignalStatistics::compute(signals);

        if signals.is_empty() {
            warn!("No advisory signals available; using technical fallback");
            let fallback = self.fallback.generate(context);
            return FusionResult {
                class: fallback.class,
                confidence: fallback.confidence,
                reason: fallback.reason.clone(),
                providers: Vec::new(),
                method: FusionMethod::Fallback,
                votes: VoteCounts::default(),
                confidences: ClassConfidences::default(),
                diversity,
                statistics,
                fallback: Some(fallback),
                intervention_applied: false,
            };
        }

        if signals.len() == 1 {
            let signal = &signals[0];
            info!(
                "Single-signal mode: {} -> {} (confidence {:.2})",
                signal.provider(),
                signal.class(),
                signal.confidence()
            );
            return FusionResult {
                class: signal.class(),
                confidence: signal.confidence(),
                reason: format!("{}: {}", signal.provider(), signal.reason()),
                providers: vec![signal.provider().to_string()],
                method: FusionMethod::Single,
                votes: VoteCounts::tally(signals),
                confidences: ClassConfidences::aggregate(signals),
                diversity,
                statistics,
                fallback: None,
                intervention_applied: false,
            };
        }

        let votes = VoteCounts::tally(signals);
        let confidences = ClassConfidences::aggregate(signals);
        let multipliers = DynamicMultipliers::from_context(context);

        let (class, mut confidence, mut reason) =
            self.consensus_ladder(&votes, &confidences, &multipliers, signals.len());

        // Discount for advisory sources that failed to answer this cycle.
        let success_rate = if total_providers > 0 {
            successful_providers as f64 / total_providers as f64
        } else {
            1.0
        };
        if success_rate < 0.3 {
            confidence *= 0.6;
            reason.push_str(&format!(
                " (provider success rate only {:.0}%, confidence reduced)",
                success_rate * 100.0
            ));
        } else if success_rate < 0.5 {
            confidence *= 0.85;
            reason.push_str(&format!(
                " (provider success rate {:.0}%, confidence slightly reduced)",
                success_rate * 100.0
            ));
        }

        // Consistency discount: a narrow winner keeps less of its confidence.
        let winning_ratio = votes.get(class) as f64 / signals.len() as f64;
        confidence *= winning_ratio.max(0.7);

        info!("Fusion complete: {} (confidence {:.2})", class, confidence);

        FusionResult {
            class,
            confidence,
            reason,
            providers: signals.iter().map(|s| s.provider().to_string()).collect(),
            method: FusionMethod::Voting,
            votes,
            confidences,
            diversity,
            statistics,
            fallback: None,
            intervention_applied: false,
        }
    }

    fn consensus_ladder(
        &self,
        votes: &VoteCounts,
        conf: &ClassConfidences,
        mult: &DynamicMultipliers,
        batch_size: usize,
    ) -> (SignalClass, f64, String) {
        let n = batch_size as f64;
        let buy_ratio = votes.buy as f64 / n;
        let sell_ratio = votes.sell as f64 / n;
        let hold_ratio = votes.hold as f64 / n;

        let strong = self.config.strong_consensus;
        let weak = self.config.weak_consensus;

        if buy_ratio >= strong {
            (
                SignalClass::Buy,
                conf.buy * mult.buy,
                format!(
                    "strong consensus to buy: {}/{} votes ({:.0}%)",
                    votes.buy,
                    batch_size,
                    buy_ratio * 100.0
                ),
            )
        } else if sell_ratio >= strong {
            (
                SignalClass::Sell,
                conf.sell * mult.sell,
                format!(
                    "strong consensus to sell: {}/{} votes ({:.0}%)",
                    votes.sell,
                    batch_size,
                    sell_ratio * 100.0
                ),
            )
        } else if hold_ratio >= strong {
            // Even a strong HOLD consensus yields to a live opportunity on
            // either side.
            if buy_ratio > self.config.opportunity_ratio
                || sell_ratio > self.config.opportunity_ratio
            {
                if conf.buy > conf.sell {
                    (
                        SignalClass::Buy,
                        conf.buy * 0.8,
                        "hold consensus with a buy opportunity; taking the buy side".to_string(),
                    )
                } else {
                    (
                        SignalClass::Sell,
                        conf.sell * 0.8,
                        "hold consensus with a sell opportunity; taking the sell side".to_string(),
                    )
                }
            } else {
                (
                    SignalClass::Hold,
                    conf.hold * mult.hold,
                    format!(
                        "strong consensus to hold: {}/{} votes ({:.0}%)",
                        votes.hold,
                        batch_size,
                        hold_ratio * 100.0
                    ),
                )
            }
        } else if buy_ratio >= weak {
            (
                SignalClass::Buy,
                conf.buy * mult.buy * 0.95,
                format!(
                    "majority favours buying: {}/{} votes ({:.0}%)",
                    votes.buy,
                    batch_size,
                    buy_ratio * 100.0
                ),
            )
        } else if sell_ratio >= weak {
            (
                SignalClass::Sell,
                conf.sell * mult.sell * 0.95,
                format!(
                    "majority favours selling: {}/{} votes ({:.0}%)",
                    votes.sell,
                    batch_size,
                    sell_ratio * 100.0
                ),
            )
        } else if conf.buy > conf.sell && conf.buy > conf.hold {
            (
                SignalClass::Buy,
                conf.buy * 0.7,
                "no clear consensus; buy confidence is highest".to_string(),
            )
        } else if conf.sell > conf.buy && conf.sell > conf.hold {
            (
                SignalClass::Sell,
                conf.sell * 0.7,
                "no clear consensus; sell confidence is highest".to_string(),
            )
        } else {
            (
                SignalClass::Hold,
                conf.hold * mult.hold,
                format!(
                    "no clear consensus; holding ({}/{} hold votes)",
                    votes.hold, batch_size
                ),
            )
        }
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}
