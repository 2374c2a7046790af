//! Technical fallback signal generator
//!
//! When no advisory signals arrive, the engine synthesizes a decision from
//! seven technical factors. Each factor yields a score in [-1, 1] (negative
//! encodes buy bias throughout) and a confidence in [0, 1], with a neutral
//! default whenever its input is missing — partial context degrades
//! conviction instead of erroring.

use crate::types::{SignalClass, TechnicalContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed factor weights: RSI, MACD, MA, Bollinger, volume, S/R, environment.
const FACTOR_WEIGHTS: [f64; 7] = [1.0, 0.8, 0.6, 0.7, 0.5, 0.9, 0.4];

/// Output of the fallback generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSignal {
    pub class: SignalClass,
    pub confidence: f64,
    pub reason: String,
    /// Weighted factor total; negative favours buying.
    pub score: f64,
    /// Confidence scaled by signal strength.
    pub quality_score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Factor {
    score: f64,
    confidence: f64,
}

impl Factor {
    fn neutral(confidence: f64) -> Self {
        Self {
            score: 0.0,
            confidence,
        }
    }
}

/// Multi-factor technical signal generator. Stateless and pure.
#[derive(Debug, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Synthesize a signal from technical context. Absent context collapses
    /// to a conservative HOLD at the confidence floor.
    pub fn generate(&self, context: Option<&TechnicalContext>) -> FallbackSignal {
        let empty = TechnicalContext::default();
        let ctx = context.unwrap_or(&empty);

        let price_percentile = price_percentile(ctx);

        let factors = [
            rsi_factor(ctx.rsi, price_percentile),
            macd_factor(ctx),
            ma_factor(ctx.ma_status.as_deref()),
            bollinger_factor(ctx),
            volume_factor(ctx.volume_ratio),
            support_resistance_factor(ctx),
            environment_factor(ctx),
        ];

        let score: f64 = factors
            .iter()
            .zip(FACTOR_WEIGHTS)
            .map(|(f, w)| f.score * w)
            .sum();

        let confidences: Vec<f64> = factors.iter().map(|f| f.confidence).collect();
        let class = class_from_score(score);
        let confidence = weighted_confidence(&confidences, score);
        let quality_score = confidence * (0.5 + 0.5 * score.abs());
        let reason = build_reason(class, score, &confidences, ctx, price_percentile);

        debug!(
            "Fallback signal: {} (confidence {:.2}, score {:.2})",
            class, confidence, score
        );

        FallbackSignal {
            class,
            confidence,
            reason,
            score,
            quality_score,
        }
    }
}

/// Price position in its recent window, 0-100. Defaults to the midpoint
/// when the window is too short.
fn price_percentile(ctx: &TechnicalContext) -> f64 {
    if ctx.price_history.len() < 20 {
        return 50.0;
    }
    let recent = &ctx.price_history[ctx.price_history.len() - 20..];
    let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max > min {
        (ctx.price - min) / (max - min) * 100.0
    } else {
        50.0
    }
}

fn rsi_factor(rsi: Option<f64>, price_percentile: f64) -> Factor {
    let Some(rsi) = rsi else {
        return Factor::neutral(0.4);
    };

    let (mut score, mut confidence) = if rsi < 30.0 {
        (-0.8, 0.8) // oversold
    } else if rsi > 70.0 {
        (0.8, 0.8) // overbought
    } else if (30.0..=40.0).contains(&rsi) {
        (-0.4, 0.6)
    } else if (60.0..=70.0).contains(&rsi) {
        (0.4, 0.6)
    } else {
        (0.0, 0.4)
    };

    // Amplify when the price window position confirms the RSI extreme.
    if (price_percentile < 30.0 && rsi < 40.0) || (price_percentile > 70.0 && rsi > 60.0) {
        score *= 1.2;
        confidence *= 1.1;
    }

    Factor { score, confidence }
}

fn macd_factor(ctx: &TechnicalContext) -> Factor {
    let Some(macd) = ctx.macd else {
        return Factor::neutral(0.2);
    };

    let (score, confidence) = if macd.macd > macd.signal && macd.macd > 0.0 {
        (0.7, 0.8)
    } else if macd.macd < macd.signal && macd.macd < 0.0 {
        (-0.7, 0.8)
    } else if macd.macd > macd.signal && macd.macd < 0.0 {
        (-0.3, 0.5)
    } else if macd.macd < macd.signal && macd.macd > 0.0 {
        (0.3, 0.5)
    } else {
        (0.0, 0.6)
    };

    Factor { score, confidence }
}

fn ma_factor(ma_status: Option<&str>) -> Factor {
    let Some(status) = ma_status else {
        return Factor::neutral(0.2);
    };

    let status = status.to_ascii_lowercase();
    let (score, confidence) = if status.contains("golden") {
        (-0.8, 0.8)
    } else if status.contains("death") {
        (0.8, 0.8)
    } else if status.contains("bullish") {
        (-0.6, 0.7)
    } else if status.contains("bearish") {
        (0.6, 0.7)
    } else {
        (0.0, 0.2)
    };

    Factor { score, confidence }
}

fn bollinger_factor(ctx: &TechnicalContext) -> Factor {
    let Some(bands) = ctx.bollinger else {
        return Factor::neutral(0.2);
    };
    if ctx.price <= 0.0 || bands.upper <= bands.lower {
        return Factor::neutral(0.2);
    }

    let position = (ctx.price - bands.lower) / (bands.upper - bands.lower);

    let (score, confidence) = if position < 0.2 {
        (-0.7, 0.8) // hugging the lower band
    } else if position > 0.8 {
        (0.7, 0.8)
    } else if (0.4..=0.6).contains(&position) {
        (0.0, 0.4)
    } else if position < 0.4 {
        (-0.3, 0.5)
    } else {
        (0.3, 0.5)
    };

    Factor { score, confidence }
}

/// Volume never contributes direction, only conviction. The zero score is
/// intentional: volume alone says how much to trust the other factors, not
/// which way to trade.
fn volume_factor(volume_ratio: Option<f64>) -> Factor {
    let ratio = volume_ratio.unwrap_or(1.0);

    let confidence = if ratio > 2.0 {
        0.7
    } else if ratio > 1.5 {
        0.6
    } else if ratio < 0.5 {
        0.5
    } else {
        0.3
    };

    Factor::neutral(confidence)
}

fn support_resistance_factor(ctx: &TechnicalContext) -> Factor {
    let Some(sr) = ctx.support_resistance else {
        return Factor::neutral(0.2);
    };
    if ctx.price <= 0.0 || sr.support <= 0.0 || sr.resistance <= 0.0 || sr.support >= sr.resistance
    {
        return Factor::neutral(0.2);
    }

    let support_dist = (ctx.price - sr.support).abs() / ctx.price * 100.0;
    let resistance_dist = (ctx.price - sr.resistance).abs() / ctx.price * 100.0;

    let (score, confidence) = if support_dist < 1.0 {
        (-0.8, 0.9)
    } else if resistance_dist < 1.0 {
        (0.8, 0.9)
    } else if support_dist < 2.0 {
        (-0.5, 0.7)
    } else if resistance_dist < 2.0 {
        (0.5, 0.7)
    } else {
        let position = (ctx.price - sr.support) / (sr.resistance - sr.support);
        if position < 0.3 {
            (-0.3, 0.5)
        } else if position > 0.7 {
            (0.3, 0.5)
        } else {
            (0.0, 0.5)
        }
    };

    Factor { score, confidence }
}

fn environment_factor(ctx: &TechnicalContext) -> Factor {
    let volatility = ctx.volatility.as_deref().unwrap_or("").to_ascii_lowercase();
    let confidence = 0.5
        * if volatility.contains("high") {
            0.8
        } else if volatility.contains("low") {
            1.0
        } else {
            0.9
        };

    let trend = ctx.trend.as_deref().unwrap_or("").to_ascii_lowercase();
    let score = if trend.contains("bullish") {
        -0.2
    } else if trend.contains("bearish") {
        0.2
    } else {
        0.0
    };

    Factor { score, confidence }
}

fn class_from_score(score: f64) -> SignalClass {
    if score <= -0.5 {
        SignalClass::Buy
    } else if score >= 0.5 {
        SignalClass::Sell
    } else if (-0.2..=0.2).contains(&score) {
        SignalClass::Hold
    } else if score < -0.2 {
        SignalClass::Buy
    } else {
        SignalClass::Sell
    }
}

fn weighted_confidence(confidences: &[f64], score: f64) -> f64 {
    if confidences.is_empty() {
        return 0.5;
    }

    let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;

    let strength = score.abs();
    let strength_multiplier = if strength > 0.7 {
        1.1
    } else if strength > 0.4 {
        1.0
    } else {
        0.8
    };

    let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
        / confidences.len() as f64;
    let stdev = variance.sqrt();
    let consistency_multiplier = if stdev < 0.1 {
        1.1
    } else if stdev < 0.2 {
        1.0
    } else {
        0.9
    };

    (mean * strength_multiplier * consistency_multiplier).clamp(0.3, 0.95)
}

/// Deterministic concatenation of the clauses that fired.
fn build_reason(
    class: SignalClass,
    score: f64,
    confidences: &[f64],
    ctx: &TechnicalContext,
    price_percentile: f64,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(match class {
        SignalClass::Buy => format!("multi-factor analysis favours buying (score {:.2})", score),
        SignalClass::Sell => format!("multi-factor analysis favours selling (score {:.2})", score),
        SignalClass::Hold => format!("multi-factor analysis is neutral (score {:.2})", score),
    });

    if let Some(rsi) = ctx.rsi {
        if rsi < 30.0 {
            parts.push(format!("RSI oversold ({:.1})", rsi));
        } else if rsi > 70.0 {
            parts.push(format!("RSI overbought ({:.1})", rsi));
        } else {
            parts.push(format!("RSI neutral ({:.1})", rsi));
        }
    }

    if let Some(macd) = ctx.macd {
        if macd.macd > macd.signal {
            parts.push("MACD bullish crossover".to_string());
        } else {
            parts.push("MACD bearish crossover".to_string());
        }
    }

    if let Some(bands) = ctx.bollinger {
        if bands.upper > bands.lower {
            let position = (ctx.price - bands.lower) / (bands.upper - bands.lower);
            if position < 0.2 {
                parts.push("price near lower Bollinger band".to_string());
            } else if position > 0.8 {
                parts.push("price near upper Bollinger band".to_string());
            }
        }
    }

    if let Some(sr) = ctx.support_resistance {
        if sr.support > 0.0 && sr.resistance > 0.0 && ctx.price > 0.0 {
            let support_dist = (ctx.price - sr.support).abs() / ctx.price * 100.0;
            let resistance_dist = (ctx.price - sr.resistance).abs() / ctx.price * 100.0;
            if support_dist < 1.0 {
                parts.push("near support level".to_string());
            }
            if resistance_dist < 1.0 {
                parts.push("near resistance level".to_string());
            }
        }
    }

    let volatility = ctx.volatility.as_deref().unwrap_or("").to_ascii_lowercase();
    if volatility.contains("high") {
        parts.push("high volatility environment".to_string());
    } else if volatility.contains("low") {
        parts.push("low volatility environment".to_string());
    }

    if price_percentile < 30.0 {
        parts.push("price in the lower end of its range".to_string());
    } else if price_percentile > 70.0 {
        parts.push("price in the upper end of its range".to_string());
    }

    let mean_confidence = if confidences.is_empty() {
        0.5
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };
    if mean_confidence > 0.7 {
        parts.push("high factor conviction".to_string());
    } else if mean_confidence > 0.5 {
        parts.push("moderate factor conviction".to_string());
    } else {
        parts.push("low factor conviction".to_string());
    }

    parts.join("; ")
}
