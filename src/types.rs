//! Core data types shared by the fusion engine and the risk state machine

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading signal class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalClass {
    Buy,
    Sell,
    Hold,
}

impl SignalClass {
    /// All classes, in canonical order.
    pub const ALL: [SignalClass; 3] = [SignalClass::Buy, SignalClass::Sell, SignalClass::Hold];
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalClass::Buy => write!(f, "BUY"),
            SignalClass::Sell => write!(f, "SELL"),
            SignalClass::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for SignalClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalClass::Buy),
            "SELL" => Ok(SignalClass::Sell),
            "HOLD" => Ok(SignalClass::Hold),
            other => Err(CoreError::UnknownSignalClass(other.to_string())),
        }
    }
}

/// One advisory provider's opinion for a single evaluation cycle.
///
/// Class and confidence are validated at construction and never clamped.
/// The only sanctioned mutation is the diversity intervention inside a
/// single fusion call, which goes through [`AdvisorySignal::apply_override`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawAdvisorySignal")]
pub struct AdvisorySignal {
    provider: String,
    class: SignalClass,
    confidence: f64,
    reason: String,
    timestamp: DateTime<Utc>,
    raw_payload: serde_json::Value,
}

/// Wire shape for [`AdvisorySignal`]; validation happens in the conversion.
#[derive(Debug, Deserialize)]
struct RawAdvisorySignal {
    provider: String,
    class: SignalClass,
    confidence: f64,
    #[serde(default)]
    reason: String,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    raw_payload: serde_json::Value,
}

impl TryFrom<RawAdvisorySignal> for AdvisorySignal {
    type Error = CoreError;

    fn try_from(raw: RawAdvisorySignal) -> Result<Self, Self::Error> {
        let mut signal = AdvisorySignal::new(raw.provider, raw.class, raw.confidence, raw.reason)?;
        signal.timestamp = raw.timestamp;
        signal.raw_payload = raw.raw_payload;
        Ok(signal)
    }
}

impl AdvisorySignal {
    /// Build a signal, rejecting out-of-range confidence.
    pub fn new(
        provider: impl Into<String>,
        class: SignalClass,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Result<Self, CoreError> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(CoreError::InvalidConfidence(confidence));
        }
        Ok(Self {
            provider: provider.into(),
            class,
            confidence,
            reason: reason.into(),
            timestamp: Utc::now(),
            raw_payload: serde_json::Value::Null,
        })
    }

    /// Attach the provider's raw response payload.
    pub fn with_raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn class(&self) -> SignalClass {
        self.class
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn raw_payload(&self) -> &serde_json::Value {
        &self.raw_payload
    }

    /// Replace class and confidence during a diversity intervention.
    ///
    /// This is the documented mutation applied at most once per fusion call,
    /// not an open setter. The new confidence is produced by the intervention
    /// step and already lies inside [0.4, 0.8].
    pub(crate) fn apply_override(&mut self, class: SignalClass, confidence: f64) {
        self.class = class;
        self.confidence = confidence;
    }
}

/// MACD reading: the MACD line and its signal line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
}

/// Bollinger band bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub lower: f64,
}

/// Nearest support and resistance levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
}

/// Live technical context consumed by the fallback generator and the
/// dynamic confidence multiplier. Every field except the current price is
/// optional; a missing field falls back to that factor's neutral default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalContext {
    /// Current price.
    pub price: f64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd: Option<MacdReading>,
    /// Moving-average status label, e.g. "bullish-array" or "golden-cross".
    #[serde(default)]
    pub ma_status: Option<String>,
    #[serde(default)]
    pub bollinger: Option<BollingerBands>,
    /// Current volume relative to its recent average.
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub support_resistance: Option<SupportResistance>,
    /// Recent price window, oldest first.
    #[serde(default)]
    pub price_history: Vec<f64>,
    /// Average true range as a percentage of price.
    #[serde(default)]
    pub atr_pct: Option<f64>,
    /// Volatility regime label: "high", "low" or anything else for normal.
    #[serde(default)]
    pub volatility: Option<String>,
    /// Trend label: "bullish", "bearish", "sideways"/"consolidation".
    #[serde(default)]
    pub trend: Option<String>,
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

/// Snapshot of an open position handed to the risk state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
}

impl PositionSnapshot {
    /// Signed unrealized P&L as a fraction of entry price; favorable moves
    /// are positive for both sides.
    pub fn pnl_fraction(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - current_price) / self.entry_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_class_parse() {
        assert_eq!("buy".parse::<SignalClass>().unwrap(), SignalClass::Buy);
        assert_eq!("SELL".parse::<SignalClass>().unwrap(), SignalClass::Sell);
        assert!("LONG".parse::<SignalClass>().is_err());
    }

    #[test]
    fn test_signal_rejects_bad_confidence() {
        assert!(AdvisorySignal::new("alpha", SignalClass::Buy, 1.2, "").is_err());
        assert!(AdvisorySignal::new("alpha", SignalClass::Buy, -0.1, "").is_err());
        assert!(AdvisorySignal::new("alpha", SignalClass::Buy, f64::NAN, "").is_err());
        assert!(AdvisorySignal::new("alpha", SignalClass::Buy, 1.0, "").is_ok());
    }

    #[test]
    fn test_signal_deserialization_validates() {
        let ok: Result<AdvisorySignal, _> = serde_json::from_str(
            r#"{"provider": "alpha", "class": "BUY", "confidence": 0.7}"#,
        );
        assert_eq!(ok.unwrap().class(), SignalClass::Buy);

        let bad: Result<AdvisorySignal, _> = serde_json::from_str(
            r#"{"provider": "alpha", "class": "BUY", "confidence": 1.7}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_pnl_fraction_sides() {
        let long = PositionSnapshot {
            id: "p1".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            size: 1.0,
        };
        let short = PositionSnapshot {
            side: Side::Short,
            ..long.clone()
        };

        assert!((long.pnl_fraction(103.0) - 0.03).abs() < 1e-9);
        assert!((short.pnl_fraction(103.0) + 0.03).abs() < 1e-9);
    }
}
