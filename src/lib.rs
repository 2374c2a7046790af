//! Advisory signal fusion and position risk core
//!
//! A pure decision core for an automated trading loop: multi-provider
//! advisory signals are fused into one decision with diversity analysis and
//! a technical fallback, while open positions are protected by a staged
//! trailing-stop state machine and an independent consolidation profit lock.
//! The crate performs no market I/O; callers feed it signals, prices and
//! candles and act on the returned recommendations.

pub mod config;
pub mod error;
pub mod fusion;
pub mod risk;
pub mod types;
