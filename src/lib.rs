// TickerPulse - Market Data Resilience & Reactive Outcome Engine
// Turns LLM-derived trading predictions (ticker + sentiment) into validated
// multi-horizon return and accuracy outcomes, backed by a fallback-capable
// price-provider chain over PostgreSQL.

#![deny(clippy::unwrap_used)]

pub mod backfill;
pub mod cli;
pub mod config;
pub mod data;
pub mod db;
pub mod health;
pub mod outcomes;
pub mod registry;

// Re-export commonly used items
pub use config::Config;
pub use data::{PriceBar, PriceProvider, Prediction, ProviderChain, Sentiment};
pub use outcomes::{OutcomeCalculator, OutcomeStore};
pub use registry::{TickerRegistry, TickerStatus};
