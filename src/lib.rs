//! paper-sniper - Paper-trading token sniper for Solana
//!
//! This crate listens for newly created liquidity pools, queues the new
//! tokens and runs simulated buy -> hold -> sell round trips against live
//! swap quotes, keeping portfolio statistics for an external dashboard.

pub mod types;
pub mod config;
pub mod sniper;

// Re-export main types for convenience
pub use config::{BotConfig, BotConfigBuilder, StatsBackend};
pub use types::{Mint, TokenCandidate};
