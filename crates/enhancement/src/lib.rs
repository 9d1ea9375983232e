//! Wallet enhancement: decides whether flow events classified unknown on
//! one side actually belong to node operators, directly or through
//! intermediary wallets, and rewrites the rows in place.

pub mod cache;
pub mod engine;

pub use {
    cache::{CacheTtls, EnhancementCache},
    engine::{Engine, EnhancementConfig, RunSummary},
};
