pub mod blocks;
pub mod flow_events;
pub mod schema;
pub mod stats;
pub mod store;
pub mod sync_state;
pub mod transactions;

pub use store::{Store, UnknownWallets};

// Design:
//
// The per-table modules hold plain functions running a single statement
// each, taking `&mut SqliteConnection`. A transaction coerces into that, so
// callers decide whether a function runs standalone or as part of a bigger
// transaction. We call the parameter `ex` for `Executor`. The `Store`
// wrapper owns the pool and is the only place that begins and commits
// transactions.

pub type SqliteTransaction<'a> = sqlx::Transaction<'a, sqlx::Sqlite>;

/// The names of all tables in the database file.
pub const ALL_TABLES: &[&str] = &["blocks", "transactions", "flow_events", "sync_state"];
