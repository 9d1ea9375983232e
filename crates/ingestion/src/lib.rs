//! Block ingestion: fetches blocks from the active indexer, filters out
//! irrelevant transactions and turns the rest into flow events.

pub mod events;
pub mod pipeline;

pub use pipeline::{PerfCounters, SyncPipeline};
