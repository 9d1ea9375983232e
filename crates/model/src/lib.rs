//! Domain types shared by the fluxflow crates.
//!
//! Everything in here is plain data with serde derives. I/O specific
//! representations (database rows, upstream API shapes) live in the crates
//! that own the respective boundary and convert to and from these types.

pub mod classification;
pub mod event;

pub use classification::{
    AddressType, Classification, DataSource, Details, DetectionMethod, FlowType, OperatorStatus,
    TierCounts,
};
pub use event::{Block, ClassificationPatch, FlowEvent, Transaction};

/// Satoshis per FLUX. Output values arrive from the indexers in satoshis and
/// are persisted as decimal FLUX.
pub const SATS_PER_FLUX: f64 = 100_000_000.0;

/// Converts a satoshi amount to decimal FLUX.
pub fn sats_to_flux(sats: u64) -> f64 {
    sats as f64 / SATS_PER_FLUX
}
