//! DocCost Core - Storage, Sharding and Query Cost Estimation
//!
//! Closed-form estimates for document database designs:
//! - Document, collection and database sizes from JSON schemas
//! - Distribution of documents across a sharded cluster
//! - Time, carbon footprint and price of filter, join and aggregate queries
//! - Key placement, lookups and membership changes on a Chord ring
//!
//! # Architecture
//!
//! - **Schema catalog**: collection schemas loaded from `<dir>/<database>/*.json`
//! - **Settings**: document counts, value sizes, statistics and cost coefficients
//! - **Calculators**: pure functions in [`size`], [`sharding`] and [`query`]
//! - **Estimator**: ties settings and catalog together for the server and CLI

pub mod chord;
pub mod estimator;
pub mod input;
pub mod query;
pub mod report;
pub mod schema;
pub mod settings;
pub mod sharding;
pub mod size;

mod error;
mod types;

pub use error::{CostError, KeyRole, Result};
pub use estimator::Estimator;
pub use settings::{CostModel, Settings, ValueSizes};
pub use types::*;

/// DocCost version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Size of a key stored in each document (bytes)
    pub const KEY_SIZE: u64 = 12;

    /// Servers in the cluster
    pub const DEFAULT_SERVERS: u64 = 1000;

    /// Network bandwidth (1 MB/s)
    pub const BANDWIDTH_BYTES_PER_SEC: f64 = 1e6;

    /// Carbon footprint per byte (1000 gCO2/GB)
    pub const CARBON_GCO2_PER_BYTE: f64 = 1000.0 * 1e-9;

    /// Price per byte ($0.10/GB)
    pub const PRICE_USD_PER_BYTE: f64 = 1e-10;

    /// Largest cluster a distribution is computed for
    pub const MAX_SERVERS: u64 = 100_000;

    /// Hash sharding hashes every key value
    pub const MAX_HASHED_KEYS: u64 = 10_000_000;

    /// Chord rings have at most 2^32 positions
    pub const MAX_RING_BITS: u32 = 32;

    /// Nodes and keys a ring simulation accepts
    pub const MAX_RING_NODES: usize = 10_000;
    pub const MAX_RING_KEYS: u64 = 1_000_000;

    /// Predecessors holding a copy of each key
    pub const DEFAULT_REPLICATION: usize = 3;
}
