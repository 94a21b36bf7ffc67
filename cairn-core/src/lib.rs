//! Cairn Core - value types and contracts for the Cairn cache layer.
//!
//! Everything here is runtime-free: configuration, statistics, conflict
//! resolution, the backing-store writer contract and the error taxonomy.
//! The engines that use them live in `cairn-cache`.

pub mod config;
pub mod constants;
pub mod error;
pub mod resolver;
pub mod stats;
pub mod writer;

pub use config::{
    CacheConfig, CacheConfigBuilder, RequeuePolicy, StatsCollectorConfig, WriteBehindConfig,
};
pub use error::{
    CacheError, CacheResult, ConfigError, ConflictError, StateError, WriteError, WriteFailure,
    WriteResult,
};
pub use resolver::{ConflictResolver, Resolution};
pub use stats::{CacheStats, StatsSnapshot, StatsSource};
pub use writer::CacheWriter;
