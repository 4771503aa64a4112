//! Lethe - Tiered memory lifecycle engine for autonomous agents
//!
//! Raw interaction turns land in an ephemeral tier, get scored and promoted
//! into working memory, consolidated into bi-temporal episodes, and
//! eventually distilled into durable knowledge documents. All shared state
//! mutations go through an atomic merge-transaction layer over a sharded
//! key-value substrate; a bounded event bus wakes the engines and a
//! reconciliation sweep guarantees nothing is stranded when events are lost.

pub mod bus;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod keyspace;
pub mod kv;
pub mod memory;
pub mod scoring;
pub mod store;
pub mod testing;

pub use engine::{MemoryRuntime, RuntimeHandle};
pub use error::LetheError;
