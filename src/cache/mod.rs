//! Partitioned HTTP response cache with offline fallbacks.
//!
//! This module provides the offline half of the engine:
//! - Stores response blobs keyed by request identity, split into a static
//!   partition (seeded once from a manifest) and a dynamic partition (bounded,
//!   oldest-first eviction)
//! - Routes every intercepted request through a network-first or cache-first
//!   strategy depending on whether it targets the backend API
//! - Runs as an isolated worker task fed over a message channel

mod gateway;
mod store;
mod traits;
mod worker;

pub use gateway::FetchGateway;
pub use store::CacheEntryStore;
pub use traits::{CachedResponse, FetchOutcome, HttpTransport, Method, RequestKey, RequestKind, Transport};
pub use worker::{CacheWorkerHandle, WorkerMessage};
