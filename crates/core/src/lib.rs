//! Core types and shared functionality for imgd.
//!
//! This crate provides:
//! - TTL-aware caches (LRU, SQLite, tiered) with background compaction
//! - Storage backends and the expiry index behind them
//! - Request coalescing
//! - Persisted record types (UUID entries, user profiles)
//! - Configuration structures and the unified error type

pub mod cache;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

pub use cache::{Cache, build_cache};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use coalesce::CoalesceGroup;
pub use config::{AppConfig, CacheBackend, CacheConfig};
pub use error::Error;
pub use model::{Identifier, Status, UserProfile, UuidEntry};
