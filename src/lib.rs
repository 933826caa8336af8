//! Control plane library surface.
//!
//! Exposes the modules that stand on their own without an `AppState` (the
//! pure Decision Engine, the typed data model, and the two hot-path stores)
//! so they can be unit-tested and reused without pulling in the HTTP server.
//! Note: `consumer`, `rollup`, `tuner`, `api`, and `auth` are declared
//! directly in `main.rs` instead, since they take `Arc<AppState>` and would
//! otherwise need it re-exported here for no benefit — the same asymmetry
//! the teacher's own `lib.rs` draws around `AppState`.

pub mod advisor;
pub mod aggregator;
pub mod config;
pub mod decision_engine;
pub mod durable_store;
pub mod errors;
pub mod fast_store;
pub mod models;
pub mod queue;
pub mod threshold_store;
