//! metricd: a StatsD-compatible metrics aggregation daemon
//!
//! Datagrams flow socket -> pooled buffer -> framer -> decoder -> router ->
//! worker inbox; on a fixed period every worker snapshots and resets its
//! accumulators, and the combined batch goes to a delivery sink. Each worker
//! owns its shard's state exclusively (single-writer, no locks); the router
//! guarantees a metric identity always lands on the same shard.

pub mod config;
pub mod diagnostics;
pub mod framer;
pub mod metric;
pub mod router;
pub mod server;
pub mod worker;

pub use config::Config;
pub use diagnostics::Diagnostics;
pub use metric::{FlushedMetric, Metric, MetricType};
pub use server::Server;
