//! Shard routing
//!
//! Maps a metric's routing digest to a worker index. This is a pure function
//! of (digest, worker count): no state, no randomness. Every sample for a
//! given metric identity must reach the same worker for the life of the
//! process, so the worker count is fixed at startup -- resizing it while
//! running would split a metric's partial interval state across two shards
//! and undercount both.

/// Returned when the configured worker count is zero.
#[derive(Debug, PartialEq, Eq)]
pub struct NoWorkers;

impl std::fmt::Display for NoWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker count must be at least 1")
    }
}

impl std::error::Error for NoWorkers {}

/// Select the worker that owns the shard for `digest`.
#[inline]
pub fn worker_index(digest: u32, num_workers: usize) -> Result<usize, NoWorkers> {
    if num_workers == 0 {
        return Err(NoWorkers);
    }
    Ok(digest as usize % num_workers)
}
