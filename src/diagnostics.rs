//! Internal health counters
//!
//! A shared, never-blocking side channel for the failure and drop events the
//! pipeline produces: decode rejects, socket read errors, worker faults.
//! Counters are relaxed atomics behind an `Arc`, cheap enough to bump on the
//! hot path; structured context for individual failures goes through
//! `tracing` at the failure site.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to the process-wide diagnostic counters.
#[derive(Clone, Default)]
pub struct Diagnostics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    packets_read: AtomicU64,
    bytes_read: AtomicU64,
    samples_routed: AtomicU64,
    empty_chunks: AtomicU64,
    parse_errors: AtomicU64,
    read_errors: AtomicU64,
    samples_dropped: AtomicU64,
    worker_faults: AtomicU64,
}

/// Point-in-time copy of every counter, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub packets_read: u64,
    pub bytes_read: u64,
    pub samples_routed: u64,
    pub empty_chunks: u64,
    pub parse_errors: u64,
    pub read_errors: u64,
    pub samples_dropped: u64,
    pub worker_faults: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn packet_read(&self, bytes: usize) {
        self.inner.packets_read.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn sample_routed(&self) {
        self.inner.samples_routed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn empty_chunk(&self) {
        self.inner.empty_chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn parse_error(&self) {
        self.inner.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read_error(&self) {
        self.inner.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A sample that reached a worker but could not be folded into an
    /// accumulator (value/kind contract violation).
    #[inline]
    pub fn sample_dropped(&self) {
        self.inner.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn worker_fault(&self) {
        self.inner.worker_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let c = &self.inner;
        DiagnosticsSnapshot {
            packets_read: c.packets_read.load(Ordering::Relaxed),
            bytes_read: c.bytes_read.load(Ordering::Relaxed),
            samples_routed: c.samples_routed.load(Ordering::Relaxed),
            empty_chunks: c.empty_chunks.load(Ordering::Relaxed),
            parse_errors: c.parse_errors.load(Ordering::Relaxed),
            read_errors: c.read_errors.load(Ordering::Relaxed),
            samples_dropped: c.samples_dropped.load(Ordering::Relaxed),
            worker_faults: c.worker_faults.load(Ordering::Relaxed),
        }
    }
}
