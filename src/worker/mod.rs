//! Sharded aggregation workers
//!
//! One worker owns one shard: a private set of accumulators keyed by metric
//! identity. All mutation happens on the worker's own task, fed by a bounded
//! mpsc inbox, so the maps need no locks -- the single-writer invariant does
//! the work the locks would. Flush requests arrive through the same inbox
//! and reply over a oneshot channel, which serializes them against sample
//! processing for free.
//!
//! A full inbox blocks the sender. That is deliberate backpressure: a
//! stalled worker eventually stalls the readers, the kernel receive buffer
//! fills, and overload surfaces as OS-level datagram drop rather than
//! unbounded memory growth here.

pub mod histogram;
pub mod set;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::diagnostics::Diagnostics;
use crate::metric::{FlushedMetric, Metric, MetricType, MetricValue};
use histogram::{percentile_suffix, Histo};
use set::SetEstimator;

/// Aggregation key: name plus identity-affecting tags. Two samples with the
/// same name but different tags are different series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    tags: Vec<String>,
}

impl SeriesKey {
    fn from_metric(m: &Metric) -> Self {
        SeriesKey {
            name: m.name.clone(),
            tags: m.tags.clone(),
        }
    }
}

/// Aggregation knobs shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Quantiles to report per histogram/timer, each in (0, 1).
    pub percentiles: Vec<f64>,
    /// CKMS size budget; reciprocal is the rank-error bound.
    pub histogram_size: u32,
    /// Emit each histogram's `.count` as a counter instead of a histogram
    /// point, for downstreams that rate-convert counters.
    pub histogram_counters: bool,
    /// Expected distinct identities per set metric per interval.
    pub set_size: u32,
    /// Accepted false-positive rate for set estimation.
    pub set_accuracy: f64,
    /// Keep each gauge's last value across flushes (repeat until
    /// overwritten) instead of resetting to absent.
    pub retain_gauges: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            percentiles: vec![0.5, 0.75, 0.99],
            histogram_size: 100,
            histogram_counters: false,
            set_size: 10_000,
            set_accuracy: 0.01,
            retain_gauges: false,
        }
    }
}

/// Inbox protocol. Samples are fire-and-forget; flushes reply.
pub enum WorkerMessage {
    Sample(Metric),
    Flush {
        interval: Duration,
        response_tx: oneshot::Sender<Vec<FlushedMetric>>,
    },
}

/// One shard's aggregation state and its inbox.
///
/// Nothing outside the worker's own task ever touches these maps.
pub struct Worker {
    id: usize,
    rx: mpsc::Receiver<WorkerMessage>,
    config: WorkerConfig,
    diagnostics: Diagnostics,

    counters: AHashMap<SeriesKey, f64>,
    gauges: AHashMap<SeriesKey, f64>,
    histograms: AHashMap<SeriesKey, Histo>,
    timers: AHashMap<SeriesKey, Histo>,
    sets: AHashMap<SeriesKey, SetEstimator>,

    processed: u64,
}

impl Worker {
    pub fn new(
        id: usize,
        rx: mpsc::Receiver<WorkerMessage>,
        config: WorkerConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        Worker {
            id,
            rx,
            config,
            diagnostics,
            counters: AHashMap::new(),
            gauges: AHashMap::new(),
            histograms: AHashMap::new(),
            timers: AHashMap::new(),
            sets: AHashMap::new(),
            processed: 0,
        }
    }

    /// Consume the inbox until every sender is gone.
    pub async fn run(mut self) {
        debug!(worker = self.id, "worker started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                WorkerMessage::Sample(metric) => self.process(metric),
                WorkerMessage::Flush {
                    interval,
                    response_tx,
                } => {
                    let points = self.flush(interval);
                    // a dropped receiver means the orchestrator gave up on
                    // this flush; the interval's data is already cleared
                    // either way
                    let _ = response_tx.send(points);
                }
            }
        }
        debug!(worker = self.id, processed = self.processed, "worker inbox closed");
    }

    /// Fold one sample into its accumulator, creating it on first sight.
    pub fn process(&mut self, metric: Metric) {
        // the decoder rejects these on the wire, but Metric fields are
        // public and a zero rate or non-finite value poisons an accumulator
        // for the whole interval
        if metric.sample_rate <= 0.0
            || !metric.sample_rate.is_finite()
            || matches!(&metric.value, MetricValue::Number(v) if !v.is_finite())
        {
            warn!(
                worker = self.id,
                metric = %metric.name,
                sample_rate = metric.sample_rate,
                "dropping sample with invalid rate or value"
            );
            self.diagnostics.sample_dropped();
            return;
        }

        let key = SeriesKey::from_metric(&metric);
        match (metric.kind, &metric.value) {
            (MetricType::Counter, MetricValue::Number(v)) => {
                *self.counters.entry(key).or_insert(0.0) += v / metric.sample_rate;
            }
            (MetricType::Gauge, MetricValue::Number(v)) => {
                self.gauges.insert(key, *v);
            }
            (MetricType::Histogram, MetricValue::Number(v)) => {
                let size = self.config.histogram_size;
                self.histograms
                    .entry(key)
                    .or_insert_with(|| Histo::new(size))
                    .insert(*v);
            }
            (MetricType::Timer, MetricValue::Number(v)) => {
                let size = self.config.histogram_size;
                self.timers
                    .entry(key)
                    .or_insert_with(|| Histo::new(size))
                    .insert(*v);
            }
            (MetricType::Set, MetricValue::Identity(id)) => {
                let (size, accuracy) = (self.config.set_size, self.config.set_accuracy);
                self.sets
                    .entry(key)
                    .or_insert_with(|| SetEstimator::new(size, accuracy))
                    .insert(id.as_bytes());
            }
            (kind, _) => {
                // decoder contract violation: the value shape does not match
                // the kind. Drop the sample, keep the worker alive.
                warn!(
                    worker = self.id,
                    metric = %metric.name,
                    kind = kind.as_str(),
                    "dropping sample with mismatched value shape"
                );
                self.diagnostics.sample_dropped();
                return;
            }
        }
        self.processed += 1;
    }

    /// Snapshot every accumulator into output points and reset for the next
    /// interval. An empty interval yields an empty batch; a metric that
    /// received nothing since the last flush is omitted entirely, never
    /// emitted as zero.
    pub fn flush(&mut self, interval: Duration) -> Vec<FlushedMetric> {
        let timestamp = unix_now();
        let interval_secs = interval.as_secs();
        let mut points = Vec::with_capacity(
            self.counters.len()
                + self.gauges.len()
                + (self.histograms.len() + self.timers.len()) * (4 + self.config.percentiles.len())
                + self.sets.len(),
        );

        for (key, sum) in self.counters.drain() {
            points.push(FlushedMetric {
                name: key.name,
                value: sum,
                kind: MetricType::Counter,
                timestamp,
                interval: interval_secs,
                tags: key.tags,
            });
        }

        if self.config.retain_gauges {
            for (key, value) in &self.gauges {
                points.push(FlushedMetric {
                    name: key.name.clone(),
                    value: *value,
                    kind: MetricType::Gauge,
                    timestamp,
                    interval: interval_secs,
                    tags: key.tags.clone(),
                });
            }
        } else {
            for (key, value) in self.gauges.drain() {
                points.push(FlushedMetric {
                    name: key.name,
                    value,
                    kind: MetricType::Gauge,
                    timestamp,
                    interval: interval_secs,
                    tags: key.tags,
                });
            }
        }

        let config = &self.config;
        for (kind, map) in [
            (MetricType::Histogram, &mut self.histograms),
            (MetricType::Timer, &mut self.timers),
        ] {
            for (key, histo) in map.drain() {
                flush_histo(&mut points, config, kind, key, &histo, timestamp, interval_secs);
            }
        }

        for (key, estimator) in self.sets.drain() {
            points.push(FlushedMetric {
                name: key.name,
                value: estimator.estimate(),
                kind: MetricType::Set,
                timestamp,
                interval: interval_secs,
                tags: key.tags,
            });
        }

        trace!(
            worker = self.id,
            points = points.len(),
            interval_secs,
            "flushed"
        );
        points
    }
}

fn flush_histo(
    points: &mut Vec<FlushedMetric>,
    config: &WorkerConfig,
    kind: MetricType,
    key: SeriesKey,
    histo: &Histo,
    timestamp: u64,
    interval: u64,
) {
    let count_kind = if config.histogram_counters {
        MetricType::Counter
    } else {
        kind
    };
    points.push(FlushedMetric {
        name: format!("{}.count", key.name),
        value: histo.count() as f64,
        kind: count_kind,
        timestamp,
        interval,
        tags: key.tags.clone(),
    });
    for (suffix, value) in [
        ("sum", histo.sum()),
        ("min", histo.min()),
        ("max", histo.max()),
    ] {
        points.push(FlushedMetric {
            name: format!("{}.{}", key.name, suffix),
            value,
            kind,
            timestamp,
            interval,
            tags: key.tags.clone(),
        });
    }
    for &q in &config.percentiles {
        if let Some(value) = histo.quantile(q) {
            points.push(FlushedMetric {
                name: format!("{}.{}", key.name, percentile_suffix(q)),
                value,
                kind,
                timestamp,
                interval,
                tags: key.tags.clone(),
            });
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sending half of a worker's inbox.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
    id: usize,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue one sample. Awaits when the inbox is full; this backpressure is
    /// what keeps a slow shard from buffering unboundedly.
    pub async fn send(&self, metric: Metric) {
        if self.tx.send(WorkerMessage::Sample(metric)).await.is_err() {
            // worker task is gone; its shard is dead for this process
            trace!(worker = self.id, "dropping sample for dead worker");
        }
    }

    /// Ask the worker to flush. Must not be called concurrently for the same
    /// worker; the orchestrator calls it once per interval.
    pub async fn flush(&self, interval: Duration) -> Vec<FlushedMetric> {
        let (response_tx, response_rx) = oneshot::channel();
        let msg = WorkerMessage::Flush {
            interval,
            response_tx,
        };
        if self.tx.send(msg).await.is_err() {
            return Vec::new();
        }
        response_rx.await.unwrap_or_default()
    }
}

/// Spawn a worker task plus a supervisor that records a fault if the task
/// panics. The shard stays down after a fault: restarting it silently would
/// hide a crash loop, and routing stability means no other shard picks up
/// its metrics.
pub fn spawn_worker(
    id: usize,
    queue_size: usize,
    config: WorkerConfig,
    diagnostics: Diagnostics,
) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(queue_size);
    let worker = Worker::new(id, rx, config, diagnostics.clone());
    supervise(id, tokio::spawn(worker.run()), diagnostics);
    WorkerHandle { tx, id }
}

/// Watch a worker task and record the fault if it panics. Returns the
/// supervisor's own handle so callers can await fault handling.
fn supervise(id: usize, task: JoinHandle<()>, diagnostics: Diagnostics) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                diagnostics.worker_fault();
                error!(worker = id, error = %e, "worker task panicked; shard is down");
            }
        }
    })
}
