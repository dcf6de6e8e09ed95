//! Aggregation Worker Integration Tests
//!
//! Exercises the worker inbox protocol end to end, verifying:
//! - Counter sum + sample-rate correction
//! - Gauge last-write-wins and flush policies
//! - Histogram percentile accuracy under a known distribution
//! - Set distinct-count estimation
//! - Flush idempotence (no replay across intervals)

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use metricd::diagnostics::Diagnostics;
use metricd::metric::parse_metric;
use metricd::worker::{spawn_worker, WorkerConfig, WorkerHandle};
use metricd::MetricType;

const INTERVAL: Duration = Duration::from_secs(10);

fn spawn(config: WorkerConfig) -> WorkerHandle {
    spawn_worker(1, 1024, config, Diagnostics::new())
}

async fn send_line(handle: &WorkerHandle, line: &str) {
    handle.send(parse_metric(line.as_bytes()).unwrap()).await;
}

// ============================================================================
// Counter Tests
// ============================================================================

#[tokio::test]
async fn test_counter_flush_once_then_empty() {
    let handle = spawn(WorkerConfig::default());

    for _ in 0..3 {
        send_line(&handle, "a.b.c:1|c").await;
    }

    let points = handle.flush(INTERVAL).await;
    assert_eq!(points.len(), 1, "number of flushed metrics");
    assert_eq!(points[0].name, "a.b.c");
    assert_eq!(points[0].value, 3.0);

    let nopoints = handle.flush(INTERVAL).await;
    assert!(nopoints.is_empty(), "should flush no metrics");
}

#[tokio::test]
async fn test_counter_sample_rate_scales_contribution() {
    let handle = spawn(WorkerConfig::default());
    send_line(&handle, "sampled:1|c|@0.5").await;

    let points = handle.flush(INTERVAL).await;
    assert_eq!(points[0].value, 2.0);
}

#[tokio::test]
async fn test_zero_sample_rate_dropped_not_emitted() {
    let handle = spawn(WorkerConfig::default());

    // fields are public, so a library caller can hand the worker a rate the
    // wire parser would have refused; it must be dropped, not divided by
    let mut metric = parse_metric(b"bad:1|c").unwrap();
    metric.sample_rate = 0.0;
    handle.send(metric).await;

    assert!(handle.flush(INTERVAL).await.is_empty());
}

#[tokio::test]
async fn test_zero_contribution_counter_not_emitted() {
    let handle = spawn(WorkerConfig::default());
    send_line(&handle, "a:1|c").await;
    handle.flush(INTERVAL).await;

    // the counter got no samples this interval: no zero-valued point
    send_line(&handle, "b:1|c").await;
    let points = handle.flush(INTERVAL).await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].name, "b");
}

// ============================================================================
// Gauge Tests
// ============================================================================

#[tokio::test]
async fn test_gauge_last_write_wins() {
    let handle = spawn(WorkerConfig::default());
    for line in ["g:5|g", "g:9|g", "g:2|g"] {
        send_line(&handle, line).await;
    }

    let points = handle.flush(INTERVAL).await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 2.0);
    assert_eq!(points[0].kind, MetricType::Gauge);
}

#[tokio::test]
async fn test_gauge_reset_vs_retain() {
    let resetting = spawn(WorkerConfig::default());
    send_line(&resetting, "g:7|g").await;
    resetting.flush(INTERVAL).await;
    assert!(resetting.flush(INTERVAL).await.is_empty());

    let retaining = spawn(WorkerConfig {
        retain_gauges: true,
        ..WorkerConfig::default()
    });
    send_line(&retaining, "g:7|g").await;
    retaining.flush(INTERVAL).await;
    let repeated = retaining.flush(INTERVAL).await;
    assert_eq!(repeated.len(), 1);
    assert_eq!(repeated[0].value, 7.0);
}

// ============================================================================
// Histogram / Timer Tests
// ============================================================================

#[tokio::test]
async fn test_histogram_percentiles_of_uniform_distribution() {
    let handle = spawn(WorkerConfig {
        percentiles: vec![0.5, 0.99],
        histogram_size: 100,
        ..WorkerConfig::default()
    });

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..1000 {
        let v: f64 = rng.gen_range(0.0..100.0);
        send_line(&handle, &format!("lat:{}|ms", v)).await;
    }

    let points = handle.flush(INTERVAL).await;
    let find = |name: &str| {
        points
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("missing point {}", name))
    };

    assert_eq!(find("lat.count").value, 1000.0);
    assert!(find("lat.min").value >= 0.0);
    assert!(find("lat.max").value < 100.0);
    // 1% rank error over U(0, 100)
    assert!((find("lat.p50").value - 50.0).abs() < 5.0);
    assert!(find("lat.p99").value > 95.0);
}

#[tokio::test]
async fn test_timer_and_histogram_are_separate_series() {
    let handle = spawn(WorkerConfig {
        percentiles: vec![0.5],
        ..WorkerConfig::default()
    });
    send_line(&handle, "x:1|ms").await;
    send_line(&handle, "x:100|h").await;

    let points = handle.flush(INTERVAL).await;
    let timer_count = points
        .iter()
        .find(|p| p.name == "x.count" && p.kind == MetricType::Timer)
        .unwrap();
    let histo_count = points
        .iter()
        .find(|p| p.name == "x.count" && p.kind == MetricType::Histogram)
        .unwrap();
    assert_eq!(timer_count.value, 1.0);
    assert_eq!(histo_count.value, 1.0);
}

// ============================================================================
// Set Tests
// ============================================================================

#[tokio::test]
async fn test_set_estimate_tracks_distinct_count() {
    let handle = spawn(WorkerConfig::default());

    let n = 1000;
    for i in 0..n {
        send_line(&handle, &format!("users:user-{}|s", i)).await;
    }
    // duplicates must not move the estimate
    for i in 0..n {
        send_line(&handle, &format!("users:user-{}|s", i)).await;
    }

    let points = handle.flush(INTERVAL).await;
    assert_eq!(points.len(), 1);
    let est = points[0].value;
    let err = (est - f64::from(n)).abs() / f64::from(n);
    assert!(err < 0.05, "estimate {} for {} distinct", est, n);

    assert!(handle.flush(INTERVAL).await.is_empty(), "set must reset on flush");
}

// ============================================================================
// Cross-cutting
// ============================================================================

#[tokio::test]
async fn test_flush_is_snapshot_of_single_interval() {
    let handle = spawn(WorkerConfig::default());

    send_line(&handle, "a:1|c").await;
    let first = handle.flush(INTERVAL).await;
    assert_eq!(first[0].value, 1.0);

    // next interval starts from zero, not from the flushed sum
    send_line(&handle, "a:1|c").await;
    let second = handle.flush(INTERVAL).await;
    assert_eq!(second[0].value, 1.0);
}

#[tokio::test]
async fn test_mixed_kinds_one_interval() {
    let handle = spawn(WorkerConfig {
        percentiles: vec![0.5],
        ..WorkerConfig::default()
    });

    send_line(&handle, "hits:3|c").await;
    send_line(&handle, "temp:21.5|g").await;
    send_line(&handle, "lat:12|ms").await;
    send_line(&handle, "users:alice|s").await;

    let points = handle.flush(INTERVAL).await;
    // counter + gauge + (count, sum, min, max, p50) + set
    assert_eq!(points.len(), 1 + 1 + 5 + 1);
}
