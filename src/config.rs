//! Daemon configuration
//!
//! Loaded from a TOML file; every field has a default so a minimal config
//! can be empty. The worker count is deliberately not hot-reloadable:
//! changing it reassigns metrics to different shards mid-interval and
//! corrupts aggregation, so it is fixed for the process lifetime.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::worker::WorkerConfig;

/// Errors from loading or validating a config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "could not parse config file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the UDP readers bind (all of them, via SO_REUSEPORT).
    pub udp_addr: SocketAddr,
    /// Number of aggregation workers (shards). Fixed for the process.
    pub num_workers: usize,
    /// Number of concurrent socket reader tasks.
    pub num_readers: usize,
    /// Seconds between flushes.
    pub flush_interval_secs: u64,
    /// Size of each pooled read buffer; also the largest accepted datagram.
    pub read_buffer_size: usize,
    /// Buffers pre-allocated in the shared pool.
    pub buffer_pool_size: usize,
    /// Kernel SO_RCVBUF request per socket; 0 leaves the OS default.
    pub recv_buffer_bytes: usize,
    /// Bounded inbox capacity per worker.
    pub worker_queue_size: usize,
    /// Quantiles reported per histogram/timer, each in (0, 1).
    pub percentiles: Vec<f64>,
    /// Histogram sketch size budget (reciprocal rank-error bound).
    pub histogram_size: u32,
    /// Emit histogram `.count` points as counters.
    pub histogram_counters: bool,
    /// Expected distinct identities per set metric per interval.
    pub set_size: u32,
    /// Accepted false-positive rate for set estimation.
    pub set_accuracy: f64,
    /// Repeat a gauge's last value every flush instead of resetting it.
    pub retain_gauges: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            udp_addr: "0.0.0.0:8125".parse().unwrap(),
            num_workers: 16,
            num_readers: 2,
            flush_interval_secs: 10,
            read_buffer_size: 8192,
            buffer_pool_size: 256,
            recv_buffer_bytes: 2 * 1024 * 1024,
            worker_queue_size: 4096,
            percentiles: vec![0.5, 0.75, 0.99],
            histogram_size: 100,
            histogram_counters: false,
            set_size: 10_000,
            set_accuracy: 0.01,
            retain_gauges: false,
        }
    }
}

impl Config {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be at least 1"));
        }
        if self.num_readers == 0 {
            return Err(ConfigError::Invalid("num_readers must be at least 1"));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid("flush_interval_secs must be at least 1"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be nonzero"));
        }
        if self.worker_queue_size == 0 {
            return Err(ConfigError::Invalid("worker_queue_size must be nonzero"));
        }
        if self.histogram_size == 0 {
            return Err(ConfigError::Invalid("histogram_size must be nonzero"));
        }
        if self.percentiles.iter().any(|&q| !(q > 0.0 && q < 1.0)) {
            return Err(ConfigError::Invalid("percentiles must be in (0, 1)"));
        }
        if !(self.set_accuracy > 0.0 && self.set_accuracy < 1.0) {
            return Err(ConfigError::Invalid("set_accuracy must be in (0, 1)"));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// The per-worker slice of this config.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            percentiles: self.percentiles.clone(),
            histogram_size: self.histogram_size,
            histogram_counters: self.histogram_counters,
            set_size: self.set_size,
            set_accuracy: self.set_accuracy,
            retain_gauges: self.retain_gauges,
        }
    }

    /// Config for tests: loopback on an ephemeral port, small pools.
    pub fn test() -> Config {
        Config {
            udp_addr: "127.0.0.1:0".parse().unwrap(),
            num_workers: 4,
            num_readers: 1,
            flush_interval_secs: 1,
            buffer_pool_size: 4,
            worker_queue_size: 64,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "udp_addr = \"127.0.0.1:9125\"\nnum_workers = 8\npercentiles = [0.5, 0.9, 0.99]"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.udp_addr, "127.0.0.1:9125".parse().unwrap());
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.percentiles, vec![0.5, 0.9, 0.99]);
        // untouched fields keep their defaults
        assert_eq!(config.flush_interval_secs, 10);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not_a_field = true").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_bounds() {
        let bad_workers = Config {
            num_workers: 0,
            ..Config::default()
        };
        assert!(bad_workers.validate().is_err());

        let bad_percentile = Config {
            percentiles: vec![0.5, 1.0],
            ..Config::default()
        };
        assert!(bad_percentile.validate().is_err());

        let bad_accuracy = Config {
            set_accuracy: 0.0,
            ..Config::default()
        };
        assert!(bad_accuracy.validate().is_err());
    }
}
