use crate::distributed::auto_parallel::{DistError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hardware description the cost model prices ops against.
///
/// Every device of the cluster is assumed identical. Missing JSON fields fall back to the
/// [`Default`] machine, a single node with 8 accelerators:
///
/// ```rust
/// use shardwise::distributed::auto_parallel::Cluster;
///
/// let cluster = Cluster::from_json_str(r#"{ "device_count": 16, "link_latency_us": 10.0 }"#).unwrap();
/// assert_eq!(cluster.device_count, 16);
/// assert_eq!(cluster.memory_bandwidth_gbps, Cluster::default().memory_bandwidth_gbps);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cluster {
    pub device_count: usize,
    /// Device memory bandwidth in GB/s.
    pub memory_bandwidth_gbps: f64,
    /// Peak arithmetic throughput in GFLOP/s.
    pub peak_gflops: f64,
    /// Bandwidth of one inter-device link in GB/s.
    pub link_bandwidth_gbps: f64,
    /// Latency of one inter-device message in microseconds.
    pub link_latency_us: f64,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            device_count: 8,
            memory_bandwidth_gbps: 900.0,
            peak_gflops: 19_500.0,
            link_bandwidth_gbps: 300.0,
            link_latency_us: 5.0,
        }
    }
}

impl Cluster {
    /// Parses and validates a JSON cluster description.
    ///
    /// # Errors
    ///
    /// Returns `DistError::ConfigParse` for malformed JSON and `DistError::InvalidCluster` if a
    /// bandwidth or throughput is not positive, or the latency is negative.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cluster: Cluster = serde_json::from_str(json)?;
        cluster.validate()?;
        tracing::debug!(
            device_count = cluster.device_count,
            memory_bandwidth_gbps = cluster.memory_bandwidth_gbps,
            link_bandwidth_gbps = cluster.link_bandwidth_gbps,
            "cluster_config_loaded"
        );
        Ok(cluster)
    }

    /// Reads a JSON cluster description from `path`.
    ///
    /// # Errors
    ///
    /// Returns `DistError::ConfigIo` if the file cannot be read, otherwise as
    /// [`Cluster::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("memory_bandwidth_gbps", self.memory_bandwidth_gbps),
            ("peak_gflops", self.peak_gflops),
            ("link_bandwidth_gbps", self.link_bandwidth_gbps),
        ];
        for (field, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(DistError::InvalidCluster(format!(
                    "{} must be positive, got {}",
                    field, value
                )));
            }
        }
        if self.link_latency_us.is_nan() || self.link_latency_us < 0.0 {
            return Err(DistError::InvalidCluster(format!(
                "link_latency_us must not be negative, got {}",
                self.link_latency_us
            )));
        }
        Ok(())
    }

    /// Microseconds to stream `bytes` through device memory.
    pub fn memory_time_us(&self, bytes: u64) -> f64 {
        bytes as f64 / (self.memory_bandwidth_gbps * 1e3)
    }

    /// Microseconds to execute `flops` at peak throughput.
    pub fn compute_time_us(&self, flops: u64) -> f64 {
        flops as f64 / (self.peak_gflops * 1e3)
    }

    /// Microseconds to push `bytes` through one link, latency excluded.
    pub fn link_time_us(&self, bytes: f64) -> f64 {
        bytes / (self.link_bandwidth_gbps * 1e3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cluster() {
        let cluster = Cluster::default();
        assert_eq!(cluster.device_count, 8);
        assert!(cluster.validate().is_ok());
    }

    #[test]
    fn test_from_json_str() {
        let cluster = Cluster::from_json_str(
            r#"{
                "device_count": 4,
                "memory_bandwidth_gbps": 1000.0,
                "peak_gflops": 1000.0,
                "link_bandwidth_gbps": 100.0,
                "link_latency_us": 2.0
            }"#,
        )
        .unwrap();
        assert_eq!(cluster.device_count, 4);
        assert_eq!(cluster.link_latency_us, 2.0);
        // 1 GB at 1000 GB/s is 1 ms.
        assert!((cluster.memory_time_us(1_000_000_000) - 1000.0).abs() < 1e-9);
        assert!((cluster.link_time_us(100_000.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Cluster::from_json_str("{ not json"),
            Err(DistError::ConfigParse(_))
        ));
        assert!(matches!(
            Cluster::from_json_str(r#"{ "link_bandwidth_gbps": 0.0 }"#),
            Err(DistError::InvalidCluster(_))
        ));
        assert!(matches!(
            Cluster::from_json_str(r#"{ "link_latency_us": -1.0 }"#),
            Err(DistError::InvalidCluster(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("cluster_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "device_count": 2 }"#).unwrap();
        let cluster = Cluster::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cluster.device_count, 2);

        assert!(matches!(
            Cluster::from_json_file("/nonexistent/cluster.json"),
            Err(DistError::ConfigIo(_))
        ));
    }
}
