//! ---
//! monq_section: "01-shared-runtime"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Shared primitives and utilities for the recovery runtime."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_namespace() -> String {
    "rook-ceph".to_owned()
}

fn default_mon_label() -> String {
    "app=rook-ceph-mon".to_owned()
}

fn default_mon_daemon_label_key() -> String {
    "ceph_daemon_id".to_owned()
}

fn default_reconciler_label() -> String {
    "app=rook-ceph-operator".to_owned()
}

fn default_reconciler_deployment() -> String {
    "rook-ceph-operator".to_owned()
}

fn default_cluster_name() -> String {
    "ceph".to_owned()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/var/lib/ceph")
}

fn default_mon_container() -> String {
    "mon".to_owned()
}

fn default_selection_seed() -> u64 {
    0x5EEDu64
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_quorum_failure_signature() -> String {
    "mon quorum status failed".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_detection_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_sleep_probe_delay() -> Duration {
    Duration::from_secs(3600)
}

fn default_reconciler_stop_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_reconciler_start_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_mon_running_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_quorum_reform_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/tmp/monq")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a recovery run.
///
/// Every component receives this (or one of its sections) explicitly; there
/// is no process-wide namespace or context state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub monmap: MonmapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RecoveryConfig {
    pub const ENV_CONFIG_PATH: &str = "MONQ_CONFIG";

    /// Load configuration from disk, respecting the `MONQ_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                return Self::from_path(PathBuf::from(env_path));
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::from_path(candidate.as_ref().to_path_buf());
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<RecoveryConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.namespace.trim().is_empty() {
            return Err(anyhow!("cluster.namespace must not be empty"));
        }
        if self.cluster.reconciler_deployment.trim().is_empty() {
            return Err(anyhow!("cluster.reconciler_deployment must not be empty"));
        }
        if self.detection.quorum_failure_signature.trim().is_empty() {
            return Err(anyhow!(
                "detection.quorum_failure_signature must not be empty"
            ));
        }
        if self.detection.poll_interval.is_zero() {
            return Err(anyhow!("detection.poll_interval must be greater than zero"));
        }
        if self.detection.timeout < self.detection.poll_interval {
            return Err(anyhow!(
                "detection.timeout must be at least one poll interval"
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for RecoveryConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: RecoveryConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Addressing details for the cluster under recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Namespace hosting the monitor and reconciler deployments.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Label selector matching all monitor pods.
    #[serde(default = "default_mon_label")]
    pub mon_label: String,
    /// Label key carrying a monitor pod's daemon id.
    #[serde(default = "default_mon_daemon_label_key")]
    pub mon_daemon_label_key: String,
    /// Label selector matching the reconciler pod.
    #[serde(default = "default_reconciler_label")]
    pub reconciler_label: String,
    /// Deployment name of the reconciler.
    #[serde(default = "default_reconciler_deployment")]
    pub reconciler_deployment: String,
    /// Logical cluster name used by the monitor daemons.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Root of the monitor data directories inside a monitor pod.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Container name hosting the monitor daemon.
    #[serde(default = "default_mon_container")]
    pub mon_container: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            mon_label: default_mon_label(),
            mon_daemon_label_key: default_mon_daemon_label_key(),
            reconciler_label: default_reconciler_label(),
            reconciler_deployment: default_reconciler_deployment(),
            cluster_name: default_cluster_name(),
            data_root: default_data_root(),
            mon_container: default_mon_container(),
        }
    }
}

/// Knobs for the store-wipe injection step.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Seed for the victim selection RNG, allowing deterministic replay.
    #[serde(default = "default_selection_seed")]
    pub selection_seed: u64,
    /// Delay applied after the wipes before detection starts.
    #[serde(default = "default_settle_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub settle_delay: Duration,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            selection_seed: default_selection_seed(),
            settle_delay: default_settle_delay(),
        }
    }
}

/// Knobs for the quorum-loss detector.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Substring the reconciler emits once monitor health cannot be established.
    #[serde(default = "default_quorum_failure_signature")]
    pub quorum_failure_signature: String,
    /// Interval between log fetches.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Total budget for observing the failure signature.
    #[serde(default = "default_detection_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            quorum_failure_signature: default_quorum_failure_signature(),
            poll_interval: default_poll_interval(),
            timeout: default_detection_timeout(),
        }
    }
}

/// Timing applied to lifecycle overrides and readiness gates.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Liveness probe delay applied while the target monitor sleeps.
    #[serde(default = "default_sleep_probe_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sleep_probe_delay: Duration,
    /// Gate budget for the reconciler pod to terminate after scale-down.
    #[serde(default = "default_reconciler_stop_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reconciler_stop_timeout: Duration,
    /// Gate budget for the reconciler pod to come back after scale-up.
    #[serde(default = "default_reconciler_start_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reconciler_start_timeout: Duration,
    /// Gate budget for surviving monitors to report Running mid-repair.
    #[serde(default = "default_mon_running_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub mon_running_timeout: Duration,
    /// Gate budget for the full monitor count after the reconciler resumes.
    #[serde(default = "default_quorum_reform_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub quorum_reform_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            sleep_probe_delay: default_sleep_probe_delay(),
            reconciler_stop_timeout: default_reconciler_stop_timeout(),
            reconciler_start_timeout: default_reconciler_start_timeout(),
            mon_running_timeout: default_mon_running_timeout(),
            quorum_reform_timeout: default_quorum_reform_timeout(),
        }
    }
}

/// Working paths for the extracted and backed-up monmap inside the target pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonmapConfig {
    /// Directory holding the working files inside the target pod.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

impl MonmapConfig {
    /// Path of the freshly extracted map.
    pub fn extracted_path(&self) -> PathBuf {
        self.workdir.join("monmap")
    }

    /// Path of the pre-edit backup copy.
    pub fn backup_path(&self) -> PathBuf {
        self.workdir.join("monmap.bak")
    }
}

impl Default for MonmapConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
        }
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the rolling log files.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Optional override for the log file prefix.
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Output format emitted to stdout.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}
