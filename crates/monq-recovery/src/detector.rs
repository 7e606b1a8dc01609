//! ---
//! monq_section: "03-quorum-recovery"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Quorum failure injection and monmap repair orchestration."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use monq_common::config::{ClusterConfig, DetectionConfig};
use monq_cluster::{LogEvent, LogSource};

use crate::injector::InjectionReport;
use crate::metrics::RecoveryMetrics;
use crate::{RecoveryError, Result};

/// Confirmation that quorum loss was observed in the reconciler logs.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    /// The matching log event, stamped at or after the injection start.
    pub event: LogEvent,
    /// Time spent polling before the signature appeared.
    pub latency: Duration,
}

/// Polls the reconciler's log stream for the quorum-failure signature.
///
/// This is a correctness gate, not a best-effort check: the repair engine
/// destructively edits the membership map, so it must never run against a
/// cluster whose quorum loss was not actually confirmed.
pub struct QuorumLossDetector {
    cluster: ClusterConfig,
    detection: DetectionConfig,
    logs: Arc<dyn LogSource>,
    metrics: Option<RecoveryMetrics>,
}

impl QuorumLossDetector {
    /// Build a detector over the given log port.
    pub fn new(
        cluster: ClusterConfig,
        detection: DetectionConfig,
        logs: Arc<dyn LogSource>,
        metrics: Option<RecoveryMetrics>,
    ) -> Self {
        Self {
            cluster,
            detection,
            logs,
            metrics,
        }
    }

    /// Poll until the failure signature appears, or fail after the budget.
    ///
    /// Lines whose embedded timestamp predates `report.started_at` are
    /// ignored even when they match: overlapping log windows can replay a
    /// signature from an earlier, unrelated incident.
    pub async fn confirm(&self, report: &InjectionReport) -> Result<DetectionReport> {
        let signature = self.detection.quorum_failure_signature.as_str();
        let started = Instant::now();

        loop {
            match self
                .logs
                .fetch(&self.cluster.namespace, &self.cluster.reconciler_label)
                .await
            {
                Ok(window) => {
                    if let Some(event) = self.scan(&window, report) {
                        let latency = started.elapsed();
                        info!(
                            target: "monq::recovery::detector",
                            stamp = %event.timestamp,
                            latency_secs = latency.as_secs(),
                            "quorum failure signature observed",
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.observe_detection(latency);
                        }
                        return Ok(DetectionReport { event, latency });
                    }
                }
                Err(err) => {
                    // Log retrieval is unreliable evidence; retry within budget.
                    warn!(
                        target: "monq::recovery::detector",
                        error = %err,
                        "log fetch failed; retrying",
                    );
                }
            }

            if started.elapsed() >= self.detection.timeout {
                warn!(
                    target: "monq::recovery::detector",
                    signature,
                    waited_secs = started.elapsed().as_secs(),
                    "signature never appeared; refusing to repair",
                );
                return Err(RecoveryError::DetectionNotConfirmed {
                    waited: started.elapsed(),
                });
            }
            sleep(self.detection.poll_interval).await;
        }
    }

    fn scan(&self, window: &str, report: &InjectionReport) -> Option<LogEvent> {
        window
            .lines()
            .filter(|line| line.contains(&self.detection.quorum_failure_signature))
            .filter_map(LogEvent::parse)
            .filter(|event| event.timestamp >= report.started_at)
            .max()
    }
}

impl std::fmt::Debug for QuorumLossDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumLossDetector")
            .field("detection", &self.detection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use monq_cluster::MonitorIdentity;
    use monq_testkit::{FakeCluster, QUORUM_FAILURE_LINE};

    fn report(crashed: &[&str], surviving: &[&str]) -> InjectionReport {
        InjectionReport {
            crashed: crashed
                .iter()
                .map(|id| MonitorIdentity::conventional(*id))
                .collect(),
            surviving: surviving
                .iter()
                .map(|id| MonitorIdentity::conventional(*id))
                .collect(),
            started_at: Utc::now(),
        }
    }

    fn detector(cluster: &Arc<FakeCluster>) -> QuorumLossDetector {
        let config = monq_testkit::fast_config();
        QuorumLossDetector::new(config.cluster, config.detection, cluster.clone(), None)
    }

    #[tokio::test]
    async fn confirms_a_fresh_signature() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        let report = report(&["b"], &["a", "c"]);
        cluster.emit_quorum_failure_at(Utc::now());
        let confirmation = detector(&cluster).confirm(&report).await.unwrap();
        assert!(confirmation.event.line.contains("mon quorum status failed"));
        assert!(confirmation.event.timestamp >= report.started_at);
    }

    #[tokio::test]
    async fn rejects_a_stale_signature() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.disable_auto_signature();
        let stale = Utc::now() - chrono::Duration::hours(1);
        cluster.emit_quorum_failure_at(stale);
        let report = report(&["b"], &["a", "c"]);
        let err = detector(&cluster).confirm(&report).await.unwrap_err();
        assert!(matches!(err, RecoveryError::DetectionNotConfirmed { .. }));
    }

    #[tokio::test]
    async fn times_out_when_no_signature_appears() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.disable_auto_signature();
        cluster.push_log(format!(
            "{} I | op-mon: mons running: [a b c]",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.6f")
        ));
        let report = report(&["b"], &["a", "c"]);
        let err = detector(&cluster).confirm(&report).await.unwrap_err();
        match err {
            RecoveryError::DetectionNotConfirmed { waited } => {
                assert!(waited >= Duration::from_millis(200));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unstamped_matches_are_ignored() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.disable_auto_signature();
        cluster.push_log(QUORUM_FAILURE_LINE);
        let report = report(&["b"], &["a", "c"]);
        let err = detector(&cluster).confirm(&report).await.unwrap_err();
        assert!(matches!(err, RecoveryError::DetectionNotConfirmed { .. }));
    }
}
