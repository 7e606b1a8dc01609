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

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::time::sleep;
use tracing::{info, warn};

use monq_common::config::{ClusterConfig, InjectionConfig};
use monq_cluster::{
    ExecErrorKind, MonStoreLayout, MonitorIdentity, MonitorSet, PodExec, QuorumHealth,
};

use crate::metrics::RecoveryMetrics;
use crate::{RecoveryError, Result};

/// Outcome of a loss injection, consumed by the detector and repair engine.
#[derive(Debug, Clone)]
pub struct InjectionReport {
    /// Monitors whose stores were destroyed.
    pub crashed: Vec<MonitorIdentity>,
    /// The majority remainder left running.
    pub surviving: Vec<MonitorIdentity>,
    /// Wall-clock instant the first wipe was issued. Log evidence older than
    /// this is treated as stale by the detector.
    pub started_at: DateTime<Utc>,
}

/// Destroys the persistent store of a strict minority of monitors.
pub struct QuorumLossInjector {
    cluster: ClusterConfig,
    injection: InjectionConfig,
    exec: Arc<dyn PodExec>,
    metrics: Option<RecoveryMetrics>,
    rng: StdRng,
}

impl QuorumLossInjector {
    /// Build an injector over the given exec port.
    pub fn new(
        cluster: ClusterConfig,
        injection: InjectionConfig,
        exec: Arc<dyn PodExec>,
        metrics: Option<RecoveryMetrics>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(injection.selection_seed);
        Self {
            cluster,
            injection,
            exec,
            metrics,
            rng,
        }
    }

    /// Destroy the monitor stores of `count` randomly chosen members.
    ///
    /// Refuses any selection that is not a strict minority: the surviving
    /// majority is what the repair engine later operates on. A wipe that
    /// fails because the store is busy is tolerated, since the daemon
    /// behind it loses its state either way; any other failure aborts.
    pub async fn inject(&mut self, mons: &MonitorSet, count: usize) -> Result<InjectionReport> {
        if mons.len() < 3 {
            return Err(RecoveryError::MonitorSetTooSmall(mons.len()));
        }
        if count == 0 {
            return Err(RecoveryError::NothingToInject);
        }
        let max = mons.max_crashable();
        if count > max {
            return Err(RecoveryError::MajoritySelected {
                requested: count,
                total: mons.len(),
                max,
            });
        }

        let mut ids = mons.ids();
        let (chosen, _) = ids.partial_shuffle(&mut self.rng, count);
        let victims = chosen.to_vec();
        let (crashed, surviving) = mons.split(&victims);

        let layout = MonStoreLayout::new(
            self.cluster.cluster_name.clone(),
            self.cluster.data_root.clone(),
        );
        let started_at = Utc::now();

        for identity in &crashed {
            let store = layout.store_path(&identity.id);
            let command = vec![
                "rm".to_owned(),
                "-rf".to_owned(),
                store.display().to_string(),
            ];
            info!(
                target: "monq::recovery::injector",
                mon = %identity.id,
                pod = %identity.pod,
                store = %store.display(),
                "destroying monitor store",
            );
            match self
                .exec
                .exec(
                    &self.cluster.namespace,
                    &identity.pod,
                    &self.cluster.mon_container,
                    &command,
                )
                .await
            {
                Ok(_) => {}
                Err(err) if err.kind == ExecErrorKind::ResourceBusy => {
                    warn!(
                        target: "monq::recovery::injector",
                        mon = %identity.id,
                        error = %err,
                        "store busy during wipe; daemon will fail regardless",
                    );
                }
                Err(err) => {
                    return Err(RecoveryError::Injection {
                        id: identity.id.clone(),
                        source: err,
                    });
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_wipe(identity.id.as_str());
            }
        }

        if !self.injection.settle_delay.is_zero() {
            sleep(self.injection.settle_delay).await;
        }

        info!(
            target: "monq::recovery::injector",
            crashed = crashed.len(),
            surviving = surviving.len(),
            health = %QuorumHealth::classify(surviving.len(), mons.len()),
            "loss injection complete",
        );
        Ok(InjectionReport {
            crashed,
            surviving,
            started_at,
        })
    }
}

impl std::fmt::Debug for QuorumLossInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumLossInjector")
            .field("injection", &self.injection)
            .finish_non_exhaustive()
    }
}
