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

use tracing::info;

use monq_common::config::{ClusterConfig, LifecycleConfig};
use monq_cluster::{
    DeploymentApi, DeploymentPatch, DeploymentReplicaState, GateCondition, MonitorIdentity,
    ResourceGate,
};

use crate::session::RecoveryStep;
use crate::{RecoveryError, Result};

/// Original container settings retained from the repair target's deployment
/// so the restore step can put back exactly what was there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOverride {
    /// Deployment the override was applied to.
    pub deployment: String,
    /// Entrypoint read before the override.
    pub original_command: Vec<String>,
    /// Arguments read before the override.
    pub original_args: Vec<String>,
    /// Liveness probe delay read before the override.
    pub original_probe_delay_seconds: u32,
}

impl LifecycleOverride {
    /// The daemon argv as the container spec carried it, command followed by
    /// arguments, for reuse by the map extraction and injection commands.
    pub fn daemon_argv(&self) -> Vec<String> {
        self.original_command
            .iter()
            .chain(self.original_args.iter())
            .cloned()
            .collect()
    }
}

/// Pauses and resumes the reconciler, and holds a monitor deployment in a
/// sleeping state while its on-disk store is edited.
pub struct ReconcilerLifecycleController {
    cluster: ClusterConfig,
    lifecycle: LifecycleConfig,
    deployments: Arc<dyn DeploymentApi>,
    gate: Arc<dyn ResourceGate>,
}

impl ReconcilerLifecycleController {
    /// Build a controller over the deployment and gate ports.
    pub fn new(
        cluster: ClusterConfig,
        lifecycle: LifecycleConfig,
        deployments: Arc<dyn DeploymentApi>,
        gate: Arc<dyn ResourceGate>,
    ) -> Self {
        Self {
            cluster,
            lifecycle,
            deployments,
            gate,
        }
    }

    /// Scale the reconciler to zero and block until its pod is gone.
    ///
    /// A failed scale request is fatal and distinct from the gate's own
    /// timeout (scale accepted but the pod lingered).
    pub async fn pause(&self) -> Result<DeploymentReplicaState> {
        let name = self.cluster.reconciler_deployment.as_str();
        let view = self
            .deployments
            .get(&self.cluster.namespace, name)
            .await
            .map_err(|source| RecoveryError::Lifecycle {
                deployment: name.to_owned(),
                source,
            })?;
        let original = DeploymentReplicaState {
            deployment: name.to_owned(),
            replicas: view.replicas,
        };

        self.deployments
            .scale(&self.cluster.namespace, name, 0)
            .await
            .map_err(|source| RecoveryError::Lifecycle {
                deployment: name.to_owned(),
                source,
            })?;
        info!(target: "monq::recovery::lifecycle", deployment = name, "reconciler scaled to zero");

        let condition = GateCondition::PodsGone {
            label_selector: self.cluster.reconciler_label.clone(),
        };
        self.gate
            .wait(
                &self.cluster.namespace,
                &condition,
                self.lifecycle.reconciler_stop_timeout,
            )
            .await
            .map_err(|source| RecoveryError::Gate {
                step: RecoveryStep::OperatorPaused,
                source,
            })?;
        Ok(original)
    }

    /// Scale the reconciler back to its recorded count and block until its
    /// pod is Running again.
    pub async fn resume(&self, original: &DeploymentReplicaState) -> Result<()> {
        let name = original.deployment.as_str();
        self.deployments
            .scale(&self.cluster.namespace, name, original.replicas)
            .await
            .map_err(|source| RecoveryError::Lifecycle {
                deployment: name.to_owned(),
                source,
            })?;
        info!(
            target: "monq::recovery::lifecycle",
            deployment = name,
            replicas = original.replicas,
            "reconciler scaled back up",
        );

        let condition = GateCondition::PodsRunning {
            label_selector: self.cluster.reconciler_label.clone(),
            count: original.replicas.max(0) as usize,
        };
        self.gate
            .wait(
                &self.cluster.namespace,
                &condition,
                self.lifecycle.reconciler_start_timeout,
            )
            .await
            .map_err(|source| RecoveryError::Gate {
                step: RecoveryStep::OperatorResumed,
                source,
            })
    }

    /// Replace the target monitor's entrypoint with an indefinite sleep and
    /// stretch its liveness probe, retaining the originals.
    ///
    /// The sleeping entrypoint keeps the daemon off its on-disk store while
    /// the store is edited; the stretched probe keeps the orchestrator from
    /// restarting a container that is deliberately not serving.
    pub async fn sleep_override(&self, target: &MonitorIdentity) -> Result<LifecycleOverride> {
        let name = target.deployment.as_str();
        let view = self
            .deployments
            .get(&self.cluster.namespace, name)
            .await
            .map_err(|source| RecoveryError::Lifecycle {
                deployment: name.to_owned(),
                source,
            })?;
        let retained = LifecycleOverride {
            deployment: name.to_owned(),
            original_command: view.command.clone(),
            original_args: view.args.clone(),
            original_probe_delay_seconds: view.liveness_initial_delay_seconds,
        };
        info!(
            target: "monq::recovery::lifecycle",
            deployment = name,
            command = ?retained.original_command,
            args = ?retained.original_args,
            probe_delay = retained.original_probe_delay_seconds,
            "retaining original container settings before sleep override",
        );

        let command_patch = DeploymentPatch::ContainerCommand {
            container: self.cluster.mon_container.clone(),
            command: vec!["sleep".to_owned()],
            args: vec!["infinity".to_owned()],
        };
        self.apply(name, &command_patch).await?;

        let probe_patch = DeploymentPatch::LivenessInitialDelay {
            seconds: self.lifecycle.sleep_probe_delay.as_secs() as u32,
        };
        self.apply(name, &probe_patch).await?;

        let condition = GateCondition::PodsRunning {
            label_selector: self.mon_selector(target),
            count: 1,
        };
        self.gate
            .wait(
                &self.cluster.namespace,
                &condition,
                self.lifecycle.mon_running_timeout,
            )
            .await
            .map_err(|source| RecoveryError::Gate {
                step: RecoveryStep::TargetSleeping,
                source,
            })?;
        Ok(retained)
    }

    /// Put back the retained entrypoint and probe timing via two independent
    /// patches carrying the literal originals.
    pub async fn restore(&self, retained: &LifecycleOverride) -> Result<()> {
        let name = retained.deployment.as_str();
        let command_patch = DeploymentPatch::ContainerCommand {
            container: self.cluster.mon_container.clone(),
            command: retained.original_command.clone(),
            args: retained.original_args.clone(),
        };
        self.apply(name, &command_patch).await?;

        let probe_patch = DeploymentPatch::LivenessInitialDelay {
            seconds: retained.original_probe_delay_seconds,
        };
        self.apply(name, &probe_patch).await?;
        info!(target: "monq::recovery::lifecycle", deployment = name, "original container settings restored");
        Ok(())
    }

    /// Label selector matching exactly one monitor's pod.
    pub fn mon_selector(&self, target: &MonitorIdentity) -> String {
        format!("{}={}", self.cluster.mon_daemon_label_key, target.id)
    }

    async fn apply(&self, name: &str, patch: &DeploymentPatch) -> Result<()> {
        self.deployments
            .patch(&self.cluster.namespace, name, patch)
            .await
            .map_err(|source| RecoveryError::Lifecycle {
                deployment: name.to_owned(),
                source,
            })
    }
}

impl std::fmt::Debug for ReconcilerLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerLifecycleController")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
