//! ---
//! monq_section: "03-quorum-recovery"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Quorum failure injection and monmap repair orchestration."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use monq_common::config::RecoveryConfig;
use monq_cluster::{
    ClusterError, DeploymentApi, DeploymentReplicaState, GateCondition, LogSource, MonitorIdentity,
    MonitorSet, PodExec, ResourceGate,
};

use crate::detector::{DetectionReport, QuorumLossDetector};
use crate::injector::{InjectionReport, QuorumLossInjector};
use crate::lifecycle::{LifecycleOverride, ReconcilerLifecycleController};
use crate::metrics::RecoveryMetrics;
use crate::monmap::{MonmapExtract, MonmapInject, MonmapPrint, MonmapRemove, MonmapWorkspace};
use crate::{RecoveryError, Result};

/// Position of a recovery session in the repair pipeline.
///
/// Transitions are strictly sequential with no retries; a failed step
/// abandons the whole session. The ordering is load-bearing: reordering any
/// pair risks corrupting the monitor's on-disk store or racing the
/// reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Session created, nothing touched yet.
    Idle,
    /// Reconciler scaled to zero and confirmed gone.
    OperatorPaused,
    /// Target monitor entrypoint replaced with a sleep, probe stretched.
    TargetSleeping,
    /// Membership map extracted to the working file.
    MapExtracted,
    /// Extracted map decoded for the audit log.
    MapInspected,
    /// Pre-edit copy taken.
    MapBackedUp,
    /// Crashed members removed from the backup copy.
    MapEdited,
    /// Edited map written back into the target's store.
    MapReinjected,
    /// Target entrypoint and probe timing restored.
    TargetRestored,
    /// Reconciler scaled back up and confirmed Running.
    OperatorResumed,
    /// Full original monitor count confirmed Running.
    QuorumVerified,
}

impl RecoveryStep {
    /// Static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStep::Idle => "idle",
            RecoveryStep::OperatorPaused => "operator_paused",
            RecoveryStep::TargetSleeping => "target_sleeping",
            RecoveryStep::MapExtracted => "map_extracted",
            RecoveryStep::MapInspected => "map_inspected",
            RecoveryStep::MapBackedUp => "map_backed_up",
            RecoveryStep::MapEdited => "map_edited",
            RecoveryStep::MapReinjected => "map_reinjected",
            RecoveryStep::TargetRestored => "target_restored",
            RecoveryStep::OperatorResumed => "operator_resumed",
            RecoveryStep::QuorumVerified => "quorum_verified",
        }
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal entry recording when a step completed.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Completed step.
    pub step: RecoveryStep,
    /// Completion time.
    pub at: DateTime<Utc>,
}

/// Transient state of one recovery run.
///
/// Retains every intermediate artifact (original replica count, original
/// container settings, backup map path) so a human can resume manually if a
/// later step aborts the session. Only one session may be in flight: the
/// paused reconciler and the shared working files make concurrent runs
/// unsafe by construction.
#[derive(Debug, Clone)]
pub struct RecoverySession {
    /// Monitors destroyed by the injector.
    pub crashed: Vec<MonitorIdentity>,
    /// The majority remainder.
    pub surviving: Vec<MonitorIdentity>,
    /// Surviving monitor hosting the repair.
    pub target: MonitorIdentity,
    /// Working file locations inside the target pod.
    pub workspace: MonmapWorkspace,
    /// Reconciler replica count recorded before the pause.
    pub reconciler_replicas: Option<DeploymentReplicaState>,
    /// Container settings recorded before the sleep override.
    pub lifecycle_override: Option<LifecycleOverride>,
    step: RecoveryStep,
    journal: Vec<StepRecord>,
}

impl RecoverySession {
    fn begin(report: &InjectionReport, target: MonitorIdentity, workspace: MonmapWorkspace) -> Self {
        Self {
            crashed: report.crashed.clone(),
            surviving: report.surviving.clone(),
            target,
            workspace,
            reconciler_replicas: None,
            lifecycle_override: None,
            step: RecoveryStep::Idle,
            journal: Vec::new(),
        }
    }

    /// Current pipeline position.
    pub fn step(&self) -> RecoveryStep {
        self.step
    }

    /// Completed transitions in order.
    pub fn journal(&self) -> &[StepRecord] {
        &self.journal
    }

    /// Expected monitor count once the reconciler has rebuilt the victims.
    pub fn full_count(&self) -> usize {
        self.crashed.len() + self.surviving.len()
    }

    fn advance(&mut self, step: RecoveryStep, metrics: Option<&RecoveryMetrics>) {
        info!(
            target: "monq::recovery::session",
            from = %self.step,
            to = %step,
            "recovery step complete",
        );
        self.step = step;
        self.journal.push(StepRecord {
            step,
            at: Utc::now(),
        });
        if let Some(metrics) = metrics {
            metrics.record_step(step);
        }
    }
}

/// Drives the monmap repair pipeline against a confirmed quorum loss.
pub struct RecoveryEngine {
    config: RecoveryConfig,
    exec: Arc<dyn PodExec>,
    gate: Arc<dyn ResourceGate>,
    lifecycle: ReconcilerLifecycleController,
    metrics: Option<RecoveryMetrics>,
}

impl RecoveryEngine {
    /// Build an engine over the collaborator ports.
    pub fn new(
        config: RecoveryConfig,
        exec: Arc<dyn PodExec>,
        deployments: Arc<dyn DeploymentApi>,
        gate: Arc<dyn ResourceGate>,
        metrics: Option<RecoveryMetrics>,
    ) -> Self {
        let lifecycle = ReconcilerLifecycleController::new(
            config.cluster.clone(),
            config.lifecycle.clone(),
            deployments,
            gate.clone(),
        );
        Self {
            config,
            exec,
            gate,
            lifecycle,
            metrics,
        }
    }

    /// Repair using the first surviving monitor as the target.
    pub async fn repair(&self, report: &InjectionReport) -> Result<RecoverySession> {
        let target = report
            .surviving
            .first()
            .cloned()
            .ok_or(RecoveryError::NoSurvivingTarget)?;
        self.repair_with_target(report, &target).await
    }

    /// Repair using an explicitly chosen surviving monitor.
    ///
    /// The target is cross-checked against the injection report before
    /// anything is touched: repairing from an already-crashed monitor would
    /// reinject garbage into a store that no longer describes a quorum.
    pub async fn repair_with_target(
        &self,
        report: &InjectionReport,
        target: &MonitorIdentity,
    ) -> Result<RecoverySession> {
        if !report.surviving.iter().any(|m| m.id == target.id) {
            return Err(RecoveryError::TargetNotSurviving(target.id.clone()));
        }

        let workspace = MonmapWorkspace::from_config(&self.config.monmap);
        let mut session = RecoverySession::begin(report, target.clone(), workspace);
        info!(
            target: "monq::recovery::session",
            repair_target = %session.target.id,
            crashed = ?report.crashed.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            "starting recovery session",
        );

        match self.run(&mut session).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_completed();
                }
                Ok(session)
            }
            Err(err) => {
                let failed = match &err {
                    RecoveryError::Step { step, .. } | RecoveryError::Gate { step, .. } => *step,
                    _ => session.step(),
                };
                if let Some(metrics) = &self.metrics {
                    metrics.record_step_failure(failed);
                }
                error!(
                    target: "monq::recovery::session",
                    step = %failed,
                    error = %err,
                    backup_map = %session.workspace.backup.display(),
                    retained_override = ?session.lifecycle_override,
                    retained_replicas = ?session.reconciler_replicas,
                    "recovery session abandoned; artifacts retained for manual repair",
                );
                Err(err)
            }
        }
    }

    async fn run(&self, session: &mut RecoverySession) -> Result<()> {
        let metrics = self.metrics.as_ref();

        let replicas = self.lifecycle.pause().await?;
        session.reconciler_replicas = Some(replicas.clone());
        session.advance(RecoveryStep::OperatorPaused, metrics);

        let retained = self.lifecycle.sleep_override(&session.target).await?;
        session.lifecycle_override = Some(retained.clone());
        session.advance(RecoveryStep::TargetSleeping, metrics);

        let base = retained.daemon_argv();
        let pod = session.target.pod.clone();
        self.exec_step(
            RecoveryStep::MapExtracted,
            &pod,
            vec![
                "mkdir".to_owned(),
                "-p".to_owned(),
                session.workspace.workdir.display().to_string(),
            ],
        )
        .await?;
        let extract = MonmapExtract {
            base: base.clone(),
            destination: session.workspace.extracted.clone(),
        };
        self.exec_step(RecoveryStep::MapExtracted, &pod, extract.argv())
            .await?;
        session.advance(RecoveryStep::MapExtracted, metrics);

        let print = MonmapPrint {
            map: session.workspace.extracted.clone(),
        };
        match self
            .exec
            .exec(
                &self.config.cluster.namespace,
                &pod,
                &self.config.cluster.mon_container,
                &print.argv(),
            )
            .await
        {
            Ok(output) => info!(
                target: "monq::recovery::session",
                map = %session.workspace.extracted.display(),
                %output,
                "extracted monmap contents",
            ),
            // Diagnostic only; a failed decode never blocks the repair.
            Err(err) => warn!(
                target: "monq::recovery::session",
                error = %err,
                "monmap inspection failed; continuing",
            ),
        }
        session.advance(RecoveryStep::MapInspected, metrics);

        self.exec_step(
            RecoveryStep::MapBackedUp,
            &pod,
            vec![
                "cp".to_owned(),
                session.workspace.extracted.display().to_string(),
                session.workspace.backup.display().to_string(),
            ],
        )
        .await?;
        session.advance(RecoveryStep::MapBackedUp, metrics);

        // Each removal mutates the same file; they must run one at a time.
        for identity in &session.crashed {
            let remove = MonmapRemove {
                map: session.workspace.backup.clone(),
                id: identity.id.clone(),
            };
            self.exec_step(RecoveryStep::MapEdited, &pod, remove.argv())
                .await?;
            info!(
                target: "monq::recovery::session",
                mon = %identity.id,
                "removed crashed member from working map",
            );
        }
        session.advance(RecoveryStep::MapEdited, metrics);

        let inject = MonmapInject {
            base,
            source: session.workspace.backup.clone(),
        };
        self.exec_step(RecoveryStep::MapReinjected, &pod, inject.argv())
            .await?;
        session.advance(RecoveryStep::MapReinjected, metrics);

        self.lifecycle.restore(&retained).await?;
        self.gate_step(
            RecoveryStep::TargetRestored,
            GateCondition::PodsRunning {
                label_selector: self.config.cluster.mon_label.clone(),
                count: session.surviving.len(),
            },
            self.config.lifecycle.mon_running_timeout,
        )
        .await?;
        session.advance(RecoveryStep::TargetRestored, metrics);

        self.lifecycle.resume(&replicas).await?;
        session.advance(RecoveryStep::OperatorResumed, metrics);

        self.gate_step(
            RecoveryStep::QuorumVerified,
            GateCondition::PodsRunning {
                label_selector: self.config.cluster.mon_label.clone(),
                count: session.full_count(),
            },
            self.config.lifecycle.quorum_reform_timeout,
        )
        .await?;
        session.advance(RecoveryStep::QuorumVerified, metrics);
        Ok(())
    }

    async fn exec_step(&self, step: RecoveryStep, pod: &str, argv: Vec<String>) -> Result<String> {
        self.exec
            .exec(
                &self.config.cluster.namespace,
                pod,
                &self.config.cluster.mon_container,
                &argv,
            )
            .await
            .map_err(|err| RecoveryError::Step {
                step,
                source: ClusterError::Exec(err),
            })
    }

    async fn gate_step(
        &self,
        step: RecoveryStep,
        condition: GateCondition,
        timeout: Duration,
    ) -> Result<()> {
        self.gate
            .wait(&self.config.cluster.namespace, &condition, timeout)
            .await
            .map_err(|source| RecoveryError::Gate { step, source })
    }
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Full pipeline result: what was injected, what was observed, and the
/// completed session.
#[derive(Debug)]
pub struct RecoveryOutcome {
    /// Injection outcome.
    pub report: InjectionReport,
    /// Detection outcome.
    pub detection: DetectionReport,
    /// The verified session.
    pub session: RecoverySession,
}

/// Wires injector, detector, and engine into the one supported control flow:
/// inject, confirm, pause, repair, resume, verify.
pub struct RecoveryOrchestrator {
    injector: QuorumLossInjector,
    detector: QuorumLossDetector,
    engine: RecoveryEngine,
}

impl RecoveryOrchestrator {
    /// Build the pipeline over the collaborator ports.
    pub fn new(
        config: RecoveryConfig,
        exec: Arc<dyn PodExec>,
        deployments: Arc<dyn DeploymentApi>,
        gate: Arc<dyn ResourceGate>,
        logs: Arc<dyn LogSource>,
        metrics: Option<RecoveryMetrics>,
    ) -> Self {
        let injector = QuorumLossInjector::new(
            config.cluster.clone(),
            config.injection.clone(),
            exec.clone(),
            metrics.clone(),
        );
        let detector = QuorumLossDetector::new(
            config.cluster.clone(),
            config.detection.clone(),
            logs,
            metrics.clone(),
        );
        let engine = RecoveryEngine::new(config, exec, deployments, gate, metrics);
        Self {
            injector,
            detector,
            engine,
        }
    }

    /// Run the full scenario: crash `crash_count` monitors, confirm the loss
    /// from log evidence, then repair and verify.
    pub async fn run(&mut self, mons: &MonitorSet, crash_count: usize) -> Result<RecoveryOutcome> {
        let report = self.injector.inject(mons, crash_count).await?;
        let detection = self.detector.confirm(&report).await?;
        let session = self.engine.repair(&report).await?;
        Ok(RecoveryOutcome {
            report,
            detection,
            session,
        })
    }
}

impl fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monq_cluster::DeploymentPatch;
    use monq_testkit::{CallRecord, FakeCluster};

    fn orchestrator(cluster: &Arc<FakeCluster>) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(
            monq_testkit::fast_config(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            None,
        )
    }

    fn engine(cluster: &Arc<FakeCluster>) -> RecoveryEngine {
        RecoveryEngine::new(
            monq_testkit::fast_config(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            None,
        )
    }

    #[tokio::test]
    async fn full_pipeline_repairs_and_verifies() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        let mons = cluster.monitor_set();
        let outcome = orchestrator(&cluster).run(&mons, 1).await.unwrap();

        assert_eq!(outcome.session.step(), RecoveryStep::QuorumVerified);
        let steps: Vec<_> = outcome
            .session
            .journal()
            .iter()
            .map(|record| record.step)
            .collect();
        assert_eq!(
            steps,
            vec![
                RecoveryStep::OperatorPaused,
                RecoveryStep::TargetSleeping,
                RecoveryStep::MapExtracted,
                RecoveryStep::MapInspected,
                RecoveryStep::MapBackedUp,
                RecoveryStep::MapEdited,
                RecoveryStep::MapReinjected,
                RecoveryStep::TargetRestored,
                RecoveryStep::OperatorResumed,
                RecoveryStep::QuorumVerified,
            ]
        );

        // Final membership is the original minus the crashed ids.
        let crashed: Vec<_> = outcome
            .report
            .crashed
            .iter()
            .map(|m| m.id.as_str().to_owned())
            .collect();
        let expected: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| (*id).to_owned())
            .filter(|id| !crashed.contains(id))
            .collect();
        assert_eq!(cluster.monmap_members(), expected);
        assert_eq!(cluster.running_mons(), 3);
    }

    #[tokio::test]
    async fn surviving_count_is_gated_before_resume() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        let mons = cluster.monitor_set();
        orchestrator(&cluster).run(&mons, 1).await.unwrap();

        let journal = cluster.journal();
        let post_restore_gate = journal
            .iter()
            .position(|call| {
                matches!(
                    call,
                    CallRecord::Gate {
                        condition: monq_cluster::GateCondition::PodsRunning { count: 2, .. },
                    }
                )
            })
            .expect("post-reinject gate on the surviving count");
        let resume_scale = journal
            .iter()
            .position(|call| {
                matches!(
                    call,
                    CallRecord::Scale {
                        deployment,
                        replicas: 1,
                    } if deployment == "rook-ceph-operator"
                )
            })
            .expect("reconciler resume scale");
        assert!(post_restore_gate < resume_scale);
    }

    #[tokio::test]
    async fn restore_carries_the_literal_originals() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        let mons = cluster.monitor_set();
        let outcome = orchestrator(&cluster).run(&mons, 1).await.unwrap();
        let target = outcome.session.target.deployment.clone();
        let original_args = outcome
            .session
            .lifecycle_override
            .as_ref()
            .unwrap()
            .original_args
            .clone();

        let command_patches: Vec<_> = cluster
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                CallRecord::Patch {
                    deployment,
                    patch: DeploymentPatch::ContainerCommand { command, args, .. },
                } if deployment == target => Some((command, args)),
                _ => None,
            })
            .collect();
        assert_eq!(command_patches.len(), 2);
        assert_eq!(command_patches[0].0, vec!["sleep".to_owned()]);
        assert_eq!(command_patches[1].0, vec!["ceph-mon".to_owned()]);
        assert_eq!(command_patches[1].1, original_args);

        let probe_patches: Vec<_> = cluster
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                CallRecord::Patch {
                    deployment,
                    patch: DeploymentPatch::LivenessInitialDelay { seconds },
                } if deployment == target => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(probe_patches, vec![3600, 10]);
        let view = cluster.deployment_view(&target).unwrap();
        assert_eq!(view.liveness_initial_delay_seconds, 10);
    }

    #[tokio::test]
    async fn detection_timeout_blocks_all_lifecycle_mutation() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.disable_auto_signature();
        let mons = cluster.monitor_set();
        let err = orchestrator(&cluster).run(&mons, 1).await.unwrap_err();
        assert!(matches!(err, RecoveryError::DetectionNotConfirmed { .. }));
        assert!(
            cluster.journal().iter().all(|call| !call.is_mutation()),
            "no patch or scale may be issued without a confirmed loss"
        );
    }

    #[tokio::test]
    async fn crashed_target_is_refused_before_any_mutation() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        let crashed = monq_cluster::MonitorIdentity::conventional("b");
        let report = InjectionReport {
            crashed: vec![crashed.clone()],
            surviving: vec![
                monq_cluster::MonitorIdentity::conventional("a"),
                monq_cluster::MonitorIdentity::conventional("c"),
            ],
            started_at: Utc::now(),
        };
        let err = engine(&cluster)
            .repair_with_target(&report, &crashed)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::TargetNotSurviving(id) if id.as_str() == "b"));
        assert!(cluster.journal().iter().all(|call| !call.is_mutation()));
    }

    #[tokio::test]
    async fn inspection_failure_does_not_block_repair() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.script_print_failure();
        let mons = cluster.monitor_set();
        let outcome = orchestrator(&cluster).run(&mons, 1).await.unwrap();
        assert_eq!(outcome.session.step(), RecoveryStep::QuorumVerified);
    }

    #[tokio::test]
    async fn quorum_gate_timeout_abandons_the_session() {
        let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
        cluster.disable_recreate_on_resume();
        let mons = cluster.monitor_set();
        let err = orchestrator(&cluster).run(&mons, 1).await.unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Gate {
                step: RecoveryStep::QuorumVerified,
                ..
            }
        ));
    }
}
