//! ---
//! monq_section: "04-test-harness"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "In-memory fake cluster for recovery scenario tests."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
//! An in-memory cluster double implementing every collaborator port the
//! recovery pipeline consumes. The fake models just enough semantics to
//! exercise the orchestration: monitor stores that can be wiped, a
//! membership map mutated by the rendered map-tool commands, a reconciler
//! whose pod follows its replica count, and a log buffer the detector
//! polls. Every call is journaled so tests can assert ordering properties
//! such as "no patch was issued before detection confirmed the loss".

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use monq_common::config::RecoveryConfig;
use monq_cluster::{
    ClusterError, DeploymentApi, DeploymentPatch, DeploymentView, ExecError, ExecErrorKind,
    GateCondition, GateError, LogSource, MonitorId, MonitorIdentity, MonitorSet, PodExec,
    ResourceGate,
};

/// Default quorum-failure line the fake reconciler emits, matching the
/// detector's default signature.
pub const QUORUM_FAILURE_LINE: &str =
    "E | op-mon: health check failed: mon quorum status failed";

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRecord {
    /// In-pod command execution.
    Exec {
        /// Target pod.
        pod: String,
        /// Rendered argv.
        argv: Vec<String>,
    },
    /// Deployment patch.
    Patch {
        /// Target deployment.
        deployment: String,
        /// Applied payload.
        patch: DeploymentPatch,
    },
    /// Replica-count change.
    Scale {
        /// Target deployment.
        deployment: String,
        /// Requested count.
        replicas: i32,
    },
    /// Gate wait.
    Gate {
        /// Awaited condition.
        condition: GateCondition,
    },
    /// Log fetch.
    Logs,
}

impl CallRecord {
    /// True for calls that mutate cluster state (patches and scales).
    pub fn is_mutation(&self) -> bool {
        matches!(self, CallRecord::Patch { .. } | CallRecord::Scale { .. })
    }
}

#[derive(Debug)]
struct MonState {
    identity: MonitorIdentity,
    store_path: String,
    running: bool,
    wiped: bool,
    sleeping: bool,
}

#[derive(Debug)]
struct FakeState {
    mons: IndexMap<MonitorId, MonState>,
    monmap: Vec<String>,
    files: HashMap<String, Vec<String>>,
    last_injected: Option<Vec<String>>,
    deployments: HashMap<String, DeploymentView>,
    reconciler_running: bool,
    log_lines: Vec<String>,
    journal: Vec<CallRecord>,
    busy_wipes: Vec<String>,
    failing_wipes: Vec<String>,
    print_fails: bool,
    auto_signature: bool,
    recreate_on_resume: bool,
}

/// In-memory cluster double. Clone the `Arc` and hand it out as each port.
#[derive(Debug)]
pub struct FakeCluster {
    mon_selector: String,
    reconciler_selector: String,
    reconciler_deployment: String,
    daemon_label_key: String,
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// Build a healthy cluster with the given monitor daemon ids, matching
    /// the default `ClusterConfig` selectors and naming conventions.
    pub fn with_mons(ids: &[&str]) -> Self {
        let mut mons = IndexMap::new();
        let mut deployments = HashMap::new();
        for id in ids {
            let identity = MonitorIdentity::conventional(*id);
            let store_path = format!("/var/lib/ceph/mon/ceph-{id}");
            deployments.insert(
                identity.deployment.clone(),
                DeploymentView {
                    name: identity.deployment.clone(),
                    replicas: 1,
                    command: vec!["ceph-mon".to_owned()],
                    args: vec![
                        "--foreground".to_owned(),
                        "--id".to_owned(),
                        (*id).to_owned(),
                        "--mon-data".to_owned(),
                        store_path.clone(),
                    ],
                    liveness_initial_delay_seconds: 10,
                },
            );
            mons.insert(
                identity.id.clone(),
                MonState {
                    identity,
                    store_path,
                    running: true,
                    wiped: false,
                    sleeping: false,
                },
            );
        }
        deployments.insert(
            "rook-ceph-operator".to_owned(),
            DeploymentView {
                name: "rook-ceph-operator".to_owned(),
                replicas: 1,
                command: vec!["rook".to_owned()],
                args: vec!["operator".to_owned()],
                liveness_initial_delay_seconds: 10,
            },
        );

        Self {
            mon_selector: "app=rook-ceph-mon".to_owned(),
            reconciler_selector: "app=rook-ceph-operator".to_owned(),
            reconciler_deployment: "rook-ceph-operator".to_owned(),
            daemon_label_key: "ceph_daemon_id".to_owned(),
            state: Mutex::new(FakeState {
                monmap: ids.iter().map(|id| (*id).to_owned()).collect(),
                mons,
                files: HashMap::new(),
                last_injected: None,
                deployments,
                reconciler_running: true,
                log_lines: Vec::new(),
                journal: Vec::new(),
                busy_wipes: Vec::new(),
                failing_wipes: Vec::new(),
                print_fails: false,
                auto_signature: true,
                recreate_on_resume: true,
            }),
        }
    }

    /// The monitor set as the orchestrator would discover it.
    pub fn monitor_set(&self) -> MonitorSet {
        let state = self.state.lock();
        state
            .mons
            .values()
            .map(|mon| mon.identity.clone())
            .collect()
    }

    /// Script the next wipe of `id` to report a busy store (still wiping).
    pub fn script_busy_wipe(&self, id: &str) {
        self.state.lock().busy_wipes.push(id.to_owned());
    }

    /// Script the wipe of `id` to hard-fail without wiping.
    pub fn script_failing_wipe(&self, id: &str) {
        self.state.lock().failing_wipes.push(id.to_owned());
    }

    /// Make the map-decoding diagnostic fail.
    pub fn script_print_failure(&self) {
        self.state.lock().print_fails = true;
    }

    /// Stop the fake reconciler from emitting the failure signature when
    /// quorum is lost.
    pub fn disable_auto_signature(&self) {
        self.state.lock().auto_signature = false;
    }

    /// Stop the fake reconciler from recreating wiped monitors on resume.
    pub fn disable_recreate_on_resume(&self) {
        self.state.lock().recreate_on_resume = false;
    }

    /// Append an arbitrary log line.
    pub fn push_log(&self, line: impl Into<String>) {
        self.state.lock().log_lines.push(line.into());
    }

    /// Append a quorum-failure line stamped at the given instant.
    pub fn emit_quorum_failure_at(&self, at: DateTime<Utc>) {
        let line = format!("{} {}", at.format("%Y-%m-%d %H:%M:%S%.6f"), QUORUM_FAILURE_LINE);
        self.push_log(line);
    }

    /// Snapshot of every recorded call.
    pub fn journal(&self) -> Vec<CallRecord> {
        self.state.lock().journal.clone()
    }

    /// Current membership of the cluster's map.
    pub fn monmap_members(&self) -> Vec<String> {
        self.state.lock().monmap.clone()
    }

    /// Number of monitor pods currently Running.
    pub fn running_mons(&self) -> usize {
        self.state
            .lock()
            .mons
            .values()
            .filter(|mon| mon.running)
            .count()
    }

    /// Current view of a deployment.
    pub fn deployment_view(&self, name: &str) -> Option<DeploymentView> {
        self.state.lock().deployments.get(name).cloned()
    }

    fn record(&self, call: CallRecord) {
        self.state.lock().journal.push(call);
    }

    fn maybe_emit_signature(state: &mut FakeState) {
        if !state.auto_signature {
            return;
        }
        // The reconciler's health check complains as soon as any member is
        // unreachable, well before the group actually drops below majority.
        let running = state.mons.values().filter(|mon| mon.running).count();
        if running < state.mons.len() {
            let line = format!(
                "{} {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                QUORUM_FAILURE_LINE
            );
            state.log_lines.push(line);
        }
    }

    fn run_argv(&self, pod: &str, argv: &[String]) -> Result<String, ExecError> {
        let mut state = self.state.lock();
        match argv.first().map(String::as_str) {
            Some("rm") => {
                let path = argv
                    .last()
                    .ok_or_else(|| ExecError::new(pod, ExecErrorKind::CommandFailed, "rm: no path"))?
                    .clone();
                let Some(id) = state
                    .mons
                    .values()
                    .find(|mon| mon.store_path == path)
                    .map(|mon| mon.identity.id.as_str().to_owned())
                else {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        format!("rm: no store at {path}"),
                    ));
                };
                if state.failing_wipes.contains(&id) {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        "rm: permission denied",
                    ));
                }
                let busy = state.busy_wipes.contains(&id);
                if let Some(mon) = state.mons.values_mut().find(|mon| mon.store_path == path) {
                    mon.wiped = true;
                    mon.running = false;
                }
                Self::maybe_emit_signature(&mut state);
                if busy {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::ResourceBusy,
                        "rm: cannot remove 'store.db': Device or resource busy",
                    ));
                }
                Ok(String::new())
            }
            Some("mkdir") => Ok(String::new()),
            Some("cp") => {
                let src = argv.get(1).cloned().unwrap_or_default();
                let dst = argv.get(2).cloned().unwrap_or_default();
                let Some(content) = state.files.get(&src).cloned() else {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        format!("cp: cannot stat '{src}': No such file"),
                    ));
                };
                state.files.insert(dst, content);
                Ok(String::new())
            }
            Some("monmaptool") => {
                let map = argv.get(1).cloned().unwrap_or_default();
                match argv.get(2).map(String::as_str) {
                    Some("--rm") => {
                        let id = argv.get(3).cloned().unwrap_or_default();
                        let Some(members) = state.files.get_mut(&map) else {
                            return Err(ExecError::new(
                                pod,
                                ExecErrorKind::CommandFailed,
                                format!("monmaptool: couldn't open {map}"),
                            ));
                        };
                        let before = members.len();
                        members.retain(|member| member != &id);
                        if members.len() == before {
                            return Err(ExecError::new(
                                pod,
                                ExecErrorKind::CommandFailed,
                                format!("monmaptool: removing nonexistent entry {id}"),
                            ));
                        }
                        Ok(String::new())
                    }
                    Some("--print") => {
                        if state.print_fails {
                            return Err(ExecError::new(
                                pod,
                                ExecErrorKind::CommandFailed,
                                "monmaptool: unable to decode map",
                            ));
                        }
                        let Some(members) = state.files.get(&map) else {
                            return Err(ExecError::new(
                                pod,
                                ExecErrorKind::CommandFailed,
                                format!("monmaptool: couldn't open {map}"),
                            ));
                        };
                        Ok(format!("epoch 1\nmembers: {}", members.join(",")))
                    }
                    _ => Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        "monmaptool: unsupported operation",
                    )),
                }
            }
            _ if argv.iter().any(|arg| arg == "--extract-monmap") => {
                let mon = state.mons.values().find(|mon| mon.identity.pod == pod);
                if !mon.map(|mon| mon.sleeping).unwrap_or(false) {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::ResourceBusy,
                        "error opening mon data directory: store is in use",
                    ));
                }
                let position = argv.iter().position(|arg| arg == "--extract-monmap");
                let dest = position
                    .and_then(|index| argv.get(index + 1))
                    .cloned()
                    .unwrap_or_default();
                let members = state.monmap.clone();
                state.files.insert(dest, members);
                Ok(String::new())
            }
            _ if argv.iter().any(|arg| arg == "--inject-monmap") => {
                let mon = state.mons.values().find(|mon| mon.identity.pod == pod);
                if !mon.map(|mon| mon.sleeping).unwrap_or(false) {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::ResourceBusy,
                        "error opening mon data directory: store is in use",
                    ));
                }
                let position = argv.iter().position(|arg| arg == "--inject-monmap");
                let source = position
                    .and_then(|index| argv.get(index + 1))
                    .cloned()
                    .unwrap_or_default();
                let Some(members) = state.files.get(&source).cloned() else {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        format!("unable to read monmap from {source}"),
                    ));
                };
                if state.last_injected.as_ref() == Some(&members) {
                    return Err(ExecError::new(
                        pod,
                        ExecErrorKind::CommandFailed,
                        "injected map is not newer than the existing map",
                    ));
                }
                state.monmap = members.clone();
                state.last_injected = Some(members);
                Ok(String::new())
            }
            _ => Err(ExecError::new(
                pod,
                ExecErrorKind::CommandFailed,
                format!("unsupported command: {argv:?}"),
            )),
        }
    }

    fn condition_holds(&self, condition: &GateCondition) -> bool {
        let state = self.state.lock();
        match condition {
            GateCondition::PodsRunning {
                label_selector,
                count,
            } => self.running_matching(&state, label_selector) == *count,
            GateCondition::PodsGone { label_selector } => {
                self.running_matching(&state, label_selector) == 0
            }
            GateCondition::DeploymentReplicas { name, replicas } => state
                .deployments
                .get(name)
                .map(|view| view.replicas == *replicas)
                .unwrap_or(false),
        }
    }

    fn running_matching(&self, state: &FakeState, selector: &str) -> usize {
        if selector == self.reconciler_selector {
            return usize::from(state.reconciler_running);
        }
        if selector == self.mon_selector {
            return state.mons.values().filter(|mon| mon.running).count();
        }
        if let Some(id) = selector.strip_prefix(&format!("{}=", self.daemon_label_key)) {
            return state
                .mons
                .get(&MonitorId::from(id))
                .map(|mon| usize::from(mon.running))
                .unwrap_or(0);
        }
        0
    }
}

#[async_trait]
impl PodExec for FakeCluster {
    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        _container: &str,
        command: &[String],
    ) -> Result<String, ExecError> {
        self.record(CallRecord::Exec {
            pod: pod.to_owned(),
            argv: command.to_vec(),
        });
        self.run_argv(pod, command)
    }
}

#[async_trait]
impl DeploymentApi for FakeCluster {
    async fn get(&self, _namespace: &str, name: &str) -> Result<DeploymentView, ClusterError> {
        self.state
            .lock()
            .deployments
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::DeploymentNotFound(name.to_owned()))
    }

    async fn patch(
        &self,
        _namespace: &str,
        name: &str,
        patch: &DeploymentPatch,
    ) -> Result<(), ClusterError> {
        self.record(CallRecord::Patch {
            deployment: name.to_owned(),
            patch: patch.clone(),
        });
        let mut state = self.state.lock();
        if !state.deployments.contains_key(name) {
            return Err(ClusterError::DeploymentNotFound(name.to_owned()));
        }
        match patch {
            DeploymentPatch::ContainerCommand { command, args, .. } => {
                let sleeping = command.first().map(String::as_str) == Some("sleep");
                if let Some(view) = state.deployments.get_mut(name) {
                    view.command = command.clone();
                    view.args = args.clone();
                }
                if let Some(mon) = state
                    .mons
                    .values_mut()
                    .find(|mon| mon.identity.deployment == name)
                {
                    mon.sleeping = sleeping;
                    // The rollout replaces the pod, which comes back Running
                    // under whichever entrypoint the spec now carries.
                    mon.running = true;
                }
            }
            DeploymentPatch::LivenessInitialDelay { seconds } => {
                if let Some(view) = state.deployments.get_mut(name) {
                    view.liveness_initial_delay_seconds = *seconds;
                }
            }
            DeploymentPatch::Replicas { replicas } => {
                if let Some(view) = state.deployments.get_mut(name) {
                    view.replicas = *replicas;
                }
            }
        }
        Ok(())
    }

    async fn scale(&self, _namespace: &str, name: &str, replicas: i32) -> Result<(), ClusterError> {
        self.record(CallRecord::Scale {
            deployment: name.to_owned(),
            replicas,
        });
        let mut state = self.state.lock();
        if !state.deployments.contains_key(name) {
            return Err(ClusterError::DeploymentNotFound(name.to_owned()));
        }
        if let Some(view) = state.deployments.get_mut(name) {
            view.replicas = replicas;
        }
        if name == self.reconciler_deployment {
            state.reconciler_running = replicas > 0;
            if replicas > 0 && state.recreate_on_resume {
                // The resumed reconciler rebuilds any member it still wants
                // and that the edited map no longer forbids.
                for mon in state.mons.values_mut() {
                    if mon.wiped {
                        mon.wiped = false;
                        mon.running = true;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceGate for FakeCluster {
    async fn wait(
        &self,
        _namespace: &str,
        condition: &GateCondition,
        timeout: Duration,
    ) -> Result<(), GateError> {
        self.record(CallRecord::Gate {
            condition: condition.clone(),
        });
        if self.condition_holds(condition) {
            Ok(())
        } else {
            // State transitions are synchronous in the fake, so an unmet
            // condition will never become true by waiting.
            Err(GateError::Timeout {
                condition: condition.clone(),
                elapsed: timeout,
            })
        }
    }
}

#[async_trait]
impl LogSource for FakeCluster {
    async fn fetch(&self, _namespace: &str, _label_selector: &str) -> Result<String, ClusterError> {
        self.record(CallRecord::Logs);
        Ok(self.state.lock().log_lines.join("\n"))
    }
}

/// A `RecoveryConfig` with delays and budgets collapsed for fast tests.
pub fn fast_config() -> RecoveryConfig {
    let mut config = RecoveryConfig::default();
    config.injection.settle_delay = Duration::ZERO;
    config.detection.poll_interval = Duration::from_millis(10);
    config.detection.timeout = Duration::from_millis(200);
    config
}
