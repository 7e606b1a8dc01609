//! ---
//! monq_section: "02-cluster-interfaces"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Cluster model and collaborator interfaces."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::patch::DeploymentPatch;
use crate::{ClusterError, Result};

/// Structured cause attached to an in-pod command failure.
///
/// Call sites decide which kinds they tolerate via an explicit allow-list
/// instead of string-matching error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// The target resource was busy or still in use by the daemon.
    ResourceBusy,
    /// The pod or container does not exist.
    NotFound,
    /// The command ran and exited non-zero.
    CommandFailed,
    /// The exec channel itself failed.
    Transport,
}

impl ExecErrorKind {
    /// Static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecErrorKind::ResourceBusy => "resource_busy",
            ExecErrorKind::NotFound => "not_found",
            ExecErrorKind::CommandFailed => "command_failed",
            ExecErrorKind::Transport => "transport",
        }
    }
}

/// Failure of a command executed inside a pod.
#[derive(Debug, Clone, thiserror::Error)]
#[error("exec in pod '{pod}' failed ({}): {detail}", .kind.as_str())]
pub struct ExecError {
    /// Pod the command ran in.
    pub pod: String,
    /// Structured cause.
    pub kind: ExecErrorKind,
    /// Raw detail reported by the executor.
    pub detail: String,
}

impl ExecError {
    /// Construct an error for the given pod and cause.
    pub fn new(pod: impl Into<String>, kind: ExecErrorKind, detail: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Run a command inside a named pod/container and return its stdout.
#[async_trait]
pub trait PodExec: Send + Sync {
    /// Execute `command` (argv form) in `pod`/`container`.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> std::result::Result<String, ExecError>;
}

/// Subset of a deployment's spec the orchestrator reads and mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentView {
    /// Deployment name.
    pub name: String,
    /// Desired replica count.
    pub replicas: i32,
    /// Entrypoint of the first container.
    pub command: Vec<String>,
    /// Arguments of the first container.
    pub args: Vec<String>,
    /// Liveness probe `initialDelaySeconds` of the first container.
    pub liveness_initial_delay_seconds: u32,
}

/// Read and mutate deployments by name.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Fetch the current view of a deployment.
    async fn get(&self, namespace: &str, name: &str) -> Result<DeploymentView>;

    /// Apply a typed patch to a deployment.
    async fn patch(&self, namespace: &str, name: &str, patch: &DeploymentPatch) -> Result<()>;

    /// Change a deployment's desired replica count.
    async fn scale(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;
}

/// Condition a [`ResourceGate`] blocks on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCondition {
    /// `count` pods matching `label_selector` are Running.
    PodsRunning {
        /// Label selector for the pods.
        label_selector: String,
        /// Required Running count.
        count: usize,
    },
    /// The named deployment reports exactly `replicas` ready replicas.
    DeploymentReplicas {
        /// Deployment name.
        name: String,
        /// Required ready replica count.
        replicas: i32,
    },
    /// No pod matching `label_selector` remains.
    PodsGone {
        /// Label selector for the pods.
        label_selector: String,
    },
}

impl fmt::Display for GateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateCondition::PodsRunning {
                label_selector,
                count,
            } => write!(f, "{count} running pod(s) matching '{label_selector}'"),
            GateCondition::DeploymentReplicas { name, replicas } => {
                write!(f, "deployment '{name}' at {replicas} ready replica(s)")
            }
            GateCondition::PodsGone { label_selector } => {
                write!(f, "no pod matching '{label_selector}'")
            }
        }
    }
}

/// Failure raised by a [`ResourceGate`] wait.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The condition did not hold within the budget.
    #[error("timed out after {elapsed:?} waiting for {condition}")]
    Timeout {
        /// Condition that was being waited on.
        condition: GateCondition,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The condition could not be evaluated at all.
    #[error("gate evaluation failed: {0}")]
    Evaluation(#[from] ClusterError),
}

/// Block until a cluster condition holds, or fail after a timeout.
///
/// Every state-changing step of the recovery pipeline is followed by one of
/// these waits; there is no fire-and-forget mutation anywhere.
#[async_trait]
pub trait ResourceGate: Send + Sync {
    /// Wait for `condition` within `timeout`.
    async fn wait(
        &self,
        namespace: &str,
        condition: &GateCondition,
        timeout: Duration,
    ) -> std::result::Result<(), GateError>;
}

/// Fetch the textual logs of the pod(s) matching a selector.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Return the current log window as raw text.
    async fn fetch(&self, namespace: &str, label_selector: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_carries_structured_cause() {
        let err = ExecError::new("rook-ceph-mon-a", ExecErrorKind::ResourceBusy, "rm: busy");
        assert_eq!(err.kind, ExecErrorKind::ResourceBusy);
        assert!(err.to_string().contains("resource_busy"));
        assert!(err.to_string().contains("rook-ceph-mon-a"));
    }

    #[test]
    fn gate_conditions_render() {
        let condition = GateCondition::PodsRunning {
            label_selector: "app=rook-ceph-mon".into(),
            count: 3,
        };
        assert_eq!(
            condition.to_string(),
            "3 running pod(s) matching 'app=rook-ceph-mon'"
        );
        let condition = GateCondition::DeploymentReplicas {
            name: "rook-ceph-operator".into(),
            replicas: 1,
        };
        assert!(condition.to_string().contains("rook-ceph-operator"));
    }
}
