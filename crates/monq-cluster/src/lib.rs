//! ---
//! monq_section: "02-cluster-interfaces"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Cluster model and collaborator interfaces."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Monitor cluster data model and the collaborator interfaces through which
//! the recovery orchestrator touches Kubernetes. The actual CRUD plumbing
//! lives outside this workspace; only the seams are defined here.

/// Result alias used throughout the cluster crate.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Error type for cluster-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A named deployment does not exist in the namespace.
    #[error("deployment '{0}' not found")]
    DeploymentNotFound(String),
    /// No pod matched the given selector.
    #[error("no pod matched selector '{0}'")]
    PodNotFound(String),
    /// The API server rejected a patch or scale request.
    #[error("patch rejected for '{name}': {reason}")]
    PatchRejected {
        /// Deployment the patch targeted.
        name: String,
        /// Rejection detail reported by the API server.
        reason: String,
    },
    /// An in-pod command failed.
    #[error(transparent)]
    Exec(#[from] ports::ExecError),
    /// The API server could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

pub mod model;
pub mod patch;
pub mod ports;

pub use model::{
    DeploymentReplicaState, LogEvent, MonStoreLayout, MonitorId, MonitorIdentity, MonitorSet,
    QuorumHealth,
};
pub use patch::DeploymentPatch;
pub use ports::{
    DeploymentApi, DeploymentView, ExecError, ExecErrorKind, GateCondition, GateError, LogSource,
    PodExec, ResourceGate,
};
