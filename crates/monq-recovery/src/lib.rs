//! ---
//! monq_section: "03-quorum-recovery"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Quorum failure injection and monmap repair orchestration."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Monitor quorum failure-injection and recovery orchestration.
//!
//! The pipeline is strictly sequential: the injector destroys a minority of
//! monitor stores, the detector confirms quorum loss from the reconciler's
//! logs, and the repair engine rewrites the membership map on a surviving
//! monitor while the reconciler is paused. Every state-changing step is
//! followed by a blocking readiness gate before the next begins.

use std::time::Duration;

use monq_cluster::{ClusterError, ExecError, GateError, MonitorId};

pub mod detector;
pub mod injector;
pub mod lifecycle;
pub mod metrics;
pub mod monmap;
pub mod session;

pub use detector::{DetectionReport, QuorumLossDetector};
pub use injector::{InjectionReport, QuorumLossInjector};
pub use lifecycle::{LifecycleOverride, ReconcilerLifecycleController};
pub use metrics::RecoveryMetrics;
pub use monmap::{MonmapExtract, MonmapInject, MonmapPrint, MonmapRemove, MonmapWorkspace};
pub use session::{
    RecoveryEngine, RecoveryOrchestrator, RecoveryOutcome, RecoverySession, RecoveryStep,
    StepRecord,
};

/// Result alias used throughout the recovery crate.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Error type for the recovery subsystem. Every fatal condition names the
/// point of failure so an operator can resume manually from the retained
/// artifacts.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The monitor set cannot produce a meaningful minority/majority split.
    #[error("monitor set of {0} is too small for a minority/majority split (need at least 3)")]
    MonitorSetTooSmall(usize),
    /// The requested victim count would destroy quorum beyond repair.
    #[error("refusing to crash {requested} of {total} monitors: at most {max} may be lost")]
    MajoritySelected {
        /// Victims requested.
        requested: usize,
        /// Monitor set size.
        total: usize,
        /// Largest tolerable victim count.
        max: usize,
    },
    /// Zero victims were requested.
    #[error("no monitors selected for injection")]
    NothingToInject,
    /// A store wipe failed with a non-tolerated cause.
    #[error("store wipe failed on monitor '{id}'")]
    Injection {
        /// Monitor whose wipe failed.
        id: MonitorId,
        /// Underlying exec failure.
        #[source]
        source: ExecError,
    },
    /// The quorum-failure signature never appeared in the reconciler logs.
    /// Proceeding would destructively edit a healthy membership map, so the
    /// pipeline aborts before any repair step.
    #[error("quorum loss was not confirmed within {waited:?}; aborting before any repair")]
    DetectionNotConfirmed {
        /// Total time spent polling.
        waited: Duration,
    },
    /// The chosen repair target is not part of the surviving majority.
    #[error("repair target '{0}' is not among the surviving monitors")]
    TargetNotSurviving(MonitorId),
    /// The injection report lists no surviving monitor to repair from.
    #[error("no surviving monitor available as a repair target")]
    NoSurvivingTarget,
    /// A replica-count or container-override request failed outright.
    #[error("lifecycle operation failed on deployment '{deployment}'")]
    Lifecycle {
        /// Deployment the operation targeted.
        deployment: String,
        /// Underlying cluster failure.
        #[source]
        source: ClusterError,
    },
    /// A repair step's underlying command failed.
    #[error("recovery step '{step}' failed")]
    Step {
        /// Step that failed.
        step: session::RecoveryStep,
        /// Underlying cluster failure.
        #[source]
        source: ClusterError,
    },
    /// A readiness gate timed out after a state change.
    #[error("readiness gate failed during step '{step}'")]
    Gate {
        /// Step whose gate failed.
        step: session::RecoveryStep,
        /// Underlying gate failure, carrying the unmet condition.
        #[source]
        source: GateError,
    },
}
