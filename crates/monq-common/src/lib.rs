//! ---
//! monq_section: "01-shared-runtime"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Shared primitives and utilities for the recovery runtime."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
//! Core shared primitives for the MONQ recovery workspace.
//! This crate exposes configuration loading, logging, metrics registry,
//! and log-timestamp utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    ClusterConfig, DetectionConfig, InjectionConfig, LifecycleConfig, LoggingConfig, MonmapConfig,
    RecoveryConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{new_registry, SharedRegistry};
pub use time::parse_log_timestamp;
