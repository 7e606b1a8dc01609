//! ---
//! monq_section: "01-shared-runtime"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Shared primitives and utilities for the recovery runtime."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::Registry;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}
