//! ---
//! monq_section: "03-quorum-recovery"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Quorum failure injection and monmap repair orchestration."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use monq_common::SharedRegistry;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

use crate::session::RecoveryStep;

/// Metrics published by the recovery subsystem.
#[derive(Clone)]
pub struct RecoveryMetrics {
    registry: SharedRegistry,
    store_wipes_total: IntCounterVec,
    detection_latency_seconds: Histogram,
    steps_total: IntCounterVec,
    step_failures_total: IntCounterVec,
    recoveries_completed_total: IntCounter,
}

impl RecoveryMetrics {
    /// Register the recovery metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let store_wipes_total = IntCounterVec::new(
            Opts::new(
                "monq_recovery_store_wipes_total",
                "Monitor store directories destroyed by the injector",
            ),
            &["daemon_id"],
        )?;
        registry.register(Box::new(store_wipes_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "monq_recovery_detection_latency_seconds",
            "Observed delay between injection and the quorum-failure log signature",
        )
        .buckets(prometheus::exponential_buckets(1.0, 2.0, 10)?);
        let detection_latency_seconds = Histogram::with_opts(histogram_opts)?;
        registry.register(Box::new(detection_latency_seconds.clone()))?;

        let steps_total = IntCounterVec::new(
            Opts::new(
                "monq_recovery_steps_total",
                "Repair pipeline step transitions",
            ),
            &["step"],
        )?;
        registry.register(Box::new(steps_total.clone()))?;

        let step_failures_total = IntCounterVec::new(
            Opts::new(
                "monq_recovery_step_failures_total",
                "Repair pipeline steps that aborted the session",
            ),
            &["step"],
        )?;
        registry.register(Box::new(step_failures_total.clone()))?;

        let recoveries_completed_total = IntCounter::new(
            "monq_recovery_recoveries_completed_total",
            "Recovery sessions that reached quorum verification",
        )?;
        registry.register(Box::new(recoveries_completed_total.clone()))?;

        Ok(Self {
            registry,
            store_wipes_total,
            detection_latency_seconds,
            steps_total,
            step_failures_total,
            recoveries_completed_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count one destroyed monitor store.
    pub fn record_wipe(&self, daemon_id: &str) {
        self.store_wipes_total.with_label_values(&[daemon_id]).inc();
    }

    /// Record the injection-to-signature latency.
    pub fn observe_detection(&self, latency: Duration) {
        self.detection_latency_seconds
            .observe(latency.as_secs_f64());
    }

    /// Count a step transition.
    pub fn record_step(&self, step: RecoveryStep) {
        self.steps_total.with_label_values(&[step.as_str()]).inc();
    }

    /// Count a fatal step failure.
    pub fn record_step_failure(&self, step: RecoveryStep) {
        self.step_failures_total
            .with_label_values(&[step.as_str()])
            .inc();
    }

    /// Count a fully verified recovery.
    pub fn record_completed(&self) {
        self.recoveries_completed_total.inc();
    }
}

impl std::fmt::Debug for RecoveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryMetrics").finish_non_exhaustive()
    }
}
