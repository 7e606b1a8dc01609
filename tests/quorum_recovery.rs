//! ---
//! monq_section: "05-testing-qa"
//! monq_subsection: "integration-tests"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "End-to-end quorum loss and recovery scenarios."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use monq_common::new_registry;
use monq_cluster::{GateCondition, MonitorIdentity, PodExec};
use monq_recovery::{
    InjectionReport, QuorumLossDetector, QuorumLossInjector, RecoveryEngine, RecoveryError,
    RecoveryMetrics, RecoveryOrchestrator, RecoveryStep,
};
use monq_testkit::{CallRecord, FakeCluster};

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

/// The canonical three-monitor scenario: crashing two of three is refused,
/// crashing `b` alone is confirmed from logs and repaired, leaving two
/// Running monitors immediately after reinjection and three once the
/// reconciler is back.
#[tokio::test]
async fn three_mon_scenario_loses_b_and_recovers() {
    let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
    let config = monq_testkit::fast_config();
    let mons = cluster.monitor_set();

    let mut injector = QuorumLossInjector::new(
        config.cluster.clone(),
        config.injection.clone(),
        cluster.clone(),
        None,
    );
    let err = injector.inject(&mons, 2).await.unwrap_err();
    assert!(matches!(err, RecoveryError::MajoritySelected { .. }));

    // Crash exactly `b` and build the report the injector would have.
    let started_at = Utc::now();
    cluster
        .exec(
            "rook-ceph",
            "rook-ceph-mon-b",
            "mon",
            &argv(&["rm", "-rf", "/var/lib/ceph/mon/ceph-b"]),
        )
        .await
        .unwrap();
    assert_eq!(cluster.running_mons(), 2);
    let report = InjectionReport {
        crashed: vec![MonitorIdentity::conventional("b")],
        surviving: vec![
            MonitorIdentity::conventional("a"),
            MonitorIdentity::conventional("c"),
        ],
        started_at,
    };

    let detector = QuorumLossDetector::new(
        config.cluster.clone(),
        config.detection.clone(),
        cluster.clone(),
        None,
    );
    let detection = detector.confirm(&report).await.unwrap();
    assert!(detection.event.timestamp >= started_at);

    let engine = RecoveryEngine::new(config, cluster.clone(), cluster.clone(), cluster.clone(), None);
    let target = MonitorIdentity::conventional("a");
    let session = engine.repair_with_target(&report, &target).await.unwrap();

    assert_eq!(session.step(), RecoveryStep::QuorumVerified);
    assert_eq!(cluster.monmap_members(), vec!["a", "c"]);
    assert_eq!(cluster.running_mons(), 3);

    // Two Running monitors were gated before the reconciler came back.
    let journal = cluster.journal();
    let two_running = journal
        .iter()
        .position(|call| {
            matches!(
                call,
                CallRecord::Gate {
                    condition: GateCondition::PodsRunning { count: 2, .. },
                }
            )
        })
        .expect("gate on two surviving monitors");
    let resume = journal
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
        .expect("reconciler scale-up");
    assert!(two_running < resume);
}

#[tokio::test]
async fn orchestrated_run_publishes_metrics() {
    let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
    let registry = new_registry();
    let metrics = RecoveryMetrics::new(registry.clone()).unwrap();
    let mut orchestrator = RecoveryOrchestrator::new(
        monq_testkit::fast_config(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        Some(metrics),
    );

    let mons = cluster.monitor_set();
    let outcome = orchestrator.run(&mons, 1).await.unwrap();
    assert_eq!(outcome.session.step(), RecoveryStep::QuorumVerified);

    let families = registry.gather();
    let wipes = families
        .iter()
        .find(|fam| fam.get_name() == "monq_recovery_store_wipes_total")
        .expect("wipe counter registered");
    let total: f64 = wipes
        .get_metric()
        .iter()
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(total, 1.0);

    let completed = families
        .iter()
        .find(|fam| fam.get_name() == "monq_recovery_recoveries_completed_total")
        .expect("completion counter registered");
    assert_eq!(completed.get_metric()[0].get_counter().get_value(), 1.0);

    let steps = families
        .iter()
        .find(|fam| fam.get_name() == "monq_recovery_steps_total")
        .expect("step counter registered");
    let verified = steps
        .get_metric()
        .iter()
        .find(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_value() == "quorum_verified")
        })
        .expect("quorum_verified transition recorded");
    assert_eq!(verified.get_counter().get_value(), 1.0);
}

/// Repairing the same loss twice is not idempotent: the second pass fails
/// while editing a map that no longer carries the crashed member, and the
/// engine surfaces that instead of swallowing it.
#[tokio::test]
async fn second_repair_pass_is_rejected_loudly() {
    let cluster = Arc::new(FakeCluster::with_mons(&["a", "b", "c"]));
    let mut orchestrator = RecoveryOrchestrator::new(
        monq_testkit::fast_config(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        None,
    );
    let mons = cluster.monitor_set();
    let outcome = orchestrator.run(&mons, 1).await.unwrap();

    let engine = RecoveryEngine::new(
        monq_testkit::fast_config(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        None,
    );
    let err = engine.repair(&outcome.report).await.unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::Step {
            step: RecoveryStep::MapEdited,
            ..
        }
    ));
}
