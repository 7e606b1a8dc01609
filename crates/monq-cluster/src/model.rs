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
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use monq_common::parse_log_timestamp;

/// Stable daemon identifier of a monitor (e.g. `a`, `b`, `c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(String);

impl MonitorId {
    /// Wrap a daemon id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MonitorId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// One monitor daemon and its Kubernetes backing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorIdentity {
    /// Stable daemon id.
    pub id: MonitorId,
    /// Name of the backing pod.
    pub pod: String,
    /// Name of the deployment owning the pod.
    pub deployment: String,
    /// Node the pod is bound to, when known.
    pub node: Option<String>,
}

impl MonitorIdentity {
    /// Construct an identity from its daemon id; pod and deployment names
    /// follow the `rook-ceph-mon-<id>` convention used by the reconciler.
    pub fn conventional(id: impl Into<MonitorId>) -> Self {
        let id = id.into();
        let deployment = format!("rook-ceph-mon-{id}");
        Self {
            pod: deployment.clone(),
            deployment,
            node: None,
            id,
        }
    }
}

/// Ordered set of monitor daemons forming the consensus group.
///
/// A strict majority of members must be reachable and agree on the current
/// membership map for the group to serve quorum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSet {
    mons: IndexMap<MonitorId, MonitorIdentity>,
}

impl MonitorSet {
    /// Build a set from identities, keyed and ordered by daemon id insertion.
    pub fn new(identities: impl IntoIterator<Item = MonitorIdentity>) -> Self {
        let mons = identities
            .into_iter()
            .map(|identity| (identity.id.clone(), identity))
            .collect();
        Self { mons }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.mons.len()
    }

    /// True when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.mons.is_empty()
    }

    /// Smallest member count that still constitutes a majority.
    pub fn majority(&self) -> usize {
        self.mons.len() / 2 + 1
    }

    /// Largest member count whose loss still leaves a majority standing.
    pub fn max_crashable(&self) -> usize {
        self.mons.len() - self.majority()
    }

    /// Look up a member by daemon id.
    pub fn get(&self, id: &MonitorId) -> Option<&MonitorIdentity> {
        self.mons.get(id)
    }

    /// True when the daemon id is a member.
    pub fn contains(&self, id: &MonitorId) -> bool {
        self.mons.contains_key(id)
    }

    /// Iterate members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MonitorIdentity> {
        self.mons.values()
    }

    /// Daemon ids in insertion order.
    pub fn ids(&self) -> Vec<MonitorId> {
        self.mons.keys().cloned().collect()
    }

    /// Partition the set into (crashed, surviving) by the given victim ids.
    /// Ids not present in the set are ignored.
    pub fn split(&self, victims: &[MonitorId]) -> (Vec<MonitorIdentity>, Vec<MonitorIdentity>) {
        let mut crashed = Vec::new();
        let mut surviving = Vec::new();
        for identity in self.mons.values() {
            if victims.contains(&identity.id) {
                crashed.push(identity.clone());
            } else {
                surviving.push(identity.clone());
            }
        }
        (crashed, surviving)
    }
}

impl FromIterator<MonitorIdentity> for MonitorSet {
    fn from_iter<I: IntoIterator<Item = MonitorIdentity>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Structural health of the consensus group derived from running members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumHealth {
    /// Every expected member is running.
    Full,
    /// A majority is running but membership is incomplete.
    Degraded,
    /// Fewer than a majority of members are running.
    Lost,
}

impl QuorumHealth {
    /// Classify the group from running/expected member counts.
    pub fn classify(running: usize, expected: usize) -> Self {
        let majority = expected / 2 + 1;
        if running >= expected {
            QuorumHealth::Full
        } else if running >= majority {
            QuorumHealth::Degraded
        } else {
            QuorumHealth::Lost
        }
    }

    /// Represent the health as a static label for metrics and status payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuorumHealth::Full => "full",
            QuorumHealth::Degraded => "degraded",
            QuorumHealth::Lost => "lost",
        }
    }
}

impl fmt::Display for QuorumHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconciler log line with its embedded timestamp.
///
/// Events are ordered by the embedded stamp, never by arrival order: log
/// windows are re-fetched and may overlap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogEvent {
    /// Timestamp extracted from the line itself.
    pub timestamp: DateTime<Utc>,
    /// The raw line.
    pub line: String,
}

impl LogEvent {
    /// Parse a raw line, returning `None` when no timestamp is embedded.
    pub fn parse(line: &str) -> Option<Self> {
        parse_log_timestamp(line).map(|timestamp| Self {
            timestamp,
            line: line.to_owned(),
        })
    }
}

/// Replica count recorded for a deployment before a lifecycle change, so the
/// exact original can be restored rather than a hardcoded default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReplicaState {
    /// Deployment name.
    pub deployment: String,
    /// Replica count observed at capture time.
    pub replicas: i32,
}

/// Layout of the monitor data stores inside monitor pods.
#[derive(Debug, Clone)]
pub struct MonStoreLayout {
    /// Logical cluster name used by the daemons.
    pub cluster_name: String,
    /// Root of the monitor data directories.
    pub data_root: PathBuf,
}

impl MonStoreLayout {
    /// Construct a layout.
    pub fn new(cluster_name: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            data_root: data_root.into(),
        }
    }

    /// On-disk store directory for a daemon, e.g. `/var/lib/ceph/mon/ceph-a`.
    pub fn store_path(&self, id: &MonitorId) -> PathBuf {
        self.data_root
            .join("mon")
            .join(format!("{}-{}", self.cluster_name, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(ids: &[&str]) -> MonitorSet {
        ids.iter()
            .map(|id| MonitorIdentity::conventional(*id))
            .collect()
    }

    #[test]
    fn majority_math() {
        assert_eq!(set_of(&["a", "b", "c"]).majority(), 2);
        assert_eq!(set_of(&["a", "b", "c"]).max_crashable(), 1);
        assert_eq!(set_of(&["a", "b", "c", "d", "e"]).majority(), 3);
        assert_eq!(set_of(&["a", "b", "c", "d", "e"]).max_crashable(), 2);
    }

    #[test]
    fn split_partitions_members() {
        let set = set_of(&["a", "b", "c"]);
        let (crashed, surviving) = set.split(&[MonitorId::from("b")]);
        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].id.as_str(), "b");
        let ids: Vec<_> = surviving.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn quorum_health_classification() {
        assert_eq!(QuorumHealth::classify(3, 3), QuorumHealth::Full);
        assert_eq!(QuorumHealth::classify(2, 3), QuorumHealth::Degraded);
        assert_eq!(QuorumHealth::classify(1, 3), QuorumHealth::Lost);
        assert_eq!(QuorumHealth::classify(0, 3), QuorumHealth::Lost);
    }

    #[test]
    fn log_events_order_by_embedded_stamp() {
        let newer = LogEvent::parse("2026-08-05 09:00:00.000000 E | op-mon: failed").unwrap();
        let older = LogEvent::parse("2026-08-05 08:00:00.000000 I | op-mon: ok").unwrap();
        assert!(older < newer);
        assert!(LogEvent::parse("no stamp").is_none());
    }

    #[test]
    fn store_path_follows_cluster_name() {
        let layout = MonStoreLayout::new("ceph", "/var/lib/ceph");
        assert_eq!(
            layout.store_path(&MonitorId::from("a")),
            PathBuf::from("/var/lib/ceph/mon/ceph-a")
        );
    }

    #[test]
    fn conventional_identity_names() {
        let identity = MonitorIdentity::conventional("b");
        assert_eq!(identity.deployment, "rook-ceph-mon-b");
        assert_eq!(identity.pod, "rook-ceph-mon-b");
    }
}
