//! ---
//! monq_section: "02-cluster-interfaces"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Cluster model and collaborator interfaces."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use serde_json::{json, Value};

/// Strategy required to apply a [`DeploymentPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    /// Strategic merge patch.
    Merge,
    /// RFC 6902 JSON patch.
    Json,
}

/// Typed patch payloads applied to a deployment during recovery.
///
/// The override/restore pair embeds the literal command and argument lists
/// read from the live deployment, never defaults, so a restore puts back
/// exactly what was there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentPatch {
    /// Replace the first container's entrypoint and arguments.
    ContainerCommand {
        /// Container name inside the pod template.
        container: String,
        /// Full entrypoint to set.
        command: Vec<String>,
        /// Full argument list to set.
        args: Vec<String>,
    },
    /// Replace only the first container's liveness `initialDelaySeconds`.
    LivenessInitialDelay {
        /// New delay in seconds.
        seconds: u32,
    },
    /// Set the desired replica count.
    Replicas {
        /// New replica count.
        replicas: i32,
    },
}

impl DeploymentPatch {
    /// Strategy the payload must be applied with.
    pub fn strategy(&self) -> PatchStrategy {
        match self {
            DeploymentPatch::ContainerCommand { .. } | DeploymentPatch::Replicas { .. } => {
                PatchStrategy::Merge
            }
            DeploymentPatch::LivenessInitialDelay { .. } => PatchStrategy::Json,
        }
    }

    /// Render the wire payload.
    pub fn payload(&self) -> Value {
        match self {
            DeploymentPatch::ContainerCommand {
                container,
                command,
                args,
            } => json!({
                "spec": {
                    "template": {
                        "spec": {
                            "containers": [{
                                "name": container,
                                "command": command,
                                "args": args,
                            }]
                        }
                    }
                }
            }),
            DeploymentPatch::LivenessInitialDelay { seconds } => json!([{
                "op": "replace",
                "path": "/spec/template/spec/containers/0/livenessProbe/initialDelaySeconds",
                "value": seconds,
            }]),
            DeploymentPatch::Replicas { replicas } => json!({
                "spec": { "replicas": replicas }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_patch_embeds_literal_argv() {
        let patch = DeploymentPatch::ContainerCommand {
            container: "mon".into(),
            command: vec!["ceph-mon".into()],
            args: vec!["--foreground".into(), "--id".into(), "a".into()],
        };
        assert_eq!(patch.strategy(), PatchStrategy::Merge);
        let payload = patch.payload();
        let container = &payload["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["name"], "mon");
        assert_eq!(container["command"][0], "ceph-mon");
        assert_eq!(container["args"][2], "a");
    }

    #[test]
    fn probe_patch_is_path_scoped() {
        let patch = DeploymentPatch::LivenessInitialDelay { seconds: 3600 };
        assert_eq!(patch.strategy(), PatchStrategy::Json);
        let payload = patch.payload();
        assert_eq!(payload[0]["op"], "replace");
        assert_eq!(
            payload[0]["path"],
            "/spec/template/spec/containers/0/livenessProbe/initialDelaySeconds"
        );
        assert_eq!(payload[0]["value"], 3600);
    }

    #[test]
    fn replicas_patch_is_minimal() {
        let patch = DeploymentPatch::Replicas { replicas: 0 };
        assert_eq!(patch.payload(), json!({"spec": {"replicas": 0}}));
    }
}
