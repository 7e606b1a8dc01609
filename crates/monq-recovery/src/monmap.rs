//! ---
//! monq_section: "03-quorum-recovery"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Quorum failure injection and monmap repair orchestration."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use std::path::PathBuf;

use monq_common::config::MonmapConfig;
use monq_cluster::MonitorId;

/// Working file locations for one repair, inside the target pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonmapWorkspace {
    /// Directory holding both files.
    pub workdir: PathBuf,
    /// Freshly extracted membership map.
    pub extracted: PathBuf,
    /// Pre-edit copy; all edits and the reinjection run against this file so
    /// a failed edit never destroys the only map still describing a quorum.
    pub backup: PathBuf,
}

impl MonmapWorkspace {
    /// Derive the workspace from configuration.
    pub fn from_config(config: &MonmapConfig) -> Self {
        Self {
            workdir: config.workdir.clone(),
            extracted: config.extracted_path(),
            backup: config.backup_path(),
        }
    }
}

/// Extract the current membership map to a file.
#[derive(Debug, Clone)]
pub struct MonmapExtract {
    /// Daemon argv carried by the container spec, reused verbatim so store
    /// paths, cluster name, and daemon id match exactly what the daemon
    /// itself would have used.
    pub base: Vec<String>,
    /// Destination file.
    pub destination: PathBuf,
}

impl MonmapExtract {
    /// Render the argv.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.base.clone();
        argv.push("--extract-monmap".to_owned());
        argv.push(self.destination.display().to_string());
        argv
    }
}

/// Inject an edited membership map from a file.
#[derive(Debug, Clone)]
pub struct MonmapInject {
    /// Daemon argv carried by the container spec, matching the extraction.
    pub base: Vec<String>,
    /// Source file, the edited backup copy.
    pub source: PathBuf,
}

impl MonmapInject {
    /// Render the argv.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.base.clone();
        argv.push("--inject-monmap".to_owned());
        argv.push(self.source.display().to_string());
        argv
    }
}

/// Remove one member from a map file in place.
#[derive(Debug, Clone)]
pub struct MonmapRemove {
    /// Map file to mutate.
    pub map: PathBuf,
    /// Daemon id to remove.
    pub id: MonitorId,
}

impl MonmapRemove {
    /// Render the argv.
    pub fn argv(&self) -> Vec<String> {
        vec![
            "monmaptool".to_owned(),
            self.map.display().to_string(),
            "--rm".to_owned(),
            self.id.to_string(),
        ]
    }
}

/// Decode and print a map file for auditability.
#[derive(Debug, Clone)]
pub struct MonmapPrint {
    /// Map file to decode.
    pub map: PathBuf,
}

impl MonmapPrint {
    /// Render the argv.
    pub fn argv(&self) -> Vec<String> {
        vec![
            "monmaptool".to_owned(),
            self.map.display().to_string(),
            "--print".to_owned(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon_argv() -> Vec<String> {
        [
            "ceph-mon",
            "--foreground",
            "--id",
            "a",
            "--mon-data",
            "/var/lib/ceph/mon/ceph-a",
        ]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect()
    }

    #[test]
    fn extract_appends_destination_flag() {
        let extract = MonmapExtract {
            base: daemon_argv(),
            destination: PathBuf::from("/tmp/monq/monmap"),
        };
        let argv = extract.argv();
        assert_eq!(argv[0], "ceph-mon");
        assert_eq!(argv[argv.len() - 2], "--extract-monmap");
        assert_eq!(argv[argv.len() - 1], "/tmp/monq/monmap");
        // The daemon's own storage arguments ride along unchanged.
        assert!(argv.contains(&"--mon-data".to_owned()));
    }

    #[test]
    fn inject_mirrors_extract_with_source_flag() {
        let base = daemon_argv();
        let inject = MonmapInject {
            base: base.clone(),
            source: PathBuf::from("/tmp/monq/monmap.bak"),
        };
        let argv = inject.argv();
        assert_eq!(&argv[..base.len()], &base[..]);
        assert_eq!(argv[argv.len() - 2], "--inject-monmap");
        assert_eq!(argv[argv.len() - 1], "/tmp/monq/monmap.bak");
    }

    #[test]
    fn remove_targets_the_backup_copy() {
        let remove = MonmapRemove {
            map: PathBuf::from("/tmp/monq/monmap.bak"),
            id: MonitorId::from("b"),
        };
        assert_eq!(
            remove.argv(),
            vec!["monmaptool", "/tmp/monq/monmap.bak", "--rm", "b"]
        );
    }

    #[test]
    fn print_is_read_only() {
        let print = MonmapPrint {
            map: PathBuf::from("/tmp/monq/monmap"),
        };
        assert_eq!(print.argv(), vec!["monmaptool", "/tmp/monq/monmap", "--print"]);
    }

    #[test]
    fn workspace_paths_derive_from_config() {
        let workspace = MonmapWorkspace::from_config(&MonmapConfig::default());
        assert_eq!(workspace.extracted, PathBuf::from("/tmp/monq/monmap"));
        assert_eq!(workspace.backup, PathBuf::from("/tmp/monq/monmap.bak"));
    }
}
