//! Process-wide runtime configuration for the discovery controller.
//!
//! Unlike the product operators this codebase was forked from, this operator does not
//! deploy workloads from a `ProductConfigManager` spec sheet: it only needs a handful of
//! local-node settings that tell it how to translate container-visible paths into
//! node-visible ones and which metadata fields to stamp onto generated sources.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which container runtime is in use on this node, and therefore how `stdout` is resolved.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Containerd,
}

/// Mapping of well-known metadata keys to the field name they should be stamped under.
///
/// An empty string disables injection of that particular field, mirroring the source
/// project's behaviour of treating a blank mapped key as "do not inject".
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldsConfig {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub log_config: String,
}

/// Runtime configuration, normally loaded from the operator's own config file or CLI flags.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory the aggregate pipeline files are written to.
    pub config_file_path: PathBuf,
    /// Container runtime in use on the local node.
    #[serde(default)]
    pub container_runtime: ContainerRuntime,
    /// Docker's data-root, used to derive the on-disk stdout log path.
    #[serde(default = "default_docker_data_root")]
    pub docker_data_root: PathBuf,
    /// Prefix under which the kubelet lays out per-pod log directories (containerd runtime).
    #[serde(default = "default_pod_log_dir_prefix")]
    pub pod_log_dir_prefix: PathBuf,
    /// Root directory the kubelet uses for per-pod volumes.
    #[serde(default = "default_kubelet_root_dir")]
    pub kubelet_root_dir: PathBuf,
    /// Metadata field name mapping.
    #[serde(default)]
    pub fields: FieldsConfig,
    /// Local cluster identity. LogConfigs naming a different cluster are skipped.
    #[serde(default)]
    pub cluster: String,
}

fn default_docker_data_root() -> PathBuf {
    PathBuf::from("/var/lib/docker")
}

fn default_pod_log_dir_prefix() -> PathBuf {
    PathBuf::from("/var/log/pods")
}

fn default_kubelet_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/kubelet")
}

impl Config {
    /// Whether a LogConfig naming `cluster` belongs to the cluster this instance serves.
    ///
    /// An unset/empty `cluster` on the LogConfig means "any cluster".
    pub fn belongs_to_cluster(&self, cluster: &str) -> bool {
        cluster.is_empty() || self.cluster.is_empty() || cluster == self.cluster
    }
}
