//! Translates container-visible log paths into node-visible filesystem paths.
//!
//! Grounded in `getPathsInNode`/`helper.PathsInNode` from the upstream discovery
//! controller: `stdout` is a sentinel resolved from the container runtime, anything else
//! is resolved through the pod's volume mounts.
use std::collections::BTreeMap;

use snafu::{ensure, OptionExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::{Container, Pod};

use crate::{
    config::{Config, ContainerRuntime},
    crd::PATH_STDOUT,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("source declares no paths to collect"))]
    EmptyPaths,
    #[snafu(display("container {container_name} not found in pod spec"))]
    ContainerNotFound { container_name: String },
    #[snafu(display("path {path} is empty after resolving against kubelet volumes"))]
    UnresolvedPath { path: String },
}

/// Resolve every path in `container_paths` (as declared in a source stanza) into zero or
/// more node-absolute paths.
pub fn resolve_paths(
    config: &Config,
    pod: &Pod,
    container_name: &str,
    container_id: &str,
    container_paths: &[String],
) -> Result<Vec<String>, Error> {
    ensure!(!container_paths.is_empty(), EmptyPathsSnafu);

    let mut resolved = Vec::new();
    for p in container_paths {
        if p == PATH_STDOUT {
            resolved.extend(resolve_stdout(config, pod, container_name, container_id)?);
            continue;
        }
        resolved.extend(resolve_via_volume_mounts(config, pod, container_name, p)?);
    }
    Ok(resolved)
}

fn resolve_stdout(
    config: &Config,
    pod: &Pod,
    container_name: &str,
    container_id: &str,
) -> Result<Vec<String>, Error> {
    match config.container_runtime {
        ContainerRuntime::Docker => Ok(vec![gen_docker_stdout_log(
            &config.docker_data_root,
            container_id,
        )]),
        ContainerRuntime::Containerd => {
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let uid = pod.metadata.uid.as_deref().unwrap_or_default();
            gen_containerd_stdout_logs(
                &config.pod_log_dir_prefix,
                namespace,
                name,
                uid,
                container_name,
            )
        }
    }
}

fn gen_docker_stdout_log(docker_data_root: &std::path::Path, container_id: &str) -> String {
    docker_data_root
        .join("containers")
        .join(container_id)
        .join(format!("{container_id}-json.log"))
        .to_string_lossy()
        .into_owned()
}

/// Containerd lays out stdout logs as `{prefix}/{ns}_{name}_{uid}/{container}/*.log`. The
/// glob itself is returned unexpanded — expanding it into concrete rotated files is the
/// data-plane tailer's job, not discovery's (§1), and expanding it here would make the
/// emitted path set depend on filesystem state at reconcile time, breaking idempotence.
fn gen_containerd_stdout_logs(
    pod_log_dir_prefix: &std::path::Path,
    namespace: &str,
    name: &str,
    uid: &str,
    container_name: &str,
) -> Result<Vec<String>, Error> {
    let glob = pod_log_dir_prefix
        .join(format!("{namespace}_{name}_{uid}"))
        .join(container_name)
        .join("*.log")
        .to_string_lossy()
        .into_owned();

    Ok(vec![glob])
}

fn resolve_via_volume_mounts(
    config: &Config,
    pod: &Pod,
    container_name: &str,
    in_container_path: &str,
) -> Result<Vec<String>, Error> {
    let uid = pod.metadata.uid.as_deref().unwrap_or_default();
    let container = find_container(pod, container_name).context(ContainerNotFoundSnafu {
        container_name: container_name.to_string(),
    })?;

    let mounts = container.volume_mounts.as_deref().unwrap_or_default();
    let volume_names = volume_host_paths(pod);

    let best_mount = mounts
        .iter()
        .filter(|m| in_container_path.starts_with(m.mount_path.as_str()))
        .max_by_key(|m| m.mount_path.len());

    let Some(mount) = best_mount else {
        return UnresolvedPathSnafu {
            path: in_container_path.to_string(),
        }
        .fail();
    };

    let suffix = in_container_path
        .strip_prefix(mount.mount_path.as_str())
        .unwrap_or_default();

    let volume_subpath = volume_names
        .get(mount.name.as_str())
        .cloned()
        .unwrap_or_else(|| format!("volumes/kubernetes.io~empty-dir/{}", mount.name));

    let resolved = config
        .kubelet_root_dir
        .join("pods")
        .join(uid)
        .join(volume_subpath)
        .join(suffix.trim_start_matches('/'));

    if resolved.as_os_str().is_empty() {
        return UnresolvedPathSnafu {
            path: in_container_path.to_string(),
        }
        .fail();
    }

    Ok(vec![resolved.to_string_lossy().into_owned()])
}

fn find_container<'a>(pod: &'a Pod, container_name: &str) -> Option<&'a Container> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container_name)
}

/// Maps a pod's declared volume name to the host-side path segment the kubelet stores it
/// under (`volumes/{plugin}/{volumeName}`), so a mount can be rewritten to its node path.
fn volume_host_paths(pod: &Pod) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Some(spec) = pod.spec.as_ref() else {
        return map;
    };
    for volume in spec.volumes.as_deref().unwrap_or_default() {
        let plugin = if volume.config_map.is_some() {
            "configmap"
        } else if volume.secret.is_some() {
            "secret"
        } else if volume.persistent_volume_claim.is_some() {
            continue; // PVCs are bind-mounted directly by the CSI plugin, not under pods/
        } else {
            "empty-dir"
        };
        map.insert(
            volume.name.clone(),
            format!("volumes/kubernetes.io~{plugin}/{}", volume.name),
        );
    }
    map
}
