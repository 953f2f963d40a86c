//! Expands one LogConfig source stanza into per-container source entries.
//!
//! Grounded in `getConfigPerSource`/`updateSources` from the upstream controller: each
//! pod container status is walked in order, the container filter (if any) is applied, and
//! a materialised clone of the stanza survives per matching container.
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::Pod;

use crate::{
    config::Config,
    field_injector,
    model::{gen_type_pod_source_name, SourceStanza, SOURCE_TYPE_FILE},
    path_resolver::{self, resolve_paths},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("only source type=file is supported when selector.type=pod, got {type_}"))]
    UnsupportedSourceType { type_: String },
    #[snafu(display("failed to parse containerID {container_id}: expected \"runtime://id\""))]
    MalformedContainerId { container_id: String },
    #[snafu(display("failed to resolve paths for container {container_name}"))]
    ResolvePaths {
        source: path_resolver::Error,
        container_name: String,
    },
}

/// One materialised source, ready to be packed into a pipeline fragment.
pub type FileSource = SourceStanza;

/// Expand a single stanza against every container status on `pod`, in the pod's observed
/// container order.
pub fn expand_source(
    config: &Config,
    stanza: &SourceStanza,
    pod: &Pod,
    log_config_name: &str,
) -> Result<Vec<FileSource>, Error> {
    ensure!(
        stanza.type_ == SOURCE_TYPE_FILE,
        UnsupportedSourceTypeSnafu {
            type_: stanza.type_.clone(),
        }
    );

    let Some(status) = pod.status.as_ref() else {
        return Ok(Vec::new());
    };

    let mut expanded = Vec::new();
    for container_status in status.container_statuses.as_deref().unwrap_or_default() {
        let container_id = parse_container_id(&container_status.container_id)?;

        if let Some(filter) = &stanza.container_name {
            if filter != &container_status.name {
                continue;
            }
        }

        let mut source = stanza.clone();
        source.name = gen_type_pod_source_name(
            pod.metadata.name.as_deref().unwrap_or_default(),
            &container_status.name,
            &stanza.name,
        );
        source.container_name = None;

        source.fields = field_injector::inject_fields(
            config,
            stanza.match_fields.as_ref(),
            pod,
            log_config_name,
            &container_status.name,
        );

        source.collect_config.paths = resolve_paths(
            config,
            pod,
            &container_status.name,
            &container_id,
            &stanza.collect_config.paths,
        )
        .context(ResolvePathsSnafu {
            container_name: container_status.name.clone(),
        })?;

        expanded.push(source);
    }

    Ok(expanded)
}

/// Expand every stanza in `stanzas`, preserving stanza order and, within each stanza,
/// the pod's container order.
pub fn expand_sources(
    config: &Config,
    stanzas: &[SourceStanza],
    pod: &Pod,
    log_config_name: &str,
) -> Result<Vec<FileSource>, Error> {
    let mut sources = Vec::new();
    for stanza in stanzas {
        sources.extend(expand_source(config, stanza, pod, log_config_name)?);
    }
    Ok(sources)
}

fn parse_container_id(container_id: &Option<String>) -> Result<String, Error> {
    let raw = container_id.as_deref().unwrap_or_default();
    raw.split_once("://")
        .map(|(_, id)| id.to_string())
        .context(MalformedContainerIdSnafu {
            container_id: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerRuntime, FieldsConfig};
    use crate::model::CollectConfig;
    use stackable_operator::k8s_openapi::api::core::v1::{
        ContainerStatus, Pod, PodSpec, PodStatus,
    };
    use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config() -> Config {
        Config {
            config_file_path: "/etc/loggie/conf".into(),
            container_runtime: ContainerRuntime::Containerd,
            docker_data_root: "/var/lib/docker".into(),
            pod_log_dir_prefix: "/var/log/pods".into(),
            kubelet_root_dir: "/var/lib/kubelet".into(),
            fields: FieldsConfig {
                namespace: String::new(),
                node_name: String::new(),
                pod_name: "pod".to_string(),
                container_name: "container".to_string(),
                log_config: String::new(),
            },
            cluster: String::new(),
        }
    }

    fn stanza(name: &str, container_name: Option<&str>) -> SourceStanza {
        SourceStanza {
            type_: SOURCE_TYPE_FILE.to_string(),
            name: name.to_string(),
            container_name: container_name.map(str::to_string),
            match_fields: None,
            fields: BTreeMap::new(),
            collect_config: CollectConfig {
                paths: vec!["stdout".to_string()],
            },
            extra: Default::default(),
        }
    }

    fn pod_with_containers(names: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-1".to_string()),
                namespace: Some("ns1".to_string()),
                uid: Some("u1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            status: Some(PodStatus {
                container_statuses: Some(
                    names
                        .iter()
                        .map(|n| ContainerStatus {
                            name: n.to_string(),
                            container_id: Some(format!("containerd://{n}-id")),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn one_source_per_container() {
        let pod = pod_with_containers(&["c0", "sidecar"]);
        let sources = expand_source(&config(), &stanza("app", None), &pod, "lg1").unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "web-1/c0/app");
        assert_eq!(sources[1].name, "web-1/sidecar/app");
    }

    #[test]
    fn container_filter_selects_one_container() {
        let pod = pod_with_containers(&["c0", "sidecar"]);
        let sources =
            expand_source(&config(), &stanza("app", Some("sidecar")), &pod, "lg1").unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "web-1/sidecar/app");
    }

    #[test]
    fn rejects_non_file_source_type() {
        let pod = pod_with_containers(&["c0"]);
        let mut s = stanza("app", None);
        s.type_ = "stdin".to_string();
        assert!(matches!(
            expand_source(&config(), &s, &pod, "lg1"),
            Err(Error::UnsupportedSourceType { .. })
        ));
    }

    #[test]
    fn malformed_container_id_is_rejected() {
        let mut pod = pod_with_containers(&["c0"]);
        pod.status.as_mut().unwrap().container_statuses.as_mut().unwrap()[0].container_id =
            Some("not-a-valid-id".to_string());
        assert!(matches!(
            expand_source(&config(), &stanza("app", None), &pod, "lg1"),
            Err(Error::MalformedContainerId { .. })
        ));
    }

    #[test]
    fn malformed_container_id_fails_even_when_filtered_out_by_container_name() {
        let mut pod = pod_with_containers(&["c0", "sidecar"]);
        pod.status.as_mut().unwrap().container_statuses.as_mut().unwrap()[0].container_id =
            Some("not-a-valid-id".to_string());
        assert!(matches!(
            expand_source(&config(), &stanza("app", Some("sidecar")), &pod, "lg1"),
            Err(Error::MalformedContainerId { .. })
        ));
    }

    #[test]
    fn no_container_statuses_yields_no_sources() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            status: None,
        };
        let sources = expand_source(&config(), &stanza("app", None), &pod, "lg1").unwrap();
        assert!(sources.is_empty());
    }
}
