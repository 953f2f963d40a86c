//! Derives the metadata `fields` map stamped onto a generated source.
//!
//! Mirrors `injectFields` from the upstream controller: the runtime's `Fields` mapping
//! controls which well-known pod attributes are copied in, and a source stanza's
//! `matchFields` additionally copies arbitrary labels, annotations and env vars.
use std::collections::BTreeMap;

use stackable_operator::k8s_openapi::api::core::v1::Pod;

use crate::{config::Config, model::MatchFields};

/// Build the `fields` map for one generated source.
///
/// Injection order is: well-known mapped fields, then label matches, then annotation
/// matches, then env matches — later entries win on key collision, matching the
/// upstream order.
pub fn inject_fields(
    config: &Config,
    match_fields: Option<&MatchFields>,
    pod: &Pod,
    log_config_name: &str,
    container_name: &str,
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mapping = &config.fields;

    if !mapping.namespace.is_empty() {
        fields.insert(
            mapping.namespace.clone(),
            pod.metadata.namespace.clone().unwrap_or_default(),
        );
    }
    if !mapping.node_name.is_empty() {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        fields.insert(mapping.node_name.clone(), node_name);
    }
    if !mapping.pod_name.is_empty() {
        fields.insert(
            mapping.pod_name.clone(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
    }
    if !mapping.container_name.is_empty() {
        fields.insert(mapping.container_name.clone(), container_name.to_string());
    }
    if !mapping.log_config.is_empty() {
        fields.insert(mapping.log_config.clone(), log_config_name.to_string());
    }

    let Some(match_fields) = match_fields else {
        return fields;
    };

    let labels = pod.metadata.labels.clone().unwrap_or_default();
    for key in &match_fields.label_key {
        if let Some(value) = labels.get(key) {
            fields.insert(key.clone(), value.clone());
        }
    }

    let annotations = pod.metadata.annotations.clone().unwrap_or_default();
    for key in &match_fields.annotation_key {
        if let Some(value) = annotations.get(key) {
            fields.insert(key.clone(), value.clone());
        }
    }

    if !match_fields.env.is_empty() {
        let env = container_env(pod, container_name);
        for key in &match_fields.env {
            if let Some(value) = env.get(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
    }

    fields
}

fn container_env(pod: &Pod, container_name: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let Some(spec) = pod.spec.as_ref() else {
        return env;
    };
    let Some(container) = spec.containers.iter().find(|c| c.name == container_name) else {
        return env;
    };
    for var in container.env.as_deref().unwrap_or_default() {
        if let Some(value) = &var.value {
            env.insert(var.name.clone(), value.clone());
        }
    }
    env
}
