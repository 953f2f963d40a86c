//! The shapes produced and consumed between the Source Expander, Field Injector,
//! Path Resolver, Interceptor Rewriter, Pipeline Synthesiser and Index Store.
//!
//! These are the "generated" half of the data model (§3 of the design): the declarative
//! [`crate::crd::LogConfig`] is the input, everything here is derived.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rawconfig::RawConfig;

/// One inline source definition taken from a LogConfig's `pipeline.sources` list.
///
/// Only `name`, `containerName` and `matchFields` are interpreted by the controller;
/// everything else (the source type, collection paths, ...) is carried through opaquely
/// in `extra` and re-encoded verbatim once materialised.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceStanza {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_fields: Option<MatchFields>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "CollectConfig::is_empty")]
    pub collect_config: CollectConfig,
    #[serde(flatten)]
    pub extra: RawConfig,
}

pub const SOURCE_TYPE_FILE: &str = "file";

/// Pod metadata to copy into generated source `fields`, by key family.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// The file-source specific collection settings, nested inside the common source config.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl CollectConfig {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// One interceptor entry from an Interceptor CR's `spec.interceptors` list.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtInterceptorConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belong_to: Vec<String>,
    #[serde(flatten)]
    pub extra: RawConfig,
}

/// A synthesised, validated per-(LogConfig, pod) (or per-LogConfig, for node/agent
/// selectors) pipeline unit, ready to be written into the on-disk aggregate.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFragment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<RawConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<RawConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interceptors: Vec<RawConfig>,
}

impl PipelineFragment {
    /// `"{lgcNamespace}/{lgcName}"`, the fragment's identity in the aggregate file.
    pub fn fragment_name(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }
}

/// The on-disk aggregate shape for one selector type: a flat list of pipeline fragments.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePipelineConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<PipelineFragment>,
}

/// `"{podName}/{containerName}/{origName}"`.
pub fn gen_type_pod_source_name(pod_name: &str, container_name: &str, orig_name: &str) -> String {
    format!("{pod_name}/{container_name}/{orig_name}")
}

/// The origin (user-authored) source name is the suffix after the last `/`.
pub fn origin_source_name(materialised_name: &str) -> &str {
    materialised_name
        .rsplit('/')
        .next()
        .unwrap_or(materialised_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_materialisation() {
        assert_eq!(
            gen_type_pod_source_name("web-1", "c0", "app"),
            "web-1/c0/app"
        );
    }

    #[test]
    fn origin_name_is_last_path_segment() {
        assert_eq!(origin_source_name("web-1/c0/app"), "app");
        assert_eq!(origin_source_name("app"), "app");
    }

    /// A LogConfig's `pipeline.sources` stanza, as a user would author it inline in a
    /// manifest: a handful of known fields plus an arbitrary free-form remainder that
    /// ends up in `extra`.
    #[test]
    fn source_stanza_decodes_from_authored_yaml() {
        let yaml = indoc::indoc! {"
            type: file
            name: app
            containerName: main
            matchFields:
              labelKey:
                - app
              env:
                - REGION
            collectConfig:
              paths:
                - stdout
            codec:
              type: json
        "};
        let stanza: SourceStanza = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(stanza.type_, SOURCE_TYPE_FILE);
        assert_eq!(stanza.name, "app");
        assert_eq!(stanza.container_name.as_deref(), Some("main"));
        assert_eq!(stanza.collect_config.paths, vec!["stdout".to_string()]);
        assert!(stanza.extra.contains_key("codec"));
    }
}
