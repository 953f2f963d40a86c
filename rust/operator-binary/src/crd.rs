//! Custom resources this controller consumes.
//!
//! `LogConfig` is the only resource it owns; `Sink` and `Interceptor` are referenced by
//! name out of a LogConfig's pipeline and are otherwise opaque to this controller — the
//! runtime that actually ships and processes logs is what interprets their bodies.
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector,
    kube::CustomResource,
    schemars::{self, JsonSchema},
    status::condition::ClusterCondition,
};

use crate::{
    model::{SourceStanza, SOURCE_TYPE_FILE},
    rawconfig::RawConfig,
};

pub const GROUP: &str = "loggie.io";
pub const VERSION: &str = "v1beta1";

pub const PATH_STDOUT: &str = "stdout";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema, strum::Display)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Selector {
    /// Materialise one pipeline per matching pod scheduled on the local node.
    #[serde(rename = "pod")]
    #[strum(serialize = "pod")]
    Pod {
        label_selector: LabelSelector,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        cluster: String,
    },
    /// Materialise a single pipeline for the local node, independent of any pod.
    #[serde(rename = "node")]
    #[strum(serialize = "node")]
    Node {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        cluster: String,
    },
    /// Materialise a single pipeline describing the log agent itself.
    #[serde(rename = "loggie")]
    #[strum(serialize = "loggie")]
    Agent {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        cluster: String,
    },
}

impl Selector {
    pub fn cluster(&self) -> &str {
        match self {
            Selector::Pod { cluster, .. } => cluster,
            Selector::Node { cluster, .. } => cluster,
            Selector::Agent { cluster, .. } => cluster,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub sources: Vec<SourceStanza>,
    pub sink_ref: String,
    pub interceptor_ref: String,
}

#[derive(Clone, CustomResource, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "LogConfig",
    plural = "logconfigs",
    shortname = "lgc",
    namespaced,
    status = "LogConfigStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct LogConfigSpec {
    pub selector: Selector,
    pub pipeline: PipelineSpec,
}

#[derive(Clone, Default, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogConfigStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Debug, Snafu)]
pub enum ValidationError {
    #[snafu(display("logConfig selector type pod requires a non-empty labelSelector"))]
    EmptyPodSelector,
    #[snafu(display("logConfig pipeline has no sources"))]
    EmptySources,
    #[snafu(display("logConfig pipeline.sinkRef must not be empty"))]
    EmptySinkRef,
    #[snafu(display("logConfig pipeline.interceptorRef must not be empty"))]
    EmptyInterceptorRef,
    #[snafu(display("source {name} has type {type_}, only type=file is supported for selector.type=pod"))]
    UnsupportedSourceType { name: String, type_: String },
    #[snafu(display("source at index {index} has an empty name"))]
    EmptySourceName { index: usize },
}

impl LogConfig {
    /// Structural well-formedness check, run before a LogConfig is dispatched on.
    ///
    /// This deliberately does not validate the free-form `extra` config blob beyond it
    /// being present — that is the responsibility of the runtime that consumes it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure!(
            !self.spec.pipeline.sink_ref.is_empty(),
            EmptySinkRefSnafu
        );
        ensure!(
            !self.spec.pipeline.interceptor_ref.is_empty(),
            EmptyInterceptorRefSnafu
        );
        ensure!(!self.spec.pipeline.sources.is_empty(), EmptySourcesSnafu);

        for (index, source) in self.spec.pipeline.sources.iter().enumerate() {
            ensure!(!source.name.is_empty(), EmptySourceNameSnafu { index });
        }

        if let Selector::Pod { label_selector, .. } = &self.spec.selector {
            ensure!(
                label_selector.match_labels.is_some() || label_selector.match_expressions.is_some(),
                EmptyPodSelectorSnafu
            );
            for source in &self.spec.pipeline.sources {
                ensure!(
                    source.type_ == SOURCE_TYPE_FILE,
                    UnsupportedSourceTypeSnafu {
                        name: source.name.clone(),
                        type_: source.type_.clone(),
                    }
                );
            }
        }

        Ok(())
    }
}

/// Reference to a log sink by name. The body is opaque: only the consuming runtime
/// (the data-plane sink implementation) needs to understand it.
#[derive(Clone, CustomResource, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "Sink",
    plural = "sinks",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct SinkSpec {
    #[serde(flatten)]
    pub sink: RawConfig,
}

/// A reusable bundle of interceptor entries, referenced by name from a LogConfig.
#[derive(Clone, CustomResource, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "Interceptor",
    plural = "interceptors",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct InterceptorSpec {
    #[serde(default)]
    pub interceptors: Vec<crate::model::ExtInterceptorConfig>,
}
