//! Reconciliation entry points for `LogConfig`, `Pod` and `Node`.
//!
//! Three independent controllers drive these (see `main.rs`); each resolves current
//! cluster state through the [`crate::listers::ResourceCache`] capability interfaces on
//! [`Ctx`], synthesises pipeline fragments, updates the shared [`IndexStore`], and emits
//! the aggregate file for whichever selector type changed.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use snafu::{ResultExt, Snafu};
use stackable_operator::k8s_openapi::{
    api::core::v1::{Node, Pod},
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use stackable_operator::kube::runtime::controller::Action;
use stackable_operator::logging::controller::ReconcilerError;
use strum::EnumDiscriminants;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    config::Config,
    crd::{Interceptor, LogConfig, Selector, Sink, ValidationError},
    events::{self, EventPublisher},
    file_emitter,
    index::IndexStore,
    listers::{meta_namespace_key, ResourceCache},
    synthesiser::{self, synthesise_for_node_or_agent, synthesise_for_pod},
};

pub const LOG_CONFIG_CONTROLLER_NAME: &str = "logconfig";

/// Everything the three reconcilers share. The resource caches are read-only capability
/// interfaces (see [`crate::listers`]) so unit tests can swap in [`crate::listers::FakeCache`].
pub struct Ctx {
    pub config: Config,
    pub local_node_name: String,
    pub log_configs: Arc<dyn ResourceCache<LogConfig> + Send + Sync>,
    pub pods: Arc<dyn ResourceCache<Pod> + Send + Sync>,
    pub nodes: Arc<dyn ResourceCache<Node> + Send + Sync>,
    pub sinks: Arc<dyn ResourceCache<Sink> + Send + Sync>,
    pub interceptors: Arc<dyn ResourceCache<Interceptor> + Send + Sync>,
    pub index: Mutex<IndexStore>,
    pub node_labels: Mutex<BTreeMap<String, String>>,
    pub events: Arc<dyn EventPublisher>,
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("logConfig {key} failed validation"))]
    InvalidLogConfig {
        source: ValidationError,
        key: String,
    },
    #[snafu(display("selector type {selector_type} is not supported"))]
    UnsupportedSelectorType { selector_type: String },
    #[snafu(display("failed to synthesise pipeline for pod {pod_key}"))]
    Synthesise {
        source: synthesiser::Error,
        pod_key: String,
    },
    #[snafu(display("failed to insert pipeline fragment into the index"))]
    IndexInsert { source: crate::index::Error },
    #[snafu(display("failed to write aggregate pipeline file"))]
    EmitFile { source: file_emitter::Error },
    #[snafu(display("{message}"))]
    PodFanOut { message: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub fn error_policy_log_config(_obj: Arc<LogConfig>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(Duration::from_secs(10))
}

pub fn error_policy_pod(_obj: Arc<Pod>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(Duration::from_secs(10))
}

pub fn error_policy_node(_obj: Arc<Node>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// `reconcileLogConfig`: dispatch on selector type, fanning a `Pod`-selector LogConfig out
/// to every matching pod scheduled on this node.
pub async fn reconcile_log_config(log_config: Arc<LogConfig>, ctx: Arc<Ctx>) -> Result<Action> {
    let namespace = log_config.metadata.namespace.as_deref().unwrap_or_default();
    let name = log_config.metadata.name.as_deref().unwrap_or_default();
    let key = meta_namespace_key(namespace, name);

    let Some(log_config) = ctx.log_configs.get(namespace, name) else {
        reconcile_log_config_delete(&key, &ctx).await?;
        return Ok(Action::await_change());
    };

    log_config
        .validate()
        .context(InvalidLogConfigSnafu { key: key.clone() })?;

    if !ctx.config.belongs_to_cluster(log_config.spec.selector.cluster()) {
        return Ok(Action::await_change());
    }

    match &log_config.spec.selector {
        Selector::Pod { label_selector, .. } => {
            reconcile_pod_selector_log_config(&log_config, label_selector, &ctx).await?
        }
        Selector::Node { .. } => reconcile_node_or_agent(&log_config, SelectorKind::Node, &ctx).await?,
        Selector::Agent { .. } => {
            reconcile_node_or_agent(&log_config, SelectorKind::Agent, &ctx).await?
        }
    }

    Ok(Action::await_change())
}

enum SelectorKind {
    Node,
    Agent,
}

async fn reconcile_pod_selector_log_config(
    log_config: &LogConfig,
    label_selector: &LabelSelector,
    ctx: &Ctx,
) -> Result<()> {
    let matching_pods: Vec<_> = ctx
        .pods
        .list()
        .into_iter()
        .filter(|pod| pod_scheduled_on_node(pod, &ctx.local_node_name))
        .filter(|pod| label_selector_matches(label_selector, pod_labels(pod)))
        .collect();

    let mut synced_pod_names = Vec::new();
    let mut failed_pod_name = None;
    let mut outcome: std::result::Result<(), String> = Ok(());

    for pod in &matching_pods {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        match handle_log_config_per_pod(log_config, pod, ctx).await {
            Ok(()) => synced_pod_names.push(pod_name),
            Err(err) => {
                outcome = Err(format!("pod {pod_name}: {err}"));
                failed_pod_name = Some(pod_name);
                break;
            }
        }
    }

    let event_keys = match &failed_pod_name {
        Some(pod_name) => std::slice::from_ref(pod_name),
        None => synced_pod_names.as_slice(),
    };
    events::emit_sync_result(ctx.events.as_ref(), log_config, "pod", event_keys, &outcome).await;

    outcome.map_err(|message| Error::PodFanOut { message })
}

/// `handleLogConfigPerPod`: synthesise, compare to the indexed fragment, set + emit only
/// on change.
async fn handle_log_config_per_pod(log_config: &LogConfig, pod: &Pod, ctx: &Ctx) -> Result<()> {
    let namespace = log_config.metadata.namespace.as_deref().unwrap_or_default();
    let name = log_config.metadata.name.as_deref().unwrap_or_default();
    let lgc_key = meta_namespace_key(namespace, name);
    let pod_key = meta_namespace_key(
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    );

    let Some(fragment) = synthesise_for_pod(
        &ctx.config,
        log_config,
        pod,
        ctx.sinks.as_ref(),
        ctx.interceptors.as_ref(),
    )
    .context(SynthesiseSnafu {
        pod_key: pod_key.clone(),
    })?
    else {
        return Ok(());
    };

    let mut index = ctx.index.lock().await;
    if index.pod.get(&lgc_key, &pod_key) == Some(&fragment) {
        return Ok(());
    }
    index
        .pod
        .validate_and_set(&lgc_key, &pod_key, fragment)
        .context(IndexInsertSnafu)?;
    let aggregate = index.pod.get_all_grouped_by_log_config();
    drop(index);

    file_emitter::emit(
        &ctx.config.config_file_path,
        &Selector::Pod {
            label_selector: LabelSelector::default(),
            cluster: String::new(),
        },
        &aggregate,
    )
    .context(EmitFileSnafu)?;

    Ok(())
}

async fn reconcile_node_or_agent(log_config: &LogConfig, kind: SelectorKind, ctx: &Ctx) -> Result<()> {
    let namespace = log_config.metadata.namespace.as_deref().unwrap_or_default();
    let name = log_config.metadata.name.as_deref().unwrap_or_default();
    let lgc_key = meta_namespace_key(namespace, name);

    let fragment = synthesise_for_node_or_agent(log_config, ctx.sinks.as_ref(), ctx.interceptors.as_ref())
        .context(SynthesiseSnafu {
            pod_key: lgc_key.clone(),
        })?;

    let mut index = ctx.index.lock().await;
    let (unchanged, aggregate, selector) = match kind {
        SelectorKind::Node => {
            let unchanged = index.node.get(&lgc_key) == Some(&fragment);
            if !unchanged {
                index
                    .node
                    .validate_and_set(&lgc_key, fragment)
                    .context(IndexInsertSnafu)?;
            }
            (
                unchanged,
                index.node.get_all(),
                Selector::Node {
                    cluster: String::new(),
                },
            )
        }
        SelectorKind::Agent => {
            let unchanged = index.agent.get(&lgc_key) == Some(&fragment);
            if !unchanged {
                index
                    .agent
                    .validate_and_set(&lgc_key, fragment)
                    .context(IndexInsertSnafu)?;
            }
            (
                unchanged,
                index.agent.get_all(),
                Selector::Agent {
                    cluster: String::new(),
                },
            )
        }
    };
    drop(index);

    if unchanged {
        return Ok(());
    }

    file_emitter::emit(&ctx.config.config_file_path, &selector, &aggregate).context(EmitFileSnafu)?;
    Ok(())
}

/// `reconcileLogConfigDelete`: the deleted LogConfig's selector type is no longer known,
/// so every index is tried; whichever held fragments for this key is re-emitted.
async fn reconcile_log_config_delete(lgc_key: &str, ctx: &Ctx) -> Result<()> {
    let mut index = ctx.index.lock().await;

    if index.pod.delete_by_log_config_key(lgc_key) {
        let aggregate = index.pod.get_all_grouped_by_log_config();
        drop_and_emit(
            index,
            ctx,
            Selector::Pod {
                label_selector: LabelSelector::default(),
                cluster: String::new(),
            },
            aggregate,
        )?;
        return Ok(());
    }

    if index.node.delete(lgc_key) {
        let aggregate = index.node.get_all();
        drop_and_emit(
            index,
            ctx,
            Selector::Node {
                cluster: String::new(),
            },
            aggregate,
        )?;
        return Ok(());
    }

    if index.agent.delete(lgc_key) {
        let aggregate = index.agent.get_all();
        drop_and_emit(
            index,
            ctx,
            Selector::Agent {
                cluster: String::new(),
            },
            aggregate,
        )?;
    }

    Ok(())
}

fn drop_and_emit(
    index: tokio::sync::MutexGuard<'_, IndexStore>,
    ctx: &Ctx,
    selector: Selector,
    aggregate: crate::model::AggregatePipelineConfig,
) -> Result<()> {
    drop(index);
    file_emitter::emit(&ctx.config.config_file_path, &selector, &aggregate).context(EmitFileSnafu)?;
    Ok(())
}

/// `reconcilePod`: pod add/update. Short-circuits if the pod is already represented in the
/// pod index — an intentional first-write-wins behaviour inherited from upstream: label
/// and annotation changes on an already-indexed pod are *not* re-propagated until the pod
/// is deleted and re-added.
pub async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Ctx>) -> Result<Action> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let pod_key = meta_namespace_key(namespace, name);

    let Some(pod) = ctx.pods.get(namespace, name) else {
        reconcile_pod_delete(&pod_key, &ctx).await?;
        return Ok(Action::await_change());
    };

    if !pod_scheduled_on_node(&pod, &ctx.local_node_name) {
        return Ok(Action::await_change());
    }

    {
        let index = ctx.index.lock().await;
        if index.is_pod_exist(namespace, name) {
            return Ok(Action::await_change());
        }
    }

    for log_config in ctx.log_configs.list() {
        let Selector::Pod { label_selector, cluster } = &log_config.spec.selector else {
            continue;
        };
        if !ctx.config.belongs_to_cluster(cluster) {
            continue;
        }
        if !label_selector_matches(label_selector, pod_labels(&pod)) {
            continue;
        }
        let lgc_key = meta_namespace_key(
            log_config.metadata.namespace.as_deref().unwrap_or_default(),
            log_config.metadata.name.as_deref().unwrap_or_default(),
        );
        if log_config
            .validate()
            .context(InvalidLogConfigSnafu {
                key: lgc_key.clone(),
            })
            .is_err()
        {
            warn!(lgc_key, "skipping invalid logConfig during pod reconcile");
            continue;
        }

        let outcome = handle_log_config_per_pod(&log_config, &pod, &ctx).await;
        events::emit_sync_result(
            ctx.events.as_ref(),
            &log_config,
            "pod",
            &[name.to_string()],
            &outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()),
        )
        .await;
        outcome?;
    }

    Ok(Action::await_change())
}

async fn reconcile_pod_delete(pod_key: &str, ctx: &Ctx) -> Result<()> {
    let mut index = ctx.index.lock().await;
    if !index.pod.delete_by_pod_key(pod_key) {
        return Ok(());
    }
    let aggregate = index.pod.get_all_grouped_by_log_config();
    drop(index);
    file_emitter::emit(
        &ctx.config.config_file_path,
        &Selector::Pod {
            label_selector: LabelSelector::default(),
            cluster: String::new(),
        },
        &aggregate,
    )
    .context(EmitFileSnafu)?;
    Ok(())
}

/// `reconcileNode`: refresh the shared node-labels snapshot. A missing node (deleted, or
/// not yet observed) is logged and swallowed, not propagated as an error.
pub async fn reconcile_node(node: Arc<Node>, ctx: Arc<Ctx>) -> Result<Action> {
    let name = node.metadata.name.as_deref().unwrap_or_default();
    if name != ctx.local_node_name {
        return Ok(Action::await_change());
    }

    match ctx.nodes.get("", name) {
        Some(node) => {
            let labels = node.metadata.labels.clone().unwrap_or_default();
            *ctx.node_labels.lock().await = labels;
        }
        None => {
            info!(node = name, "local node not found in cache, skipping refresh");
        }
    }

    Ok(Action::await_change())
}

fn pod_scheduled_on_node(pod: &Pod, local_node_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .map(|n| n == local_node_name)
        .unwrap_or(false)
}

fn pod_labels(pod: &Pod) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    pod.metadata.labels.as_ref().unwrap_or(&EMPTY)
}

/// Evaluate a `LabelSelector` against a label set. `k8s_openapi`'s `LabelSelector` carries
/// no matcher of its own; this mirrors `metav1.LabelSelectorAsSelector` + `labels.Selector.Matches`.
fn label_selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let actual = labels.get(&expr.key);
            let matches = match expr.operator.as_str() {
                "In" => actual
                    .map(|v| expr.values.as_deref().unwrap_or_default().contains(v))
                    .unwrap_or(false),
                "NotIn" => !actual
                    .map(|v| expr.values.as_deref().unwrap_or_default().contains(v))
                    .unwrap_or(false),
                "Exists" => actual.is_some(),
                "DoesNotExist" => actual.is_none(),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    #[test]
    fn empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(label_selector_matches(&selector, &BTreeMap::new()));
    }

    #[test]
    fn match_labels_requires_exact_equality() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            match_expressions: None,
        };
        let matching = BTreeMap::from([("app".to_string(), "web".to_string())]);
        let mismatching = BTreeMap::from([("app".to_string(), "other".to_string())]);
        assert!(label_selector_matches(&selector, &matching));
        assert!(!label_selector_matches(&selector, &mismatching));
    }

    #[test]
    fn match_expressions_in_operator() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["frontend".to_string(), "backend".to_string()]),
            }]),
        };
        assert!(label_selector_matches(
            &selector,
            &BTreeMap::from([("tier".to_string(), "backend".to_string())])
        ));
        assert!(!label_selector_matches(
            &selector,
            &BTreeMap::from([("tier".to_string(), "cache".to_string())])
        ));
    }

    #[test]
    fn match_expressions_exists_and_does_not_exist() {
        let exists = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Exists".to_string(),
                values: None,
            }]),
        };
        assert!(label_selector_matches(
            &exists,
            &BTreeMap::from([("tier".to_string(), "x".to_string())])
        ));
        assert!(!label_selector_matches(&exists, &BTreeMap::new()));

        let does_not_exist = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
        };
        assert!(label_selector_matches(&does_not_exist, &BTreeMap::new()));
    }

    #[test]
    fn pod_scheduled_on_node_checks_spec_node_name() {
        let mut pod = Pod::default();
        pod.spec = Some(stackable_operator::k8s_openapi::api::core::v1::PodSpec {
            node_name: Some("node-a".to_string()),
            ..Default::default()
        });
        assert!(pod_scheduled_on_node(&pod, "node-a"));
        assert!(!pod_scheduled_on_node(&pod, "node-b"));
    }
}
