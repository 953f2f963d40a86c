//! Assembles a [`PipelineFragment`] out of expanded sources, a resolved sink and rewritten
//! interceptors.
//!
//! Grounded in `buildPipelineConfig`/`toPipelineConfig` from the upstream controller: the
//! synthesiser itself does no lister I/O — it is handed already-resolved sink/interceptor
//! lookups so it stays a pure function over its inputs and is trivial to unit test.
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::Pod;
use tracing::warn;

use crate::{
    crd::{Interceptor, LogConfig, Sink},
    interceptor_rewriter::{self, rewrite_interceptors},
    listers::ResourceCache,
    model::PipelineFragment,
    rawconfig,
    source_expander::{self, expand_sources},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to expand sources"))]
    ExpandSources { source: source_expander::Error },
    #[snafu(display("sinkRef {sink_ref} does not resolve to any Sink resource"))]
    MissingSink { sink_ref: String },
    #[snafu(display("failed to rewrite interceptors"))]
    RewriteInterceptors { source: interceptor_rewriter::Error },
}

/// Synthesise the pod-selector pipeline fragment for one (LogConfig, Pod) pair.
///
/// Returns `Ok(None)` when source expansion yields no sources at all (e.g. the pod has no
/// container statuses yet) — mirrors the upstream "nil fragment" short-circuit rather than
/// emitting an empty, invalid fragment.
pub fn synthesise_for_pod(
    config: &crate::config::Config,
    log_config: &LogConfig,
    pod: &Pod,
    sinks: &dyn ResourceCache<Sink>,
    interceptors: &dyn ResourceCache<Interceptor>,
) -> Result<Option<PipelineFragment>, Error> {
    let namespace = log_config.metadata.namespace.as_deref().unwrap_or_default();
    let name = log_config.metadata.name.as_deref().unwrap_or_default();

    let sources = expand_sources(config, &log_config.spec.pipeline.sources, pod, name)
        .context(ExpandSourcesSnafu)?;
    if sources.is_empty() {
        return Ok(None);
    }

    let source_names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();

    let encoded_sources = encode_sources(&sources);

    let sink = resolve_sink(namespace, &log_config.spec.pipeline.sink_ref, sinks)?;
    let encoded_interceptors = resolve_interceptors(
        namespace,
        &log_config.spec.pipeline.interceptor_ref,
        &source_names,
        interceptors,
    )?;

    Ok(Some(PipelineFragment {
        name: PipelineFragment::fragment_name(namespace, name),
        sources: encoded_sources,
        sink: Some(sink),
        interceptors: encoded_interceptors,
    }))
}

/// Synthesise the node/agent-scoped pipeline fragment: no per-container expansion, the
/// stanzas materialise as-is.
pub fn synthesise_for_node_or_agent(
    log_config: &LogConfig,
    sinks: &dyn ResourceCache<Sink>,
    interceptors: &dyn ResourceCache<Interceptor>,
) -> Result<PipelineFragment, Error> {
    let namespace = log_config.metadata.namespace.as_deref().unwrap_or_default();
    let name = log_config.metadata.name.as_deref().unwrap_or_default();

    let mut encoded_sources = Vec::new();
    let mut source_names = Vec::new();
    for stanza in &log_config.spec.pipeline.sources {
        source_names.push(stanza.name.clone());
        if let Ok(raw) = rawconfig::encode(stanza) {
            encoded_sources.push(raw);
        }
    }

    let sink = resolve_sink(namespace, &log_config.spec.pipeline.sink_ref, sinks)?;
    let encoded_interceptors = resolve_interceptors(
        namespace,
        &log_config.spec.pipeline.interceptor_ref,
        &source_names,
        interceptors,
    )?;

    Ok(PipelineFragment {
        name: PipelineFragment::fragment_name(namespace, name),
        sources: encoded_sources,
        sink: Some(sink),
        interceptors: encoded_interceptors,
    })
}

fn resolve_sink(
    namespace: &str,
    sink_ref: &str,
    sinks: &dyn ResourceCache<Sink>,
) -> Result<rawconfig::RawConfig, Error> {
    let sink = sinks.get(namespace, sink_ref).context(MissingSinkSnafu {
        sink_ref: sink_ref.to_string(),
    })?;
    Ok(sink.spec.sink.clone())
}

/// Encode each materialised source individually; a source that fails to encode is logged
/// and dropped rather than discarding the whole fragment, matching the interceptor
/// rewriter's per-entry failure handling.
fn encode_sources(sources: &[source_expander::FileSource]) -> Vec<rawconfig::RawConfig> {
    let mut encoded = Vec::new();
    for source in sources {
        match rawconfig::encode(source) {
            Ok(raw) => encoded.push(raw),
            Err(err) => warn!(%err, name = %source.name, "failed to encode source, skipping"),
        }
    }
    encoded
}

/// Missing interceptor CR resolves to "no interceptors" (§7, Transient lookup policy),
/// not an error.
fn resolve_interceptors(
    namespace: &str,
    interceptor_ref: &str,
    source_names: &[String],
    interceptors: &dyn ResourceCache<Interceptor>,
) -> Result<Vec<rawconfig::RawConfig>, Error> {
    let Some(interceptor) = interceptors.get(namespace, interceptor_ref) else {
        return Ok(Vec::new());
    };
    rewrite_interceptors(&interceptor.spec.interceptors, source_names)
        .context(RewriteInterceptorsSnafu)
}
