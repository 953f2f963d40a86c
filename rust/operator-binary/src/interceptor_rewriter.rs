//! Rewrites an interceptor's `belongTo` origin-source references into materialised
//! per-container source names.
//!
//! Grounded in `toPipelineInterceptorWithPodInject` from the upstream controller.
use std::collections::{BTreeSet, HashMap};

use snafu::{ResultExt, Snafu};
use tracing::warn;

use crate::{
    model::{origin_source_name, ExtInterceptorConfig},
    rawconfig::{self, RawConfig},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode interceptor entry"))]
    DecodeInterceptor { source: rawconfig::Error },
}

/// Build the `originSourceName -> {materialisedName}` map used to rewrite `belongTo`.
fn origin_index(source_names: &[String]) -> HashMap<&str, BTreeSet<&str>> {
    let mut index: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for name in source_names {
        index
            .entry(origin_source_name(name))
            .or_default()
            .insert(name.as_str());
    }
    index
}

/// Rewrite every interceptor entry's `belongTo` list against the materialised source
/// names of this pipeline. Entries whose re-encoding fails are logged and dropped;
/// origins with no matching materialised source are silently dropped from `belongTo`.
pub fn rewrite_interceptors(
    interceptors: &[ExtInterceptorConfig],
    materialised_source_names: &[String],
) -> Result<Vec<RawConfig>, Error> {
    let origin_index = origin_index(materialised_source_names);

    let mut rewritten = Vec::new();
    for entry in interceptors {
        let mut entry = entry.clone();
        if !entry.belong_to.is_empty() {
            let mut new_belong_to = Vec::new();
            for origin in &entry.belong_to {
                if let Some(names) = origin_index.get(origin.as_str()) {
                    new_belong_to.extend(names.iter().map(|n| n.to_string()));
                }
            }
            entry.belong_to = new_belong_to;
        }

        match rawconfig::encode(&entry).context(DecodeInterceptorSnafu) {
            Ok(raw) => rewritten.push(raw),
            Err(err) => warn!(%err, "failed to encode interceptor entry, skipping"),
        }
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(belong_to: &[&str]) -> ExtInterceptorConfig {
        ExtInterceptorConfig {
            belong_to: belong_to.iter().map(|s| s.to_string()).collect(),
            extra: RawConfig::new(),
        }
    }

    #[test]
    fn belong_to_is_rewritten_to_materialised_names() {
        let sources = vec!["a/c0/app".to_string(), "b/c0/app".to_string()];
        let rewritten = rewrite_interceptors(&[entry(&["app"])], &sources).unwrap();
        let decoded: ExtInterceptorConfig = rawconfig::decode(&rewritten[0]).unwrap();
        let mut belong_to = decoded.belong_to;
        belong_to.sort();
        assert_eq!(belong_to, vec!["a/c0/app", "b/c0/app"]);
    }

    #[test]
    fn unmatched_origin_is_dropped() {
        let sources = vec!["a/c0/app".to_string()];
        let rewritten = rewrite_interceptors(&[entry(&["missing"])], &sources).unwrap();
        let decoded: ExtInterceptorConfig = rawconfig::decode(&rewritten[0]).unwrap();
        assert!(decoded.belong_to.is_empty());
    }

    #[test]
    fn empty_belong_to_is_left_untouched() {
        let sources = vec!["a/c0/app".to_string()];
        let rewritten = rewrite_interceptors(&[entry(&[])], &sources).unwrap();
        let decoded: ExtInterceptorConfig = rawconfig::decode(&rewritten[0]).unwrap();
        assert!(decoded.belong_to.is_empty());
    }
}
