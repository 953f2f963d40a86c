//! The authoritative in-memory projection from (LogConfig × Pod × Container) to
//! synthesised [`PipelineFragment`]s.
//!
//! Grounded in the `typePodIndex`/`typeNodeIndex`/`typeLoggieIndex` trio from the upstream
//! controller. Per §5 of the design, the reconciler is the only caller, but this type is
//! made `Send + Sync` and internally lock-free (the caller owns the locking, typically via
//! `Arc<Mutex<IndexStore>>` in the reconciler context) so multiple workers can share it
//! safely if the controller is ever scaled beyond a single worker per key.
use std::collections::{BTreeMap, HashMap, HashSet};

use snafu::{ResultExt, Snafu};

use crate::{
    listers::{meta_namespace_key, split_meta_namespace_key},
    model::{AggregatePipelineConfig, PipelineFragment},
    validation::{self, apply_defaults},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("pipeline fragment failed validation"))]
    Validation { source: validation::Error },
}

/// Keyed in-memory projection for the `Pod` selector type.
///
/// `lgcKey -> podKey -> PipelineFragment`, plus the reverse `podKey -> {lgcKey}` index
/// used to implement delete-by-pod without a linear scan.
#[derive(Default)]
pub struct PodIndex {
    by_log_config: BTreeMap<String, BTreeMap<String, PipelineFragment>>,
    pods_by_log_config: HashMap<String, HashSet<String>>,
}

impl PodIndex {
    pub fn is_pod_present(&self, lgc_key: &str, pod_key: &str) -> bool {
        self.by_log_config
            .get(lgc_key)
            .map(|pods| pods.contains_key(pod_key))
            .unwrap_or(false)
    }

    pub fn get(&self, lgc_key: &str, pod_key: &str) -> Option<&PipelineFragment> {
        self.by_log_config.get(lgc_key)?.get(pod_key)
    }

    /// Default, validate, then insert `fragment` under `(lgc_key, pod_key)`.
    pub fn validate_and_set(
        &mut self,
        lgc_key: &str,
        pod_key: &str,
        mut fragment: PipelineFragment,
    ) -> Result<(), Error> {
        apply_defaults(&mut fragment);
        validation::validate(&fragment).context(ValidationSnafu)?;

        self.by_log_config
            .entry(lgc_key.to_string())
            .or_default()
            .insert(pod_key.to_string(), fragment);
        self.pods_by_log_config
            .entry(pod_key.to_string())
            .or_default()
            .insert(lgc_key.to_string());
        Ok(())
    }

    /// Remove every fragment belonging to `lgc_key`. Returns whether anything was removed.
    pub fn delete_by_log_config_key(&mut self, lgc_key: &str) -> bool {
        let Some(pods) = self.by_log_config.remove(lgc_key) else {
            return false;
        };
        for pod_key in pods.keys() {
            if let Some(lgcs) = self.pods_by_log_config.get_mut(pod_key) {
                lgcs.remove(lgc_key);
                if lgcs.is_empty() {
                    self.pods_by_log_config.remove(pod_key);
                }
            }
        }
        true
    }

    /// Remove every fragment belonging to `pod_key`, across all LogConfigs. Returns
    /// whether anything was removed.
    pub fn delete_by_pod_key(&mut self, pod_key: &str) -> bool {
        let Some(lgc_keys) = self.pods_by_log_config.remove(pod_key) else {
            return false;
        };
        let mut removed_any = false;
        for lgc_key in lgc_keys {
            if let Some(pods) = self.by_log_config.get_mut(&lgc_key) {
                if pods.remove(pod_key).is_some() {
                    removed_any = true;
                }
                if pods.is_empty() {
                    self.by_log_config.remove(&lgc_key);
                }
            }
        }
        removed_any
    }

    /// Flatten every fragment into the on-disk aggregate shape, grouped first by
    /// LogConfig, LogConfig keys in sorted order, pod keys within a LogConfig in sorted
    /// order.
    pub fn get_all_grouped_by_log_config(&self) -> AggregatePipelineConfig {
        let mut pipelines = Vec::new();
        for pods in self.by_log_config.values() {
            for fragment in pods.values() {
                pipelines.push(fragment.clone());
            }
        }
        AggregatePipelineConfig { pipelines }
    }
}

/// Keyed in-memory projection for the `Node`/`Agent` selector types: one fragment per
/// LogConfig, no per-container fan-out.
#[derive(Default)]
pub struct FlatIndex {
    by_log_config: BTreeMap<String, PipelineFragment>,
}

impl FlatIndex {
    pub fn get(&self, lgc_key: &str) -> Option<&PipelineFragment> {
        self.by_log_config.get(lgc_key)
    }

    pub fn validate_and_set(
        &mut self,
        lgc_key: &str,
        mut fragment: PipelineFragment,
    ) -> Result<(), Error> {
        apply_defaults(&mut fragment);
        validation::validate(&fragment).context(ValidationSnafu)?;
        self.by_log_config.insert(lgc_key.to_string(), fragment);
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn delete(&mut self, lgc_key: &str) -> bool {
        self.by_log_config.remove(lgc_key).is_some()
    }

    pub fn get_all(&self) -> AggregatePipelineConfig {
        AggregatePipelineConfig {
            pipelines: self.by_log_config.values().cloned().collect(),
        }
    }
}

/// The three parallel indices, one per selector type.
#[derive(Default)]
pub struct IndexStore {
    pub pod: PodIndex,
    pub node: FlatIndex,
    pub agent: FlatIndex,
}

impl IndexStore {
    /// `namespace/podName` convenience wrapper matching the reconciler's workqueue keys.
    pub fn is_pod_exist(&self, namespace: &str, pod_name: &str) -> bool {
        let pod_key = meta_namespace_key(namespace, pod_name);
        self.pod
            .pods_by_log_config
            .contains_key(&pod_key)
    }
}

/// Re-derive `(namespace, name)` from a workqueue-style key, exposed here so callers
/// outside `listers` don't need to depend on it directly for index bookkeeping.
pub fn split_key(key: &str) -> (String, String) {
    split_meta_namespace_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(name: &str) -> PipelineFragment {
        let mut sink = crate::rawconfig::RawConfig::new();
        sink.insert(
            serde_yaml::Value::String("type".to_string()),
            serde_yaml::Value::String("elasticsearch".to_string()),
        );
        let mut source = crate::rawconfig::RawConfig::new();
        source.insert(
            serde_yaml::Value::String("name".to_string()),
            serde_yaml::Value::String("web-1/c0/app".to_string()),
        );
        PipelineFragment {
            name: name.to_string(),
            sources: vec![source],
            sink: Some(sink),
            interceptors: vec![],
        }
    }

    #[test]
    fn pod_index_set_get_and_is_pod_exist() {
        let mut index = PodIndex::default();
        index
            .validate_and_set("ns1/lg1", "ns1/web-1", fragment("ns1/lg1"))
            .unwrap();
        assert!(index.is_pod_present("ns1/lg1", "ns1/web-1"));
        assert!(index.get("ns1/lg1", "ns1/web-1").is_some());
    }

    #[test]
    fn delete_by_log_config_key_removes_all_its_pods() {
        let mut index = PodIndex::default();
        index
            .validate_and_set("ns1/lg1", "ns1/web-1", fragment("ns1/lg1"))
            .unwrap();
        index
            .validate_and_set("ns1/lg1", "ns1/web-2", fragment("ns1/lg1"))
            .unwrap();
        assert!(index.delete_by_log_config_key("ns1/lg1"));
        assert!(!index.is_pod_present("ns1/lg1", "ns1/web-1"));
        assert!(!index.delete_by_log_config_key("ns1/lg1"));
    }

    #[test]
    fn delete_by_pod_key_removes_fragments_across_log_configs() {
        let mut index = PodIndex::default();
        index
            .validate_and_set("ns1/lg1", "ns1/web-1", fragment("ns1/lg1"))
            .unwrap();
        index
            .validate_and_set("ns1/lg2", "ns1/web-1", fragment("ns1/lg2"))
            .unwrap();
        assert!(index.delete_by_pod_key("ns1/web-1"));
        assert!(index.get("ns1/lg1", "ns1/web-1").is_none());
        assert!(index.get("ns1/lg2", "ns1/web-1").is_none());
        assert!(!index.delete_by_pod_key("ns1/web-1"));
    }

    #[test]
    fn get_all_grouped_by_log_config_flattens_every_fragment() {
        let mut index = PodIndex::default();
        index
            .validate_and_set("ns1/lg1", "ns1/web-1", fragment("ns1/lg1"))
            .unwrap();
        index
            .validate_and_set("ns1/lg1", "ns1/web-2", fragment("ns1/lg1"))
            .unwrap();
        let aggregate = index.get_all_grouped_by_log_config();
        assert_eq!(aggregate.pipelines.len(), 2);
    }

    #[test]
    fn flat_index_set_get_delete() {
        let mut index = FlatIndex::default();
        index.validate_and_set("ns1/lg1", fragment("ns1/lg1")).unwrap();
        assert!(index.get("ns1/lg1").is_some());
        assert!(index.delete("ns1/lg1"));
        assert!(index.get("ns1/lg1").is_none());
        assert!(!index.delete("ns1/lg1"));
    }
}
