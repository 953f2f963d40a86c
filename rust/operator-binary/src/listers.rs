//! Read-only capability interfaces over the cluster's cached resource state.
//!
//! The reconciler never talks to the Kubernetes API server directly for reads: it only
//! ever consults a [`ResourceCache`], which in production is backed by a
//! `kube::runtime::reflector::Store` kept warm by a `watcher` stream, and in tests can be
//! swapped for an in-memory fake. This is the "lister" abstraction called for in the
//! design notes — no global singleton, just an interface injected into the reconciler.
use std::collections::BTreeMap;
use std::sync::Arc;

use stackable_operator::kube::{
    runtime::reflector::{ObjectRef, Store},
    Resource,
};

/// Read-only access to one resource kind's cached state.
pub trait ResourceCache<K> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>>;
    fn list(&self) -> Vec<Arc<K>>;
}

/// [`ResourceCache`] backed by a live `kube::runtime::reflector::Store`, for namespaced
/// resources.
pub struct StoreCache<K>(pub Store<K>);

impl<K> ResourceCache<K> for StoreCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.0
            .get(&ObjectRef::new(name).within(namespace))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.0.state()
    }
}

/// [`ResourceCache`] backed by a live `Store`, for cluster-scoped resources (Nodes).
pub struct ClusterStoreCache<K>(pub Store<K>);

impl<K> ResourceCache<K> for ClusterStoreCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn get(&self, _namespace: &str, name: &str) -> Option<Arc<K>> {
        self.0.get(&ObjectRef::new(name))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.0.state()
    }
}

/// An in-memory [`ResourceCache`] for unit tests, keyed the same way the real stores are.
#[derive(Default)]
pub struct FakeCache<K> {
    pub items: BTreeMap<(String, String), Arc<K>>,
}

impl<K> FakeCache<K> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, namespace: &str, name: &str, item: K) {
        self.items
            .insert((namespace.to_string(), name.to_string()), Arc::new(item));
    }

    pub fn remove(&mut self, namespace: &str, name: &str) {
        self.items
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

impl<K> ResourceCache<K> for FakeCache<K> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.items
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.items.values().cloned().collect()
    }
}

/// Split a `namespace/name` workqueue key, as `cache.SplitMetaNamespaceKey` does upstream.
/// A key with no `/` is treated as a cluster-scoped resource (namespace is empty).
pub fn split_meta_namespace_key(key: &str) -> (String, String) {
    match key.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (String::new(), key.to_string()),
    }
}

/// `namespace/name`, the inverse of [`split_meta_namespace_key`].
pub fn meta_namespace_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
