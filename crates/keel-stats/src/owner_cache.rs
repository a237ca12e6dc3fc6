//! Pod → controller resolution with an explicit cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use keel_core::ControllerRef;
use tracing::debug;

/// Namespace whose pods are grouped under the namespace itself.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Looks up the workload that owns a pod, typically via the cluster API.
pub trait ControllerResolver: Send + Sync {
    fn resolve(&self, namespace: &str, pod_name: &str) -> Option<ControllerRef>;
}

/// Resolver that never finds an owner; every pod falls back.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl ControllerResolver for NoResolver {
    fn resolve(&self, _namespace: &str, _pod_name: &str) -> Option<ControllerRef> {
        None
    }
}

/// Caches resolved owners per `(namespace, pod)`.
///
/// Only successful lookups are cached, so a pod whose owner appears later
/// is resolved again on its next sample.
pub struct ControllerCache {
    resolver: Arc<dyn ControllerResolver>,
    owners: RwLock<HashMap<(String, String), ControllerRef>>,
}

impl ControllerCache {
    pub fn new(resolver: Arc<dyn ControllerResolver>) -> Self {
        Self {
            resolver,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// The controller owning `pod_name`, or its fallback.
    pub fn controller_for(&self, namespace: &str, pod_name: &str) -> ControllerRef {
        if namespace == SYSTEM_NAMESPACE {
            return fallback(namespace, pod_name);
        }

        let key = (namespace.to_string(), pod_name.to_string());
        if let Some(found) = self
            .owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return found.clone();
        }

        match self.resolver.resolve(namespace, pod_name) {
            Some(owner) => {
                self.owners
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, owner.clone());
                owner
            }
            None => {
                debug!(%namespace, pod = %pod_name, "pod has no owner, using fallback");
                fallback(namespace, pod_name)
            }
        }
    }

    pub fn invalidate(&self, namespace: &str, pod_name: &str) {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(namespace.to_string(), pod_name.to_string()));
    }

    pub fn clear(&self) {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ControllerCache {
    fn default() -> Self {
        Self::new(Arc::new(NoResolver))
    }
}

/// System pods group under their namespace; other orphans stand alone.
fn fallback(namespace: &str, pod_name: &str) -> ControllerRef {
    if namespace == SYSTEM_NAMESPACE {
        ControllerRef::new("Namespace", namespace, namespace)
    } else {
        ControllerRef::new("Pod", namespace, pod_name)
    }
}
