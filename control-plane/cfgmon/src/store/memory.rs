use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tokio::sync::RwLock;

use super::{ResourceStore, StoreError, StoreResult};
use crate::crd::monitored_service::{MonitoredService, ResourceId};

/// A write accepted by the store, in acceptance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Status(ResourceId),
    CreateWorkload(ResourceId),
    UpdateWorkload(ResourceId),
}

#[derive(Default)]
struct Inner {
    services: BTreeMap<ResourceId, MonitoredService>,
    workloads: BTreeMap<ResourceId, Deployment>,
    pods: Vec<Pod>,
    version: u64,
    journal: Vec<StoreWrite>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-process resource store with optimistic versioning. Deleting a service
/// removes the workloads it owns, like the API server's garbage collector.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

fn id_of<K: ResourceExt>(obj: &K) -> ResourceId {
    ResourceId::new(
        obj.namespace().unwrap_or_else(|| "default".into()),
        obj.name_any(),
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a service as an external operator would.
    pub async fn insert_service(&self, mut svc: MonitoredService) -> MonitoredService {
        let mut w = self.inner.write().await;
        let id = id_of(&svc);
        let version = w.next_version();
        let meta = svc.meta_mut();
        meta.namespace = Some(id.namespace.clone());
        meta.resource_version = Some(version.clone());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}-{version}", id.name));
        }
        w.services.insert(id, svc.clone());
        svc
    }

    /// Mutate the spec of a stored service as an external edit would.
    pub async fn edit_spec<F>(&self, id: &ResourceId, f: F) -> Option<MonitoredService>
    where
        F: FnOnce(&mut MonitoredService),
    {
        let mut w = self.inner.write().await;
        let version = w.next_version();
        let svc = w.services.get_mut(id)?;
        f(svc);
        svc.metadata.resource_version = Some(version);
        Some(svc.clone())
    }

    pub async fn delete_service(&self, id: &ResourceId) -> Option<MonitoredService> {
        let mut w = self.inner.write().await;
        let removed = w.services.remove(id)?;
        let uid = removed.meta().uid.clone();
        w.workloads.retain(|_, dep| {
            !dep.metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| Some(&r.uid) == uid.as_ref()))
        });
        Some(removed)
    }

    pub async fn add_pod(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) {
        let mut w = self.inner.write().await;
        w.pods.push(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        });
    }

    pub async fn remove_pod(&self, namespace: &str, name: &str) {
        let mut w = self.inner.write().await;
        w.pods.retain(|p| {
            !(p.metadata.namespace.as_deref() == Some(namespace)
                && p.metadata.name.as_deref() == Some(name))
        });
    }

    pub async fn service(&self, id: &ResourceId) -> Option<MonitoredService> {
        self.inner.read().await.services.get(id).cloned()
    }

    pub async fn workload(&self, id: &ResourceId) -> Option<Deployment> {
        self.inner.read().await.workloads.get(id).cloned()
    }

    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.inner.read().await.journal.clone()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_service(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<MonitoredService>> {
        Ok(self.inner.read().await.services.get(id).cloned())
    }

    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<MonitoredService>> {
        let r = self.inner.read().await;
        Ok(r.services
            .iter()
            .filter(|(id, _)| namespace.is_none_or(|ns| ns == id.namespace))
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn update_status(
        &self,
        svc: &MonitoredService,
    ) -> StoreResult<MonitoredService> {
        let id = id_of(svc);
        let mut w = self.inner.write().await;
        let stored_version = match w.services.get(&id) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        if stored_version != svc.metadata.resource_version {
            return Err(StoreError::Conflict(id.to_string()));
        }
        let version = w.next_version();
        let stored = w
            .services
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        // status subresource: spec edits in the payload are ignored
        stored.status = svc.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        w.journal.push(StoreWrite::Status(id));
        Ok(updated)
    }

    async fn get_workload(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<Deployment>> {
        Ok(self.inner.read().await.workloads.get(id).cloned())
    }

    async fn create_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        let id = id_of(dep);
        let mut w = self.inner.write().await;
        if w.workloads.contains_key(&id) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        let mut created = dep.clone();
        created.metadata.namespace = Some(id.namespace.clone());
        created.metadata.resource_version = Some(w.next_version());
        w.workloads.insert(id.clone(), created.clone());
        w.journal.push(StoreWrite::CreateWorkload(id));
        Ok(created)
    }

    async fn update_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        let id = id_of(dep);
        let mut w = self.inner.write().await;
        let stored_version = match w.workloads.get(&id) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        if stored_version != dep.metadata.resource_version {
            return Err(StoreError::Conflict(id.to_string()));
        }
        let mut updated = dep.clone();
        updated.metadata.resource_version = Some(w.next_version());
        w.workloads.insert(id.clone(), updated.clone());
        w.journal.push(StoreWrite::UpdateWorkload(id));
        Ok(updated)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<Pod>> {
        let r = self.inner.read().await;
        Ok(r.pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let have = p.metadata.labels.as_ref();
                labels
                    .iter()
                    .all(|(k, v)| have.and_then(|l| l.get(k)) == Some(v))
            })
            .cloned()
            .collect())
    }
}
