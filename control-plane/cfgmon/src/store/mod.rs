//! Narrow read/write interface both loops use against the declarative store.
//! Every write is conditional on the `resourceVersion` carried by the object
//! being written.

mod kube_store;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

use crate::crd::monitored_service::{MonitoredService, ResourceId};

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, StoreWrite};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("conflict: {0} was modified concurrently")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("kube api error: {0}")]
    Api(#[source] kube::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn from_kube(err: kube::Error, what: &str) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 409 => {
                StoreError::Conflict(what.to_string())
            }
            kube::Error::Api(ae) if ae.code == 404 => {
                StoreError::NotFound(what.to_string())
            }
            _ => StoreError::Api(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_service(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<MonitoredService>>;

    /// All tracked resources, optionally restricted to one namespace.
    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<MonitoredService>>;

    /// Replace the status subresource. Fails with `Conflict` when the stored
    /// version differs from `svc.metadata.resource_version`.
    async fn update_status(
        &self,
        svc: &MonitoredService,
    ) -> StoreResult<MonitoredService>;

    async fn get_workload(&self, id: &ResourceId)
    -> StoreResult<Option<Deployment>>;

    async fn create_workload(&self, dep: &Deployment) -> StoreResult<Deployment>;

    /// Replace the workload, conditional on its `resourceVersion`.
    async fn update_workload(&self, dep: &Deployment) -> StoreResult<Deployment>;

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<Pod>>;
}

pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
