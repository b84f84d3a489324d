use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};

use super::{ResourceStore, StoreError, StoreResult, label_selector};
use crate::crd::monitored_service::{MonitoredService, ResourceId};

/// Resource store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, ns: &str) -> Api<MonitoredService> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn deployments(&self, ns: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn namespace_of<K: ResourceExt>(obj: &K) -> String {
    obj.namespace().unwrap_or_else(|| "default".into())
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_service(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<MonitoredService>> {
        self.services(&id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|e| StoreError::from_kube(e, &id.to_string()))
    }

    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<MonitoredService>> {
        let api: Api<MonitoredService> = match namespace {
            Some(ns) => self.services(ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, "monitoredservices"))?;
        Ok(list.items)
    }

    async fn update_status(
        &self,
        svc: &MonitoredService,
    ) -> StoreResult<MonitoredService> {
        let ns = namespace_of(svc);
        let name = svc.name_any();
        let data = serde_json::to_vec(svc)?;
        self.services(&ns)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("{ns}/{name}")))
    }

    async fn get_workload(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<Deployment>> {
        self.deployments(&id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|e| StoreError::from_kube(e, &id.to_string()))
    }

    async fn create_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        let ns = namespace_of(dep);
        self.deployments(&ns)
            .create(&PostParams::default(), dep)
            .await
            .map_err(|e| {
                StoreError::from_kube(e, &format!("{ns}/{}", dep.name_any()))
            })
    }

    async fn update_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        let ns = namespace_of(dep);
        let name = dep.name_any();
        self.deployments(&ns)
            .replace(&name, &PostParams::default(), dep)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("{ns}/{name}")))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        let list = api
            .list(&lp)
            .await
            .map_err(|e| StoreError::from_kube(e, "pods"))?;
        Ok(list.items)
    }
}
