#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cfgmon::controller::backoff::FailureBackoff;
use cfgmon::controller::router::{self, EventSubscriber};
use cfgmon::controller::{EnforceContext, MonitorContext};
use cfgmon::crd::monitored_service::{
    EnvEntry, MonitoredService, MonitoredServiceSpec, ResourceId,
};
use cfgmon::fetcher::{ConfigFetcher, FetchedConfig, SourceError};
use cfgmon::store::{MemoryStore, ResourceStore, StoreResult};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::RwLock;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn service(ns: &str, name: &str, size: i32) -> MonitoredService {
    let mut s = MonitoredService::new(
        name,
        MonitoredServiceSpec {
            image: "nginx:1.27".into(),
            size,
            config_source: format!("http://config.local/{name}"),
            port: Some(8080),
        },
    );
    s.metadata.namespace = Some(ns.into());
    s
}

pub fn env(pairs: &[(&str, &str)]) -> Vec<EnvEntry> {
    pairs.iter().map(|(k, v)| EnvEntry::new(*k, *v)).collect()
}

/// Serves a fixed payload per config source; unknown sources reply 503.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    configs: Arc<RwLock<HashMap<String, FetchedConfig>>>,
}

impl StaticFetcher {
    pub async fn serve(&self, source: &str, config: FetchedConfig) {
        self.configs.write().await.insert(source.to_string(), config);
    }

    pub async fn serve_env(&self, source: &str, pairs: &[(&str, &str)]) {
        self.serve(source, FetchedConfig::Env(env(pairs))).await;
    }

    pub async fn take_down(&self, source: &str) {
        self.configs.write().await.remove(source);
    }
}

#[async_trait]
impl ConfigFetcher for StaticFetcher {
    async fn fetch(&self, source: &str) -> Result<FetchedConfig, SourceError> {
        self.configs
            .read()
            .await
            .get(source)
            .cloned()
            .ok_or(SourceError::Status(503))
    }
}

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Store wrapper that runs a one-shot action right before the next status
/// write or workload update, as a concurrent writer would.
#[derive(Clone)]
pub struct RacingStore {
    inner: MemoryStore,
    before_status: Arc<Mutex<Option<Hook>>>,
    before_workload_update: Arc<Mutex<Option<Hook>>>,
}

impl RacingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            before_status: Arc::default(),
            before_workload_update: Arc::default(),
        }
    }

    pub fn before_next_status_write<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.before_status.lock().unwrap() = Some(Box::new(move || f().boxed()));
    }

    pub fn before_next_workload_update<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.before_workload_update.lock().unwrap() =
            Some(Box::new(move || f().boxed()));
    }
}

async fn run_hook(slot: &Mutex<Option<Hook>>) {
    let hook = slot.lock().unwrap().take();
    if let Some(hook) = hook {
        hook().await;
    }
}

#[async_trait]
impl ResourceStore for RacingStore {
    async fn get_service(
        &self,
        id: &ResourceId,
    ) -> StoreResult<Option<MonitoredService>> {
        self.inner.get_service(id).await
    }

    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<MonitoredService>> {
        self.inner.list_services(namespace).await
    }

    async fn update_status(
        &self,
        svc: &MonitoredService,
    ) -> StoreResult<MonitoredService> {
        run_hook(&self.before_status).await;
        self.inner.update_status(svc).await
    }

    async fn get_workload(&self, id: &ResourceId) -> StoreResult<Option<Deployment>> {
        self.inner.get_workload(id).await
    }

    async fn create_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        self.inner.create_workload(dep).await
    }

    async fn update_workload(&self, dep: &Deployment) -> StoreResult<Deployment> {
        run_hook(&self.before_workload_update).await;
        self.inner.update_workload(dep).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<Pod>> {
        self.inner.list_pods(namespace, labels).await
    }
}

/// Both loop contexts wired to one store and one router, without event
/// recording.
pub struct Harness {
    pub monitor: MonitorContext,
    pub enforce: EnforceContext,
    pub signals: EventSubscriber,
}

pub fn harness(
    store: Arc<dyn ResourceStore>,
    fetcher: Arc<dyn ConfigFetcher>,
) -> Harness {
    let (publisher, signals) = router::channel(16, Duration::from_millis(50));
    Harness {
        monitor: MonitorContext {
            store: store.clone(),
            fetcher,
            publisher,
            recorder: None,
            backoff: FailureBackoff::new(
                Duration::from_millis(10),
                Duration::from_secs(1),
            ),
        },
        enforce: EnforceContext {
            store,
            recorder: None,
            backoff: FailureBackoff::new(
                Duration::from_millis(10),
                Duration::from_secs(1),
            ),
            requeue_after: Duration::from_millis(10),
        },
        signals,
    }
}

/// Wait briefly for a router signal; `None` when nothing was published.
pub async fn next_signal(signals: &mut EventSubscriber) -> Option<ResourceId> {
    tokio::time::timeout(Duration::from_millis(50), signals.recv())
        .await
        .ok()
        .flatten()
}
