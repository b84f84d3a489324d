use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use kube::runtime::reflector::{ObjectRef, Store};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, warn};

use crate::crd::monitored_service::{MonitoredService, ResourceId};
use crate::store::ResourceStore;

async fn list_refs(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
) -> Vec<ObjectRef<MonitoredService>> {
    match store.list_services(namespace).await {
        Ok(items) => items
            .iter()
            .map(|svc| ResourceId::of(svc).object_ref())
            .collect(),
        Err(e) => {
            warn!(error = %e, "listing tracked resources failed");
            Vec::new()
        }
    }
}

/// Every `every`, one reconcile request per tracked resource. The first tick
/// fires immediately.
pub fn periodic_triggers(
    store: Arc<dyn ResourceStore>,
    namespace: Option<String>,
    every: Duration,
) -> impl Stream<Item = ObjectRef<MonitoredService>> + Send + 'static {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    IntervalStream::new(interval)
        .then(move |_| {
            let store = store.clone();
            let namespace = namespace.clone();
            async move {
                let refs = list_refs(store.as_ref(), namespace.as_deref()).await;
                debug!(count = refs.len(), "tick: requeue all");
                refs
            }
        })
        .flat_map(stream::iter)
}

/// One reconcile request per tracked resource, issued once `reader` has
/// completed its initial listing.
pub fn startup_triggers(
    store: Arc<dyn ResourceStore>,
    namespace: Option<String>,
    reader: Store<MonitoredService>,
) -> impl Stream<Item = ObjectRef<MonitoredService>> + Send + 'static {
    stream::once(async move {
        if reader.wait_until_ready().await.is_err() {
            return Vec::new();
        }
        list_refs(store.as_ref(), namespace.as_deref()).await
    })
    .flat_map(stream::iter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::monitored_service::MonitoredServiceSpec;
    use crate::store::MemoryStore;

    fn svc(ns: &str, name: &str) -> MonitoredService {
        let mut s = MonitoredService::new(
            name,
            MonitoredServiceSpec {
                image: "img".into(),
                size: 1,
                config_source: "http://cfg".into(),
                port: None,
            },
        );
        s.metadata.namespace = Some(ns.into());
        s
    }

    #[tokio::test(start_paused = true)]
    async fn each_tick_requeues_every_resource_in_namespace() {
        let store = MemoryStore::new();
        store.insert_service(svc("ns", "a")).await;
        store.insert_service(svc("ns", "b")).await;
        store.insert_service(svc("other", "c")).await;

        let ticks = periodic_triggers(
            Arc::new(store.clone()),
            Some("ns".into()),
            Duration::from_secs(5),
        );
        let refs: Vec<_> = ticks.take(4).collect().await;
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "a", "b"]);
    }
}
