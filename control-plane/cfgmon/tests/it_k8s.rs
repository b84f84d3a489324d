// Integration tests require a running Kubernetes cluster with the
// MonitoredService CRD applied. These tests are ignored by default.

use std::sync::Arc;
use std::time::Duration;

use cfgmon::controller::backoff::FailureBackoff;
use cfgmon::controller::{EnforceContext, EnforceOutcome, enforce_pass};
use cfgmon::crd::monitored_service::{MonitoredService, ResourceId};
use cfgmon::store::KubeStore;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};
mod common;
use common::{service, uniq};

#[test_log::test(tokio::test)]
#[ignore]
async fn enforcement_creates_and_scales_workload() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let name = uniq("cfgmon-it");
    let api: Api<MonitoredService> = Api::namespaced(client.clone(), ns);
    api.create(&PostParams::default(), &service(ns, &name, 1))
        .await
        .expect("create MonitoredService");

    let ctx = EnforceContext {
        store: Arc::new(KubeStore::new(client.clone())),
        recorder: None,
        backoff: FailureBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
        ),
        requeue_after: Duration::from_secs(1),
    };
    let id = ResourceId::new(ns, &name);

    assert_eq!(
        enforce_pass(&ctx, &id).await.expect("first pass"),
        EnforceOutcome::Created
    );
    let deps: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let dep = deps.get(&name).await.expect("workload exists");
    assert_eq!(dep.spec.and_then(|s| s.replicas), Some(1));

    let mut svc = api.get(&name).await.expect("get");
    svc.spec.size = 2;
    api.replace(&name, &PostParams::default(), &svc)
        .await
        .expect("resize");
    assert_eq!(
        enforce_pass(&ctx, &id).await.expect("scale pass"),
        EnforceOutcome::Scaled
    );
    let dep = deps.get(&name).await.expect("workload exists");
    assert_eq!(dep.spec.and_then(|s| s.replicas), Some(2));

    let _ = api.delete(&name, &DeleteParams::default()).await;
    let _ = deps.delete(&name, &DeleteParams::default()).await;
}
