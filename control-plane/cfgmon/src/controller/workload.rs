use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use kube::{Resource, ResourceExt};

use crate::crd::monitored_service::{
    ContainerTemplate, MonitoredService, PodTemplate, PortTemplate,
};

pub const OWNER_LABEL: &str = "cfgmon.io/service";

/// Labels carried by the workload, its selector and its pods.
pub fn labels_for_service(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "monitored-service".to_string()),
        (OWNER_LABEL.to_string(), name.to_string()),
    ])
}

/// Template used before any configuration has been recorded: one container
/// named after the service running `spec.image`.
pub fn baseline_template(svc: &MonitoredService) -> PodTemplate {
    let ports = svc
        .spec
        .port
        .map(|p| {
            vec![PortTemplate {
                name: Some("service".into()),
                container_port: p,
                protocol: None,
            }]
        })
        .unwrap_or_default();
    PodTemplate {
        containers: vec![ContainerTemplate {
            name: svc.name_any(),
            image: svc.spec.image.clone(),
            image_pull_policy: Some("IfNotPresent".into()),
            ports,
            env: Vec::new(),
        }],
    }
}

pub fn to_pod_spec(template: &PodTemplate) -> PodSpec {
    let containers = template
        .containers
        .iter()
        .map(|c| Container {
            name: c.name.clone(),
            image: Some(c.image.clone()),
            image_pull_policy: c.image_pull_policy.clone(),
            ports: (!c.ports.is_empty()).then(|| {
                c.ports
                    .iter()
                    .map(|p| ContainerPort {
                        name: p.name.clone(),
                        container_port: p.container_port,
                        protocol: p.protocol.clone(),
                        ..Default::default()
                    })
                    .collect()
            }),
            env: (!c.env.is_empty()).then(|| {
                c.env
                    .iter()
                    .map(|e| EnvVar {
                        name: e.name.clone(),
                        value: Some(e.value.clone()),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        })
        .collect();
    PodSpec {
        containers,
        ..Default::default()
    }
}

/// Build the managed workload for `svc`. An empty recorded template falls
/// back to the baseline so the workload is always schedulable.
pub fn deployment_for_service(
    svc: &MonitoredService,
    template: &PodTemplate,
    replicas: i32,
) -> Deployment {
    let name = svc.name_any();
    let labels = labels_for_service(&name);
    let template = if template.is_empty() {
        baseline_template(svc)
    } else {
        template.clone()
    };
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: svc.namespace(),
            labels: Some(labels.clone()),
            owner_references: owner_ref(svc),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(to_pod_spec(&template)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Replica count of an existing workload; the API server defaults it to 1.
pub fn replicas_of(dep: &Deployment) -> i32 {
    dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

/// Labels used to select the workload's pods.
pub fn selector_of(dep: &Deployment, fallback: &str) -> BTreeMap<String, String> {
    dep.spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| labels_for_service(fallback))
}

fn owner_ref(svc: &MonitoredService) -> Option<Vec<OwnerReference>> {
    svc.meta().uid.as_ref().map(|uid| {
        vec![OwnerReference {
            api_version: MonitoredService::api_version(&()).to_string(),
            kind: MonitoredService::kind(&()).to_string(),
            name: svc.name_any(),
            uid: uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    })
}
