use std::fmt;

use kube::CustomResource;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::ObjectRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "cfgmon.io",
    version = "v1alpha1",
    kind = "MonitoredService",
    plural = "monitoredservices",
    shortname = "msvc",
    namespaced,
    status = "MonitoredServiceStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"ConfigChanged","type":"boolean","jsonPath":".status.config_changed"}"#
)]
pub struct MonitoredServiceSpec {
    /// Container image run by the managed workload
    pub image: String,
    /// Desired replica count
    pub size: i32,
    /// URL of the external configuration endpoint
    pub config_source: String,
    /// Port exposed by the baseline container (named "service")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct MonitoredServiceStatus {
    /// Last-known-good template derived from the external configuration
    #[serde(default)]
    pub pod_template: PodTemplate,
    /// Set when `pod_template` has not yet been pushed to the workload
    #[serde(default)]
    pub config_changed: bool,
    /// Pods currently backing the workload, in listing order
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Normalized pod template. Only the fields the monitor manages are kept;
/// equality over it is defined by `controller::drift`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct PodTemplate {
    #[serde(default)]
    pub containers: Vec<ContainerTemplate>,
}

impl PodTemplate {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct ContainerTemplate {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortTemplate>,
    #[serde(default)]
    pub env: Vec<EnvEntry>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct PortTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

impl EnvEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Namespace + name of a tracked resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(svc: &MonitoredService) -> Self {
        Self {
            namespace: svc.namespace().unwrap_or_else(|| "default".into()),
            name: svc.name_any(),
        }
    }

    pub fn object_ref(&self) -> ObjectRef<MonitoredService> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of a type-erased reference, as reported by the controller runtime.
impl From<&ObjectRef<DynamicObject>> for ResourceId {
    fn from(r: &ObjectRef<DynamicObject>) -> Self {
        Self {
            namespace: r.namespace.clone().unwrap_or_else(|| "default".into()),
            name: r.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_when_fields_missing() {
        let st: MonitoredServiceStatus =
            serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(st.pod_template.is_empty());
        assert!(!st.config_changed);
        assert!(st.nodes.is_empty());
    }

    #[test]
    fn resource_id_round_trips_through_erased_object_ref() {
        let id = ResourceId::new("ns", "svc");
        let back = ResourceId::from(&id.object_ref().erase());
        assert_eq!(id, back);
        assert_eq!(id.to_string(), "ns/svc");
    }
}
