use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::debug;

use crate::crd::monitored_service::MonitoredService;

pub const REASON_CONFIG_DRIFT: &str = "ConfigDrift";
pub const REASON_WORKLOAD_CREATED: &str = "WorkloadCreated";
pub const REASON_SCALED: &str = "Scaled";
pub const REASON_TEMPLATE_APPLIED: &str = "TemplateApplied";

pub fn recorder(client: Client) -> Recorder {
    let reporter = Reporter {
        controller: "cfgmon".into(),
        instance: std::env::var("POD_NAME").ok(),
    };
    Recorder::new(client, reporter)
}

pub async fn emit_event(
    recorder: Option<&Recorder>,
    svc: &MonitoredService,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let Some(recorder) = recorder else {
        return;
    };
    if let Err(e) = recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            &svc.object_ref(&()),
        )
        .await
    {
        debug!(error = %e, reason, "event publish failed");
    }
}
