//! Enforcement loop: converge the managed workload onto the service's
//! desired replica count and recorded template.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, future};
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::events::Recorder;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, trace, warn};

use super::backoff::FailureBackoff;
use super::events::{
    REASON_SCALED, REASON_TEMPLATE_APPLIED, REASON_WORKLOAD_CREATED,
    emit_event,
};
use super::predicates::{SizeChanged, filtered_triggers};
use super::router::EventSubscriber;
use super::ticker::startup_triggers;
use super::workload::{
    baseline_template, deployment_for_service, replicas_of, selector_of,
    to_pod_spec,
};
use super::{ReconcileErr, Written, classify, report, services_api};
use crate::config::CfgmonConfig;
use crate::crd::monitored_service::{
    MonitoredService, MonitoredServiceStatus, ResourceId,
};
use crate::store::ResourceStore;

pub struct EnforceContext {
    pub store: Arc<dyn ResourceStore>,
    pub recorder: Option<Recorder>,
    pub backoff: FailureBackoff,
    pub requeue_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceOutcome {
    Missing,
    Created,
    Scaled,
    TemplateApplied,
    NodesRefreshed,
    Converged,
    Conflict,
}

impl EnforceOutcome {
    /// Whether another pass should follow to check the remaining steps.
    pub fn requeue(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Scaled | Self::TemplateApplied | Self::Conflict
        )
    }
}

/// One enforcement pass for `id`. Performs at most one corrective step:
/// create the workload, fix its replica count, apply a pending template, or
/// refresh the observed pod names.
#[instrument(skip_all, fields(ns = %id.namespace, name = %id.name))]
pub async fn enforce_pass(
    ctx: &EnforceContext,
    id: &ResourceId,
) -> Result<EnforceOutcome, ReconcileErr> {
    let Some(svc) = ctx.store.get_service(id).await? else {
        debug!("enforce: resource gone");
        return Ok(EnforceOutcome::Missing);
    };
    let size = svc.spec.size;
    if size < 0 {
        return Err(ReconcileErr::Validation(format!(
            "{id}: size must not be negative (got {size})"
        )));
    }
    let status = svc.status.clone().unwrap_or_default();

    let Some(mut dep) = ctx.store.get_workload(id).await? else {
        let dep = deployment_for_service(&svc, &status.pod_template, size);
        return match classify(ctx.store.create_workload(&dep).await)? {
            Written::Done(_) => {
                info!(replicas = size, "enforce: workload created");
                emit_event(
                    ctx.recorder.as_ref(),
                    &svc,
                    REASON_WORKLOAD_CREATED,
                    "CreateWorkload",
                    Some(format!("created workload with {size} replicas")),
                )
                .await;
                Ok(EnforceOutcome::Created)
            }
            Written::Conflict => Ok(EnforceOutcome::Conflict),
            Written::Gone => Ok(EnforceOutcome::Missing),
        };
    };

    let current = replicas_of(&dep);
    if current != size {
        dep.spec.get_or_insert_with(Default::default).replicas = Some(size);
        return match classify(ctx.store.update_workload(&dep).await)? {
            Written::Done(_) => {
                info!(from = current, to = size, "enforce: replicas scaled");
                emit_event(
                    ctx.recorder.as_ref(),
                    &svc,
                    REASON_SCALED,
                    "Scale",
                    Some(format!("scaled from {current} to {size}")),
                )
                .await;
                Ok(EnforceOutcome::Scaled)
            }
            Written::Conflict => Ok(EnforceOutcome::Conflict),
            Written::Gone => Ok(EnforceOutcome::Missing),
        };
    }

    if status.config_changed {
        let template = if status.pod_template.is_empty() {
            baseline_template(&svc)
        } else {
            status.pod_template.clone()
        };
        let spec = dep.spec.get_or_insert_with(Default::default);
        spec.template.spec = Some(to_pod_spec(&template));
        match classify(ctx.store.update_workload(&dep).await)? {
            Written::Done(_) => {}
            Written::Conflict => return Ok(EnforceOutcome::Conflict),
            Written::Gone => return Ok(EnforceOutcome::Missing),
        }
        info!("enforce: recorded template applied");

        let mut acked = svc.clone();
        acked.status = Some(MonitoredServiceStatus {
            config_changed: false,
            ..status
        });
        return match classify(ctx.store.update_status(&acked).await)? {
            Written::Done(_) => {
                emit_event(
                    ctx.recorder.as_ref(),
                    &svc,
                    REASON_TEMPLATE_APPLIED,
                    "ApplyTemplate",
                    None,
                )
                .await;
                Ok(EnforceOutcome::TemplateApplied)
            }
            // The workload already carries the template; the next pass
            // re-applies it unchanged and retries the acknowledgement.
            Written::Conflict => Ok(EnforceOutcome::Conflict),
            Written::Gone => Ok(EnforceOutcome::Missing),
        };
    }

    let selector = selector_of(&dep, &id.name);
    let pods = ctx.store.list_pods(&id.namespace, &selector).await?;
    let nodes: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
    if nodes == status.nodes {
        trace!("enforce: converged");
        return Ok(EnforceOutcome::Converged);
    }

    debug!(count = nodes.len(), "enforce: observed pods changed");
    let mut refreshed = svc.clone();
    refreshed.status = Some(MonitoredServiceStatus { nodes, ..status });
    match classify(ctx.store.update_status(&refreshed).await)? {
        Written::Done(_) => Ok(EnforceOutcome::NodesRefreshed),
        Written::Conflict => Ok(EnforceOutcome::Conflict),
        Written::Gone => Ok(EnforceOutcome::Missing),
    }
}

async fn reconcile(
    obj: Arc<MonitoredService>,
    ctx: Arc<EnforceContext>,
) -> Result<Action, ReconcileErr> {
    let id = ResourceId::of(&obj);
    let outcome = enforce_pass(&ctx, &id).await?;
    ctx.backoff.reset(&id);
    trace!(%id, ?outcome, "enforce: pass complete");
    if outcome.requeue() {
        Ok(Action::requeue(ctx.requeue_after))
    } else {
        Ok(Action::await_change())
    }
}

fn error_policy(
    obj: Arc<MonitoredService>,
    err: &ReconcileErr,
    ctx: Arc<EnforceContext>,
) -> Action {
    let id = ResourceId::of(&obj);
    let delay = ctx.backoff.next_delay(&id);
    warn!(%id, error = %err, ?delay, "enforce: pass failed; backing off");
    Action::requeue(delay)
}

/// Drive the enforcement loop until shutdown. Passes are triggered by router
/// signals, by a changed size, and once for every resource at startup.
pub async fn run_enforcement(
    client: Client,
    cfg: &CfgmonConfig,
    ctx: Arc<EnforceContext>,
    subscriber: EventSubscriber,
) -> anyhow::Result<()> {
    let api = services_api(client, cfg.watch_namespace.as_deref());
    let (reader, writer) = reflector::store();
    let events = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);
    let triggers = filtered_triggers(events, SizeChanged);
    let resync = startup_triggers(
        ctx.store.clone(),
        cfg.watch_namespace.clone(),
        reader.clone(),
    );

    info!("enforcement loop starting");
    Controller::for_stream(triggers, reader)
        .with_config(ControllerConfig::default().concurrency(cfg.enforce_concurrency))
        .reconcile_on(subscriber.into_triggers())
        .reconcile_on(resync)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| {
            report("enforce", &ctx.backoff, res);
            future::ready(())
        })
        .await;
    info!("enforcement loop stopped");
    Ok(())
}
