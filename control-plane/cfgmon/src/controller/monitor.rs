//! Monitor loop: fetch each resource's configuration, compare it with the
//! recorded template and record drift in status before notifying the
//! enforcement loop.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{StreamExt, future};
use kube::Client;
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use tracing::{debug, info, instrument, trace, warn};

use super::backoff::FailureBackoff;
use super::drift::has_drift;
use super::events::{REASON_CONFIG_DRIFT, emit_event};
use super::predicates::{ConfigSourceChanged, filtered_triggers};
use super::router::EventPublisher;
use super::ticker::periodic_triggers;
use super::workload::baseline_template;
use super::{ReconcileErr, Written, classify, report, services_api};
use crate::config::CfgmonConfig;
use crate::crd::monitored_service::{
    MonitoredService, MonitoredServiceStatus, PodTemplate, ResourceId,
};
use crate::fetcher::{ConfigFetcher, FetchedConfig};
use crate::store::ResourceStore;

pub struct MonitorContext {
    pub store: Arc<dyn ResourceStore>,
    pub fetcher: Arc<dyn ConfigFetcher>,
    pub publisher: EventPublisher,
    pub recorder: Option<kube::runtime::events::Recorder>,
    pub backoff: FailureBackoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The resource no longer exists.
    Missing,
    /// The source could not be fetched or parsed; nothing was written.
    FetchFailed,
    /// Recorded template matches the source.
    Unchanged,
    /// No drift, but the enforcement loop had not yet acknowledged the last
    /// recorded change, so it was signalled again.
    Republished,
    /// Drift recorded in status and signalled.
    Recorded,
    /// Status write lost an optimistic-concurrency race.
    Conflict,
}

/// Merge a fetch result onto what is currently recorded for `svc`.
///
/// Environment entries replace the first container's environment, starting
/// from the baseline when nothing is recorded. A full template is taken as-is
/// with missing container names and images filled from the resource.
pub fn candidate_template(
    svc: &MonitoredService,
    current: &PodTemplate,
    fetched: FetchedConfig,
) -> PodTemplate {
    match fetched {
        FetchedConfig::Env(env) => {
            let mut template = if current.is_empty() {
                baseline_template(svc)
            } else {
                current.clone()
            };
            if let Some(first) = template.containers.first_mut() {
                first.env = env;
            }
            template
        }
        FetchedConfig::Template(mut template) => {
            let name = svc.metadata.name.clone().unwrap_or_default();
            let single = template.containers.len() == 1;
            for (idx, c) in template.containers.iter_mut().enumerate() {
                if c.name.is_empty() {
                    c.name = if single {
                        name.clone()
                    } else {
                        format!("{name}-{idx}")
                    };
                }
                if c.image.is_empty() {
                    c.image = svc.spec.image.clone();
                }
            }
            template
        }
    }
}

/// One monitor pass for `id`. At most one status write; a signal is only
/// published after that write (or for a change still awaiting enforcement).
#[instrument(skip_all, fields(ns = %id.namespace, name = %id.name))]
pub async fn monitor_pass(
    ctx: &MonitorContext,
    id: &ResourceId,
) -> Result<MonitorOutcome, ReconcileErr> {
    let Some(svc) = ctx.store.get_service(id).await? else {
        debug!("monitor: resource gone");
        return Ok(MonitorOutcome::Missing);
    };

    let fetched = match ctx.fetcher.fetch(&svc.spec.config_source).await {
        Ok(f) => f,
        Err(e) => {
            warn!(
                error = %e,
                source = %svc.spec.config_source,
                "monitor: config fetch failed; keeping recorded template"
            );
            return Ok(MonitorOutcome::FetchFailed);
        }
    };

    let status = svc.status.clone().unwrap_or_default();
    let candidate = candidate_template(&svc, &status.pod_template, fetched);

    if !has_drift(&status.pod_template, &candidate) {
        if status.config_changed {
            debug!("monitor: change still pending enforcement; signalling again");
            ctx.publisher.publish(id.clone()).await?;
            return Ok(MonitorOutcome::Republished);
        }
        trace!("monitor: no drift");
        return Ok(MonitorOutcome::Unchanged);
    }

    let mut updated = svc.clone();
    updated.status = Some(MonitoredServiceStatus {
        pod_template: candidate,
        config_changed: true,
        nodes: status.nodes,
        last_updated: Some(Utc::now().to_rfc3339()),
    });
    match classify(ctx.store.update_status(&updated).await)? {
        Written::Done(_) => {}
        Written::Conflict => {
            debug!("monitor: status conflict; next trigger retries");
            return Ok(MonitorOutcome::Conflict);
        }
        Written::Gone => return Ok(MonitorOutcome::Missing),
    }

    info!("monitor: config drift recorded");
    emit_event(
        ctx.recorder.as_ref(),
        &svc,
        REASON_CONFIG_DRIFT,
        "RecordTemplate",
        Some(format!("configuration from {} changed", svc.spec.config_source)),
    )
    .await;
    ctx.publisher.publish(id.clone()).await?;
    Ok(MonitorOutcome::Recorded)
}

async fn reconcile(
    obj: Arc<MonitoredService>,
    ctx: Arc<MonitorContext>,
) -> Result<Action, ReconcileErr> {
    let id = ResourceId::of(&obj);
    let outcome = monitor_pass(&ctx, &id).await?;
    ctx.backoff.reset(&id);
    trace!(%id, ?outcome, "monitor: pass complete");
    Ok(Action::await_change())
}

fn error_policy(
    obj: Arc<MonitoredService>,
    err: &ReconcileErr,
    ctx: Arc<MonitorContext>,
) -> Action {
    let id = ResourceId::of(&obj);
    let delay = ctx.backoff.next_delay(&id);
    warn!(%id, error = %err, ?delay, "monitor: pass failed; backing off");
    Action::requeue(delay)
}

/// Drive the monitor loop until shutdown. Passes are triggered by creation
/// or a changed config source, and for every resource on each poll tick.
pub async fn run_monitor(
    client: Client,
    cfg: &CfgmonConfig,
    ctx: Arc<MonitorContext>,
) -> anyhow::Result<()> {
    let api = services_api(client, cfg.watch_namespace.as_deref());
    let (reader, writer) = reflector::store();
    let events = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);
    let triggers = filtered_triggers(events, ConfigSourceChanged);
    let ticks = periodic_triggers(
        ctx.store.clone(),
        cfg.watch_namespace.clone(),
        cfg.poll_interval(),
    );

    info!(interval = ?cfg.poll_interval(), "monitor loop starting");
    Controller::for_stream(triggers, reader)
        .with_config(ControllerConfig::default().concurrency(cfg.monitor_concurrency))
        .reconcile_on(ticks)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| {
            report("monitor", &ctx.backoff, res);
            future::ready(())
        })
        .await;
    info!("monitor loop stopped");
    Ok(())
}
