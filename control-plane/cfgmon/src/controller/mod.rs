pub mod backoff;
pub mod drift;
pub mod enforce;
pub mod events;
pub mod monitor;
pub mod predicates;
pub mod router;
pub mod ticker;
pub mod workload;

use kube::Api;
use kube::Client;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use tracing::{debug, trace, warn};

use crate::crd::monitored_service::{MonitoredService, ResourceId};
use crate::store::{StoreError, StoreResult};
use backoff::FailureBackoff;

pub use enforce::{EnforceContext, EnforceOutcome, enforce_pass, run_enforcement};
pub use monitor::{MonitorContext, MonitorOutcome, monitor_pass, run_monitor};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("router error: {0}")]
    Router(#[from] router::RouterError),
    #[error("invalid resource: {0}")]
    Validation(String),
}

/// Result of a store write once optimistic-concurrency and deletion races
/// have been separated from real failures.
pub(crate) enum Written<T> {
    Done(T),
    Conflict,
    Gone,
}

pub(crate) fn classify<T>(res: StoreResult<T>) -> Result<Written<T>, ReconcileErr> {
    match res {
        Ok(v) => Ok(Written::Done(v)),
        Err(e) if e.is_conflict() => Ok(Written::Conflict),
        Err(e) if e.is_not_found() => Ok(Written::Gone),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn services_api(
    client: Client,
    namespace: Option<&str>,
) -> Api<MonitoredService> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub(crate) type RunResult = Result<
    (ObjectRef<MonitoredService>, Action),
    controller::Error<ReconcileErr, watcher::Error>,
>;

/// Log one item of a controller's output stream. A request for an object no
/// longer in the cache means the resource was deleted: its backoff entry is
/// dropped and nothing is reported as an error.
pub(crate) fn report(name: &'static str, backoff: &FailureBackoff, res: RunResult) {
    match res {
        Ok((obj_ref, action)) => {
            trace!(controller = name, %obj_ref, ?action, "reconciled")
        }
        Err(controller::Error::ObjectNotFound(obj_ref)) => {
            backoff.reset(&ResourceId::from(&obj_ref));
            debug!(controller = name, %obj_ref, "resource gone; request dropped");
        }
        Err(e) => warn!(controller = name, error = ?e, "reconcile error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_object_clears_backoff() {
        let backoff =
            FailureBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let id = ResourceId::new("ns", "gone");
        backoff.next_delay(&id);
        backoff.next_delay(&id);
        assert_eq!(backoff.tracked(), 1);

        report(
            "enforce",
            &backoff,
            Err(controller::Error::ObjectNotFound(id.object_ref().erase())),
        );
        assert_eq!(backoff.tracked(), 0);
        assert_eq!(backoff.next_delay(&id), Duration::from_millis(100));
    }

    #[test]
    fn reconcile_failure_keeps_backoff() {
        let backoff =
            FailureBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let id = ResourceId::new("ns", "bad");
        backoff.next_delay(&id);

        report(
            "enforce",
            &backoff,
            Err(controller::Error::ReconcilerFailed(
                ReconcileErr::Validation("size".into()),
                id.object_ref().erase(),
            )),
        );
        assert_eq!(backoff.tracked(), 1);
    }
}
