//! Bounded channel carrying "this resource's recorded template changed"
//! signals from the monitor loop to the enforcement loop.
//!
//! A full queue blocks the publisher for at most `publish_timeout`; past
//! that the publish fails with [`RouterError::Timeout`] and the caller's
//! reconcile pass is reported as failed.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

use crate::crd::monitored_service::{MonitoredService, ResourceId};

#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("router queue full; publish for {0} timed out")]
    Timeout(ResourceId),
    #[error("router closed; no subscriber for {0}")]
    Closed(ResourceId),
}

#[derive(Clone, Debug)]
pub struct EventPublisher {
    tx: mpsc::Sender<ResourceId>,
    publish_timeout: Duration,
}

#[derive(Debug)]
pub struct EventSubscriber {
    rx: mpsc::Receiver<ResourceId>,
}

/// Create the router endpoints. There is one subscriber; publishers may be
/// cloned.
pub fn channel(
    capacity: usize,
    publish_timeout: Duration,
) -> (EventPublisher, EventSubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventPublisher { tx, publish_timeout }, EventSubscriber { rx })
}

impl EventPublisher {
    pub async fn publish(&self, id: ResourceId) -> Result<(), RouterError> {
        match self.tx.send_timeout(id.clone(), self.publish_timeout).await {
            Ok(()) => {
                trace!(%id, "router: published");
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                Err(RouterError::Timeout(id))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(RouterError::Closed(id))
            }
        }
    }
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<ResourceId> {
        self.rx.recv().await
    }

    /// Every received identity becomes a reconcile request for that object.
    pub fn into_triggers(
        self,
    ) -> impl Stream<Item = ObjectRef<MonitoredService>> + Send + 'static {
        ReceiverStream::new(self.rx).map(|id| id.object_ref())
    }
}
