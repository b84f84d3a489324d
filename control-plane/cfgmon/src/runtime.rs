use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::{task::JoinHandle, try_join};

use crate::{
    config::CfgmonConfig,
    controller::{
        EnforceContext, MonitorContext, backoff::FailureBackoff, events,
        router::{self, EventSubscriber},
        run_enforcement, run_monitor,
    },
    fetcher::HttpConfigFetcher,
    store::{KubeStore, ResourceStore},
    web::run_http_server,
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &CfgmonConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

fn backoff_of(cfg: &CfgmonConfig) -> FailureBackoff {
    FailureBackoff::new(
        Duration::from_millis(cfg.backoff.base_ms),
        Duration::from_secs(cfg.backoff.max_secs),
    )
}

pub fn spawn_monitor(
    client: Client,
    cfg: CfgmonConfig,
    ctx: MonitorContext,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_monitor(client, &cfg, Arc::new(ctx)).await })
}

pub fn spawn_enforcement(
    client: Client,
    cfg: CfgmonConfig,
    ctx: EnforceContext,
    subscriber: EventSubscriber,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        run_enforcement(client, &cfg, Arc::new(ctx), subscriber).await
    })
}

pub fn spawn_http(addr: SocketAddr) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr).await })
}

/// Start both loops and the HTTP server, and wait until any of them finishes.
pub async fn run_all(client: Client, cfg: CfgmonConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
    let fetcher =
        Arc::new(HttpConfigFetcher::new(cfg.config_format()?, cfg.fetch_timeout())?);
    let (publisher, subscriber) =
        router::channel(cfg.router.capacity, cfg.publish_timeout());

    let monitor_ctx = MonitorContext {
        store: store.clone(),
        fetcher,
        publisher,
        recorder: Some(events::recorder(client.clone())),
        backoff: backoff_of(&cfg),
    };
    let enforce_ctx = EnforceContext {
        store,
        recorder: Some(events::recorder(client.clone())),
        backoff: backoff_of(&cfg),
        requeue_after: cfg.requeue_after(),
    };

    let monitor = spawn_monitor(client.clone(), cfg.clone(), monitor_ctx);
    let enforcer = spawn_enforcement(client, cfg, enforce_ctx, subscriber);
    let http = spawn_http(http_addr);

    let (m_res, e_res, h_res) = try_join!(monitor, enforcer, http)?;
    m_res?;
    e_res?;
    h_res?;
    Ok(())
}
