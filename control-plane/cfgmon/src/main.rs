use cfgmon::{config::CfgmonConfig, init_tracing, runtime};
use envconfig::Envconfig;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // Ensure rustls uses the aws-lc-rs provider explicitly.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = CfgmonConfig::init_from_env()?;
    cfg.validate()?;
    info!(?cfg, "Starting cfgmon");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
