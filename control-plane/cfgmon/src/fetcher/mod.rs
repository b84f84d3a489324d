//! Config Fetcher: one GET per call, no retries. Retry policy lives in the
//! monitor loop's triggers.

mod parse;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::crd::monitored_service::{EnvEntry, PodTemplate};

pub use parse::{decode, parse_env_lines, parse_pod_spec};

/// Wire format served by the configuration endpoint. One is active per
/// process; payloads are never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `KEY=VALUE` per line
    EnvLines,
    /// JSON pod specification
    PodSpec,
}

/// Normalized result of a fetch.
#[derive(Debug, Clone)]
pub enum FetchedConfig {
    Env(Vec<EnvEntry>),
    Template(PodTemplate),
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("config source replied with HTTP {0}")]
    Status(u16),
    #[error("malformed config: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn is_parse(&self) -> bool {
        matches!(self, SourceError::Parse(_))
    }
}

#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<FetchedConfig, SourceError>;
}

#[derive(Clone, Debug)]
pub struct HttpConfigFetcher {
    client: reqwest::Client,
    format: ConfigFormat,
}

impl HttpConfigFetcher {
    pub fn new(
        format: ConfigFormat,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, format })
    }
}

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    #[instrument(level = "debug", skip(self), fields(format = ?self.format))]
    async fn fetch(&self, source: &str) -> Result<FetchedConfig, SourceError> {
        let resp = self.client.get(source).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        debug!(bytes = body.len(), "fetched config payload");
        decode(self.format, &body)
    }
}
