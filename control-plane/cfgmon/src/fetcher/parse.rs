use k8s_openapi::api::core::v1::PodSpec;

use super::{ConfigFormat, FetchedConfig, SourceError};
use crate::crd::monitored_service::{
    ContainerTemplate, EnvEntry, PodTemplate, PortTemplate,
};

pub fn decode(
    format: ConfigFormat,
    body: &[u8],
) -> Result<FetchedConfig, SourceError> {
    match format {
        ConfigFormat::EnvLines => {
            let text = std::str::from_utf8(body).map_err(|e| {
                SourceError::Parse(format!("payload is not UTF-8: {e}"))
            })?;
            Ok(FetchedConfig::Env(parse_env_lines(text)))
        }
        ConfigFormat::PodSpec => parse_pod_spec(body).map(FetchedConfig::Template),
    }
}

/// Parse `KEY=VALUE` lines, keeping file order. Blank lines, `#` comments,
/// lines without `=` and lines with an empty key are skipped.
pub fn parse_env_lines(text: &str) -> Vec<EnvEntry> {
    text.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .filter_map(|l| {
            let (key, value) = l.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(EnvEntry::new(key, value))
        })
        .collect()
}

/// Parse a JSON pod specification into the normalized template. Env vars
/// sourced through `valueFrom` are not representable and are dropped.
pub fn parse_pod_spec(body: &[u8]) -> Result<PodTemplate, SourceError> {
    let spec: PodSpec = serde_json::from_slice(body)
        .map_err(|e| SourceError::Parse(e.to_string()))?;
    if spec.containers.is_empty() {
        return Err(SourceError::Parse("pod spec has no containers".into()));
    }
    let containers = spec
        .containers
        .into_iter()
        .map(|c| ContainerTemplate {
            name: c.name,
            image: c.image.unwrap_or_default(),
            image_pull_policy: c.image_pull_policy,
            ports: c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| PortTemplate {
                    name: p.name,
                    container_port: p.container_port,
                    protocol: p.protocol,
                })
                .collect(),
            env: c
                .env
                .unwrap_or_default()
                .into_iter()
                .filter(|e| e.value_from.is_none())
                .map(|e| EnvEntry::new(e.name, e.value.unwrap_or_default()))
                .collect(),
        })
        .collect();
    Ok(PodTemplate { containers })
}
