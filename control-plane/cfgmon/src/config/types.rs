use std::time::Duration;

use envconfig::Envconfig;

use crate::fetcher::ConfigFormat;

#[derive(Envconfig, Clone, Debug)]
pub struct CfgmonConfig {
    /// Namespace to watch; all namespaces when unset.
    /// Env: CFGMON_WATCH_NAMESPACE
    #[envconfig(from = "CFGMON_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Monitor loop polling interval in seconds.
    /// Env: CFGMON_POLL_INTERVAL_SECS
    #[envconfig(from = "CFGMON_POLL_INTERVAL_SECS", default = "20")]
    pub poll_interval_secs: u64,

    #[envconfig(from = "CFGMON_FETCH_TIMEOUT_SECS", default = "10")]
    pub fetch_timeout_secs: u64,

    /// env | pod-spec
    #[envconfig(from = "CFGMON_CONFIG_FORMAT", default = "env")]
    pub config_format: String,

    #[envconfig(from = "CFGMON_MONITOR_CONCURRENCY", default = "4")]
    pub monitor_concurrency: u16,

    #[envconfig(from = "CFGMON_ENFORCE_CONCURRENCY", default = "4")]
    pub enforce_concurrency: u16,

    /// Delay before re-checking a resource after a corrective write.
    #[envconfig(from = "CFGMON_REQUEUE_SECS", default = "1")]
    pub requeue_secs: u64,

    #[envconfig(nested)]
    pub router: RouterConfig,

    #[envconfig(nested)]
    pub backoff: BackoffConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RouterConfig {
    /// Bounded queue size between the monitor and enforcement loops
    #[envconfig(from = "CFGMON_ROUTER_CAPACITY", default = "64")]
    pub capacity: usize,
    /// How long a publish may wait on a full queue before it fails
    #[envconfig(from = "CFGMON_ROUTER_PUBLISH_TIMEOUT_MS", default = "5000")]
    pub publish_timeout_ms: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct BackoffConfig {
    #[envconfig(from = "CFGMON_BACKOFF_BASE_MS", default = "500")]
    pub base_ms: u64,
    #[envconfig(from = "CFGMON_BACKOFF_MAX_SECS", default = "300")]
    pub max_secs: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("unknown config format '{0}' (expected 'env' or 'pod-spec')")]
    UnknownFormat(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl CfgmonConfig {
    /// Reject values the loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.config_format()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigValidationError::Zero(
                "CFGMON_POLL_INTERVAL_SECS",
            ));
        }
        if self.router.capacity == 0 {
            return Err(ConfigValidationError::Zero("CFGMON_ROUTER_CAPACITY"));
        }
        if self.monitor_concurrency == 0 || self.enforce_concurrency == 0 {
            return Err(ConfigValidationError::Zero("concurrency"));
        }
        Ok(())
    }

    pub fn config_format(&self) -> Result<ConfigFormat, ConfigValidationError> {
        match self.config_format.to_ascii_lowercase().as_str() {
            "env" | "text" => Ok(ConfigFormat::EnvLines),
            "pod-spec" | "podspec" | "json" => Ok(ConfigFormat::PodSpec),
            other => Err(ConfigValidationError::UnknownFormat(other.into())),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.router.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CfgmonConfig {
        CfgmonConfig {
            watch_namespace: None,
            http_port: 8088,
            poll_interval_secs: 20,
            fetch_timeout_secs: 10,
            config_format: "env".into(),
            monitor_concurrency: 4,
            enforce_concurrency: 4,
            requeue_secs: 1,
            router: RouterConfig {
                capacity: 64,
                publish_timeout_ms: 5000,
            },
            backoff: BackoffConfig {
                base_ms: 500,
                max_secs: 300,
            },
        }
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.config_format().unwrap(), ConfigFormat::EnvLines);
    }

    #[test]
    fn format_aliases() {
        let mut cfg = base();
        for f in ["pod-spec", "PodSpec", "json"] {
            cfg.config_format = f.into();
            assert_eq!(cfg.config_format().unwrap(), ConfigFormat::PodSpec);
        }
        cfg.config_format = "yaml".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigValidationError::UnknownFormat(_))
        ));
    }

    #[test]
    fn zero_values_rejected() {
        let mut cfg = base();
        cfg.router.capacity = 0;
        assert!(matches!(cfg.validate(), Err(ConfigValidationError::Zero(_))));

        let mut cfg = base();
        cfg.poll_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
