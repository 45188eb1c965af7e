use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub mod errors;
pub mod merge_patch;
pub mod metrics;
pub mod retry;
pub mod statefulset;
pub mod utils;

use crate::errors::Error;
use crate::retry::{WaitConfig, DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
pub use crate::statefulset::{KubeStatefulSetClient, StatefulSetClient, StatefulSetDeployer, Values};

/// Raw settings read from the environment.
#[derive(Deserialize, Debug, Clone)]
pub struct EtcdEnvironmentConfig {
    #[serde(default = "default_values_file")]
    pub values_file: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_wait_interval_seconds")]
    pub wait_interval_seconds: u64,
    #[serde(default = "default_wait_timeout_seconds")]
    pub wait_timeout_seconds: u64,
}

fn default_values_file() -> String {
    "/etc/etcd-statefulset/values.yaml".to_owned()
}

fn default_action() -> String {
    "deploy".to_owned()
}

fn default_wait_interval_seconds() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

fn default_wait_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for EtcdEnvironmentConfig {
    fn default() -> Self {
        EtcdEnvironmentConfig {
            values_file: default_values_file(),
            action: default_action(),
            wait_interval_seconds: default_wait_interval_seconds(),
            wait_timeout_seconds: default_wait_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create or patch the StatefulSet, then wait until it is ready.
    Deploy,
    /// Delete the StatefulSet, then wait until it is gone.
    Destroy,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub values_file: PathBuf,
    pub action: Action,
    pub wait: WaitConfig,
}

impl Config {
    pub fn from_env_config(env_config: EtcdEnvironmentConfig) -> Result<Self, Error> {
        let action = match env_config.action.to_lowercase().as_str() {
            "deploy" => Action::Deploy,
            "destroy" => Action::Destroy,
            other => return Err(Error::Config(format!("unknown action '{}'", other))),
        };
        if env_config.wait_interval_seconds == 0 {
            return Err(Error::Config("wait interval must be greater than zero".to_owned()));
        }
        if env_config.wait_timeout_seconds < env_config.wait_interval_seconds {
            return Err(Error::Config(format!(
                "wait timeout ({}s) is shorter than the wait interval ({}s)",
                env_config.wait_timeout_seconds, env_config.wait_interval_seconds
            )));
        }

        Ok(Config {
            values_file: PathBuf::from(env_config.values_file),
            action,
            wait: WaitConfig {
                interval: Duration::from_secs(env_config.wait_interval_seconds),
                timeout: Duration::from_secs(env_config.wait_timeout_seconds),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env_config(EtcdEnvironmentConfig::default()).unwrap();
        assert_eq!(config.action, Action::Deploy);
        assert_eq!(config.wait, WaitConfig::default());
        assert_eq!(config.values_file, PathBuf::from("/etc/etcd-statefulset/values.yaml"));
    }

    #[test]
    fn test_config_from_env_vars() {
        let vars = vec![
            ("ACTION".to_owned(), "Destroy".to_owned()),
            ("WAIT_INTERVAL_SECONDS".to_owned(), "2".to_owned()),
            ("WAIT_TIMEOUT_SECONDS".to_owned(), "30".to_owned()),
        ];
        let env_config: EtcdEnvironmentConfig = envy::from_iter(vars).unwrap();
        let config = Config::from_env_config(env_config).unwrap();
        assert_eq!(config.action, Action::Destroy);
        assert_eq!(config.wait.interval, Duration::from_secs(2));
        assert_eq!(config.wait.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        let unknown = EtcdEnvironmentConfig {
            action: "restart".to_owned(),
            ..EtcdEnvironmentConfig::default()
        };
        assert!(matches!(Config::from_env_config(unknown), Err(Error::Config(_))));

        let inverted = EtcdEnvironmentConfig {
            wait_interval_seconds: 10,
            wait_timeout_seconds: 5,
            ..EtcdEnvironmentConfig::default()
        };
        assert!(Config::from_env_config(inverted).is_err());
    }
}
