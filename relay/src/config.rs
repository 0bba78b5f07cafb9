use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 5_000;

pub const ENV_QUEUE_NAME: &str = "RELAY_QUEUE_NAME";
pub const ENV_JSON_QUEUE_NAME: &str = "RELAY_JSON_QUEUE_NAME";
pub const ENV_EXCHANGE_NAME: &str = "RELAY_EXCHANGE_NAME";
pub const ENV_ROUTING_KEY: &str = "RELAY_ROUTING_KEY";
pub const ENV_JSON_ROUTING_KEY: &str = "RELAY_JSON_ROUTING_KEY";
pub const ENV_AMQP_URI: &str = "RELAY_AMQP_URI";
pub const ENV_CONFIRM_TIMEOUT_MS: &str = "RELAY_CONFIRM_TIMEOUT_MS";

/// Process-wide configuration. Built once at startup and handed to each
/// component by reference.
#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub topology: TopologySettings,
    #[serde(default)]
    pub broker: BrokerSettings,
}

/// Names of the exchange, the two queues and their routing keys.
/// None of them has a default.
#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    pub queue_name: String,
    pub json_queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    pub json_routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// AMQP URI. Without it the in-process broker is used.
    pub uri: Option<String>,
    pub confirm_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            uri: None,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
        }
    }
}

impl BrokerSettings {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

impl Settings {
    /// Reads the optional JSON file, applies `RELAY_*` environment
    /// overrides and validates the result.
    pub fn load(config_file_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_file_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(config_file_path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match config_file_path {
            Some(path) => read_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let topology = &mut self.topology;
        for (key, field) in [
            (ENV_QUEUE_NAME, &mut topology.queue_name),
            (ENV_JSON_QUEUE_NAME, &mut topology.json_queue_name),
            (ENV_EXCHANGE_NAME, &mut topology.exchange_name),
            (ENV_ROUTING_KEY, &mut topology.routing_key),
            (ENV_JSON_ROUTING_KEY, &mut topology.json_routing_key),
        ] {
            if let Some(value) = env(key) {
                *field = value;
            }
        }

        if let Some(uri) = env(ENV_AMQP_URI) {
            self.broker.uri = Some(uri);
        }

        if let Some(timeout) = env(ENV_CONFIRM_TIMEOUT_MS) {
            self.broker.confirm_timeout_ms =
                timeout
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        name: "broker.confirm_timeout_ms",
                        reason: e.to_string(),
                    })?;
        }

        if self
            .broker
            .uri
            .as_deref()
            .is_some_and(|uri| uri.trim().is_empty())
        {
            self.broker.uri = None;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let topology = &self.topology;
        for (name, value) in [
            ("topology.queue_name", &topology.queue_name),
            ("topology.json_queue_name", &topology.json_queue_name),
            ("topology.exchange_name", &topology.exchange_name),
            ("topology.routing_key", &topology.routing_key),
            ("topology.json_routing_key", &topology.json_routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingSetting(name));
            }
        }

        if topology.queue_name == topology.json_queue_name {
            return Err(ConfigError::Conflict {
                first: "topology.queue_name",
                second: "topology.json_queue_name",
                value: topology.queue_name.clone(),
            });
        }

        if topology.routing_key == topology.json_routing_key {
            return Err(ConfigError::Conflict {
                first: "topology.routing_key",
                second: "topology.json_routing_key",
                value: topology.routing_key.clone(),
            });
        }

        if self.broker.confirm_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "broker.confirm_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn read_file(config_file_path: &Path) -> Result<Settings, ConfigError> {
    if !config_file_path.exists() {
        return Err(ConfigError::InvalidPath(config_file_path.to_path_buf()));
    }
    let file = File::open(config_file_path)?;
    let reader = BufReader::new(file);
    let settings: Settings = serde_json::from_reader(reader)?;
    Ok(settings)
}
