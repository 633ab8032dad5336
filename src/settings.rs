use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{defaults, envvars};
use crate::knot::{IntegrationSettings, PersistPolicy};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub user_token: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub request_timeout: Duration,
    pub persist_retry: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let user_token = env::var(envvars::KNOT_USER_TOKEN)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(SettingsError::Missing(envvars::KNOT_USER_TOKEN))?;

        Ok(Settings {
            user_token,
            mqtt_host: env::var(envvars::MQTT_BRIDGE_HOST)
                .unwrap_or_else(|_| defaults::MQTT_BRIDGE_HOST.to_string()),
            mqtt_port: env_parse(envvars::MQTT_BRIDGE_PORT).unwrap_or(defaults::MQTT_BRIDGE_PORT),
            request_timeout: env_parse(envvars::KNOT_REQUEST_TIMEOUT_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults::REQUEST_TIMEOUT),
            persist_retry: env_parse(envvars::KNOT_PERSIST_RETRY_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults::PERSIST_RETRY),
        })
    }

    pub fn integration(&self) -> IntegrationSettings {
        IntegrationSettings {
            user_token: self.user_token.clone(),
            request_timeout: self.request_timeout,
            persist_policy: PersistPolicy::from_retry_window(self.persist_retry),
        }
    }
}

fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value '{raw}' for {var}");
            None
        }
    }
}
