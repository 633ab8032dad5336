//! Turns cloud replies into protocol events.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::topics;

use super::entities::{DeviceUpdate, Fault, State};
use super::event::Event;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown routing key '{0}'")]
    UnknownRoutingKey(String),
    #[error("could not decode message body: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingKey {
    Registered,
    Unregistered,
    AuthReply,
    ConfigUpdated,
}

impl RoutingKey {
    pub const ALL: [RoutingKey; 4] = [
        RoutingKey::Registered,
        RoutingKey::Unregistered,
        RoutingKey::AuthReply,
        RoutingKey::ConfigUpdated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoutingKey::Registered => topics::DEVICE_REGISTERED,
            RoutingKey::Unregistered => topics::DEVICE_UNREGISTERED,
            RoutingKey::AuthReply => topics::DEVICE_AUTH_REPLY,
            RoutingKey::ConfigUpdated => topics::DEVICE_CONFIG_UPDATED,
        }
    }
}

impl FromStr for RoutingKey {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownRoutingKey(s.to_string()))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Minimal reply body shared by every routing key
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    id: String,
    name: String,
    token: Option<String>,
    error: Option<String>,
}

/// Decode one bus message. Messages under unknown routing keys yield `Ok(None)`.
pub fn dispatch(routing_key: &str, body: &[u8]) -> Result<Option<Event>, DispatchError> {
    let key = match routing_key.parse::<RoutingKey>() {
        Ok(key) => key,
        Err(e) => {
            log::debug!("Ignoring message: {e}");
            return Ok(None);
        }
    };
    let envelope: Envelope = serde_json::from_slice(body)?;
    Ok(Some(event_from_envelope(key, envelope)))
}

fn event_from_envelope(key: RoutingKey, envelope: Envelope) -> Event {
    let fault = envelope.error.as_deref().and_then(Fault::parse);
    let mut update = DeviceUpdate::new(envelope.id, envelope.name);

    let state = match key {
        RoutingKey::Registered => match fault {
            None => {
                // Only a registration reply may hand out a token
                update.token = envelope.token.unwrap_or_default();
                State::Registered
            }
            Some(Fault::AlreadyRegistered) => State::AlreadyRegistered,
            Some(_) => State::Error,
        },
        RoutingKey::Unregistered => State::ForceDelete,
        RoutingKey::AuthReply => match fault {
            None => State::Authenticated,
            Some(_) => State::ForceDelete,
        },
        RoutingKey::ConfigUpdated => match fault {
            None => State::Ready,
            Some(Fault::ThingNotFound) => State::Authenticated,
            Some(_) => State::Error,
        },
    };

    log::info!(
        "Received {} for device {}{}",
        key,
        update.id,
        fault
            .as_ref()
            .map(|f| format!(" with error: {f}"))
            .unwrap_or_default()
    );

    Event::Replied {
        update,
        state,
        fault,
    }
}
