//! Device model shared by the registry, the protocol loop and the bus adapters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ALREADY_REGISTERED_MSG: &str = "thing is already registered";
pub const THING_NOT_FOUND_MSG: &str = "failed to validate if config is valid: error getting thing metadata: thing not found on thing's service";

/// Lifecycle stage of a device on the KNoT network
///
/// The serialized names are the ones found in persisted registries and must not change.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    #[serde(rename = "new")]
    New,
    #[serde(rename = "alreadyRegistered")]
    AlreadyRegistered,
    #[serde(rename = "registered")]
    Registered,
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "readyToSendData")]
    Ready,
    #[serde(rename = "SendData")]
    Publishing,
    #[serde(rename = "waitResponseRegister")]
    WaitingRegister,
    #[serde(rename = "waitResponseAuth")]
    WaitingAuth,
    #[serde(rename = "waitResponseConfig")]
    WaitingConfig,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "forceDelete")]
    ForceDelete,
    #[serde(rename = "ignore")]
    Off,
}

impl State {
    pub const ALL: [State; 12] = [
        State::New,
        State::AlreadyRegistered,
        State::Registered,
        State::Authenticated,
        State::Ready,
        State::Publishing,
        State::WaitingRegister,
        State::WaitingAuth,
        State::WaitingConfig,
        State::Error,
        State::ForceDelete,
        State::Off,
    ];
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::New => "new",
            State::AlreadyRegistered => "alreadyRegistered",
            State::Registered => "registered",
            State::Authenticated => "authenticated",
            State::Ready => "readyToSendData",
            State::Publishing => "SendData",
            State::WaitingRegister => "waitResponseRegister",
            State::WaitingAuth => "waitResponseAuth",
            State::WaitingConfig => "waitResponseConfig",
            State::Error => "error",
            State::ForceDelete => "forceDelete",
            State::Off => "ignore",
        };
        f.write_str(name)
    }
}

/// Outbound request that puts a device into a waiting state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Register,
    Auth,
    UpdateConfig,
}

impl Request {
    /// State the device is in when the request is issued
    pub fn pending(self) -> State {
        match self {
            Request::Register => State::New,
            Request::Auth => State::Registered,
            Request::UpdateConfig => State::Authenticated,
        }
    }

    /// State the device holds until the reply arrives
    pub fn waiting(self) -> State {
        match self {
            Request::Register => State::WaitingRegister,
            Request::Auth => State::WaitingAuth,
            Request::UpdateConfig => State::WaitingConfig,
        }
    }

    pub fn from_pending(state: State) -> Option<Self> {
        match state {
            State::New => Some(Request::Register),
            State::Registered => Some(Request::Auth),
            State::Authenticated => Some(Request::UpdateConfig),
            _ => None,
        }
    }

    pub fn from_waiting(state: State) -> Option<Self> {
        match state {
            State::WaitingRegister => Some(Request::Register),
            State::WaitingAuth => Some(Request::Auth),
            State::WaitingConfig => Some(Request::UpdateConfig),
            _ => None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Register => f.write_str("register"),
            Request::Auth => f.write_str("auth"),
            Request::UpdateConfig => f.write_str("update config"),
        }
    }
}

/// Reason carried by an error reply from the cloud
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    #[error("{}", ALREADY_REGISTERED_MSG)]
    AlreadyRegistered,
    #[error("{}", THING_NOT_FOUND_MSG)]
    ThingNotFound,
    #[error("{0}")]
    Rejected(String),
}

impl Fault {
    /// An empty message means the reply carried no error
    pub fn parse(message: &str) -> Option<Self> {
        let message = message.trim();
        if message.is_empty() {
            None
        } else if message == ALREADY_REGISTERED_MSG {
            Some(Fault::AlreadyRegistered)
        } else if message == THING_NOT_FOUND_MSG || message.contains("thing not found") {
            Some(Fault::ThingNotFound)
        } else {
            Some(Fault::Rejected(message.to_string()))
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Schema {
    pub value_type: i32,
    pub unit: i32,
    pub type_id: i32,
    pub name: String,
}

/// When the cloud expects a sensor to report
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventRule {
    pub change: bool,
    pub time_sec: i32,
    pub lower_threshold: Option<Value>,
    pub upper_threshold: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub sensor_id: i32,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub event: EventRule,
}

/// One sensor reading waiting to be published
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub sensor_id: i32,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub config: Vec<Config>,
    pub state: State,
    #[serde(default)]
    pub data: Vec<Data>,
    #[serde(default)]
    pub error: String,
}

impl Device {
    /// A device entering the registry for the first time
    pub fn create(update: DeviceUpdate) -> Self {
        Device {
            id: update.id,
            token: update.token,
            name: update.name,
            config: update.config,
            state: State::New,
            data: update.data,
            error: String::new(),
        }
    }
}

/// State-less view of a device, as handed over by the upstream source or
/// decoded from a cloud reply. Empty fields mean "unchanged".
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DeviceUpdate {
    pub id: String,
    pub name: String,
    pub token: String,
    pub config: Vec<Config>,
    pub data: Vec<Data>,
}

impl DeviceUpdate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        DeviceUpdate {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}
