use std::time::Duration;

pub const LOG_LEVEL: &str = "INFO";

pub const MQTT_BRIDGE_HOST: &str = "localhost";
pub const MQTT_BRIDGE_PORT: u16 = 1883;
pub const MQTT_CLIENT_PREFIX: &str = "knotgw";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
// Zero means crash-stop on the first failed registry write
pub const PERSIST_RETRY: Duration = Duration::ZERO;

pub const DEVICE_ID_BYTES: usize = 8;
