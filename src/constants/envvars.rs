pub const DATA_DIR: &str = "AE_DATA_DIR";
pub const ROOT_DIR: &str = "AE_ROOT_DIR";

pub const SNAP: &str = "SNAP";
pub const SNAP_COMMON: &str = "SNAP_COMMON";

pub const LOG_LEVEL: &str = "LOGGING_LEVEL";

pub const MQTT_BRIDGE_HOST: &str = "MQTT_BRIDGE_HOST";
pub const MQTT_BRIDGE_PORT: &str = "MQTT_BRIDGE_PORT";

pub const KNOT_USER_TOKEN: &str = "KNOT_USER_TOKEN";
pub const KNOT_REQUEST_TIMEOUT_SECS: &str = "KNOT_REQUEST_TIMEOUT_SECS";
pub const KNOT_PERSIST_RETRY_SECS: &str = "KNOT_PERSIST_RETRY_SECS";
