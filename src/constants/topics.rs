// Inbound routing keys, published by the KNoT cloud
pub const DEVICE_REGISTERED: &str = "device.registered";
pub const DEVICE_UNREGISTERED: &str = "device.unregistered";
pub const DEVICE_AUTH_REPLY: &str = "device.auth.reply";
pub const DEVICE_CONFIG_UPDATED: &str = "device.config.updated";

// Outbound requests
pub const DEVICE_REGISTER: &str = "device.register";
pub const DEVICE_AUTH: &str = "device.auth";
pub const DEVICE_CONFIG_SENT: &str = "device.config.sent";
pub const DATA_SENT: &str = "data.sent";

// Local side of the gateway
pub const GATEWAY_DEVICE: &str = "gateway/device";
pub const GATEWAY_REGISTRY: &str = "gateway/registry";
