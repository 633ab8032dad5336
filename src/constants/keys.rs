// Keys in the SQLite store
pub const DEVICES: &str = "devices";
