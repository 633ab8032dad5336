use super::entities::{Device, DeviceUpdate, Fault, State};

/// Everything the protocol loop reacts to, in arrival order
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Snapshot handed over by the upstream source; carries no state
    Submitted(DeviceUpdate),
    /// Decoded cloud reply, already mapped to the state it implies
    Replied {
        update: DeviceUpdate,
        state: State,
        fault: Option<Fault>,
    },
    /// No reply seen within the request window. `device` is the snapshot taken
    /// when the request went out and `pending` the state it was sent from.
    TimedOut { device: Device, pending: State },
}

impl Event {
    pub fn device_id(&self) -> &str {
        match self {
            Event::Submitted(update) => &update.id,
            Event::Replied { update, .. } => &update.id,
            Event::TimedOut { device, .. } => &device.id,
        }
    }
}
