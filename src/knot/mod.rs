pub mod bridge;
pub mod dispatcher;
pub mod entities;
pub mod event;
pub mod persist;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod timeout;
pub mod validation;

pub use bridge::{BridgeError, Integration, IntegrationSettings};
pub use dispatcher::{dispatch, DispatchError, RoutingKey};
pub use entities::{Config, Data, Device, DeviceUpdate, Fault, State};
pub use event::Event;
pub use persist::{KvPersister, NoopPersister, PersistError, PersistPolicy, Persister};
pub use protocol::{Outcome, Protocol, ProtocolError};
pub use publisher::{MqttPublisher, PublishError, Publisher};
pub use registry::{Registry, Snapshot};
pub use timeout::TimeoutSupervisor;
