//! Per-device KNoT lifecycle, driven from a single event stream.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::entities::{Config, Device, DeviceUpdate, Fault, Request, State};
use super::event::Event;
use super::persist::{PersistError, PersistPolicy, Persister};
use super::publisher::Publisher;
use super::registry::{Registry, Snapshot};
use super::timeout::TimeoutSupervisor;
use super::validation::{check_config, check_data};

/// Faults the loop cannot recover from
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("device {id} has no name")]
    MissingName { id: String },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Where an event left the device it concerned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing in the registry matched the event
    Dropped,
    /// The device is parked until something external happens
    Settled { id: String, state: State },
}

pub struct Protocol {
    user_token: String,
    registry: Registry,
    store: Box<dyn Persister>,
    policy: PersistPolicy,
    publisher: Arc<dyn Publisher>,
    supervisor: TimeoutSupervisor,
    relay: flume::Sender<Snapshot>,
}

impl Protocol {
    pub fn new(
        user_token: String,
        devices: Snapshot,
        store: Box<dyn Persister>,
        policy: PersistPolicy,
        publisher: Arc<dyn Publisher>,
        supervisor: TimeoutSupervisor,
        relay: flume::Sender<Snapshot>,
    ) -> Self {
        Protocol {
            user_token,
            registry: Registry::from_snapshot(devices),
            store,
            policy,
            publisher,
            supervisor,
            relay,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Process events until shutdown. Returns early only on a fatal error.
    pub async fn run(
        mut self,
        events: flume::Receiver<Event>,
        shutdown: CancellationToken,
    ) -> Result<(), ProtocolError> {
        self.relay_snapshot();
        self.resume().await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Protocol loop shutting down");
                    return Ok(());
                }
                event = events.recv_async() => match event {
                    Ok(event) => {
                        let id = event.device_id().to_string();
                        let outcome = self.handle(event).await?;
                        log::trace!("Event for device {id} handled: {:?}", outcome);
                    }
                    Err(_) => {
                        log::info!("Event stream closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Pick up where a previous run stopped: outstanding requests are sent
    /// again and every other device is re-evaluated. Stored devices without
    /// a name are left alone.
    pub async fn resume(&mut self) -> Result<(), ProtocolError> {
        let mut ids: Vec<String> = self.registry.devices().keys().cloned().collect();
        ids.sort();
        log::info!("Resuming {} device(s)", ids.len());

        for id in ids {
            let Some(device) = self.registry.get(&id) else {
                continue;
            };
            if device.name.is_empty() {
                log::error!("Stored device {id} has no name; not resuming it");
                continue;
            }
            match Request::from_waiting(device.state) {
                Some(request) => {
                    log::info!("Device {id} was waiting on {request}; sending it again");
                    self.request(&id, request).await?;
                }
                None => {
                    self.drive(id).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn handle(&mut self, event: Event) -> Result<Outcome, ProtocolError> {
        match event {
            Event::Submitted(update) => self.on_submitted(update).await,
            Event::Replied {
                update,
                state,
                fault,
            } => self.on_replied(update, state, fault).await,
            Event::TimedOut { device, pending } => self.on_timed_out(device, pending).await,
        }
    }

    async fn on_submitted(&mut self, update: DeviceUpdate) -> Result<Outcome, ProtocolError> {
        let id = update.id.clone();
        match self.registry.get_mut(&id) {
            Some(device) => {
                log::debug!("Updating device {id} from upstream");
                merge_submission(device, update);
                self.persist().await?;
            }
            None if update.name.is_empty() => {
                log::error!("New device {id} has no name");
                return Err(ProtocolError::MissingName { id });
            }
            None => {
                log::info!("New device {id} ({})", update.name);
                let mut device = Device::create(DeviceUpdate {
                    id: id.clone(),
                    ..Default::default()
                });
                merge_submission(&mut device, update);
                self.registry.upsert(id.clone(), device);
                self.persist().await?;
                self.relay_snapshot();
            }
        }
        self.drive(id).await
    }

    async fn on_replied(
        &mut self,
        update: DeviceUpdate,
        state: State,
        fault: Option<Fault>,
    ) -> Result<Outcome, ProtocolError> {
        let id = update.id.clone();
        let Some(device) = self.registry.get_mut(&id) else {
            log::warn!("Device id {id} received does not match any stored device");
            return Ok(Outcome::Dropped);
        };

        log::info!("Device {id}: {} -> {state}", device.state);
        let token_changed = merge_reply(device, update, fault);
        device.state = state;
        self.persist().await?;
        if token_changed {
            self.relay_snapshot();
        }
        self.drive(id).await
    }

    async fn on_timed_out(
        &mut self,
        device: Device,
        pending: State,
    ) -> Result<Outcome, ProtocolError> {
        let id = device.id;
        let Some(current) = self.registry.get(&id).map(|d| d.state) else {
            log::debug!("Timeout for unknown device {id} dropped");
            return Ok(Outcome::Dropped);
        };

        match Request::from_pending(pending) {
            Some(request) if request.waiting() == current => {
                log::warn!("No reply to {request} for device {id}; sending it again");
                self.request(&id, request).await
            }
            _ => {
                log::debug!("Stale timeout for device {id} ({pending} -> {current}) ignored");
                Ok(Outcome::Settled {
                    id,
                    state: State::Off,
                })
            }
        }
    }

    /// Keep moving the device forward until it has to wait for something
    async fn drive(&mut self, mut id: String) -> Result<Outcome, ProtocolError> {
        loop {
            self.ensure_named(&id)?;
            let Some(device) = self.registry.get_mut(&id) else {
                return Ok(Outcome::Dropped);
            };

            match device.state {
                State::New if !device.token.is_empty() => {
                    log::debug!("Device {id} already holds a token");
                    device.state = State::Registered;
                    self.persist().await?;
                }
                State::New => {
                    id = self.reassign(&id).await?;
                    return self.request(&id, Request::Register).await;
                }
                State::Registered => return self.request(&id, Request::Auth).await,
                State::Authenticated => return self.request(&id, Request::UpdateConfig).await,
                State::Ready => {
                    log::info!("Device {id} is ready to send data");
                    device.state = State::Publishing;
                    self.persist().await?;
                    self.relay_snapshot();
                }
                State::Publishing => {
                    self.publish_pending(&id).await?;
                    return Ok(Outcome::Settled {
                        id,
                        state: State::Publishing,
                    });
                }
                State::AlreadyRegistered if device.token.is_empty() => {
                    id = self.reassign(&id).await?;
                    return self.request(&id, Request::Register).await;
                }
                State::AlreadyRegistered => {
                    device.state = State::Registered;
                    self.persist().await?;
                }
                State::ForceDelete => {
                    log::warn!("Device {id} must register again");
                    id = self.reassign(&id).await?;
                    return self.request(&id, Request::Register).await;
                }
                State::Error => {
                    log::error!("Device {id} failed: {}; starting over", device.error);
                    device.state = State::New;
                    device.error.clear();
                    self.persist().await?;
                }
                state @ (State::WaitingRegister
                | State::WaitingAuth
                | State::WaitingConfig
                | State::Off) => return Ok(Outcome::Settled { id, state }),
            }
        }
    }

    /// Issue `request` for the device, leaving it in the matching waiting state
    async fn request(&mut self, id: &str, request: Request) -> Result<Outcome, ProtocolError> {
        let Some(device) = self.registry.get_mut(id) else {
            return Ok(Outcome::Dropped);
        };
        device.state = request.pending();
        let sent = device.clone();
        device.state = request.waiting();

        self.supervisor.arm(sent.clone(), request.pending());
        self.persist().await?;

        log::info!("Sending {request} request for device {id}");
        let publisher = Arc::clone(&self.publisher);
        let token = self.user_token.clone();
        let res = match request {
            Request::Register => publisher.publish_device_register(&token, &sent).await,
            Request::Auth => publisher.publish_device_auth(&token, &sent).await,
            Request::UpdateConfig => publisher.publish_device_update_config(&token, &sent).await,
        };
        if let Err(e) = res {
            log::error!("Failed to send {request} request for device {id}: {e}");
        }

        Ok(Outcome::Settled {
            id: id.to_string(),
            state: request.waiting(),
        })
    }

    async fn publish_pending(&mut self, id: &str) -> Result<(), ProtocolError> {
        let Some(device) = self.registry.get(id).cloned() else {
            return Ok(());
        };
        if device.data.is_empty() {
            log::debug!("No data pending for device {id}");
            return Ok(());
        }
        if let Err(e) = check_data(&device.data) {
            log::warn!("Skipping data for device {id}: {e}");
            return Ok(());
        }

        let publisher = Arc::clone(&self.publisher);
        let token = self.user_token.clone();
        let res = publisher
            .publish_device_data(&token, &device, &device.data)
            .await;
        match res {
            Ok(()) => {
                log::debug!("Published {} reading(s) for device {id}", device.data.len());
                if let Some(device) = self.registry.get_mut(id) {
                    device.data.clear();
                }
                self.persist().await?;
            }
            Err(e) => log::error!("Failed to publish data for device {id}: {e}"),
        }
        Ok(())
    }

    fn ensure_named(&self, id: &str) -> Result<(), ProtocolError> {
        match self.registry.get(id) {
            Some(device) if device.name.is_empty() => {
                log::error!("Device {id} has no name");
                Err(ProtocolError::MissingName { id: id.to_string() })
            }
            _ => Ok(()),
        }
    }

    async fn reassign(&mut self, id: &str) -> Result<String, ProtocolError> {
        let Some(new_id) = self.registry.reassign(id) else {
            return Ok(id.to_string());
        };
        log::info!("Device {id} is now {new_id}");
        self.persist().await?;
        self.relay_snapshot();
        Ok(new_id)
    }

    async fn persist(&self) -> Result<(), ProtocolError> {
        self.policy
            .save(self.store.as_ref(), self.registry.devices())
            .await
            .map_err(|e| {
                log::error!("Could not persist device registry: {e}");
                e.into()
            })
    }

    fn relay_snapshot(&self) {
        match self.relay.try_send(self.registry.snapshot()) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(_)) => {
                log::trace!("Previous registry snapshot not consumed yet; dropping this one")
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                log::trace!("No registry observer; snapshot dropped")
            }
        }
    }
}

/// Upstream snapshots own the pending data
fn merge_submission(device: &mut Device, update: DeviceUpdate) {
    let DeviceUpdate {
        name,
        token,
        config,
        data,
        ..
    } = update;
    merge_common(device, name, token, config);

    match check_data(&data) {
        Ok(()) => device.data = data,
        Err(e) => {
            if !data.is_empty() {
                log::warn!("Discarding data for device {}: {e}", device.id);
            }
            device.data.clear();
        }
    }
}

/// Returns whether the reply handed the device a new token
fn merge_reply(device: &mut Device, update: DeviceUpdate, fault: Option<Fault>) -> bool {
    let previous = device.token.clone();
    merge_common(device, update.name, update.token, update.config);

    match fault {
        Some(fault) => device.error = fault.to_string(),
        None => device.error.clear(),
    }
    device.token != previous
}

fn merge_common(device: &mut Device, name: String, token: String, config: Vec<Config>) {
    if !name.is_empty() {
        device.name = name;
    }
    if !token.is_empty() {
        device.token = token;
    }
    match check_config(&config) {
        Ok(()) => device.config = config,
        Err(e) => {
            if !config.is_empty() {
                log::warn!("Ignoring config for device {}: {e}", device.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knot::entities::{Config, Data};
    use serde_json::json;

    fn device() -> Device {
        let mut device = Device::create(DeviceUpdate::new("0a1b2c3d4e5f6789", "dev1"));
        device.config = vec![Config {
            sensor_id: 1,
            ..Default::default()
        }];
        device
    }

    fn reading(sensor_id: i32) -> Data {
        Data {
            sensor_id,
            value: Some(json!(1)),
            timestamp: Some(chrono::Utc::now()),
        }
    }

    #[test]
    fn submission_replaces_or_clears_data() {
        let mut dev = device();
        let mut update = DeviceUpdate::new(dev.id.clone(), "");
        update.data = vec![reading(1), reading(2)];
        merge_submission(&mut dev, update);
        assert_eq!(dev.data.len(), 2);
        assert_eq!(dev.name, "dev1");

        let mut update = DeviceUpdate::new(dev.id.clone(), "renamed");
        update.data = vec![reading(1), reading(1)];
        merge_submission(&mut dev, update);
        assert!(dev.data.is_empty());
        assert_eq!(dev.name, "renamed");
    }

    #[test]
    fn invalid_config_is_ignored() {
        let mut dev = device();
        let mut update = DeviceUpdate::new(dev.id.clone(), "");
        update.config = vec![
            Config {
                sensor_id: 2,
                ..Default::default()
            },
            Config {
                sensor_id: 2,
                ..Default::default()
            },
        ];
        merge_submission(&mut dev, update);
        assert_eq!(dev.config.len(), 1);
        assert_eq!(dev.config[0].sensor_id, 1);
    }

    #[test]
    fn reply_records_and_clears_error() {
        let mut dev = device();
        dev.data = vec![reading(1)];

        let update = DeviceUpdate::new(dev.id.clone(), "");
        let changed = merge_reply(
            &mut dev,
            update,
            Some(Fault::Rejected("nope".into())),
        );
        assert!(!changed);
        assert_eq!(dev.error, "nope");
        assert_eq!(dev.data.len(), 1);

        let mut update = DeviceUpdate::new(dev.id.clone(), "");
        update.token = "abc".into();
        assert!(merge_reply(&mut dev, update, None));
        assert!(dev.error.is_empty());
        assert_eq!(dev.token, "abc");
    }
}
