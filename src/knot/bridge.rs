//! Handle through which the rest of the gateway talks to the protocol loop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::entities::DeviceUpdate;
use super::event::Event;
use super::persist::{PersistError, PersistPolicy, Persister};
use super::protocol::{Protocol, ProtocolError};
use super::publisher::Publisher;
use super::registry::Snapshot;
use super::timeout::TimeoutSupervisor;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("could not load device registry: {0}")]
    Load(#[from] PersistError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("protocol loop panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct IntegrationSettings {
    pub user_token: String,
    pub request_timeout: Duration,
    pub persist_policy: PersistPolicy,
}

/// A running protocol loop plus the channels feeding it
pub struct Integration {
    events: flume::Sender<Event>,
    snapshots: flume::Receiver<Snapshot>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ProtocolError>>,
}

impl Integration {
    /// Load the stored registry and spawn the loop. Must be called from within a tokio runtime.
    pub fn start(
        settings: IntegrationSettings,
        store: Box<dyn Persister>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, BridgeError> {
        let devices = store.load()?;
        log::info!("Loaded {} device(s) from the registry", devices.len());

        let (events_tx, events_rx) = flume::unbounded();
        // Holds at most one unread snapshot; newer ones are dropped until it is taken
        let (relay_tx, relay_rx) = flume::bounded(1);
        let shutdown = CancellationToken::new();

        let supervisor =
            TimeoutSupervisor::new(events_tx.clone(), settings.request_timeout, shutdown.clone());
        let protocol = Protocol::new(
            settings.user_token,
            devices,
            store,
            settings.persist_policy,
            publisher,
            supervisor,
            relay_tx,
        );

        let loop_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let res = protocol.run(events_rx, loop_shutdown.clone()).await;
            if let Err(e) = &res {
                log::error!("Protocol loop stopped: {e}");
            }
            // Take every other task down with the loop
            loop_shutdown.cancel();
            res
        });

        Ok(Integration {
            events: events_tx,
            snapshots: relay_rx,
            shutdown,
            handle,
        })
    }

    /// Hand a device snapshot to the loop. Never fails towards the caller.
    pub async fn submit(&self, update: DeviceUpdate) {
        let id = update.id.clone();
        if self.events.send_async(Event::Submitted(update)).await.is_err() {
            log::warn!("Protocol loop is gone; submission for device {id} dropped");
        }
    }

    /// Latest registry snapshot the loop relayed, if one is waiting
    pub fn poll_registry_snapshot(&self) -> Option<Snapshot> {
        self.snapshots.try_recv().ok()
    }

    /// Snapshot stream, for consumers that would rather wait
    pub fn snapshots(&self) -> flume::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Entry point for decoded bus messages
    pub fn events(&self) -> flume::Sender<Event> {
        self.events.clone()
    }

    /// Cancelled on shutdown or when the loop stops on its own
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the loop and every pending timer, returning the loop's result
    pub async fn close(self) -> Result<(), BridgeError> {
        self.shutdown.cancel();
        self.handle.await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::knot::entities::{Data, Device};
    use crate::knot::persist::NoopPersister;
    use crate::knot::publisher::PublishError;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for Recorder {
        async fn publish_device_register(
            &self,
            _token: &str,
            device: &Device,
        ) -> Result<(), PublishError> {
            self.sent.lock().unwrap().push(format!("register {}", device.id));
            Ok(())
        }

        async fn publish_device_auth(
            &self,
            _token: &str,
            device: &Device,
        ) -> Result<(), PublishError> {
            self.sent.lock().unwrap().push(format!("auth {}", device.id));
            Ok(())
        }

        async fn publish_device_update_config(
            &self,
            _token: &str,
            device: &Device,
        ) -> Result<(), PublishError> {
            self.sent.lock().unwrap().push(format!("config {}", device.id));
            Ok(())
        }

        async fn publish_device_data(
            &self,
            _token: &str,
            device: &Device,
            _data: &[Data],
        ) -> Result<(), PublishError> {
            self.sent.lock().unwrap().push(format!("data {}", device.id));
            Ok(())
        }
    }

    fn settings() -> IntegrationSettings {
        IntegrationSettings {
            user_token: "user-token".into(),
            request_timeout: Duration::from_secs(20),
            persist_policy: PersistPolicy::CrashStop,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_and_poll() {
        let recorder = Arc::new(Recorder::default());
        let integration =
            Integration::start(settings(), Box::new(NoopPersister), recorder.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(integration.poll_registry_snapshot(), Some(Snapshot::new()));
        assert_eq!(integration.poll_registry_snapshot(), None);

        integration.submit(DeviceUpdate::new("", "dev1")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = integration.poll_registry_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("register "));

        integration.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unread_snapshot_holds_off_newer_ones() {
        let recorder = Arc::new(Recorder::default());
        let integration =
            Integration::start(settings(), Box::new(NoopPersister), recorder.clone()).unwrap();

        // The startup snapshot stays unread while the device is created and renamed
        integration.submit(DeviceUpdate::new("", "dev1")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);

        assert_eq!(integration.poll_registry_snapshot(), Some(Snapshot::new()));
        assert_eq!(integration.poll_registry_snapshot(), None);

        integration.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_cancels_shutdown_token() {
        let integration =
            Integration::start(settings(), Box::new(NoopPersister), Arc::new(Recorder::default()))
                .unwrap();
        let token = integration.shutdown_token();

        // Nameless devices cannot be onboarded
        integration.submit(DeviceUpdate::new("a1", "")).await;
        token.cancelled().await;

        assert!(matches!(
            integration.close().await,
            Err(BridgeError::Protocol(ProtocolError::MissingName { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_loop() {
        let integration =
            Integration::start(settings(), Box::new(NoopPersister), Arc::new(Recorder::default()))
                .unwrap();
        let events = integration.events();

        integration.close().await.unwrap();
        assert!(events
            .send(Event::Submitted(DeviceUpdate::new("a1", "dev1")))
            .is_err());
    }
}
