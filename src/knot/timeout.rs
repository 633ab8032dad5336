use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::entities::{Device, State};
use super::event::Event;

/// Re-injects a timeout event for every request that goes out
///
/// Timers are never cancelled individually: the protocol loop decides on
/// delivery whether a timeout is still relevant. All pending timers stop on
/// shutdown, and one that fires into a closed stream is dropped.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    events: flume::Sender<Event>,
    delay: Duration,
    shutdown: CancellationToken,
}

impl TimeoutSupervisor {
    pub fn new(events: flume::Sender<Event>, delay: Duration, shutdown: CancellationToken) -> Self {
        TimeoutSupervisor {
            events,
            delay,
            shutdown,
        }
    }

    pub fn arm(&self, device: Device, pending: State) {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.delay;
        log::trace!("Arming {:?} timeout for device {} ({})", delay, device.id, pending);

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let id = device.id.clone();
                    if events.send_async(Event::TimedOut { device, pending }).await.is_err() {
                        log::debug!("Event stream closed; dropping timeout for device {id}");
                    }
                }
            }
        });
    }
}
