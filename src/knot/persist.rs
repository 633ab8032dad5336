use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use kvstore::{KVDb, KVStoreError};
use thiserror::Error;

use crate::constants::keys;
use crate::helpers::backoff_retry;

use super::registry::Snapshot;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("registry store error: {0}")]
    Store(#[from] KVStoreError),
    #[error("registry store lock poisoned")]
    Poisoned,
}

/// Durable home of the registry; every write replaces the whole document
pub trait Persister: Send + Sync {
    fn load(&self) -> Result<Snapshot, PersistError>;
    fn save(&self, devices: &Snapshot) -> Result<(), PersistError>;
}

/// Registry kept as one JSON document in the SQLite key-value store
pub struct KvPersister {
    db: Mutex<KVDb>,
}

impl KvPersister {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        log::debug!("Opening registry store at {}", path.as_ref().display());
        Ok(KvPersister {
            db: Mutex::new(KVDb::new(path)?),
        })
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&KVDb) -> Result<T, KVStoreError>,
    ) -> Result<T, PersistError> {
        let db = self.db.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(f(&db)?)
    }
}

impl Persister for KvPersister {
    fn load(&self) -> Result<Snapshot, PersistError> {
        Ok(self.with_db(|db| db.get::<Snapshot>(keys::DEVICES))?.unwrap_or_default())
    }

    fn save(&self, devices: &Snapshot) -> Result<(), PersistError> {
        self.with_db(|db| db.set(keys::DEVICES, devices))?;
        log::trace!("Persisted {} device(s)", devices.len());
        Ok(())
    }
}

/// Keeps nothing
pub struct NoopPersister;

impl Persister for NoopPersister {
    fn load(&self) -> Result<Snapshot, PersistError> {
        Ok(Snapshot::new())
    }

    fn save(&self, _devices: &Snapshot) -> Result<(), PersistError> {
        Ok(())
    }
}

/// What to do when a registry write fails. Whatever error remains is fatal
/// to the protocol loop, so memory and disk never diverge silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistPolicy {
    CrashStop,
    Retry { max_elapsed: Duration },
}

impl PersistPolicy {
    /// Zero means no retries
    pub fn from_retry_window(max_elapsed: Duration) -> Self {
        if max_elapsed.is_zero() {
            PersistPolicy::CrashStop
        } else {
            PersistPolicy::Retry { max_elapsed }
        }
    }

    /// Retries wait on the runtime timer
    pub async fn save(
        self,
        store: &dyn Persister,
        devices: &Snapshot,
    ) -> Result<(), PersistError> {
        match self {
            PersistPolicy::CrashStop => store.save(devices),
            PersistPolicy::Retry { max_elapsed } => {
                let attempt =
                    move || async move { store.save(devices).map_err(backoff::Error::transient) };
                backoff_retry(attempt, Some(max_elapsed)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::knot::entities::{Device, DeviceUpdate, State};

    struct Flaky {
        failures_left: AtomicU32,
    }

    impl Persister for Flaky {
        fn load(&self) -> Result<Snapshot, PersistError> {
            Ok(Snapshot::new())
        }

        fn save(&self, _devices: &Snapshot) -> Result<(), PersistError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err(KVStoreError::IOError(std::io::Error::other("disk busy")).into())
        }
    }

    fn sample() -> Snapshot {
        let mut device = Device::create(DeviceUpdate::new("0a1b2c3d4e5f6789", "dev1"));
        device.token = "abc".into();
        device.state = State::Publishing;
        Snapshot::from([(device.id.clone(), device)])
    }

    #[test]
    fn kv_round_trip() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("kvs-db/kvstore.db");

        let store = KvPersister::open(&path).unwrap();
        assert!(store.load().unwrap().is_empty());
        store.save(&sample()).unwrap();

        let reopened = KvPersister::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), sample());
    }

    #[test]
    fn policy_from_retry_window() {
        assert_eq!(
            PersistPolicy::from_retry_window(Duration::ZERO),
            PersistPolicy::CrashStop
        );
        assert_eq!(
            PersistPolicy::from_retry_window(Duration::from_secs(5)),
            PersistPolicy::Retry {
                max_elapsed: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test]
    async fn crash_stop_surfaces_first_failure() {
        let store = Flaky {
            failures_left: AtomicU32::new(1),
        };
        assert!(PersistPolicy::CrashStop
            .save(&store, &sample())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn retry_rides_out_transient_failures() {
        let store = Flaky {
            failures_left: AtomicU32::new(1),
        };
        let policy = PersistPolicy::Retry {
            max_elapsed: Duration::from_secs(30),
        };
        assert!(policy.save(&store, &sample()).await.is_ok());
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_gives_up_after_window() {
        let store = Flaky {
            failures_left: AtomicU32::new(u32::MAX),
        };
        let policy = PersistPolicy::Retry {
            max_elapsed: Duration::from_millis(100),
        };
        let res = tokio::time::timeout(Duration::from_secs(5), policy.save(&store, &sample()))
            .await
            .expect("retry window not honoured");
        assert!(matches!(res, Err(PersistError::Store(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn retry_leaves_runtime_running() {
        let store = Flaky {
            failures_left: AtomicU32::new(2),
        };
        let policy = PersistPolicy::Retry {
            max_elapsed: Duration::from_secs(30),
        };
        let ticker = tokio::spawn(async {
            let mut ticks = 0u32;
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks += 1;
                if ticks == 5 {
                    return ticks;
                }
            }
        });

        assert!(policy.save(&store, &sample()).await.is_ok());
        assert!(ticker.is_finished());
        assert_eq!(ticker.await.unwrap(), 5);
    }
}
