use crate::{
  config::WaiterConfig,
  storage::{BackendVolume, StorageService, VolumeStatus},
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
  #[error("Timed out after {elapsed:?} waiting for volume {volume_id} to become {expected}")]
  Timeout {
    volume_id: String,
    expected: String,
    elapsed: Duration,
  },
}

impl From<WaitError> for tonic::Status {
  fn from(value: WaitError) -> Self {
    tonic::Status::internal(value.to_string())
  }
}

/// Polls the backend until a volume satisfies a predicate.
///
/// Fetch failures are logged and retried until the deadline. Dropping the
/// returned future stops polling.
#[derive(Debug, Clone, Copy)]
pub struct StatusWaiter {
  poll_interval: Duration,
  timeout: Duration,
}

impl StatusWaiter {
  pub fn new(config: &WaiterConfig) -> Self {
    StatusWaiter {
      poll_interval: config.poll_interval,
      timeout: config.timeout,
    }
  }

  pub async fn wait_for(
    &self,
    storage: &dyn StorageService,
    volume_id: &str,
    status: VolumeStatus,
  ) -> Result<BackendVolume, WaitError> {
    self
      .wait_until(storage, volume_id, status.as_str(), |v| v.status == status)
      .await
  }

  /// `expected` describes the awaited state in the timeout error.
  pub async fn wait_until<F>(
    &self,
    storage: &dyn StorageService,
    volume_id: &str,
    expected: &str,
    done: F,
  ) -> Result<BackendVolume, WaitError>
  where
    F: Fn(&BackendVolume) -> bool + Send + Sync,
  {
    let poll = async {
      loop {
        match storage.get_volume(volume_id).await {
          Ok(volume) if done(&volume) => return volume,
          Ok(volume) => debug!(volume_id, status = %volume.status, expected, "Volume not ready yet"),
          Err(e) => warn!(volume_id, error = %e, "Failed to fetch volume status, retrying"),
        }

        tokio::time::sleep(self.poll_interval).await;
      }
    };

    tokio::time::timeout(self.timeout, poll)
      .await
      .map_err(|_| WaitError::Timeout {
        volume_id: volume_id.to_owned(),
        expected: expected.to_owned(),
        elapsed: self.timeout,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{storage::StorageError, testing::FakeStorage};
  use tokio::time::Instant;

  fn waiter() -> StatusWaiter {
    StatusWaiter::new(&WaiterConfig {
      poll_interval: Duration::from_secs(1),
      timeout: Duration::from_secs(10),
    })
  }

  #[tokio::test(start_paused = true)]
  async fn returns_once_status_is_observed() {
    let storage = FakeStorage::new();
    let id = storage.insert_volume("pvc-1", 10, VolumeStatus::Attaching);
    storage.script_status(
      &id,
      vec![
        Err(StorageError::Backend("connection reset".into())),
        Err(StorageError::NotFound(id.clone())),
        Ok(VolumeStatus::Attaching),
        Ok(VolumeStatus::InUse),
      ],
    );

    let started = Instant::now();
    let volume = waiter()
      .wait_for(&storage, &id, VolumeStatus::InUse)
      .await
      .expect("status observed");

    assert_eq!(volume.status, VolumeStatus::InUse);
    assert_eq!(storage.calls().get, 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn times_out_when_status_never_appears() {
    let storage = FakeStorage::new();
    let id = storage.insert_volume("pvc-1", 10, VolumeStatus::Detaching);

    let started = Instant::now();
    let err = waiter()
      .wait_for(&storage, &id, VolumeStatus::Available)
      .await
      .expect_err("never available");

    assert_eq!(
      err,
      WaitError::Timeout {
        volume_id: id.clone(),
        expected: "available".into(),
        elapsed: Duration::from_secs(10),
      }
    );
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert!(err.to_string().contains(&id));
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::Internal);
  }

  #[tokio::test(start_paused = true)]
  async fn persistent_fetch_errors_end_in_timeout() {
    let storage = FakeStorage::new();

    let err = waiter()
      .wait_for(&storage, "vol-missing", VolumeStatus::Available)
      .await
      .expect_err("volume never shows up");

    assert!(matches!(err, WaitError::Timeout { .. }));
  }

  #[tokio::test(start_paused = true)]
  async fn waits_on_arbitrary_predicates() {
    let storage = FakeStorage::new();
    let id = storage.insert_volume("pvc-1", 10, VolumeStatus::Extending);
    storage.script_status(&id, vec![Ok(VolumeStatus::Extending), Ok(VolumeStatus::InUse)]);

    let volume = waiter()
      .wait_until(&storage, &id, "done extending", |v| {
        v.status != VolumeStatus::Extending
      })
      .await
      .expect("expansion finished");

    assert_eq!(volume.status, VolumeStatus::InUse);
  }
}
