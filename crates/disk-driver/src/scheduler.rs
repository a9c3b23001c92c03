use crate::{
  cluster::ClusterNodeDirectory,
  error::{Context, DriverError},
};
use std::{
  collections::{BTreeSet, HashMap},
  sync::{Mutex, PoisonError},
};
use tracing::debug;

/// Spreads volumes of each storage class round-robin over the zones that
/// have schedulable nodes.
#[derive(Debug, Default)]
pub struct ZoneScheduler {
  counters: Mutex<HashMap<String, usize>>,
}

impl ZoneScheduler {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn next_zone(
    &self,
    directory: &dyn ClusterNodeDirectory,
    role: &str,
    storage_class: &str,
  ) -> Result<String, DriverError> {
    let zones: Vec<String> = directory
      .list_nodes(role)
      .await
      .context("list nodes with role", role)?
      .iter()
      .filter_map(|node| node.zone())
      .map(str::to_owned)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();

    if zones.is_empty() {
      return Err(DriverError::NoZone(storage_class.to_owned()));
    }

    let index = {
      let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
      let counter = counters
        .entry(storage_class.to_owned())
        .or_insert_with(|| rand::random::<u32>() as usize);
      let index = *counter % zones.len();
      *counter = counter.wrapping_add(1);
      index
    };

    debug!(storage_class, zone = %zones[index], "Scheduled volume zone");
    Ok(zones[index].clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakeDirectory;
  use std::collections::HashSet;

  fn directory() -> FakeDirectory {
    let directory = FakeDirectory::new();
    directory.add_node("node-a", Some("zone-b"), true);
    directory.add_node("node-b", Some("zone-a"), true);
    directory.add_node("node-c", Some("zone-c"), true);
    directory.add_node("node-d", Some("zone-a"), true);
    directory.add_node("node-e", None, true);
    directory
  }

  #[tokio::test]
  async fn cycles_through_every_zone() {
    let directory = directory();
    let scheduler = ZoneScheduler::new();

    let mut picked = Vec::new();
    for _ in 0..4 {
      picked.push(
        scheduler
          .next_zone(&directory, "node", "rssd")
          .await
          .expect("zones available"),
      );
    }

    let distinct: HashSet<_> = picked[..3].iter().cloned().collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(picked[3], picked[0]);
  }

  #[tokio::test]
  async fn storage_classes_have_their_own_counters() {
    let directory = directory();
    let scheduler = ZoneScheduler::new();

    let first = scheduler
      .next_zone(&directory, "node", "rssd")
      .await
      .expect("zones available");
    for _ in 0..5 {
      scheduler
        .next_zone(&directory, "node", "cloud_ssd")
        .await
        .expect("zones available");
    }
    scheduler
      .next_zone(&directory, "node", "rssd")
      .await
      .expect("zones available");
    let fourth = {
      scheduler
        .next_zone(&directory, "node", "rssd")
        .await
        .expect("zones available");
      scheduler
        .next_zone(&directory, "node", "rssd")
        .await
        .expect("zones available")
    };

    assert_eq!(first, fourth);
  }

  #[tokio::test]
  async fn no_zones_is_an_error() {
    let directory = FakeDirectory::new();
    directory.add_node("node-a", None, true);

    let err = ZoneScheduler::new()
      .next_zone(&directory, "node", "rssd")
      .await
      .expect_err("no zones");

    assert!(matches!(err, DriverError::NoZone(_)));
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::Internal);
  }
}
