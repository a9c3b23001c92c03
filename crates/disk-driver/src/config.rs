use crate::capacity::{format_bytes, GIB};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

/// Everything the controller and node services need to know about their
/// environment. Loading it from flags or a file is left to the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
  /// Plugin name reported by `GetPluginInfo`.
  pub name: String,
  pub version: String,
  pub region: String,
  pub zone: Option<String>,
  pub project_id: Option<String>,

  /// Backend instance id of the node this process runs on.
  pub node_id: String,

  /// Name of the node object in the cluster directory.
  pub node_name: String,

  /// Role label value of nodes that may receive volumes.
  pub node_role: String,

  pub default_disk_type: String,
  pub default_fs_type: String,

  /// Disk types matching this pattern are exposed as nvme devices.
  pub premium_disk_types: String,

  pub capacity: CapacityConfig,
  pub expand_enabled: bool,
  pub max_volumes_per_node: u64,
  pub waiter: WaiterConfig,

  #[serde(deserialize_with = "seconds")]
  pub attach_settle_delay: Duration,

  #[serde(deserialize_with = "seconds")]
  pub udev_settle_delay: Duration,

  /// How recent a duplicate volume must be for it to be cleaned up
  /// automatically.
  #[serde(deserialize_with = "seconds")]
  pub duplicate_window: Duration,

  pub registration_backoff: BackoffConfig,
}

impl Default for DriverConfig {
  fn default() -> Self {
    DriverConfig {
      name: "blockdisk.csi.io".into(),
      version: env!("CARGO_PKG_VERSION").into(),
      region: String::new(),
      zone: None,
      project_id: None,
      node_id: String::new(),
      node_name: String::new(),
      node_role: "node".into(),
      default_disk_type: "cloud_ssd".into(),
      default_fs_type: "ext4".into(),
      premium_disk_types: "^(rssd|essd)".into(),
      capacity: CapacityConfig::default(),
      expand_enabled: true,
      max_volumes_per_node: 16,
      waiter: WaiterConfig::default(),
      attach_settle_delay: Duration::from_secs(1),
      udev_settle_delay: Duration::from_secs(1),
      duplicate_window: Duration::from_secs(60),
      registration_backoff: BackoffConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
  pub min_bytes: u64,
  pub max_bytes: u64,

  /// Size used when a caller gives no capacity range at all.
  pub default_bytes: u64,
}

impl Default for CapacityConfig {
  fn default() -> Self {
    CapacityConfig {
      min_bytes: GIB,
      max_bytes: 8000 * GIB,
      default_bytes: 10 * GIB,
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WaiterConfig {
  #[serde(deserialize_with = "seconds")]
  pub poll_interval: Duration,

  #[serde(deserialize_with = "seconds")]
  pub timeout: Duration,
}

impl Default for WaiterConfig {
  fn default() -> Self {
    WaiterConfig {
      poll_interval: Duration::from_secs(1),
      timeout: Duration::from_secs(60),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
  #[serde(deserialize_with = "seconds")]
  pub initial: Duration,
  pub factor: f64,
  pub steps: u32,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    BackoffConfig {
      initial: Duration::from_millis(500),
      factor: 2.0,
      steps: 5,
    }
  }
}

impl BackoffConfig {
  /// The delay to sleep after the given (zero based) failed attempt.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = self.factor.max(1.0).powi(attempt as i32);
    self.initial.mul_f64(factor)
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Driver name must not be empty")]
  EmptyName,

  #[error("Default capacity {default} must lie between {min} and {max}")]
  DefaultCapacityOutOfRange {
    min: String,
    default: String,
    max: String,
  },

  #[error("Poll interval must be greater than zero")]
  ZeroPollInterval,

  #[error("Poll interval {poll_interval:?} must be shorter than the wait timeout {timeout:?}")]
  PollIntervalTooLong {
    poll_interval: Duration,
    timeout: Duration,
  },

  #[error("Invalid premium disk type pattern: {0}")]
  InvalidPattern(#[from] regex::Error),
}

impl DriverConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.name.is_empty() {
      return Err(ConfigError::EmptyName);
    }

    let capacity = &self.capacity;
    if capacity.min_bytes > capacity.default_bytes || capacity.default_bytes > capacity.max_bytes {
      return Err(ConfigError::DefaultCapacityOutOfRange {
        min: format_bytes(capacity.min_bytes),
        default: format_bytes(capacity.default_bytes),
        max: format_bytes(capacity.max_bytes),
      });
    }

    let waiter = &self.waiter;
    if waiter.poll_interval == Duration::from_secs(0) {
      return Err(ConfigError::ZeroPollInterval);
    }

    if waiter.poll_interval >= waiter.timeout {
      return Err(ConfigError::PollIntervalTooLong {
        poll_interval: waiter.poll_interval,
        timeout: waiter.timeout,
      });
    }

    regex::Regex::new(&self.premium_disk_types)?;
    Ok(())
  }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  use serde::de::Error;

  let secs = f64::deserialize(deserializer)?;
  if !secs.is_finite() || secs < 0.0 {
    return Err(D::Error::custom(format!(
      "expected a non-negative number of seconds, got {}",
      secs
    )));
  }

  Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    DriverConfig::default()
      .validate()
      .expect("default config is valid");
  }

  #[test]
  fn durations_parse_from_fractional_seconds() {
    let config: DriverConfig = serde_json::from_str(
      r#"{
        "name": "disk.example.com",
        "waiter": { "poll_interval": 0.25, "timeout": 30 },
        "attach_settle_delay": 1.5,
        "capacity": { "max_bytes": 1099511627776 }
      }"#,
    )
    .expect("config parses");

    assert_eq!(config.name, "disk.example.com");
    assert_eq!(config.waiter.poll_interval, Duration::from_millis(250));
    assert_eq!(config.waiter.timeout, Duration::from_secs(30));
    assert_eq!(config.attach_settle_delay, Duration::from_millis(1500));
    assert_eq!(config.capacity.max_bytes, 1024 * GIB);
    assert_eq!(config.capacity.min_bytes, GIB);
    assert_eq!(config.duplicate_window, Duration::from_secs(60));
  }

  #[test]
  fn negative_durations_are_rejected() {
    let err = serde_json::from_str::<DriverConfig>(r#"{ "udev_settle_delay": -1 }"#)
      .expect_err("negative delay");
    assert!(err.to_string().contains("non-negative"));
  }

  #[test]
  fn empty_name_is_rejected() {
    let config = DriverConfig {
      name: String::new(),
      ..Default::default()
    };

    assert!(matches!(config.validate(), Err(ConfigError::EmptyName)));
  }

  #[test]
  fn default_capacity_must_lie_within_limits() {
    let config = DriverConfig {
      capacity: CapacityConfig {
        min_bytes: 20 * GIB,
        max_bytes: 100 * GIB,
        default_bytes: 10 * GIB,
      },
      ..Default::default()
    };

    let err = config.validate().expect_err("default below minimum");
    assert_eq!(
      err.to_string(),
      "Default capacity 10Gi must lie between 20Gi and 100Gi"
    );
  }

  #[test]
  fn poll_interval_must_be_shorter_than_timeout() {
    let mut config = DriverConfig::default();
    config.waiter.poll_interval = Duration::from_secs(0);
    assert!(matches!(config.validate(), Err(ConfigError::ZeroPollInterval)));

    config.waiter.poll_interval = Duration::from_secs(60);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::PollIntervalTooLong { .. })
    ));
  }

  #[test]
  fn invalid_premium_pattern_is_rejected() {
    let config = DriverConfig {
      premium_disk_types: "(rssd".into(),
      ..Default::default()
    };

    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidPattern(_))
    ));
  }

  #[test]
  fn backoff_grows_by_factor() {
    let backoff = BackoffConfig {
      initial: Duration::from_secs(1),
      factor: 2.0,
      steps: 4,
    };

    assert_eq!(backoff.delay(0), Duration::from_secs(1));
    assert_eq!(backoff.delay(2), Duration::from_secs(4));
  }
}
