//! Typed view of the `parameters` bag of a `CreateVolume` request.

use std::{collections::BTreeMap, collections::HashMap, fmt, str::FromStr};
use thiserror::Error;
use tracing::warn;

/// Keys the external provisioner adds on its own. They carry no meaning
/// for the backend.
const SIDECAR_PREFIX: &str = "csi.storage.k8s.io/";

pub const MAX_TAGS: usize = 5;

#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
  #[error("Unknown volume parameter '{0}'")]
  UnknownKey(String),

  #[error("Invalid value '{value}' for volume parameter '{key}': {reason}")]
  Invalid {
    key: &'static str,
    value: String,
    reason: &'static str,
  },
}

impl From<ParameterError> for tonic::Status {
  fn from(value: ParameterError) -> Self {
    tonic::Status::invalid_argument(value.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeType {
  Year,
  Month,
  Dynamic,
  Postpay,
}

impl ChargeType {
  pub fn as_str(self) -> &'static str {
    match self {
      ChargeType::Year => "Year",
      ChargeType::Month => "Month",
      ChargeType::Dynamic => "Dynamic",
      ChargeType::Postpay => "Postpay",
    }
  }
}

impl FromStr for ChargeType {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "year" => Ok(ChargeType::Year),
      "month" => Ok(ChargeType::Month),
      "dynamic" => Ok(ChargeType::Dynamic),
      "postpay" => Ok(ChargeType::Postpay),
      _ => Err(()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceLevel {
  Pl0,
  Pl1,
  Pl2,
  Pl3,
}

impl fmt::Display for PerformanceLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let level = match self {
      PerformanceLevel::Pl0 => "PL0",
      PerformanceLevel::Pl1 => "PL1",
      PerformanceLevel::Pl2 => "PL2",
      PerformanceLevel::Pl3 => "PL3",
    };

    f.write_str(level)
  }
}

impl FromStr for PerformanceLevel {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "PL0" => Ok(PerformanceLevel::Pl0),
      "PL1" => Ok(PerformanceLevel::Pl1),
      "PL2" => Ok(PerformanceLevel::Pl2),
      "PL3" => Ok(PerformanceLevel::Pl3),
      _ => Err(()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParameters {
  /// Disk types to try, in order of preference. Never empty.
  pub disk_types: Vec<String>,
  pub charge_type: Option<ChargeType>,
  pub zone: Option<String>,
  pub project_id: Option<String>,
  pub tags: BTreeMap<String, String>,
  pub purchase_time: Option<u32>,
  pub performance_level: Option<PerformanceLevel>,
}

fn non_empty(key: &'static str, value: &str) -> Result<String, ParameterError> {
  let value = value.trim();
  if value.is_empty() {
    return Err(ParameterError::Invalid {
      key,
      value: value.into(),
      reason: "must not be empty",
    });
  }

  Ok(value.into())
}

impl VolumeParameters {
  pub fn parse(
    parameters: &HashMap<String, String>,
    default_disk_type: &str,
  ) -> Result<Self, ParameterError> {
    let mut result = VolumeParameters {
      disk_types: vec![default_disk_type.to_owned()],
      charge_type: None,
      zone: None,
      project_id: None,
      tags: BTreeMap::new(),
      purchase_time: None,
      performance_level: None,
    };

    for (key, value) in parameters {
      match key.as_str() {
        "type" => {
          let types: Vec<String> = value
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

          if types.is_empty() {
            return Err(ParameterError::Invalid {
              key: "type",
              value: value.clone(),
              reason: "expected a comma separated list of disk types",
            });
          }

          result.disk_types = types;
        }

        "chargetype" => {
          let charge_type = value.parse().map_err(|_| ParameterError::Invalid {
            key: "chargetype",
            value: value.clone(),
            reason: "expected one of year, month, dynamic or postpay",
          })?;
          result.charge_type = Some(charge_type);
        }

        "zone" => result.zone = Some(non_empty("zone", value)?),
        "projectid" => result.project_id = Some(non_empty("projectid", value)?),
        "tags" => result.tags = parse_tags(value),

        "purchasetime" => {
          let time = value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|t| *t > 0)
            .ok_or_else(|| ParameterError::Invalid {
              key: "purchasetime",
              value: value.clone(),
              reason: "expected a positive integer",
            })?;
          result.purchase_time = Some(time);
        }

        "performanceLevel" => {
          let level = value.parse().map_err(|_| ParameterError::Invalid {
            key: "performanceLevel",
            value: value.clone(),
            reason: "expected one of PL0, PL1, PL2 or PL3",
          })?;
          result.performance_level = Some(level);
        }

        key if key.starts_with(SIDECAR_PREFIX) => (),
        key => return Err(ParameterError::UnknownKey(key.to_owned())),
      }
    }

    Ok(result)
  }

  /// Identifies the storage class for zone scheduling.
  pub fn storage_class_key(&self) -> String {
    self.disk_types.join(",")
  }
}

/// Parses `key~value;key~value`. Malformed entries are skipped, and only
/// the first [`MAX_TAGS`] well formed entries are kept.
pub fn parse_tags(raw: &str) -> BTreeMap<String, String> {
  let mut tags = BTreeMap::new();

  for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
    let mut parts = entry.split('~');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
      (Some(key), Some(value), None) if !key.trim().is_empty() && !value.trim().is_empty() => {
        (key.trim(), value.trim())
      }
      _ => {
        warn!(entry, "Skipping malformed volume tag");
        continue;
      }
    };

    if tags.len() >= MAX_TAGS && !tags.contains_key(key) {
      warn!(key, "Dropping volume tag, at most {} tags are kept", MAX_TAGS);
      continue;
    }

    tags.insert(key.to_owned(), value.to_owned());
  }

  tags
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect()
  }

  fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect()
  }

  #[test_case("dfa~daffd;fdasf~d12223=;ff~;hh", &[("dfa", "daffd"), ("fdasf", "d12223=")] ; "skips malformed entries")]
  #[test_case("", &[] ; "empty")]
  #[test_case("a~b~c;d~e", &[("d", "e")] ; "more than one separator")]
  #[test_case(";;a~b;", &[("a", "b")] ; "empty entries")]
  #[test_case("~v;k~", &[] ; "missing key or value")]
  #[test_case("a~1;b~2;c~3;d~4;e~5;f~6", &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] ; "at most five")]
  fn parses_tags(raw: &str, expected: &[(&str, &str)]) {
    assert_eq!(parse_tags(raw), tags(expected));
  }

  #[test]
  fn defaults_to_configured_disk_type() {
    let parsed = VolumeParameters::parse(&HashMap::new(), "cloud_ssd").expect("valid");

    assert_eq!(parsed.disk_types, vec!["cloud_ssd".to_owned()]);
    assert_eq!(parsed.storage_class_key(), "cloud_ssd");
    assert!(parsed.tags.is_empty());
  }

  #[test]
  fn parses_every_known_key() {
    let parsed = VolumeParameters::parse(
      &params(&[
        ("type", "RSSD, cloud_ssd"),
        ("chargetype", "Month"),
        ("zone", "cn-bj2-05"),
        ("projectid", "org-1"),
        ("tags", "team~storage"),
        ("purchasetime", "3"),
        ("performanceLevel", "pl2"),
        ("csi.storage.k8s.io/pvc/name", "data"),
      ]),
      "cloud_ssd",
    )
    .expect("valid");

    assert_eq!(parsed.disk_types, vec!["rssd".to_owned(), "cloud_ssd".to_owned()]);
    assert_eq!(parsed.storage_class_key(), "rssd,cloud_ssd");
    assert_eq!(parsed.charge_type, Some(ChargeType::Month));
    assert_eq!(parsed.zone.as_deref(), Some("cn-bj2-05"));
    assert_eq!(parsed.project_id.as_deref(), Some("org-1"));
    assert_eq!(parsed.tags, tags(&[("team", "storage")]));
    assert_eq!(parsed.purchase_time, Some(3));
    assert_eq!(parsed.performance_level, Some(PerformanceLevel::Pl2));
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let err = VolumeParameters::parse(&params(&[("fstype", "xfs")]), "cloud_ssd")
      .expect_err("unknown key");

    assert_eq!(err, ParameterError::UnknownKey("fstype".into()));
    assert_eq!(
      tonic::Status::from(err).code(),
      tonic::Code::InvalidArgument
    );
  }

  #[test_case("type", " , ")]
  #[test_case("chargetype", "weekly")]
  #[test_case("zone", "")]
  #[test_case("projectid", "  ")]
  #[test_case("purchasetime", "0")]
  #[test_case("purchasetime", "soon")]
  #[test_case("performanceLevel", "PL9")]
  fn malformed_values_are_rejected(key: &str, value: &str) {
    let err = VolumeParameters::parse(&params(&[(key, value)]), "cloud_ssd")
      .expect_err("malformed value");

    assert!(
      matches!(err, ParameterError::Invalid { key: k, .. } if k == key),
      "unexpected error {:?}",
      err
    );
  }
}
