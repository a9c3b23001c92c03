use crate::config::CapacityConfig;
use csi_proto::volume::CapacityRange;
use thiserror::Error;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapacityError {
  #[error("{field} {value} is less than the minimum supported size {minimum}")]
  BelowMinimum {
    field: &'static str,
    value: String,
    minimum: String,
  },

  #[error("{field} {value} is greater than the maximum supported size {maximum}")]
  AboveMaximum {
    field: &'static str,
    value: String,
    maximum: String,
  },

  #[error("limit_bytes {limit} is less than required_bytes {required}")]
  LimitBelowRequired { required: String, limit: String },

  #[error("no whole GiB size lies between {lower} and {upper}")]
  NoWholeGib { lower: String, upper: String },
}

impl From<CapacityError> for tonic::Status {
  fn from(value: CapacityError) -> Self {
    use tonic::{Code, Status};

    let code = match &value {
      CapacityError::LimitBelowRequired { .. } => Code::InvalidArgument,
      _ => Code::OutOfRange,
    };

    Status::new(code, value.to_string())
  }
}

/// Formats a byte count with the largest binary prefix that divides it.
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [(u64, &str); 4] = [(TIB, "Ti"), (GIB, "Gi"), (MIB, "Mi"), (KIB, "Ki")];

  if bytes == 0 {
    return "0".into();
  }

  for &(size, suffix) in UNITS.iter() {
    if bytes % size == 0 {
      return format!("{}{}", bytes / size, suffix);
    }
  }

  bytes.to_string()
}

/// Volumes are sized in whole GiB, rounding up.
pub fn bytes_to_gib(bytes: u64) -> u64 {
  (bytes + GIB - 1) / GIB
}

fn check_bounds(
  field: &'static str,
  value: u64,
  limits: &CapacityConfig,
) -> Result<u64, CapacityError> {
  if value < limits.min_bytes {
    return Err(CapacityError::BelowMinimum {
      field,
      value: format_bytes(value),
      minimum: format_bytes(limits.min_bytes),
    });
  }

  if value > limits.max_bytes {
    return Err(CapacityError::AboveMaximum {
      field,
      value: format_bytes(value),
      maximum: format_bytes(limits.max_bytes),
    });
  }

  Ok(value)
}

/// Resolves a requested capacity range to the number of bytes to allocate.
///
/// The lower bound wins when both bounds are given. Without a range the
/// configured default is used.
pub fn extract_storage(
  range: Option<&CapacityRange>,
  limits: &CapacityConfig,
) -> Result<u64, CapacityError> {
  let range = match range {
    None => return Ok(limits.default_bytes),
    Some(range) => range,
  };

  match *range {
    CapacityRange::AtLeast(required) => check_bounds("required_bytes", required.get(), limits),
    CapacityRange::AtMost(limit) => check_bounds("limit_bytes", limit.get(), limits),
    CapacityRange::Between(required, limit) => {
      let (required, limit) = (required.get(), limit.get());
      if limit < required {
        return Err(CapacityError::LimitBelowRequired {
          required: format_bytes(required),
          limit: format_bytes(limit),
        });
      }

      check_bounds("limit_bytes", limit, limits)?;
      check_bounds("required_bytes", required, limits)
    }
  }
}

/// Resolves a requested capacity range to a whole number of GiB.
///
/// Rounding up never crosses the upper bound. When it would, the size is
/// rounded down instead, provided that still covers the lower bound.
pub fn allocate_gib(
  range: Option<&CapacityRange>,
  limits: &CapacityConfig,
) -> Result<u64, CapacityError> {
  let bytes = extract_storage(range, limits)?;
  let upper = range
    .and_then(CapacityRange::limit_bytes)
    .map_or(limits.max_bytes, |limit| limit.min(limits.max_bytes));
  let lower = range
    .and_then(CapacityRange::required_bytes)
    .map_or(limits.min_bytes, |required| required.max(limits.min_bytes));

  let rounded_up = bytes_to_gib(bytes);
  if rounded_up * GIB <= upper {
    return Ok(rounded_up);
  }

  let rounded_down = bytes / GIB;
  if rounded_down > 0 && rounded_down * GIB >= lower {
    return Ok(rounded_down);
  }

  Err(CapacityError::NoWholeGib {
    lower: format_bytes(lower),
    upper: format_bytes(upper),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::num::NonZeroU64;
  use test_case::test_case;

  fn limits() -> CapacityConfig {
    CapacityConfig {
      min_bytes: GIB,
      max_bytes: 100 * GIB,
      default_bytes: 10 * GIB,
    }
  }

  fn nz(bytes: u64) -> NonZeroU64 {
    NonZeroU64::new(bytes).expect("non-zero size")
  }

  #[test_case(0, "0")]
  #[test_case(512, "512")]
  #[test_case(2 * KIB, "2Ki")]
  #[test_case(MIB + KIB, "1025Ki")]
  #[test_case(10 * GIB, "10Gi")]
  #[test_case(3 * TIB, "3Ti")]
  fn formats_binary_prefixes(bytes: u64, expected: &str) {
    assert_eq!(format_bytes(bytes), expected);
  }

  #[test_case(1, 1)]
  #[test_case(GIB, 1)]
  #[test_case(GIB + 1, 2)]
  #[test_case(20 * GIB, 20)]
  fn rounds_up_to_whole_gib(bytes: u64, gib: u64) {
    assert_eq!(bytes_to_gib(bytes), gib);
  }

  #[test]
  fn missing_range_uses_default() {
    assert_eq!(extract_storage(None, &limits()), Ok(10 * GIB));
  }

  #[test_case(CapacityRange::AtLeast(nz(5 * GIB)), 5 * GIB ; "lower bound")]
  #[test_case(CapacityRange::AtMost(nz(50 * GIB)), 50 * GIB ; "upper bound")]
  #[test_case(CapacityRange::Between(nz(5 * GIB), nz(50 * GIB)), 5 * GIB ; "prefers lower bound")]
  #[test_case(CapacityRange::Between(nz(GIB), nz(GIB)), GIB ; "equal bounds")]
  #[test_case(CapacityRange::Between(nz(100 * GIB), nz(100 * GIB)), 100 * GIB ; "maximum")]
  fn valid_ranges_resolve_within_limits(range: CapacityRange, expected: u64) {
    let limits = limits();
    let bytes = extract_storage(Some(&range), &limits).expect("range is valid");

    assert_eq!(bytes, expected);
    assert!(bytes >= limits.min_bytes && bytes <= limits.max_bytes);
  }

  #[test_case(CapacityRange::AtLeast(nz(MIB)), "required_bytes 1Mi is less than the minimum supported size 1Gi" ; "lower bound too small")]
  #[test_case(CapacityRange::AtLeast(nz(200 * GIB)), "required_bytes 200Gi is greater than the maximum supported size 100Gi" ; "lower bound too large")]
  #[test_case(CapacityRange::AtMost(nz(512 * MIB)), "limit_bytes 512Mi is less than the minimum supported size 1Gi" ; "upper bound too small")]
  #[test_case(CapacityRange::AtMost(nz(2 * TIB)), "limit_bytes 2Ti is greater than the maximum supported size 100Gi" ; "upper bound too large")]
  #[test_case(CapacityRange::Between(nz(10 * GIB), nz(5 * GIB)), "limit_bytes 5Gi is less than required_bytes 10Gi" ; "bounds out of order")]
  #[test_case(CapacityRange::Between(nz(MIB), nz(5 * GIB)), "required_bytes 1Mi is less than the minimum supported size 1Gi" ; "both given lower too small")]
  #[test_case(CapacityRange::Between(nz(5 * GIB), nz(200 * GIB)), "limit_bytes 200Gi is greater than the maximum supported size 100Gi" ; "both given upper too large")]
  fn invalid_ranges_name_value_and_bound(range: CapacityRange, message: &str) {
    let err = extract_storage(Some(&range), &limits()).expect_err("range is invalid");
    assert_eq!(err.to_string(), message);
  }

  #[test_case(None, 10 ; "default")]
  #[test_case(Some(CapacityRange::AtLeast(nz(GIB + GIB / 2))), 2 ; "lower bound rounds up")]
  #[test_case(Some(CapacityRange::AtMost(nz(GIB + GIB / 2))), 1 ; "upper bound rounds down")]
  #[test_case(Some(CapacityRange::Between(nz(GIB + 1), nz(3 * GIB))), 2 ; "rounds up within bounds")]
  #[test_case(Some(CapacityRange::Between(nz(GIB), nz(GIB + GIB / 2))), 1 ; "whole lower bound")]
  fn allocates_whole_gib_within_bounds(range: Option<CapacityRange>, expected: u64) {
    let gib = allocate_gib(range.as_ref(), &limits()).expect("allocatable");
    assert_eq!(gib, expected);
  }

  #[test]
  fn allocation_never_exceeds_the_limit() {
    let half = GIB + GIB / 2;
    let err = allocate_gib(Some(&CapacityRange::Between(nz(half), nz(half))), &limits())
      .expect_err("no whole GiB fits");

    assert_eq!(
      err.to_string(),
      "no whole GiB size lies between 1536Mi and 1536Mi"
    );
    assert_eq!(tonic::Status::from(err).code(), tonic::Code::OutOfRange);
  }

  #[test]
  fn allocation_stays_below_the_configured_maximum() {
    let limits = CapacityConfig {
      max_bytes: 10 * GIB + GIB / 2,
      ..limits()
    };

    let err = allocate_gib(Some(&CapacityRange::AtLeast(nz(10 * GIB + 1))), &limits)
      .expect_err("rounding up crosses the maximum");
    assert!(matches!(err, CapacityError::NoWholeGib { .. }));
  }

  #[test]
  fn error_codes() {
    let out_of_range = extract_storage(Some(&CapacityRange::AtLeast(nz(MIB))), &limits())
      .expect_err("too small");
    assert_eq!(tonic::Status::from(out_of_range).code(), tonic::Code::OutOfRange);

    let unordered = extract_storage(
      Some(&CapacityRange::Between(nz(10 * GIB), nz(5 * GIB))),
      &limits(),
    )
    .expect_err("out of order");
    assert_eq!(tonic::Status::from(unordered).code(), tonic::Code::InvalidArgument);
  }
}
