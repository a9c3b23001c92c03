use std::{fmt, path::PathBuf};
use tracing::{field, Span};

/// Records a value into a field of the current span and passes it through,
/// so that conversions can be chained without temporaries.
pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_request(self) -> Self {
    self.record_field("request")
  }

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, &field::debug(&self));
    self
  }
}

#[inline]
pub(crate) fn record_request<T: fmt::Debug>(request: T) -> T {
  request.record_request()
}

/// Rejects empty strings for required request fields.
#[inline]
pub(crate) fn required(value: String, error: &'static str) -> Result<String, tonic::Status> {
  if value.is_empty() {
    Err(tonic::Status::invalid_argument(error))
  } else {
    Ok(value)
  }
}

/// Parses a required absolute path. Whether it exists is left to the caller.
pub(crate) fn absolute_path(
  value: String,
  empty: &'static str,
  relative: &'static str,
) -> Result<PathBuf, tonic::Status> {
  let path = PathBuf::from(required(value, empty)?);
  if path.is_absolute() {
    Ok(path)
  } else {
    Err(tonic::Status::invalid_argument(relative))
  }
}
