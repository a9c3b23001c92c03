use super::{Volume, VolumeStatus};
use crate::proto;
use std::{
  convert::{TryFrom, TryInto},
  num::NonZeroU32,
};
use thiserror::Error;

#[derive(Debug)]
pub struct ListVolumesRequest {
  max_entries: Option<NonZeroU32>,
  starting_token: Option<String>,
}

impl ListVolumesRequest {
  /// If specified (non-zero value), the Plugin MUST NOT return more
  /// entries than this number in the response. If the actual number of
  /// entries is more than this number, the Plugin MUST set `next_token`
  /// in the response which can be used to get the next page of entries
  /// in the subsequent `ListVolumes` call. This field is OPTIONAL. If
  /// not specified (zero value), it means there is no restriction on the
  /// number of entries that can be returned.
  #[inline]
  pub fn max_entries(&self) -> Option<NonZeroU32> {
    self.max_entries
  }

  /// A token to specify where to start paginating. Set this field to
  /// `next_token` returned by a previous `ListVolumes` call to get the
  /// next page of entries. This field is OPTIONAL.
  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }
}

impl TryFrom<proto::ListVolumesRequest> for ListVolumesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListVolumesRequest) -> Result<Self, Self::Error> {
    let max_entries = match value.max_entries {
      v if v < 0 => {
        return Err(tonic::Status::invalid_argument(
          "ListVolumesRequest.max_entries was less than 0",
        ))
      }
      v => NonZeroU32::new(v as u32),
    };

    let starting_token = match value.starting_token {
      v if v.is_empty() => None,
      v => Some(v),
    };

    Ok(ListVolumesRequest {
      max_entries,
      starting_token,
    })
  }
}

#[derive(Debug)]
pub struct VolumeListEntry {
  /// The volume
  volume: Volume,
  /// This field is OPTIONAL. This field MUST be specified if the
  /// LIST_VOLUMES_PUBLISHED_NODES controller capability is
  /// supported.
  status: Option<VolumeStatus>,
}

impl VolumeListEntry {
  pub fn new(volume: Volume, status: Option<VolumeStatus>) -> Self {
    VolumeListEntry { volume, status }
  }

  #[inline]
  pub fn volume(&self) -> &Volume {
    &self.volume
  }

  #[inline]
  pub fn status(&self) -> Option<&VolumeStatus> {
    self.status.as_ref()
  }
}

impl TryFrom<VolumeListEntry> for proto::list_volumes_response::Entry {
  type Error = tonic::Status;

  fn try_from(value: VolumeListEntry) -> Result<Self, Self::Error> {
    let volume = Some(value.volume.into());
    let status = value.status.map(Into::into);

    Ok(proto::list_volumes_response::Entry { volume, status })
  }
}

#[derive(Debug)]
pub struct ListVolumesResponse {
  /// The volume entires.
  entries: Vec<VolumeListEntry>,
  /// This token allows you to get the next page of entries for
  /// `ListVolumes` request. If the number of entries is larger than
  /// `max_entries`, use the `next_token` as a value for the
  /// `starting_token` field in the next `ListVolumes` request. This
  /// field is OPTIONAL.
  /// An empty string is equal to an unspecified field value.
  next_token: Option<String>,
}

impl ListVolumesResponse {
  /// A complete listing, without a next page.
  pub fn new(entries: Vec<VolumeListEntry>) -> Self {
    ListVolumesResponse {
      entries,
      next_token: None,
    }
  }

  #[inline]
  pub fn entries(&self) -> &[VolumeListEntry] {
    &self.entries
  }
}

impl TryFrom<ListVolumesResponse> for proto::ListVolumesResponse {
  type Error = tonic::Status;

  fn try_from(value: ListVolumesResponse) -> Result<Self, Self::Error> {
    let entries = value
      .entries
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;
    let next_token = value.next_token.unwrap_or_default();

    Ok(proto::ListVolumesResponse {
      entries,
      next_token,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ListVolumesError {
  /// Indicates that `starting_token` is not valid.
  #[error("Invalid `starting_token`: {0}")]
  InvalidStartingToken(String),

  /// The plugin always lists every volume at once.
  #[error("Paginated listing is not supported")]
  PaginationUnsupported,

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ListVolumesError> for tonic::Status {
  fn from(value: ListVolumesError) -> Self {
    use tonic::{Code, Status};

    match value {
      ListVolumesError::Other(v) => v,
      value => {
        let code = match &value {
          ListVolumesError::InvalidStartingToken(_) => Code::Aborted,
          ListVolumesError::PaginationUnsupported => Code::Unimplemented,
          ListVolumesError::Other(_) => unreachable!(),
        };

        Status::new(code, value.to_string())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(0, "" => Ok((None, None)) ; "unpaged")]
  #[test_case(10, "" => Ok((Some(10), None)) ; "max entries")]
  #[test_case(0, "tok" => Ok((None, Some("tok".to_owned()))) ; "starting token")]
  #[test_case(-1, "" => Err(tonic::Code::InvalidArgument) ; "negative max entries")]
  fn paging_fields(
    max_entries: i32,
    starting_token: &str,
  ) -> Result<(Option<u32>, Option<String>), tonic::Code> {
    ListVolumesRequest::try_from(proto::ListVolumesRequest {
      max_entries,
      starting_token: starting_token.into(),
    })
    .map(|r| {
      (
        r.max_entries().map(NonZeroU32::get),
        r.starting_token().map(ToOwned::to_owned),
      )
    })
    .map_err(|e| e.code())
  }

  #[test]
  fn entries_keep_published_nodes() {
    let entry = VolumeListEntry::new(
      Volume::new("vol-1", 1 << 30),
      Some(VolumeStatus::new(vec!["node-1".into()], None)),
    );
    let response: proto::ListVolumesResponse = ListVolumesResponse::new(vec![entry])
      .try_into()
      .unwrap();

    assert_eq!(response.next_token, "");
    let status = response.entries[0].status.as_ref().unwrap();
    assert_eq!(status.published_node_ids, vec!["node-1".to_owned()]);
  }
}
