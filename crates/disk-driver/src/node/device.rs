use regex::Regex;
use std::path::PathBuf;

const BY_ID_DIR: &str = "/dev/disk/by-id";

/// The virtio serial field holds at most this many characters, so longer
/// volume ids are cut off in the by-id link name.
const VIRTIO_SERIAL_LEN: usize = 20;

/// Maps a volume to the local block device the hypervisor exposes for it.
#[derive(Debug, Clone)]
pub(crate) struct DevicePaths {
  premium: Regex,
}

impl DevicePaths {
  pub(crate) fn new(premium_pattern: &str) -> Result<Self, regex::Error> {
    Ok(DevicePaths {
      premium: Regex::new(premium_pattern)?,
    })
  }

  /// Premium disk types are attached as nvme namespaces carrying the full
  /// volume id. Everything else shows up as a virtio disk.
  pub(crate) fn device_path(&self, volume_id: &str, disk_type: &str) -> PathBuf {
    let name = if self.premium.is_match(disk_type) {
      format!("nvme-{}", volume_id)
    } else {
      let serial: String = volume_id.chars().take(VIRTIO_SERIAL_LEN).collect();
      format!("virtio-{}", serial)
    };

    PathBuf::from(BY_ID_DIR).join(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("vol-1", "cloud_ssd", "/dev/disk/by-id/virtio-vol-1")]
  #[test_case("vol-0123456789abcdefghij", "cloud_ssd", "/dev/disk/by-id/virtio-vol-0123456789abcdef")]
  #[test_case("vol-0123456789abcdefghij", "rssd", "/dev/disk/by-id/nvme-vol-0123456789abcdefghij")]
  #[test_case("vol-1", "essd_pl1", "/dev/disk/by-id/nvme-vol-1")]
  #[test_case("vol-1", "ssd_rssd", "/dev/disk/by-id/virtio-vol-1")]
  fn resolves_device(volume_id: &str, disk_type: &str, expected: &str) {
    let paths = DevicePaths::new("^(rssd|essd)").expect("valid pattern");
    assert_eq!(paths.device_path(volume_id, disk_type), PathBuf::from(expected));
  }
}
