use crate::{
  runner::{MounterImpl, Options},
  FsStats, MountError, MountPoint, Result,
};
use std::{
  collections::{HashMap, HashSet},
  io,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    target: PathBuf,
    source: PathBuf,
    fs_type: String,
    options: Vec<String>,
  },

  Unmount {
    target: PathBuf,
  },

  Format {
    source: PathBuf,
    fs_type: String,
  },

  Resize {
    fs_type: Option<String>,
    device: PathBuf,
    mount_path: PathBuf,
  },

  TriggerUdev,
}

#[derive(Default)]
struct FakeMounterInner {
  mount_points: Vec<MountPoint>,
  log: Vec<FakeAction>,
  paths: HashSet<PathBuf>,
  udev_paths: Vec<PathBuf>,
  disk_formats: HashMap<PathBuf, String>,
  stats: FsStats,
}

impl FakeMounterInner {
  fn exists(&self, path: &Path) -> bool {
    self.paths.contains(path)
      || self.mount_points.iter().any(|mp| mp.path() == path)
      || path.exists()
  }
}

pub struct FakeMounter(Mutex<FakeMounterInner>);

// If path is a symlink, get its absolute path
fn resolve(path: PathBuf) -> PathBuf {
  path.canonicalize().unwrap_or(path)
}

fn not_found(path: &Path) -> MountError {
  io::Error::new(
    io::ErrorKind::NotFound,
    format!("{} does not exist", path.display()),
  )
  .into()
}

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let inner = FakeMounterInner {
      mount_points: mps.into_iter().collect(),
      ..Default::default()
    };

    Self(Mutex::new(inner))
  }

  fn inner(&self) -> MutexGuard<'_, FakeMounterInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn add_path(&self, path: PathBuf) {
    self.inner().paths.insert(path);
  }

  /// The path only shows up once udev has been triggered.
  pub fn add_udev_path(&self, path: PathBuf) {
    self.inner().udev_paths.push(path);
  }

  pub fn set_disk_format(&self, source: PathBuf, fstype: String) {
    self.inner().disk_formats.insert(source, fstype);
  }

  pub fn set_stats(&self, stats: FsStats) {
    self.inner().stats = stats;
  }

  pub fn reset_log(&self) {
    self.inner().log.clear();
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.inner().log.clone()
  }
}

impl MounterImpl for FakeMounter {
  fn new(_: PathBuf) -> Result<Self> {
    Ok(FakeMounter::new(None))
  }

  fn mount_sensitive(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
    sensitive_options: Options,
  ) -> Result<()> {
    let mut source =
      source.ok_or_else(|| MountError::new("missing required source in fake mounter"))?;
    let mut inner = self.inner();

    if options.iter().any(|opt| opt == "bind") {
      // This is a bind-mount. In order to mimic linux behaviour, we must
      // use the original device of the bind-mount as the real source.
      // E.g. when mounted /dev/sda like this:
      //      $ mount /dev/sda /mnt/test
      //      $ mount -o bind /mnt/test /mnt/bound
      // then /proc/mount contains:
      // /dev/sda /mnt/test
      // /dev/sda /mnt/bound
      // (and not /mnt/test /mnt/bound)
      let resolved = resolve(source.clone());
      if let Some(mnt) = inner.mount_points.iter().find(|mnt| mnt.path() == resolved) {
        source = mnt.device().to_owned();
      }
    }

    let target = resolve(target);
    let logged_options = options.to_vec();
    let mut opts = options.into_vec();
    opts.extend(sensitive_options);

    inner.mount_points.push(MountPoint {
      device: source.clone(),
      path: target.clone(),
      ty: fstype.clone(),
      opts,
      freq: 0,
      pass: 0,
    });
    info!(
      "Fake mounter: mounted {} to {}",
      source.display(),
      target.display()
    );
    inner.log.push(FakeAction::Mount {
      target,
      source,
      fs_type: fstype,
      options: logged_options,
    });

    Ok(())
  }

  fn unmount(&self, target: PathBuf, _: Option<Duration>) -> Result<()> {
    let mut inner = self.inner();
    let target = resolve(target);

    if let Some(i) = inner.mount_points.iter().position(|mp| mp.path() == target) {
      let mp = inner.mount_points.remove(i);
      info!(
        "Fake mounter: unmounted {} from {}",
        mp.device().display(),
        target.display()
      );
    }

    inner.log.push(FakeAction::Unmount { target });
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.inner().mount_points.clone())
  }

  fn is_likely_not_mount_point(&self, file: PathBuf) -> Result<bool> {
    let inner = self.inner();
    if !inner.exists(&file) {
      return Err(not_found(&file));
    }

    let file = resolve(file);
    let mounted = inner.mount_points.iter().any(|mp| mp.path() == file);
    info!("isLikelyNotMountPoint for {}: {}", file.display(), !mounted);
    Ok(!mounted)
  }

  fn format(&self, source: PathBuf, fstype: String, _: Options) -> Result<()> {
    let mut inner = self.inner();
    let fs_type = if fstype.is_empty() {
      "ext4".to_owned()
    } else {
      fstype
    };

    inner.disk_formats.insert(source.clone(), fs_type.clone());
    inner.log.push(FakeAction::Format { source, fs_type });
    Ok(())
  }

  fn get_disk_format(&self, source: PathBuf) -> Result<Option<String>> {
    Ok(self.inner().disk_formats.get(&source).cloned())
  }

  fn resize(&self, fstype: Option<String>, device: PathBuf, mount_path: PathBuf) -> Result<()> {
    match fstype.as_deref().unwrap_or("ext4") {
      "" | "ext2" | "ext3" | "ext4" | "xfs" => (),
      other => return Err(MountError::UnsupportedFilesystem(other.to_owned())),
    }

    self.inner().log.push(FakeAction::Resize {
      fs_type: fstype,
      device,
      mount_path,
    });
    Ok(())
  }

  fn path_exists(&self, path: PathBuf) -> Result<bool> {
    Ok(self.inner().exists(&path))
  }

  fn trigger_udev(&self) -> Result<()> {
    let mut inner = self.inner();
    let appeared = std::mem::take(&mut inner.udev_paths);
    inner.paths.extend(appeared);
    inner.log.push(FakeAction::TriggerUdev);
    Ok(())
  }

  fn stats(&self, path: PathBuf) -> Result<FsStats> {
    let inner = self.inner();
    if inner.exists(&path) {
      Ok(inner.stats)
    } else {
      Err(not_found(&path))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bind_mount_uses_original_device() {
    let fm = FakeMounter::new(vec![MountPoint::new("/dev/vdb", "/staging/vol-1", "ext4")]);

    fm.mount(
      Some("/staging/vol-1".into()),
      "/pods/a/mount".into(),
      String::new(),
      vec!["bind".to_owned()].into(),
    )
    .expect("bind mount succeeded");

    let (device, refs) = fm
      .get_device_name_from_mount("/pods/a/mount".into())
      .expect("list succeeded")
      .expect("target is mounted");
    assert_eq!(device, PathBuf::from("/dev/vdb"));
    assert_eq!(refs, 2);
  }

  #[test]
  fn missing_path_is_not_mounted() {
    let fm = FakeMounter::new(None);

    assert!(!fm.is_mounted("/does/not/exist".into()).expect("check succeeded"));
    assert!(fm
      .is_likely_not_mount_point("/does/not/exist".into())
      .expect_err("missing path")
      .is_not_found());
  }

  #[test]
  fn unmount_removes_mount_point() {
    let fm = FakeMounter::new(vec![MountPoint::new("/dev/vdb", "/staging/vol-1", "ext4")]);
    assert!(fm.is_mounted("/staging/vol-1".into()).expect("check succeeded"));

    fm.unmount("/staging/vol-1".into(), None)
      .expect("unmount succeeded");

    assert!(fm.list().expect("list succeeded").is_empty());
    assert_eq!(
      fm.get_log(),
      vec![FakeAction::Unmount {
        target: "/staging/vol-1".into()
      }]
    );
  }

  #[test]
  fn udev_paths_appear_after_trigger() {
    let fm = FakeMounter::new(None);
    fm.add_udev_path("/dev/disk/by-id/virtio-vol-1".into());

    assert!(!fm.path_exists("/dev/disk/by-id/virtio-vol-1".into()).expect("check succeeded"));
    fm.trigger_udev().expect("trigger succeeded");
    assert!(fm.path_exists("/dev/disk/by-id/virtio-vol-1".into()).expect("check succeeded"));
  }

  #[test]
  fn format_marks_device_formatted() {
    let fm = FakeMounter::new(None);
    assert!(!fm.is_formatted("/dev/vdb".into()).expect("check succeeded"));

    fm.format("/dev/vdb".into(), String::new(), Options::new())
      .expect("format succeeded");

    assert_eq!(
      fm.get_disk_format("/dev/vdb".into()).expect("check succeeded"),
      Some("ext4".to_owned())
    );
  }
}
