#![allow(clippy::too_many_arguments)]

cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    use unix::*;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod fake;
mod runner;

pub use fake::FakeAction;

use futures::future::BoxFuture;
use runner::{run, run_inst, MounterImpl, MounterWrapper};
use static_assertions::assert_impl_all;
use std::{
  fmt, io,
  path::{Path, PathBuf},
  result,
  sync::Arc,
  time::Duration,
};
use thiserror::Error;
use tracing::Instrument;

pub type Result<T> = result::Result<T, MountError>;
pub type FutureResult<T> = BoxFuture<'static, Result<T>>;

const DEFAULT_MOUNT_COMMAND: &str = "mount";

/// Interface defines the set of methods to allow for mount and filesystem
/// operations on a system. Every call is executed on a single dispatcher thread.
pub trait Mounter: Sized + Send + Sync + 'static {
  /// Create a new mounter from a given mount path.
  fn new<P>(mount_path: P) -> FutureResult<Self>
  where
    P: Into<PathBuf>;

  /// Mounts source to target as fstype with given options.
  /// options MUST not contain sensitive material (like passwords).
  fn mount<I, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>;

  /// mount_sensitive is the same as [mount] but this method allows
  /// sensitive_options to be passed in a separate parameter from the normal
  /// mount options and ensures the sensitive options are never logged.
  fn mount_sensitive<I1, I2, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I1,
    sensitive_options: I2,
  ) -> FutureResult<()>
  where
    I1: IntoIterator,
    <I1 as IntoIterator>::Item: Into<String>,
    I2: IntoIterator,
    <I2 as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>;

  /// Unmount unmounts given target. If a force_after is provided, a forced
  /// unmount is issued once that much time has passed.
  fn unmount<P>(&self, target: P, force_after: Option<Duration>) -> FutureResult<()>
  where
    P: Into<PathBuf>;

  /// List returns a list of all mounted filesystems. This can be large.
  /// The mount table is read until two reads agree, so the result is consistent.
  fn list(&self) -> FutureResult<Vec<MountPoint>>;

  /// IsLikelyNotMountPoint uses heuristics to determine if a directory
  /// is not a mountpoint. It errors with `NotFound` when the directory
  /// does not exist. It does NOT properly detect all mountpoint types,
  /// most notably linux bind mounts and symbolic links.
  fn is_likely_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  /// Like [is_likely_not_mount_point], but falls back to scanning the mount
  /// table so bind mounts are detected as well.
  fn is_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  /// Whether target is currently a mount point. A missing target is not mounted.
  fn is_mounted<P>(&self, target: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  /// Finds the device mounted at mount_path and the number of mount points
  /// that device is mounted at.
  fn get_device_name_from_mount<P>(&self, mount_path: P) -> FutureResult<Option<(PathBuf, usize)>>
  where
    P: Into<PathBuf>;

  /// Creates a filesystem of type fstype on source.
  fn format<I, P, A>(&self, source: P, fstype: A, options: I) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P: Into<PathBuf>,
    A: Into<String>;

  /// Detects the filesystem (or partition table) on source. `None` means the
  /// device holds no recognizable data.
  fn get_disk_format<P>(&self, source: P) -> FutureResult<Option<String>>
  where
    P: Into<PathBuf>;

  fn is_formatted<P>(&self, source: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  /// Grows the filesystem of type fstype (ext4 when unknown) to fill the device.
  /// ext filesystems are grown through the device, xfs through its mount path.
  fn resize<P1, P2>(&self, fstype: Option<String>, device: P1, mount_path: P2) -> FutureResult<()>
  where
    P1: Into<PathBuf>,
    P2: Into<PathBuf>;

  fn path_exists<P>(&self, path: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  /// Asks udev to replay device events, so missing `/dev/disk/by-id` links appear.
  fn trigger_udev(&self) -> FutureResult<()>;

  /// Filesystem usage of the filesystem holding path.
  fn stats<P>(&self, path: P) -> FutureResult<FsStats>
  where
    P: Into<PathBuf>;
}

/// MountPoint represents a single line in /proc/mounts or /etc/fstab.
#[derive(Clone, PartialEq)]
pub struct MountPoint {
  device: PathBuf,
  path: PathBuf,
  ty: String,
  opts: Vec<String>,
  freq: isize,
  pass: isize,
}

impl fmt::Debug for MountPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountPoint")
      .field("device", &self.device)
      .field("path", &self.path)
      .field("type", &self.ty)
      .field("opts", &format!("length={}", self.opts.len()))
      .field("freq", &self.freq)
      .field("pass", &self.pass)
      .finish()
  }
}

impl MountPoint {
  pub fn new(device: impl Into<PathBuf>, path: impl Into<PathBuf>, ty: impl Into<String>) -> Self {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: ty.into(),
      opts: Vec::new(),
      freq: 0,
      pass: 0,
    }
  }

  #[inline]
  pub fn device(&self) -> &Path {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn mount_type(&self) -> &str {
    &self.ty
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  #[inline]
  pub fn freq(&self) -> isize {
    self.freq
  }

  #[inline]
  pub fn pass(&self) -> isize {
    self.pass
  }

  pub fn matches(&self, dir: &Path) -> bool {
    is_mount_point_match(self, dir)
  }
}

/// Usage of a mounted filesystem, as reported by statvfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStats {
  pub total_bytes: u64,
  pub available_bytes: u64,
  pub used_bytes: u64,
  pub total_inodes: u64,
  pub free_inodes: u64,
  pub used_inodes: u64,
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("Format of {0} failed: {1}")]
  FormatFailed(String, #[source] io::Error),
  #[error("Get disk format of {0} failed: {1}")]
  GetDiskFormatFailed(String, #[source] io::Error),
  #[error("Resize of {0} failed: {1}")]
  ResizeFailed(String, #[source] io::Error),
  #[error("Unsupported filesystem type: {0}")]
  UnsupportedFilesystem(String),
  #[error("Unknown mount error: {0}")]
  UnknownMountError(
    #[from]
    #[source]
    io::Error,
  ),
}

impl MountError {
  fn io(&self) -> Option<&io::Error> {
    match self {
      MountError::FormatFailed(_, e) => Some(e),
      MountError::GetDiskFormatFailed(_, e) => Some(e),
      MountError::ResizeFailed(_, e) => Some(e),
      MountError::UnsupportedFilesystem(_) => None,
      MountError::UnknownMountError(e) => Some(e),
    }
  }

  fn kind(&self) -> Option<io::ErrorKind> {
    self.io().map(io::Error::kind)
  }

  pub fn is_permission_error(&self) -> bool {
    self.kind() == Some(io::ErrorKind::PermissionDenied)
  }

  pub fn is_not_found(&self) -> bool {
    self.kind() == Some(io::ErrorKind::NotFound)
  }

  fn new(msg: impl Into<String>) -> Self {
    MountError::UnknownMountError(io::Error::new(io::ErrorKind::Other, msg.into()))
  }
}

fn collect_opts<I>(options: I) -> smallvec::SmallVec<[String; 4]>
where
  I: IntoIterator,
  <I as IntoIterator>::Item: Into<String>,
{
  options.into_iter().map(Into::into).collect()
}

impl<T> Mounter for T
where
  T: MounterWrapper + Send + Sync + 'static,
{
  fn new<P>(mount_path: P) -> FutureResult<Self>
  where
    P: Into<PathBuf>,
  {
    let mount_path = mount_path.into();

    Box::pin(
      async move {
        run(move || <T as MounterWrapper>::Mounter::new(mount_path))
          .await
          .map(|inner| <T as MounterWrapper>::new(Arc::new(inner)))
      }
      .in_current_span(),
    )
  }

  fn mount<I, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>,
  {
    let source = source.map(Into::into);
    let target = target.into();
    let fstype = fstype.into();
    let options = collect_opts(options);

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount(source, target, fstype, options)
    }))
  }

  fn mount_sensitive<I1, I2, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I1,
    sensitive_options: I2,
  ) -> FutureResult<()>
  where
    I1: IntoIterator,
    <I1 as IntoIterator>::Item: Into<String>,
    I2: IntoIterator,
    <I2 as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>,
  {
    let source = source.map(Into::into);
    let target = target.into();
    let fstype = fstype.into();
    let options = collect_opts(options);
    let options_sensitive = collect_opts(sensitive_options);

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount_sensitive(source, target, fstype, options, options_sensitive)
    }))
  }

  fn unmount<P>(&self, target: P, force_after: Option<Duration>) -> FutureResult<()>
  where
    P: Into<PathBuf>,
  {
    let target = target.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.unmount(target, force_after)
    }))
  }

  fn list(&self) -> FutureResult<Vec<MountPoint>> {
    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.list()
    }))
  }

  fn is_likely_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let file = file.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_likely_not_mount_point(file)
    }))
  }

  fn is_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let file = file.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_not_mount_point(file)
    }))
  }

  fn is_mounted<P>(&self, target: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let target = target.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_mounted(target)
    }))
  }

  fn get_device_name_from_mount<P>(&self, mount_path: P) -> FutureResult<Option<(PathBuf, usize)>>
  where
    P: Into<PathBuf>,
  {
    let mount_path = mount_path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.get_device_name_from_mount(mount_path)
    }))
  }

  fn format<I, P, A>(&self, source: P, fstype: A, options: I) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P: Into<PathBuf>,
    A: Into<String>,
  {
    let source = source.into();
    let fstype = fstype.into();
    let options = collect_opts(options);

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.format(source, fstype, options)
    }))
  }

  fn get_disk_format<P>(&self, source: P) -> FutureResult<Option<String>>
  where
    P: Into<PathBuf>,
  {
    let source = source.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.get_disk_format(source)
    }))
  }

  fn is_formatted<P>(&self, source: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let source = source.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_formatted(source)
    }))
  }

  fn resize<P1, P2>(&self, fstype: Option<String>, device: P1, mount_path: P2) -> FutureResult<()>
  where
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
  {
    let device = device.into();
    let mount_path = mount_path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.resize(fstype, device, mount_path)
    }))
  }

  fn path_exists<P>(&self, path: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let path = path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.path_exists(path)
    }))
  }

  fn trigger_udev(&self) -> FutureResult<()> {
    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.trigger_udev()
    }))
  }

  fn stats<P>(&self, path: P) -> FutureResult<FsStats>
  where
    P: Into<PathBuf>,
  {
    let path = path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.stats(path)
    }))
  }
}

assert_impl_all!(OsMounter: MounterImpl);
assert_impl_all!(fake::FakeMounter: MounterImpl);
assert_impl_all!(DefaultMounter: Mounter);
assert_impl_all!(FakeMounter: Mounter);

/// The mounter backed by the host's mount utilities.
pub struct DefaultMounter(Arc<OsMounter>);

impl MounterWrapper for DefaultMounter {
  type Mounter = OsMounter;

  fn new(inner: Arc<Self::Mounter>) -> Self {
    DefaultMounter(inner)
  }

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

/// An in-memory mounter that records every mutating call.
#[derive(Clone)]
pub struct FakeMounter(Arc<fake::FakeMounter>);

impl FakeMounter {
  pub fn with_mount_points(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    FakeMounter(Arc::new(fake::FakeMounter::new(mps)))
  }

  /// Makes path visible to `path_exists` and the mount point checks.
  pub fn add_path(&self, path: impl Into<PathBuf>) {
    self.0.add_path(path.into())
  }

  /// Like [add_path], but the path only appears after `trigger_udev`.
  pub fn add_udev_path(&self, path: impl Into<PathBuf>) {
    self.0.add_udev_path(path.into())
  }

  /// Pretends source already holds a filesystem of type fstype.
  pub fn set_disk_format(&self, source: impl Into<PathBuf>, fstype: impl Into<String>) {
    self.0.set_disk_format(source.into(), fstype.into())
  }

  pub fn set_stats(&self, stats: FsStats) {
    self.0.set_stats(stats)
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.0.get_log()
  }

  pub fn reset_log(&self) {
    self.0.reset_log()
  }
}

impl MounterWrapper for FakeMounter {
  type Mounter = fake::FakeMounter;

  fn new(inner: Arc<Self::Mounter>) -> Self {
    FakeMounter(inner)
  }

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}
