use crate::{FsStats, MountError, MountPoint, Result};
use futures::channel::oneshot::{channel as oneshot, Receiver, Sender};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::{
  fs,
  future::Future,
  io,
  panic::{catch_unwind, RefUnwindSafe, UnwindSafe},
  path::PathBuf,
  sync::Arc,
  time::Duration,
};
use tracing::{error, Span};

pub(crate) type Options = SmallVec<[String; 4]>;

struct MounterMessage {
  span: Span,
  run: Box<dyn FnOnce(Span) + Send + UnwindSafe + RefUnwindSafe>,
}

impl MounterMessage {
  fn new(span: Span, f: impl FnOnce(Span) + Send + UnwindSafe + RefUnwindSafe + 'static) -> Self {
    Self {
      span,
      run: Box::new(f),
    }
  }
}

// Span isn't unwindsafe due to dyn content - but it should be unwind safe in practice (missing some bounds)
impl UnwindSafe for MounterMessage {}

type MounterDispatcher = crossbeam::channel::Sender<MounterMessage>;

// Note: All these methods are to be run in a separate thread, ensuring
// that only one runs at once, and that it does not block async processing.
pub trait MounterImpl: Sized + Send + Sync + UnwindSafe + RefUnwindSafe + 'static {
  /// Create a new mounter from a given mount path.
  fn new(mount_path: PathBuf) -> Result<Self>;

  /// Mounts source to target as fstype with given options.
  /// options MUST not contain sensitive material (like passwords).
  fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
  ) -> Result<()> {
    self.mount_sensitive(source, target, fstype, options, SmallVec::new())
  }

  /// Same as [mount], but sensitive_options are never logged.
  fn mount_sensitive(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
    sensitive_options: Options,
  ) -> Result<()>;

  /// Unmount unmounts given target. If a force_after is provided, will retry
  /// after that amount of time with force option.
  fn unmount(&self, target: PathBuf, force_after: Option<Duration>) -> Result<()>;

  fn list(&self) -> Result<Vec<MountPoint>>;

  /// Errors with `NotFound` when file does not exist.
  fn is_likely_not_mount_point(&self, file: PathBuf) -> Result<bool>;

  fn format(&self, source: PathBuf, fstype: String, options: Options) -> Result<()>;

  fn get_disk_format(&self, source: PathBuf) -> Result<Option<String>>;

  fn resize(&self, fstype: Option<String>, device: PathBuf, mount_path: PathBuf) -> Result<()>;

  fn trigger_udev(&self) -> Result<()>;

  fn stats(&self, path: PathBuf) -> Result<FsStats>;

  fn path_exists(&self, path: PathBuf) -> Result<bool> {
    match fs::metadata(&path) {
      Ok(_) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  fn is_formatted(&self, source: PathBuf) -> Result<bool> {
    Ok(self.get_disk_format(source)?.is_some())
  }

  fn get_device_name_from_mount(&self, mount_path: PathBuf) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;

    // If mountPath is symlink, need get its target path.
    let mount_path = fs::canonicalize(&mount_path).unwrap_or(mount_path);

    // If multiple devices are mounted on the same mount path, only the first one is returned.
    Ok(
      mps
        .iter()
        .find(|m| m.path() == mount_path)
        .map(|m| m.device().to_owned())
        .map(|device| {
          let ref_count = mps.iter().filter(|m| m.device() == device).count();
          (device, ref_count)
        }),
    )
  }

  fn is_not_mount_point(&self, file: PathBuf) -> Result<bool> {
    // IsLikelyNotMountPoint provides a quick check
    // to determine whether file IS A mountpoint.
    let not_mnt = match self.is_likely_not_mount_point(file.clone()) {
      Ok(v) => v,
      Err(e) if e.is_permission_error() => {
        // We were not allowed to do the simple stat() check, e.g. on NFS with
        // root_squash. Fall back to /proc/mounts check below.
        true
      }
      Err(e) => return Err(e),
    };

    // identified as mountpoint, so return this fact.
    if !not_mnt {
      return Ok(false);
    }

    // Resolve any symlinks in file, kernel would do the same and use the resolved path in /proc/mounts.
    let resolved_file = match fs::canonicalize(&file) {
      Ok(v) => v,
      Err(_) => return Ok(true),
    };

    // check all mountpoints since IsLikelyNotMountPoint
    // is not reliable for some mountpoint types.
    Ok(!self.list()?.iter().any(|mp| mp.matches(&resolved_file)))
  }

  fn is_mounted(&self, target: PathBuf) -> Result<bool> {
    match self.is_not_mount_point(target) {
      Ok(not_mnt) => Ok(!not_mnt),
      Err(e) if e.is_not_found() => Ok(false),
      Err(e) => Err(e),
    }
  }
}

static DISPATCHER: OnceCell<MounterDispatcher> = OnceCell::new();

fn dispatcher() -> Result<&'static MounterDispatcher> {
  DISPATCHER
    .get_or_try_init(|| {
      let (sender, receiver) = crossbeam::channel::unbounded::<MounterMessage>();

      std::thread::Builder::new()
        .name("mount-utils:dispatch".into())
        .spawn(move || {
          while let Ok(msg) = receiver.recv() {
            if let Err(e) = catch_unwind(move || {
              let MounterMessage { span, run } = msg;
              run(span)
            }) {
              error!("Failed to run mount function in dispatcher: {:?}", e);
            }
          }
        })
        .map(|_| sender)
    })
    .map_err(|e| MountError::new(format!("failed to spawn dispatcher: {:?}", e)))
}

pub(crate) fn run<R: 'static, F: 'static>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
  R: UnwindSafe + RefUnwindSafe + Send,
{
  struct OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
    run: F,
    sender: Sender<Result<R>>,
  }

  impl<R, F> UnwindSafe for OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
  }

  impl<R, F> RefUnwindSafe for OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
  }

  let span = Span::current();
  let (sender, receiver) = oneshot();

  match dispatcher() {
    Ok(dispatch) => {
      let msg = OuterMsg { run: f, sender };

      // A failed send drops the message and its sender, which `read` reports as an error.
      let sent = dispatch.send(MounterMessage::new(span, move |span| {
        let OuterMsg { run, sender } = msg;
        let result = {
          let _enter = span.enter();
          run()
        };

        let _ = sender.send(result);
      }));

      if sent.is_err() {
        error!("Mount dispatcher thread is gone");
      }
    }
    Err(e) => {
      let _ = sender.send(Err(e));
    }
  };

  read(receiver)
}

pub(crate) fn run_inst<T: MounterImpl, R: 'static, F: 'static>(
  mounter: Arc<T>,
  f: F,
) -> impl Future<Output = Result<R>>
where
  F: FnOnce(&T) -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
  R: UnwindSafe + RefUnwindSafe + Send,
{
  run(move || f(&*mounter))
}

async fn read<R>(receiver: Receiver<Result<R>>) -> Result<R> {
  match receiver.await {
    Ok(r) => r,
    Err(_) => Err(MountError::new("request was cancelled (thread paniced?)")),
  }
}

/// Options for a bind mount, and for the remount that applies the
/// requested options (bind mounts ignore them on the first pass).
pub(crate) struct BindOpts {
  pub bind: bool,
  pub bind_opts: Vec<String>,
  pub remount_opts: Vec<String>,
  pub remount_sensitive_opts: Vec<String>,
}

// The remount list equals: options - 'bind' + 'remount' (no duplicate).
// Sensitive options stay in their own list so they are never logged.
pub(crate) fn make_bind_opts_sensitive(opts: &[String], opts_sensitive: &[String]) -> BindOpts {
  // Because we have an FD opened on the subpath bind mount, the "bind" option
  // needs to be included, otherwise the mount target will error as busy if you
  // remount as readonly.
  //
  // As a consequence, all read only bind mounts will no longer change the underlying
  // volume mount to be read only.
  let mut result = BindOpts {
    bind: false,
    bind_opts: vec!["bind".into()],
    remount_opts: vec!["bind".into(), "remount".into()],
    remount_sensitive_opts: Vec::new(),
  };

  for (opt, sensitive) in opts
    .iter()
    .map(|o| (o, false))
    .chain(opts_sensitive.iter().map(|o| (o, true)))
  {
    match opt.as_str() {
      "bind" => result.bind = true,
      "_netdev" => {
        // _netdev is a userspace mount option and does not automatically get added when
        // bind mount is created and hence we must carry it over.
        result.bind_opts.push(opt.clone());
        result.remount_opts.push(opt.clone());
      }
      _ if sensitive => result.remount_sensitive_opts.push(opt.clone()),
      _ => result.remount_opts.push(opt.clone()),
    }
  }

  result
}

pub trait MounterWrapper {
  type Mounter: MounterImpl;

  fn new(inner: Arc<Self::Mounter>) -> Self;

  fn mounter(&self) -> &Arc<Self::Mounter>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
  }

  #[test_case(&["vers=2", "ro", "_netdev"], false, &[], &[])]
  #[test_case(&["bind", "vers=2", "ro", "_netdev"], true, &["bind", "_netdev"], &["bind", "remount", "vers=2", "ro", "_netdev"])]
  #[test_case(&["bind", "ro"], true, &["bind"], &["bind", "remount", "ro"] ; "read only bind")]
  fn make_bind_opts(
    mount_option: &[&'static str],
    is_bind: bool,
    expected_bind_opts: &[&'static str],
    expected_remount_opts: &[&'static str],
  ) {
    let opts = make_bind_opts_sensitive(&owned(mount_option), &[]);

    assert_eq!(opts.bind, is_bind);
    if is_bind {
      assert_eq!(owned(expected_bind_opts), opts.bind_opts);
      assert_eq!(owned(expected_remount_opts), opts.remount_opts);
      assert!(opts.remount_sensitive_opts.is_empty());
    }
  }

  #[test]
  fn sensitive_bind_opts_are_kept_apart() {
    let opts = make_bind_opts_sensitive(&owned(&["bind", "ro"]), &owned(&["password=x", "_netdev"]));

    assert!(opts.bind);
    assert_eq!(opts.bind_opts, owned(&["bind", "_netdev"]));
    assert_eq!(opts.remount_opts, owned(&["bind", "remount", "ro", "_netdev"]));
    assert_eq!(opts.remount_sensitive_opts, owned(&["password=x"]));
  }
}
