use crate::{
  runner::{make_bind_opts_sensitive, BindOpts, MounterImpl, Options},
  FsStats, MountError, MountPoint, Result, DEFAULT_MOUNT_COMMAND,
};
use crossbeam::{scope, select};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  ffi::{CString, OsString},
  fmt::Write,
  fs, io,
  mem::MaybeUninit,
  num::NonZeroUsize,
  os::unix::{ffi::OsStrExt, fs::MetadataExt},
  path::{Path, PathBuf},
  process::ExitStatus,
  time::Duration,
};
use tracing::{debug, error, info, warn};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(3) };
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

// blkid exits with 2 when it finds nothing to report on the device.
const BLKID_NOTHING_FOUND: i32 = 2;

pub struct OsMounter {
  mounter_path: PathBuf,
  systemd: bool,
}

impl MounterImpl for OsMounter {
  fn new(mounter_path: PathBuf) -> Result<Self> {
    Ok(OsMounter {
      mounter_path,
      systemd: Self::detect_systemd()?,
    })
  }

  fn mount_sensitive(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
    sensitive_options: Options,
  ) -> Result<()> {
    // All Linux distros are expected to be shipped with a mount utility that supports bind mounts.
    let BindOpts {
      bind,
      bind_opts,
      remount_opts,
      remount_sensitive_opts,
    } = make_bind_opts_sensitive(&options, &sensitive_options);

    if bind {
      self.do_mount(
        None,
        source.clone(),
        target.clone(),
        &fstype,
        &bind_opts,
        &remount_sensitive_opts,
      )?;
      self.do_mount(
        None,
        source,
        target,
        &fstype,
        &remount_opts,
        &remount_sensitive_opts,
      )
    } else {
      // Network filesystems go through the configured mounter binary.
      let mounter_path = if matches!(fstype.as_str(), "nfs" | "glusterfs" | "ceph" | "cifs") {
        Some(self.mounter_path.clone())
      } else {
        None
      };

      self.do_mount(
        mounter_path,
        source,
        target,
        &fstype,
        &options,
        &sensitive_options,
      )
    }
  }

  fn unmount(&self, target: PathBuf, force_after: Option<Duration>) -> Result<()> {
    info!("Unmounting {}", target.display());
    let cmd = cmd!("umount", &target).stderr_to_stdout();

    let run_forced = match force_after {
      None => {
        cmd.run()?;
        false
      }
      Some(duration) => {
        let handle = cmd.start()?;
        let handle = &handle;
        scope::<'_, _, Result<bool>>(|s| {
          let (sender, receiver) = crossbeam::channel::bounded(1);

          s.spawn(move |_| {
            let result = handle.wait().map(|_| ());
            let _ = sender.send(result);
          });

          let finished = select! {
            recv(receiver) -> result => Some(result),
            default(duration) => None,
          };

          match finished {
            Some(Ok(result)) => {
              result?;
              Ok(false)
            }
            Some(Err(_)) => Err(MountError::new("umount waiter disconnected")),
            None => {
              warn!(
                "Unmount of {} did not finish in {:?}, forcing",
                target.display(),
                duration
              );
              let _ = handle.kill();
              Ok(true)
            }
          }
        })
        .map_err(|e| MountError::new(format!("Failed to spawn threads: {:?}", e)))??
      }
    };

    if run_forced {
      cmd!("umount", "-f", &target).stderr_to_stdout().run()?;
    }

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    list_proc_mounts(PROC_MOUNTS_PATH.as_ref())
  }

  fn is_likely_not_mount_point(&self, file: PathBuf) -> Result<bool> {
    let stat = fs::metadata(&file)?;
    let parent = file
      .parent()
      .ok_or_else(|| MountError::new("file does not have parent"))?;
    let parent_stat = fs::metadata(parent)?;
    // If the directory has a different device as parent, then it is a mountpoint.
    if stat.dev() != parent_stat.dev() {
      return Ok(false);
    }

    Ok(true)
  }

  fn format(&self, source: PathBuf, fstype: String, options: Options) -> Result<()> {
    let mut args: Vec<OsString> = match fstype.as_str() {
      // Use 'ext4' as the default
      "" | "ext2" | "ext3" | "ext4" => vec!["-F".into(), "-m0".into()],
      "xfs" => vec!["-f".into()],
      _ => Vec::new(),
    };
    args.extend(options.into_iter().map(OsString::from));
    args.push(source.clone().into());

    let fstype = if fstype.is_empty() {
      "ext4".to_owned()
    } else {
      fstype
    };

    info!(
      "Disk {} appears to be unformatted, attempting to format as type: {}",
      source.display(),
      fstype
    );
    let output = cmd(format!("mkfs.{}", fstype), args)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked()
      .run()
      .map_err(|e| MountError::FormatFailed(source.display().to_string(), e))?;

    if output.status.success() {
      info!("Disk successfully formatted (mkfs): {} - {}", fstype, source.display());
      Ok(())
    } else {
      let output = String::from_utf8_lossy(&output.stdout);
      error!(
        "format of disk {} failed: type:({}) output:({})",
        source.display(),
        fstype,
        output
      );
      Err(MountError::FormatFailed(
        source.display().to_string(),
        io::Error::new(io::ErrorKind::Other, output.into_owned()),
      ))
    }
  }

  fn get_disk_format(&self, source: PathBuf) -> Result<Option<String>> {
    let output = cmd!("blkid", "-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", &source)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked()
      .run()
      .map_err(|e| MountError::GetDiskFormatFailed(source.display().to_string(), e))?;

    if output.status.code() == Some(BLKID_NOTHING_FOUND) {
      // Disk device is unformatted.
      return Ok(None);
    }

    let text = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
      return Err(MountError::GetDiskFormatFailed(
        source.display().to_string(),
        io::Error::new(io::ErrorKind::Other, text.into_owned()),
      ));
    }

    Ok(parse_blkid_export(&text))
  }

  fn resize(&self, fstype: Option<String>, device: PathBuf, mount_path: PathBuf) -> Result<()> {
    let (program, args) = resize_command(fstype.as_deref(), &device, &mount_path)?;

    info!(
      "Resizing filesystem on {} mounted at {}",
      device.display(),
      mount_path.display()
    );
    let output = cmd(program, args)
      .stderr_to_stdout()
      .stdout_capture()
      .unchecked()
      .run()
      .map_err(|e| MountError::ResizeFailed(device.display().to_string(), e))?;

    resize_outcome(output.status, &output.stdout).map_err(|message| {
      MountError::ResizeFailed(
        device.display().to_string(),
        io::Error::new(io::ErrorKind::Other, message),
      )
    })
  }

  fn trigger_udev(&self) -> Result<()> {
    info!("Triggering udev");
    cmd!("udevadm", "trigger").stderr_to_stdout().run()?;
    Ok(())
  }

  fn stats(&self, path: PathBuf) -> Result<FsStats> {
    let c_path = CString::new(path.as_os_str().as_bytes())
      .map_err(|_| MountError::new(format!("path contains a nul byte: {}", path.display())))?;

    let mut buf = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: c_path is nul terminated and buf is valid for writes of one statvfs.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), buf.as_mut_ptr()) };
    if rc != 0 {
      return Err(io::Error::last_os_error().into());
    }
    // SAFETY: statvfs returned 0, so the struct is initialized.
    let stat = unsafe { buf.assume_init() };

    let block_size = stat.f_frsize as u64;
    let blocks = stat.f_blocks as u64;
    let files = stat.f_files as u64;
    let free_files = stat.f_ffree as u64;

    Ok(FsStats {
      total_bytes: blocks * block_size,
      available_bytes: stat.f_bavail as u64 * block_size,
      used_bytes: blocks.saturating_sub(stat.f_bfree as u64) * block_size,
      total_inodes: files,
      free_inodes: free_files,
      used_inodes: files.saturating_sub(free_files),
    })
  }
}

impl OsMounter {
  // detectSystemd returns true if OS runs with systemd as init. When not sure
  // (permission errors, ...), it returns false.
  // There may be different ways how to detect systemd, this one makes sure that
  // systemd-runs (needed by Mount()) works.
  fn detect_systemd() -> Result<bool> {
    let systemd_run_path = match which("systemd-run") {
      Ok(p) => p,
      Err(_) => {
        info!("Detected OS without systemd");
        return Ok(false);
      }
    };

    // Try to run systemd-run --scope /bin/true, that should be enough
    // to make sure that systemd is really running and not just installed,
    // which happens when running in a container with a systemd-based image
    // but with different pid 1.
    let result = cmd!(
      systemd_run_path,
      "--description=Block disk CSI systemd probe",
      "--scope",
      "true"
    )
    .stderr_to_stdout()
    .stdout_capture()
    .unchecked()
    .run()?;

    if result.status.success() {
      info!("Detected OS with systemd");
      Ok(true)
    } else {
      let output = std::str::from_utf8(&*result.stdout).unwrap_or("INVALID_UTF8_DATA");
      info!("Cannot run systemd-run, assuming non-systemd OS");
      debug!(
        "systemd-run output: {}, failed with: {:?}",
        output, result.status
      );
      Ok(false)
    }
  }

  /// Runs the mount command. mounter_path is the path to a mounter binary
  /// that replaces mount(8). Sensitive options are passed but never logged.
  fn do_mount(
    &self,
    mounter_path: Option<PathBuf>,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: &str,
    options: &[String],
    options_sensitive: &[String],
  ) -> Result<()> {
    let mut mount_cmd = PathBuf::from(DEFAULT_MOUNT_COMMAND);
    let (mut mount_args, mut log_str) =
      make_mount_args_sensitive(source, &target, fstype, options, options_sensitive);

    if let Some(mounter_path) = mounter_path {
      mount_args.insert(0, mounter_path.clone().into());
      log_str = format!("{} {}", mounter_path.display(), log_str);
      mount_cmd = mounter_path;
    }

    if self.systemd {
      // Run mount via systemd-run --scope, so that any fuse daemons mount
      // forks live in their own transient scope and survive a restart of the
      // plugin. systemd-run --scope returns mount's exit code and output.
      let (cmd, args, log) =
        add_systemd_scope_sensitive("systemd-run".into(), &target, mount_cmd, mount_args, log_str);
      mount_cmd = cmd;
      mount_args = args;
      log_str = log;
    }

    info!(
      "Mounting cmd {} with arguments ({})",
      mount_cmd.display(),
      log_str
    );
    match cmd(mount_cmd, mount_args).stderr_to_stdout().run() {
      Ok(_) => Ok(()),
      Err(e) => {
        error!("Mount failed: {:?}", e);
        Err(e.into())
      }
    }
  }
}

pub(crate) fn is_mount_point_match(mp: &MountPoint, dir: &Path) -> bool {
  let deleted_dir = format!("{}\\040(deleted)", dir.display());
  mp.path() == dir || mp.path() == Path::new(&deleted_dir)
}

/// The command growing a filesystem of type `fstype`. ext filesystems are
/// grown through their device, xfs through its mount point. No type means
/// ext4.
fn resize_command(
  fstype: Option<&str>,
  device: &Path,
  mount_path: &Path,
) -> Result<(&'static str, Vec<OsString>)> {
  match fstype.filter(|t| !t.is_empty()).unwrap_or("ext4") {
    "ext2" | "ext3" | "ext4" => Ok(("resize2fs", vec![device.into()])),
    "xfs" => Ok(("xfs_growfs", vec!["-d".into(), mount_path.into()])),
    other => Err(MountError::UnsupportedFilesystem(other.to_owned())),
  }
}

fn resize_outcome(status: ExitStatus, output: &[u8]) -> std::result::Result<(), String> {
  let text = String::from_utf8_lossy(output);
  if status.success() {
    debug!("Resize output: {}", text);
    return Ok(());
  }

  match text.trim() {
    "" => Err(format!("resize exited with {} and no output", status)),
    text => Err(text.to_owned()),
  }
}

fn parse_blkid_export(output: &str) -> Option<String> {
  let mut fstype = None;
  let mut pttype = None;

  for line in output.lines() {
    match line.trim().split_once('=') {
      Some(("TYPE", value)) if !value.is_empty() => fstype = Some(value.to_owned()),
      Some(("PTTYPE", value)) if !value.is_empty() => pttype = Some(value.to_owned()),
      _ => (),
    }
  }

  match (fstype, pttype) {
    (Some(fstype), _) => Some(fstype),
    // A partition table without a filesystem is still data we must not format over.
    (None, Some(_)) => Some("unknown data, probably partitions".to_owned()),
    (None, None) => None,
  }
}

// Builds the arguments to the mount(8) command:
//   mount [-t $fstype] [-o $options] [$source] $target
fn make_mount_args_sensitive(
  source: Option<PathBuf>,
  target: &Path,
  fstype: &str,
  options: &[String],
  options_sensitive: &[String],
) -> (Vec<OsString>, String) {
  let mut mount_args: Vec<OsString> = Vec::new();
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".into());
    mount_args.push(fstype.into());
    let _ = write!(log_str, "-t {}", fstype);
  }

  if !options.is_empty() || !options_sensitive.is_empty() {
    let arg = options
      .iter()
      .chain(options_sensitive.iter())
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(",");

    mount_args.push("-o".into());
    mount_args.push(arg.into());
    let _ = write!(log_str, " -o {}", options.join(","));
  }

  if let Some(source) = source {
    let _ = write!(log_str, " {}", source.display());
    mount_args.push(source.into());
  }

  mount_args.push(target.into());
  let _ = write!(log_str, " {}", target.display());

  (mount_args, log_str)
}

// Prefixes the command line with "systemd-run --scope". log_str holds the
// sanitized mount arguments and is extended with the systemd-run arguments.
fn add_systemd_scope_sensitive(
  systemd_run_path: PathBuf,
  mount_name: &Path,
  command: PathBuf,
  args: Vec<OsString>,
  log_str: String,
) -> (PathBuf, Vec<OsString>, String) {
  let mut description_arg = OsString::from("--description=Block disk CSI transient mount for ");
  description_arg.push(mount_name.as_os_str());

  let mut systemd_run_args: Vec<OsString> = vec![
    description_arg,
    "--scope".into(),
    "--".into(),
    command.into(),
  ];

  let prefix = systemd_run_args
    .iter()
    .map(|s| s.to_string_lossy())
    .collect::<Vec<_>>()
    .join(" ");
  systemd_run_args.extend(args);

  (
    systemd_run_path,
    systemd_run_args,
    format!("{} {}", prefix, log_str),
  )
}

fn list_proc_mounts(mount_file_path: &Path) -> Result<Vec<MountPoint>> {
  let content = consistent_read(mount_file_path, MAX_LIST_TRIES)?;

  parse_proc_mounts(&content)
}

/// ConsistentRead repeatedly reads a file until it gets the same content twice. This is useful when reading files
/// in /proc that are larger than page size and kernel may modify them between individual read() syscalls.
fn consistent_read(path: &Path, attempts: NonZeroUsize) -> io::Result<Vec<u8>> {
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts.get() {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    // Files are different, continue reading
    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts.get()
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let mut out = Vec::new();
  let s = std::str::from_utf8(content)
    .map_err(|_| MountError::new("proc mounts contain invalid UTF8"))?;
  for line in s.lines() {
    if line.is_empty() {
      continue;
    }

    let fields = line
      .split_whitespace()
      .collect::<SmallVec<[&str; EXPECTED_FIELDS_PER_MOUNTS_LINE]>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::new(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::new(format!("invalid freq: {:?}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::new(format!("invalid pass: {:?}", e)))?;

    out.push(MountPoint {
      device: fields[0].into(),
      path: fields[1].into(),
      ty: fields[2].to_owned(),
      opts: fields[3].split(',').map(ToOwned::to_owned).collect(),
      freq,
      pass,
    })
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::{
    is_mount_point_match, make_mount_args_sensitive, parse_blkid_export, parse_proc_mounts,
    resize_command, resize_outcome, OsMounter,
  };
  use crate::{fake::*, runner::MounterImpl, MountPoint};
  use std::{
    ffi::OsString,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::ExitStatus,
  };
  use test_case::test_case;

  #[test]
  fn read_proc_mounts() {
    let success_case = "
/dev/0 /path/to/0 type0 flags 0 0
/dev/1    /path/to/1   type1	flags 1 1
/dev/2 /path/to/2 type2 flags,1,2=3 2 2
";

    let mounts = parse_proc_mounts(success_case.as_ref()).expect("parse succeeded");
    assert_eq!(mounts.len(), 3);
    assert_eq!(
      mounts[0],
      MountPoint {
        device: "/dev/0".into(),
        path: "/path/to/0".into(),
        ty: "type0".into(),
        opts: vec!["flags".into()],
        freq: 0,
        pass: 0,
      }
    );
    assert_eq!(
      mounts[1],
      MountPoint {
        device: "/dev/1".into(),
        path: "/path/to/1".into(),
        ty: "type1".into(),
        opts: vec!["flags".into()],
        freq: 1,
        pass: 1,
      }
    );
    assert_eq!(
      mounts[2],
      MountPoint {
        device: "/dev/2".into(),
        path: "/path/to/2".into(),
        ty: "type2".into(),
        opts: vec!["flags".into(), "1".into(), "2=3".into()],
        freq: 2,
        pass: 2,
      }
    );

    let error_cases = &[
      "/dev/0 /path/to/mount\n",
      "/dev/1 /path/to/mount type flags a 0\n",
      "/dev/2 /path/to/mount type flags 0 b\n",
    ];
    for ec in error_cases {
      parse_proc_mounts(ec.as_ref()).expect_err(&format!("Error case '{}' should fail", ec.trim()));
    }
  }

  #[test]
  fn get_device_name_from_mount() {
    let fm = FakeMounter::new(vec![
      MountPoint::new("/dev/disk/by-id/virtio-vol-1", "/mnt/111", "ext4"),
      MountPoint::new("/dev/disk/by-id/virtio-vol-1", "/mnt/222", "ext4"),
      MountPoint::new("/dev/disk/by-id/virtio-vol-2", "/mnt/333", "xfs"),
    ]);

    struct Test {
      mount_path: &'static str,
      expected: Option<(&'static str, usize)>,
    }

    let tests = vec![
      Test {
        mount_path: "/mnt/222",
        expected: Some(("/dev/disk/by-id/virtio-vol-1", 2)),
      },
      Test {
        mount_path: "/mnt/333",
        expected: Some(("/dev/disk/by-id/virtio-vol-2", 1)),
      },
      Test {
        mount_path: "/mnt/444",
        expected: None,
      },
    ];

    for test in tests {
      let actual = fm
        .get_device_name_from_mount(test.mount_path.into())
        .unwrap_or_else(|e| panic!("get_device_name_from_mount({}): {:?}", test.mount_path, e));

      assert_eq!(
        actual,
        test
          .expected
          .map(|(device, refs)| (PathBuf::from(device), refs)),
        "wrong device for {}",
        test.mount_path
      );
    }
  }

  #[test]
  fn deleted_mount_point_matches() {
    let mp = MountPoint::new("/dev/vdb", "/mnt/data\\040(deleted)", "ext4");

    assert!(is_mount_point_match(&mp, Path::new("/mnt/data")));
    assert!(!is_mount_point_match(&mp, Path::new("/mnt/other")));
  }

  #[test_case("TYPE=ext4\n" => Some(String::from("ext4")) ; "filesystem")]
  #[test_case("DEVNAME=/dev/vdb\nTYPE=xfs\n" => Some(String::from("xfs")) ; "with device name")]
  #[test_case("PTTYPE=dos\n" => Some(String::from("unknown data, probably partitions")) ; "partition table")]
  #[test_case("" => None ; "empty")]
  fn blkid_export(output: &str) -> Option<String> {
    parse_blkid_export(output)
  }

  #[test]
  fn statvfs_of_temp_dir() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mounter = OsMounter {
      mounter_path: PathBuf::from("mount"),
      systemd: false,
    };

    let stats = mounter
      .stats(dir.path().to_owned())
      .expect("statvfs succeeded");
    assert!(stats.total_bytes > 0);
    assert!(stats.total_bytes >= stats.used_bytes);
    assert!(stats.total_inodes >= stats.used_inodes);
  }

  #[test]
  fn resize_rejects_unknown_filesystem() {
    let mounter = OsMounter {
      mounter_path: PathBuf::from("mount"),
      systemd: false,
    };

    let err = mounter
      .resize(Some("btrfs".into()), "/dev/vdb".into(), "/mnt/data".into())
      .expect_err("btrfs is not resizable");
    assert!(matches!(err, crate::MountError::UnsupportedFilesystem(t) if t == "btrfs"));
  }

  #[test_case(None, "resize2fs", &["/dev/vdb"] ; "absent type")]
  #[test_case(Some(""), "resize2fs", &["/dev/vdb"] ; "empty type")]
  #[test_case(Some("ext2"), "resize2fs", &["/dev/vdb"] ; "ext2")]
  #[test_case(Some("ext3"), "resize2fs", &["/dev/vdb"] ; "ext3")]
  #[test_case(Some("ext4"), "resize2fs", &["/dev/vdb"] ; "ext4")]
  #[test_case(Some("xfs"), "xfs_growfs", &["-d", "/mnt/data"] ; "xfs")]
  fn resize_dispatch(fstype: Option<&str>, program: &str, args: &[&str]) {
    let (actual, actual_args) =
      resize_command(fstype, Path::new("/dev/vdb"), Path::new("/mnt/data"))
        .expect("resizable filesystem");

    assert_eq!(actual, program);
    assert_eq!(
      actual_args,
      args.iter().map(OsString::from).collect::<Vec<_>>()
    );
  }

  #[test_case(0, "" => None ; "success without output")]
  #[test_case(0, "resizing to 5242880 blocks\n" => None ; "success with output")]
  #[test_case(256, "" => Some(String::from("resize exited with exit status: 1 and no output")) ; "failure without output")]
  #[test_case(256, "  open: No such file or directory\n" => Some(String::from("open: No such file or directory")) ; "failure with output")]
  fn resize_result(raw: i32, output: &str) -> Option<String> {
    resize_outcome(ExitStatus::from_raw(raw), output.as_bytes()).err()
  }

  #[test_case("mySrc", "myTarget", "myFS", &["o1", "o2"], &["s1", "s2"] ; "options and sensitive")]
  #[test_case("mySrc", "myTarget", "myFS", &[], &["s1", "s2"] ; "sensitive only")]
  #[test_case("mySrc", "myTarget", "myFS", &["o1", "o2"], &[] ; "options only")]
  fn sensitive_mount_options(
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    options: &[&'static str],
    options_sensitive: &[&'static str],
  ) {
    let options = options.iter().map(|v| (*v).to_owned()).collect::<Vec<_>>();
    let options_sensitive = options_sensitive
      .iter()
      .map(|v| (*v).to_owned())
      .collect::<Vec<_>>();

    let (mount_args, log_str) = make_mount_args_sensitive(
      Some(source.into()),
      target.as_ref(),
      fstype,
      &options,
      &options_sensitive,
    );

    for option in &options {
      assert!(
        opts_contains(&mount_args, option),
        "expected option ({}) to exist in returned mount_args, but it does not: {:?}",
        option,
        mount_args
      );
      assert!(
        log_str.contains(option.as_str()),
        "expected option ({}) to exist in returned log_str, but it does not: {:?}",
        option,
        log_str
      );
    }

    for option in &options_sensitive {
      assert!(
        opts_contains(&mount_args, option),
        "expected sensitive option ({}) to exist in returned mount_args, but it does not: {:?}",
        option,
        mount_args
      );
      assert!(
        !log_str.contains(option.as_str()),
        "expected sensitive option ({}) to not exist in returned log_str, but it does: {:?}",
        option,
        log_str
      );
    }

    fn opts_contains(args: &[OsString], opt: &str) -> bool {
      if let Some(opt_arg) = args.iter().skip_while(|a| *a != "-o").nth(1) {
        opt_arg.to_string_lossy().contains(opt)
      } else {
        false
      }
    }
  }
}
