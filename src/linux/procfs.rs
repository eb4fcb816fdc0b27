//! DRM client enumeration through procfs
//!
//! Every process's open file descriptors are checked for DRM character
//! devices. For each one found, the descriptor's fdinfo is parsed into a
//! usage record:
//!
//! ```text
//! drm-driver:     i915
//! drm-pdev:       0000:00:02.0
//! drm-client-id:  123
//! drm-engine-render:      12345678 ns
//! drm-engine-capacity-video:      2
//! ```
//!
//! Processes exit and close descriptors while a scan is running, so every
//! per-process and per-descriptor failure just skips that unit.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Error, Result};
use crate::fdinfo::parse_fdinfo;
use crate::source::{ClientSource, ScannedClient};
use crate::types::EngineMap;

/// Default procfs mount point
pub const PROC_ROOT: &str = "/proc";

/// Character device major number of DRM nodes
pub const DRM_MAJOR: u32 = 226;

/// Upper bound on bytes read from a single procfs file
pub const READ_LIMIT: u64 = 8192;

/// Process names longer than this are treated as unavailable
const NAME_CAPACITY: usize = 64;

/// Decides whether an open descriptor refers to a DRM device
pub trait FdClassifier: Send + Sync {
    /// DRM minor of the device behind `fd_path`, `None` for any other file
    fn drm_minor(&self, fd_path: &Path) -> Option<u32>;
}

/// Matches character devices with a given major number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmMajor(pub u32);

impl Default for DrmMajor {
    fn default() -> Self {
        DrmMajor(DRM_MAJOR)
    }
}

impl FdClassifier for DrmMajor {
    fn drm_minor(&self, fd_path: &Path) -> Option<u32> {
        let meta = fs::metadata(fd_path).ok()?;
        if !meta.file_type().is_char_device() {
            return None;
        }

        let rdev = meta.rdev() as libc::dev_t;
        let (major, minor) = (libc::major(rdev), libc::minor(rdev));

        (major as u32 == self.0).then_some(minor as u32)
    }
}

impl<F> FdClassifier for F
where
    F: Fn(&Path) -> Option<u32> + Send + Sync,
{
    fn drm_minor(&self, fd_path: &Path) -> Option<u32> {
        self(fd_path)
    }
}

/// Client source walking a procfs tree
pub struct ProcFs {
    root: PathBuf,
    classifier: Box<dyn FdClassifier>,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcFs").field("root", &self.root).finish()
    }
}

impl ProcFs {
    /// Scan the system procfs for DRM descriptors
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Scan a procfs tree mounted elsewhere
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            classifier: Box::new(DrmMajor::default()),
        }
    }

    /// Replace the descriptor classifier
    pub fn with_classifier(mut self, classifier: impl FdClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Root of the scanned procfs tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Verify the process list itself is readable
    pub fn check_access(&self) -> Result<()> {
        match fs::read_dir(&self.root) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(Error::permission_denied(&e))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Process name from `<pid>/stat`, `None` if it cannot be read or
    /// does not fit
    pub fn task_name(&self, pid: u32) -> Option<String> {
        let stat = read_bounded(&self.root.join(pid.to_string()).join("stat")).ok()?;
        parse_task_name(&stat)
    }

    fn scan_pid(&self, pid: u32, engine_map: Option<&EngineMap>, out: &mut Vec<ScannedClient>) {
        let pid_dir = self.root.join(pid.to_string());
        let Ok(fds) = fs::read_dir(pid_dir.join("fd")) else {
            return;
        };

        let mut name: Option<String> = None;

        for fd in fds.flatten() {
            let Some(drm_minor) = self.classifier.drm_minor(&fd.path()) else {
                continue;
            };

            let Ok(text) = read_bounded(&pid_dir.join("fdinfo").join(fd.file_name())) else {
                continue;
            };
            let Some(record) = parse_fdinfo(&text, engine_map) else {
                continue;
            };

            if name.is_none() {
                name = self.task_name(pid);
                if name.is_none() {
                    trace!(pid, "process name unavailable, skipping");
                    return;
                }
            }

            out.push(ScannedClient {
                pid,
                name: name.clone().unwrap_or_default(),
                drm_minor,
                record,
            });
        }
    }
}

impl ClientSource for ProcFs {
    fn scan(&self, engine_map: Option<&EngineMap>) -> Vec<ScannedClient> {
        let mut found = Vec::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                trace!(root = %self.root.display(), error = %e, "cannot list processes");
                return found;
            }
        };

        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if pid == 0 {
                continue;
            }
            self.scan_pid(pid, engine_map, &mut found);
        }

        found
    }
}

/// Read at most [`READ_LIMIT`] bytes of a text file
pub fn read_bounded(path: &Path) -> io::Result<String> {
    let mut buf = Vec::new();
    File::open(path)?.take(READ_LIMIT).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extract the name between the first '(' and the last ')' of a stat line
fn parse_task_name(stat: &str) -> Option<String> {
    let start = stat.find('(')? + 1;
    let end = stat.rfind(')')?;
    if end < start {
        return None;
    }

    let name = &stat[start..end];
    if name.is_empty() || name.len() + 1 >= NAME_CAPACITY {
        return None;
    }
    Some(name.to_string())
}
