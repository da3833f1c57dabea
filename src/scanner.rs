//! Per-tick enumeration of a process's open descriptors.
//!
//! Each entry of `/proc/<pid>/fd` is stat'ed through its symlink. Regular files
//! and block devices are kept, their current offset read from
//! `/proc/<pid>/fdinfo/<fd>`. Everything else (pipes, sockets, character
//! devices, directories) is skipped, and any descriptor that cannot be read
//! this tick is silently dropped.

use nix::sys::stat::{major, minor};
use regex::Regex;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `pos:` followed by `flags:` at the start of an fdinfo record.
static FDINFO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pos:\s*(\d+)\s*\nflags:\s*(\S+)\s*\n").unwrap());

/// Mask of the access-mode bits in open flags (`O_ACCMODE`).
const ACCESS_MODE_MASK: u32 = 0o3;

/// Kind of resource a kept descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Regular,
    Block,
}

/// One descriptor as seen on a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdSnapshot {
    /// Descriptor number as listed in the fd directory.
    pub id: String,
    pub kind: FdKind,
    /// Current byte offset.
    pub position: Option<u64>,
    /// Size in bytes; `None` when a block device's capacity could not be read.
    pub size: Option<u64>,
    /// Where the descriptor's symlink points.
    pub path: String,
    /// Open flags from fdinfo, decoded from octal.
    pub flags: u32,
}

impl FdSnapshot {
    /// Access mode as `r`, `w` or `rw`.
    pub fn access_mode(&self) -> &'static str {
        match self.flags & ACCESS_MODE_MASK {
            0 => "r",
            1 => "w",
            _ => "rw",
        }
    }
}

/// Reads descriptor tables for one pid.
#[derive(Debug, Clone)]
pub struct FdScanner {
    fd_dir: PathBuf,
    fdinfo_dir: PathBuf,
    block_dir: PathBuf,
}

impl FdScanner {
    pub fn new(pid: i32) -> Self {
        Self::with_roots(Path::new("/proc"), Path::new("/sys"), pid)
    }

    /// Scanner reading procfs and sysfs from the given mount points.
    pub fn with_roots(proc_root: &Path, sys_root: &Path, pid: i32) -> Self {
        let process_dir = proc_root.join(pid.to_string());
        Self {
            fd_dir: process_dir.join("fd"),
            fdinfo_dir: process_dir.join("fdinfo"),
            block_dir: sys_root.join("dev").join("block"),
        }
    }

    /// Snapshot every sized descriptor, in directory order.
    ///
    /// An unreadable fd directory (process gone, permission denied) yields an
    /// empty list rather than an error.
    pub fn scan(&self) -> Vec<FdSnapshot> {
        let entries = match fs::read_dir(&self.fd_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.fd_dir.display(), error = %e, "cannot list descriptors");
                return Vec::new();
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.inspect(&id) {
                Ok(Some(snapshot)) => {
                    tracing::trace!(
                        fd = %snapshot.id,
                        kind = ?snapshot.kind,
                        mode = snapshot.access_mode(),
                        path = %snapshot.path,
                        "descriptor sampled"
                    );
                    snapshots.push(snapshot);
                }
                Ok(None) => tracing::trace!(fd = %id, "descriptor kind has no size, skipped"),
                Err(e) => tracing::trace!(fd = %id, error = %e, "descriptor dropped this tick"),
            }
        }
        snapshots
    }

    /// Inspect one descriptor. `Ok(None)` means the kind is not tracked.
    fn inspect(&self, id: &str) -> Result<Option<FdSnapshot>, ScanError> {
        let link = self.fd_dir.join(id);
        let meta = fs::metadata(&link).map_err(|e| ScanError::io(&link, e))?;
        let target = fs::read_link(&link).map_err(|e| ScanError::io(&link, e))?;

        let file_type = meta.file_type();
        let (kind, size) = if file_type.is_file() {
            (FdKind::Regular, Some(meta.len()))
        } else if file_type.is_block_device() {
            let rdev = meta.rdev();
            (
                FdKind::Block,
                read_block_capacity(&self.block_dir, major(rdev), minor(rdev)),
            )
        } else {
            return Ok(None);
        };

        let info_path = self.fdinfo_dir.join(id);
        let info = fs::read_to_string(&info_path).map_err(|e| ScanError::io(&info_path, e))?;
        let (position, flags) = parse_fdinfo(&info).ok_or_else(|| ScanError::Fdinfo {
            id: id.to_string(),
        })?;

        Ok(Some(FdSnapshot {
            id: id.to_string(),
            kind,
            position: Some(position),
            size,
            path: target.to_string_lossy().into_owned(),
            flags,
        }))
    }
}

/// Pull the byte offset and octal open flags out of an fdinfo record.
pub fn parse_fdinfo(text: &str) -> Option<(u64, u32)> {
    let caps = FDINFO_PATTERN.captures(text)?;
    let position = caps[1].parse().ok()?;
    let flags = u32::from_str_radix(&caps[2], 8).ok()?;
    Some((position, flags))
}

/// Read `<block_dir>/<major>:<minor>/size`.
///
/// The file's integer content is returned as-is and treated as bytes.
pub fn read_block_capacity(block_dir: &Path, major: u64, minor: u64) -> Option<u64> {
    let path = block_dir.join(format!("{major}:{minor}")).join("size");
    match fs::read_to_string(&path) {
        Ok(text) => text.trim().parse().ok(),
        Err(e) => {
            tracing::trace!(path = %path.display(), error = %e, "block capacity unavailable");
            None
        }
    }
}

/// Why a descriptor was dropped from a tick.
#[derive(Debug)]
pub enum ScanError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The fdinfo record lacked a parsable `pos:`/`flags:` pair.
    Fdinfo { id: String },
}

impl ScanError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ScanError::Fdinfo { id } => write!(f, "malformed fdinfo for descriptor {id}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io { source, .. } => Some(source),
            ScanError::Fdinfo { .. } => None,
        }
    }
}
