use anyhow::{anyhow, Context, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Mount points read from a `mountinfo` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    mount_points: Vec<PathBuf>,
}

impl MountTable {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut mount_points = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let field = line.split_whitespace().nth(4).ok_or_else(|| {
                anyhow!("mountinfo line {} has no mount point field", line_no + 1)
            })?;
            mount_points.push(PathBuf::from(unescape_octal(field)));
        }
        Ok(Self { mount_points })
    }

    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.mount_points.iter().any(|mount| mount == path)
    }

    /// Mounts at or below `path`, deepest first so they can be detached in order.
    pub fn mounts_under(&self, path: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = self
            .mount_points
            .iter()
            .filter(|mount| mount.starts_with(path))
            .cloned()
            .collect();
        found.sort_by_key(|mount| std::cmp::Reverse(mount.components().count()));
        found.dedup();
        found
    }
}

/// Fresh view of the kernel mount table plus lazy detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    source: PathBuf,
}

impl MountInfo {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn load(&self) -> Result<MountTable> {
        match fs::read_to_string(&self.source) {
            Ok(raw) => MountTable::parse(&raw)
                .with_context(|| format!("failed to parse {}", self.source.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(source = %self.source.display(), "no mount table, assuming no mounts");
                Ok(MountTable::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", self.source.display()))
            }
        }
    }

    pub fn is_mount_point(&self, path: &Path) -> Result<bool> {
        Ok(self.load()?.is_mount_point(path))
    }

    /// Lazily detaches every mount at or below `path`.
    pub fn detach_under(&self, path: &Path) -> Result<()> {
        for mount in self.load()?.mounts_under(path) {
            lazy_unmount(&mount)?;
        }
        Ok(())
    }
}

pub fn lazy_unmount(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path contains NUL byte: {}", path.display()))?;
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::umount2(c_path.as_ptr(), libc::MNT_DETACH) };
    if rc == 0 {
        debug!(path = %path.display(), "lazily unmounted");
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINVAL) | Some(libc::ENOENT) => {
            debug!(path = %path.display(), "not mounted");
            Ok(())
        }
        _ => {
            warn!(path = %path.display(), error = %err, "lazy unmount failed");
            Err(anyhow!(err)).with_context(|| format!("failed to unmount {}", path.display()))
        }
    }
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
