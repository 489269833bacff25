use std::collections::BTreeMap;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use fieldup_core::validate_label;
use tracing::debug;

pub const SMACK_XATTR: &str = "security.SMACK64";
const SMACKFS_MOUNT: &str = "/sys/fs/smackfs";

/// Assigns a mandatory access control label to a path without following symlinks.
pub trait Labeler {
    fn set_label(&self, path: &Path, label: &str) -> Result<()>;

    /// Whether labels actually reach the filesystem.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Writes SMACK labels through the `security.SMACK64` extended attribute.
///
/// When the kernel has no SMACK support the labeler validates labels but does not touch the
/// filesystem.
#[derive(Debug, Clone)]
pub struct SmackLabeler {
    enabled: bool,
}

impl SmackLabeler {
    pub fn detect() -> Self {
        let enabled = Path::new(SMACKFS_MOUNT).is_dir();
        debug!(enabled, "detected SMACK support");
        Self { enabled }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Labeler for SmackLabeler {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_label(&self, path: &Path, label: &str) -> Result<()> {
        validate_label(label)
            .with_context(|| format!("refusing to label {}", path.display()))?;
        if !self.enabled {
            debug!(path = %path.display(), label, "SMACK disabled, label not applied");
            return Ok(());
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("path contains NUL byte: {}", path.display()))?;
        let c_name = CString::new(SMACK_XATTR).context("invalid xattr name")?;
        let value = label.as_bytes();

        // SAFETY: both strings are NUL-terminated and the value pointer/length pair covers
        // `label` for the duration of the call.
        let rc = unsafe {
            libc::lsetxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(anyhow!(err)).with_context(|| {
                format!("failed to set label '{label}' on {}", path.display())
            });
        }
        debug!(path = %path.display(), label, "set SMACK label");
        Ok(())
    }
}

/// Accepts every request and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLabeler;

impl Labeler for NullLabeler {
    fn set_label(&self, path: &Path, label: &str) -> Result<()> {
        validate_label(label)
            .with_context(|| format!("refusing to label {}", path.display()))?;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Remembers the last label assigned to each path. Optionally fails for one path.
#[derive(Debug, Default)]
pub struct RecordingLabeler {
    labels: Mutex<BTreeMap<PathBuf, String>>,
    fail_at: Option<PathBuf>,
}

impl RecordingLabeler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(path: impl Into<PathBuf>) -> Self {
        Self {
            labels: Mutex::new(BTreeMap::new()),
            fail_at: Some(path.into()),
        }
    }

    pub fn label_of(&self, path: &Path) -> Option<String> {
        self.lock().get(path).cloned()
    }

    pub fn labels(&self) -> BTreeMap<PathBuf, String> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, String>> {
        // A poisoned map is still a valid record.
        self.labels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Labeler for RecordingLabeler {
    fn set_label(&self, path: &Path, label: &str) -> Result<()> {
        validate_label(label)
            .with_context(|| format!("refusing to label {}", path.display()))?;
        if self.fail_at.as_deref() == Some(path) {
            return Err(anyhow!(
                "failed to set label '{label}' on {}: simulated failure",
                path.display()
            ));
        }
        self.lock().insert(path.to_path_buf(), label.to_string());
        Ok(())
    }
}
