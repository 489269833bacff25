use anyhow::Context;
use fieldup_core::{UpdateError, UpdateResult};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::fs_utils::remove_file_if_exists;

/// Claims `<root>/update.lock` for the lifetime of one mutating operation.
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    pub fn acquire(path: &Path) -> UpdateResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path)
                    .ok()
                    .map(|raw| raw.trim().to_string())
                    .filter(|raw| !raw.is_empty())
                    .map(|pid| format!(" (pid={pid})"))
                    .unwrap_or_default();
                return Err(UpdateError::Busy(format!(
                    "another update is in progress{holder}"
                )));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to claim update lock: {}", path.display()))
                    .into());
            }
        };

        if let Err(err) = file.write_all(format!("{}\n", std::process::id()).as_bytes()) {
            let _ = remove_file_if_exists(path);
            return Err(anyhow::Error::new(err)
                .context(format!("failed to write update lock: {}", path.display()))
                .into());
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Removes a lock left behind by a process that is gone. A lock whose holder is still
    /// running is kept, so the next [`UpdateLock::acquire`] reports `Busy`.
    pub fn clear_stale(path: &Path) -> anyhow::Result<bool> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(false);
        }
        if let Some(pid) = read_holder(path) {
            if process_alive(pid) {
                debug!(path = %path.display(), pid, "update lock holder is still running");
                return Ok(false);
            }
        }
        warn!(path = %path.display(), "clearing stale update lock");
        remove_file_if_exists(path)?;
        Ok(true)
    }
}

/// Pid written by the holder, if the lock file can be read and parsed.
fn read_holder(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM still means the process exists.
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        // Someone else may have cleared our lock and claimed it since.
        let ours = i32::try_from(std::process::id()).ok();
        if read_holder(&self.path) != ours {
            warn!(path = %self.path.display(), "update lock is no longer ours, leaving it");
            return;
        }
        if let Err(err) = remove_file_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release update lock");
        }
    }
}
