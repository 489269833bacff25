use anyhow::{anyhow, Context, Result};
use fieldup_core::{AppName, ContentHash, MarkerKind, SystemName};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::content_store::sorted_entries;
use crate::fs_utils::{
    fsync_dir, read_link_basename, remove_file_if_exists, replace_symlink, sync_filesystems,
};
use crate::UpdateLayout;

/// An operation whose marker was found in `current/apps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: MarkerKind,
    pub app: AppName,
    pub hash: ContentHash,
    pub marker: PathBuf,
}

/// Crash-durable markers for in-flight app operations.
pub struct Journal<'a> {
    layout: &'a UpdateLayout,
}

impl<'a> Journal<'a> {
    pub fn new(layout: &'a UpdateLayout) -> Self {
        Self { layout }
    }

    pub fn marker_path(&self, kind: MarkerKind, app: &AppName) -> PathBuf {
        self.layout
            .system_app_link(SystemName::Current, &kind.marker_name(app.as_str()))
    }

    pub fn begin_app_upgrade(&self, app: &AppName, new_hash: &ContentHash) -> Result<PathBuf> {
        self.begin(MarkerKind::Upgrade, app, new_hash)
    }

    pub fn begin_app_removal(&self, app: &AppName, current_hash: &ContentHash) -> Result<PathBuf> {
        self.begin(MarkerKind::Removal, app, current_hash)
    }

    /// Flushes pending writes, then records the marker and syncs its directory. Nothing
    /// destructive may run before this returns.
    pub fn begin(&self, kind: MarkerKind, app: &AppName, hash: &ContentHash) -> Result<PathBuf> {
        let marker = self.marker_path(kind, app);
        let other = match kind {
            MarkerKind::Upgrade => MarkerKind::Removal,
            MarkerKind::Removal => MarkerKind::Upgrade,
        };
        if fs::symlink_metadata(self.marker_path(other, app)).is_ok() {
            return Err(anyhow!(
                "app '{app}' already has a pending {} marker",
                other.as_str()
            ));
        }

        sync_filesystems();
        replace_symlink(&self.layout.binding_target(hash), &marker)?;
        let apps_dir = self.layout.system_apps_dir(SystemName::Current);
        fsync_dir(&apps_dir)?;
        info!(app = %app, hash = %hash, kind = kind.as_str(), "journal marker written");
        Ok(marker)
    }

    /// Drops whichever marker `app` has. Absent markers are fine.
    pub fn complete(&self, app: &AppName) -> Result<()> {
        for kind in MarkerKind::ALL {
            remove_file_if_exists(&self.marker_path(kind, app))?;
        }
        let apps_dir = self.layout.system_apps_dir(SystemName::Current);
        if apps_dir.is_dir() {
            fsync_dir(&apps_dir)?;
        }
        debug!(app = %app, "journal marker cleared");
        Ok(())
    }

    pub fn scan_pending(&self) -> Result<Vec<PendingOperation>> {
        let apps_dir = self.layout.system_apps_dir(SystemName::Current);
        if !apps_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut pending = Vec::new();
        for marker in sorted_entries(&apps_dir)? {
            let Some(file_name) = marker.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some((kind, app_name)) = MarkerKind::parse_marker_name(file_name) else {
                continue;
            };
            let app = AppName::parse(app_name)
                .with_context(|| format!("malformed journal marker {}", marker.display()))?;
            let target = read_link_basename(&marker)?
                .ok_or_else(|| anyhow!("journal marker vanished: {}", marker.display()))?;
            let hash = ContentHash::parse(&target)
                .with_context(|| format!("malformed journal marker {}", marker.display()))?;
            pending.push(PendingOperation {
                kind,
                app,
                hash,
                marker,
            });
        }
        Ok(pending)
    }
}
