use anyhow::{anyhow, Context, Result};
use fieldup_core::{Status, SystemName, UpdateError, UpdateResult};
use fieldup_security::Labeler;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::chain::SystemVersionChain;
use crate::collab::{ConfigStore, SYSTEM_TREE};
use crate::content_store::sorted_entries;
use crate::fs_utils::{remove_dir_all_if_exists, sync_filesystems};
use crate::labels::PermissionPropagator;
use crate::mounts::{MountInfo, MountTable};
use crate::probation::Probation;
use crate::tree::{walk, EntryKind, TreeEntry, TreeVisitor, WalkControl, WalkOptions};
use crate::writeable::stage_writeable_files;
use crate::UpdateLayout;

/// What [`SnapshotEngine::snapshot`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// `current` was copied into this slot.
    Taken { index: u32 },
    /// `current` has not passed probation; only the index moved.
    Skipped,
    /// The slot already existed from an earlier interrupted snapshot.
    AlreadyPresent { index: u32 },
}

pub struct SnapshotEngine<'a> {
    layout: &'a UpdateLayout,
    chain: &'a SystemVersionChain<'a>,
    probation: &'a dyn Probation,
    mounts: &'a MountInfo,
    labeler: &'a dyn Labeler,
    framework_label: &'a str,
}

impl<'a> SnapshotEngine<'a> {
    pub fn new(
        layout: &'a UpdateLayout,
        chain: &'a SystemVersionChain<'a>,
        probation: &'a dyn Probation,
        mounts: &'a MountInfo,
        labeler: &'a dyn Labeler,
        framework_label: &'a str,
    ) -> Self {
        Self {
            layout,
            chain,
            probation,
            mounts,
            labeler,
            framework_label,
        }
    }

    /// Preserves a good `current` as a rollback target, then moves `current` to a fresh index.
    ///
    /// The rename of the staging directory is the only visible step; a failed copy leaves the
    /// previous state as it was.
    pub fn snapshot(&self) -> UpdateResult<SnapshotOutcome> {
        let status = self.probation.current_status()?;
        let current_index = self.chain.current_index()?;

        if status != Status::Good {
            let next = self.chain.next_index()?;
            self.chain.set_index(SystemName::Current, next)?;
            warn!(
                status = status.as_str(),
                index = next,
                "system has not passed probation, no snapshot taken"
            );
            return Ok(SnapshotOutcome::Skipped);
        }

        let slot = self.layout.system_dir(SystemName::Numbered(current_index));
        if slot.is_dir() {
            let next = self.chain.next_index()?;
            self.chain.set_index(SystemName::Current, next)?;
            warn!(index = current_index, "snapshot slot already present, not copying");
            return Ok(SnapshotOutcome::AlreadyPresent {
                index: current_index,
            });
        }

        let staging = self.layout.system_dir(SystemName::Unpack);
        remove_dir_all_if_exists(&staging)?;
        let table = self.mounts.load()?;
        let current = self.layout.system_dir(SystemName::Current);
        copy_tree(&current, &staging, &table)?;

        // Bind-mounted sandboxes are skipped by the walk and copied on their own.
        let writeable = self.layout.system_writeable_dir(SystemName::Current);
        if writeable.is_dir() {
            for dir in sorted_entries(&writeable)? {
                if !dir.is_dir() || !table.is_mount_point(&dir) {
                    continue;
                }
                let Some(name) = dir.file_name() else {
                    continue;
                };
                let dest = self
                    .layout
                    .system_writeable_dir(SystemName::Unpack)
                    .join(name);
                copy_tree(&dir, &dest, &MountTable::default())?;
            }
        }

        sync_filesystems();
        fs::rename(&staging, &slot).with_context(|| {
            format!(
                "failed to rename {} to {}",
                staging.display(),
                slot.display()
            )
        })?;
        self.labeler.set_label(&slot, self.framework_label)?;

        let next = self.chain.next_index()?;
        self.chain.set_index(SystemName::Current, next)?;
        info!(
            snapshot = current_index,
            current = next,
            "snapshot taken of current system"
        );
        Ok(SnapshotOutcome::Taken {
            index: current_index,
        })
    }

    /// Moves a full system update staged in `systems/unpack` into its own index slot.
    ///
    /// The `current` index is left alone. Indices still only grow because the staged slot
    /// takes [`SystemVersionChain::next_index`], which is above `current` and every numbered
    /// slot, and later snapshots allocate above it the same way.
    pub fn finish_system_update(
        &self,
        propagator: &PermissionPropagator<'_>,
        config_store: &dyn ConfigStore,
    ) -> UpdateResult<u32> {
        let staging = self.layout.system_dir(SystemName::Unpack);
        if !staging.is_dir() {
            return Err(UpdateError::not_found(format!(
                "staged system update {}",
                staging.display()
            )));
        }

        for (app, hash) in self.chain.apps_in(SystemName::Unpack)? {
            let dest = self
                .layout
                .system_app_writeable_dir(SystemName::Unpack, &app);
            let inherit = self
                .layout
                .system_app_writeable_dir(SystemName::Current, &app);
            stage_writeable_files(
                propagator,
                &app,
                &self.layout.app_writeable_template_dir(&hash),
                &dest,
                &inherit,
            )?;
            if self.chain.has_app(&app) {
                let export = self
                    .layout
                    .system_config_dir(SystemName::Unpack)
                    .join(format!("{app}.scissors"));
                config_store.export_tree(&format!("{app}:/"), &export)?;
            }
        }

        let index = self.chain.next_index()?;
        self.chain.set_index(SystemName::Unpack, index)?;

        let system_config = self
            .layout
            .system_config_dir(SystemName::Unpack)
            .join("system.paper");
        config_store.export_tree(&format!("{SYSTEM_TREE}:/"), &system_config)?;
        self.labeler.set_label(&system_config, self.framework_label)?;

        propagator.label_system_files(&staging.join("lib"))?;
        propagator.label_system_files(&staging.join("bin"))?;

        let slot = self.layout.system_dir(SystemName::Numbered(index));
        if slot.exists() {
            return Err(UpdateError::Fault(anyhow!(
                "system slot {} is already taken",
                slot.display()
            )));
        }
        sync_filesystems();
        fs::rename(&staging, &slot).with_context(|| {
            format!(
                "failed to rename {} to {}",
                staging.display(),
                slot.display()
            )
        })?;
        info!(index, "system update moved into place");
        Ok(index)
    }
}

/// Recursive copy that keeps modes and symlinks and does not descend into mount points.
pub fn copy_tree(src: &Path, dst: &Path, mounts: &MountTable) -> Result<()> {
    let mut copier = MountAwareCopier { dst, mounts };
    walk(src, WalkOptions::physical(), &mut copier)
}

struct MountAwareCopier<'a> {
    dst: &'a Path,
    mounts: &'a MountTable,
}

impl TreeVisitor for MountAwareCopier<'_> {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        if !entry.is_root() && self.mounts.is_mount_point(entry.path) {
            debug!(path = %entry.path.display(), "not copying mount point contents");
            return Ok(WalkControl::SkipSubtree);
        }
        let dest = self.dst.join(entry.relative);
        match entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&dest)
                    .with_context(|| format!("failed to create {}", dest.display()))?;
                fs::set_permissions(&dest, fs::Permissions::from_mode(entry.mode()))
                    .with_context(|| format!("failed to set mode on {}", dest.display()))?;
            }
            EntryKind::File => {
                fs::copy(entry.path, &dest).with_context(|| {
                    format!(
                        "failed to copy {} to {}",
                        entry.path.display(),
                        dest.display()
                    )
                })?;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(entry.path)
                    .with_context(|| format!("failed to read symlink {}", entry.path.display()))?;
                std::os::unix::fs::symlink(&target, &dest).with_context(|| {
                    format!(
                        "failed to create symlink {} -> {}",
                        dest.display(),
                        target.display()
                    )
                })?;
            }
            EntryKind::Device | EntryKind::Other => {
                debug!(path = %entry.path.display(), "skipping special file");
            }
        }
        Ok(WalkControl::Continue)
    }
}
