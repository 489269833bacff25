use anyhow::{anyhow, Context, Result};
use fieldup_core::ContentHash;
use fieldup_security::Labeler;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::fs_utils::{
    create_dir_with_mode, path_entry_exists, read_link_basename, remove_dir_all_if_exists,
    remove_file_if_exists,
};
use crate::UpdateLayout;

/// Immutable app payloads under `apps/<hash>`, shared by every system that links to them.
pub struct ContentStore<'a> {
    layout: &'a UpdateLayout,
    labeler: &'a dyn Labeler,
    framework_label: &'a str,
}

impl<'a> ContentStore<'a> {
    pub fn new(layout: &'a UpdateLayout, labeler: &'a dyn Labeler, framework_label: &'a str) -> Self {
        Self {
            layout,
            labeler,
            framework_label,
        }
    }

    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.layout.app_dir(hash).is_dir()
    }

    /// Empties the staging area that payloads are unpacked into.
    pub fn prep_unpack_dir(&self) -> Result<PathBuf> {
        let path = self.layout.app_unpack_dir();
        remove_dir_all_if_exists(&path)?;
        create_dir_with_mode(&path, 0o775)?;
        Ok(path)
    }

    /// Moves an unpacked payload to `apps/<hash>` in one rename.
    pub fn materialize(&self, hash: &ContentHash, source: &Path) -> Result<()> {
        let target = self.layout.app_dir(hash);
        if target.is_dir() {
            return Err(anyhow!(
                "content entry {hash} already exists: {}",
                target.display()
            ));
        }
        if !source.is_dir() {
            return Err(anyhow!("payload source is missing: {}", source.display()));
        }
        // A dangling link can be left behind by an interrupted materialize.
        if path_entry_exists(&target) {
            remove_file_if_exists(&target)?;
        }
        fs::create_dir_all(self.layout.apps_dir()).with_context(|| {
            format!("failed to create {}", self.layout.apps_dir().display())
        })?;
        fs::rename(source, &target).with_context(|| {
            format!(
                "failed to move payload {} to {}",
                source.display(),
                target.display()
            )
        })?;
        self.labeler.set_label(&target, self.framework_label)?;
        info!(hash = %hash, "materialized content entry");
        Ok(())
    }

    pub fn in_use_by_any_system(&self, hash: &ContentHash) -> Result<bool> {
        self.in_use_by_any_system_ignoring(hash, &[])
    }

    /// Looks for `systems/*/apps/*` symlinks whose target basename is `hash`. Links listed in
    /// `ignore` do not count.
    pub fn in_use_by_any_system_ignoring(
        &self,
        hash: &ContentHash,
        ignore: &[PathBuf],
    ) -> Result<bool> {
        let systems_dir = self.layout.systems_dir();
        if !systems_dir.is_dir() {
            return Ok(false);
        }
        for system in sorted_entries(&systems_dir)? {
            let apps_dir = system.join("apps");
            if !apps_dir.is_dir() {
                continue;
            }
            for link in sorted_entries(&apps_dir)? {
                if ignore.iter().any(|ignored| ignored == &link) {
                    continue;
                }
                let metadata = fs::symlink_metadata(&link)
                    .with_context(|| format!("failed to stat {}", link.display()))?;
                if !metadata.file_type().is_symlink() {
                    continue;
                }
                if read_link_basename(&link)?.as_deref() == Some(hash.as_str()) {
                    debug!(hash = %hash, link = %link.display(), "content entry in use");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Deletes the entry unless some system links to it. Returns whether it was deleted.
    pub fn reclaim(&self, hash: &ContentHash) -> Result<bool> {
        self.reclaim_ignoring(hash, &[])
    }

    pub fn reclaim_ignoring(&self, hash: &ContentHash, ignore: &[PathBuf]) -> Result<bool> {
        let path = self.layout.app_dir(hash);
        if !path_entry_exists(&path) {
            return Ok(false);
        }
        if self.in_use_by_any_system_ignoring(hash, ignore)? {
            debug!(hash = %hash, "content entry still needed");
            return Ok(false);
        }
        remove_dir_all_if_exists(&path)?;
        info!(hash = %hash, "removed unused content entry");
        Ok(true)
    }

    pub fn reclaim_unreferenced(&self) -> Result<Vec<ContentHash>> {
        let mut reclaimed = Vec::new();
        for hash in self.list_hashes()? {
            if self.reclaim(&hash)? {
                reclaimed.push(hash);
            }
        }
        Ok(reclaimed)
    }

    /// Hashes present in the store, skipping the staging area and foreign names.
    pub fn list_hashes(&self) -> Result<Vec<ContentHash>> {
        let apps_dir = self.layout.apps_dir();
        if !apps_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut hashes = Vec::new();
        for path in sorted_entries(&apps_dir)? {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Ok(hash) = ContentHash::parse(name) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }
}

pub(crate) fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}
