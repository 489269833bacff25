use anyhow::Result;
use fieldup_core::{AppName, ContentHash, LabelsConfig};
use fieldup_security::{app_label, dir_label, file_label, FileLabel, Labeler};
use std::path::Path;
use tracing::debug;

use crate::tree::{walk, EntryKind, TreeEntry, TreeVisitor, WalkControl, WalkOptions};
use crate::UpdateLayout;

/// Applies the per-app label policy to freshly materialized trees.
pub struct PermissionPropagator<'a> {
    layout: &'a UpdateLayout,
    labeler: &'a dyn Labeler,
    labels: &'a LabelsConfig,
    integrity_protection: bool,
}

impl<'a> PermissionPropagator<'a> {
    pub fn new(
        layout: &'a UpdateLayout,
        labeler: &'a dyn Labeler,
        labels: &'a LabelsConfig,
        integrity_protection: bool,
    ) -> Self {
        Self {
            layout,
            labeler,
            labels,
            integrity_protection,
        }
    }

    pub fn app_label(&self, app: &AppName) -> String {
        app_label(&self.labels.app_prefix, app)
    }

    pub fn writeable_root_label(&self, app: &AppName) -> String {
        format!("{}rwx", self.app_label(app))
    }

    pub fn set_label(&self, path: &Path, label: &str) -> Result<()> {
        self.labeler.set_label(path, label)
    }

    /// Labels `apps/<hash>/read-only` for `app`. The first failure aborts the walk.
    pub fn label_read_only_tree(&self, hash: &ContentHash, app: &AppName) -> Result<()> {
        let root = self.layout.app_read_only_dir(hash);
        if !root.is_dir() {
            debug!(hash = %hash, "payload has no read-only tree");
            return Ok(());
        }
        let mut visitor = ReadOnlyLabeler {
            labeler: self.labeler,
            app_label: self.app_label(app),
            read_protected: &self.labels.read_protected,
            integrity_protection: self.integrity_protection,
        };
        walk(&root, WalkOptions::logical(), &mut visitor)
    }

    /// Relabels the directories of a writeable tree; files keep the label they were copied with.
    pub fn label_writeable_tree(&self, root: &Path, app: &AppName) -> Result<()> {
        let mut visitor = WriteableDirLabeler {
            labeler: self.labeler,
            app_label: self.app_label(app),
        };
        walk(root, WalkOptions::logical(), &mut visitor)
    }

    /// Gives every entry below `root` the system files label.
    pub fn label_system_files(&self, root: &Path) -> Result<()> {
        if !root.exists() {
            return Ok(());
        }
        let mut visitor = FlatLabeler {
            labeler: self.labeler,
            label: &self.labels.system_files,
        };
        walk(root, WalkOptions::physical(), &mut visitor)
    }
}

struct ReadOnlyLabeler<'a> {
    labeler: &'a dyn Labeler,
    app_label: String,
    read_protected: &'a str,
    integrity_protection: bool,
}

impl TreeVisitor for ReadOnlyLabeler<'_> {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        match entry.kind {
            EntryKind::Dir => {
                let label = dir_label(&self.app_label, entry.mode(), false);
                debug!(path = %entry.path.display(), label, "labelling directory");
                self.labeler.set_label(entry.path, &label)?;
            }
            EntryKind::File => {
                let label = match file_label(entry.mode(), self.integrity_protection) {
                    FileLabel::App => self.app_label.as_str(),
                    FileLabel::ReadProtected => self.read_protected,
                };
                debug!(path = %entry.path.display(), label, "labelling file");
                self.labeler.set_label(entry.path, label)?;
            }
            EntryKind::Symlink | EntryKind::Device | EntryKind::Other => {}
        }
        Ok(WalkControl::Continue)
    }
}

struct WriteableDirLabeler<'a> {
    labeler: &'a dyn Labeler,
    app_label: String,
}

impl TreeVisitor for WriteableDirLabeler<'_> {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        if entry.kind == EntryKind::Dir {
            let label = if entry.is_root() {
                format!("{}rwx", self.app_label)
            } else {
                dir_label(&self.app_label, entry.mode(), true)
            };
            debug!(path = %entry.path.display(), label, "labelling writeable directory");
            self.labeler.set_label(entry.path, &label)?;
        }
        Ok(WalkControl::Continue)
    }
}

struct FlatLabeler<'a> {
    labeler: &'a dyn Labeler,
    label: &'a str,
}

impl TreeVisitor for FlatLabeler<'_> {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        if entry.kind != EntryKind::Symlink {
            self.labeler.set_label(entry.path, self.label)?;
        }
        Ok(WalkControl::Continue)
    }
}
