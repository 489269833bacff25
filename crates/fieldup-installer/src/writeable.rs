use anyhow::{anyhow, Result};
use fieldup_core::{AppName, PathBuilder};
use fieldup_security::dir_label;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::fs_utils::{
    copy_file, create_dir_with_mode, path_entry_exists, remove_dir_all_if_exists,
    remove_file_if_exists,
};
use crate::labels::PermissionPropagator;
use crate::tree::{walk, EntryKind, TreeEntry, TreeVisitor, WalkControl, WalkOptions};

const WRITEABLE_ROOT_MODE: u32 = 0o777;

/// Copies a fresh writeable template into an empty per-app directory, then relabels its
/// directories since the copy does not reliably leave them with the right labels.
pub fn install_writeable_files(
    propagator: &PermissionPropagator<'_>,
    app: &AppName,
    template: &Path,
    dest: &Path,
) -> Result<()> {
    let mut copier = TemplateCopier::new(propagator, app, template, dest);
    walk(template, WalkOptions::physical(), &mut copier)?;
    propagator.label_writeable_tree(dest, app)
}

/// Brings `live` in line with `template`: missing template files are added, live entries the
/// template lacks are deleted, and files present in both are left untouched.
pub fn reconcile_writeable_files(
    propagator: &PermissionPropagator<'_>,
    app: &AppName,
    template: &Path,
    live: &Path,
) -> Result<()> {
    if template.is_dir() {
        let mut copier = TemplateCopier::new(propagator, app, template, live);
        copier.only_missing = true;
        walk(template, WalkOptions::logical(), &mut copier)?;
    } else {
        debug!(app = %app, "payload has no writeable template");
    }

    if !live.is_dir() {
        return Ok(());
    }
    let mut pruner = Pruner {
        template: template.to_path_buf(),
    };
    walk(live, WalkOptions::physical(), &mut pruner)
}

/// Builds an app's writeable files in a staged system, taking each file from `inherit` when the
/// running system already has it.
pub fn stage_writeable_files(
    propagator: &PermissionPropagator<'_>,
    app: &AppName,
    template: &Path,
    dest: &Path,
    inherit: &Path,
) -> Result<()> {
    if !template.is_dir() {
        return Ok(());
    }
    let mut copier = TemplateCopier::new(propagator, app, template, dest);
    copier.inherit = Some(inherit.to_path_buf());
    walk(template, WalkOptions::physical(), &mut copier)
}

struct TemplateCopier<'a> {
    propagator: &'a PermissionPropagator<'a>,
    app_label: String,
    root_label: String,
    template: &'a Path,
    dest: &'a Path,
    inherit: Option<PathBuf>,
    only_missing: bool,
}

impl<'a> TemplateCopier<'a> {
    fn new(
        propagator: &'a PermissionPropagator<'a>,
        app: &AppName,
        template: &'a Path,
        dest: &'a Path,
    ) -> Self {
        Self {
            propagator,
            app_label: propagator.app_label(app),
            root_label: propagator.writeable_root_label(app),
            template,
            dest,
            inherit: None,
            only_missing: false,
        }
    }
}

impl TreeVisitor for TemplateCopier<'_> {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        let dest = PathBuilder::new(self.dest)
            .push_relative(entry.relative)?
            .build();
        match entry.kind {
            EntryKind::Dir if entry.is_root() => {
                create_dir_with_mode(&dest, WRITEABLE_ROOT_MODE)?;
                self.propagator.set_label(&dest, &self.root_label)?;
            }
            EntryKind::Dir => {
                let mode = entry.mode() & 0o777;
                if !dest.is_dir() {
                    create_dir_with_mode(&dest, mode)?;
                }
                let label = dir_label(&self.app_label, mode, true);
                self.propagator.set_label(&dest, &label)?;
            }
            EntryKind::File => {
                if self.only_missing && path_entry_exists(&dest) {
                    return Ok(WalkControl::Continue);
                }
                let source = self
                    .inherit
                    .as_ref()
                    .map(|inherit| inherit.join(entry.relative))
                    .filter(|candidate| candidate.is_file())
                    .unwrap_or_else(|| entry.path.to_path_buf());
                copy_file(&source, &dest)?;
                self.propagator.set_label(&dest, &self.app_label)?;
                debug!(path = %dest.display(), "installed writeable file");
            }
            EntryKind::Symlink | EntryKind::Device | EntryKind::Other => {
                return Err(anyhow!(
                    "unsupported entry in writeable template {}: {}",
                    self.template.display(),
                    entry.path.display()
                ));
            }
        }
        Ok(WalkControl::Continue)
    }
}

struct Pruner {
    template: PathBuf,
}

impl Pruner {
    fn template_path(&self, entry: &TreeEntry<'_>) -> Result<PathBuf> {
        Ok(PathBuilder::new(&self.template)
            .push_relative(entry.relative)?
            .build())
    }
}

impl TreeVisitor for Pruner {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        if entry.is_root() {
            return Ok(WalkControl::Continue);
        }
        match entry.kind {
            EntryKind::Dir => {}
            EntryKind::File => {
                if !self.template_path(entry)?.is_file() {
                    debug!(path = %entry.path.display(), "removing stale writeable file");
                    remove_file_if_exists(entry.path)?;
                }
            }
            // Links and device nodes are never carried over from a previous version.
            EntryKind::Symlink | EntryKind::Device => remove_file_if_exists(entry.path)?,
            EntryKind::Other => {
                return Err(anyhow!(
                    "unexpected entry in writeable files: {}",
                    entry.path.display()
                ))
            }
        }
        Ok(WalkControl::Continue)
    }

    fn leave(&mut self, entry: &TreeEntry<'_>) -> Result<()> {
        if !entry.is_root() && !self.template_path(entry)?.is_dir() {
            debug!(path = %entry.path.display(), "removing stale writeable directory");
            remove_dir_all_if_exists(entry.path)?;
        }
        Ok(())
    }
}
