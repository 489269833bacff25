use anyhow::{anyhow, Context, Result};
use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Device,
    Other,
}

impl EntryKind {
    fn of(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            Self::Dir
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_char_device() || file_type.is_block_device() {
            Self::Device
        } else {
            Self::Other
        }
    }
}

/// One node handed to a [`TreeVisitor`]. `relative` is empty for the walk root.
#[derive(Debug)]
pub struct TreeEntry<'a> {
    pub path: &'a Path,
    pub relative: &'a Path,
    pub depth: usize,
    pub kind: EntryKind,
    pub metadata: &'a Metadata,
}

impl TreeEntry<'_> {
    pub fn mode(&self) -> u32 {
        self.metadata.mode() & 0o7777
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    SkipSubtree,
}

pub trait TreeVisitor {
    /// Called for every entry before its children (pre-order).
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl>;

    /// Called for a directory after all of its children (post-order).
    fn leave(&mut self, _entry: &TreeEntry<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Stat through symlinks so they are reported as their targets.
    pub follow_links: bool,
}

impl WalkOptions {
    pub fn physical() -> Self {
        Self {
            follow_links: false,
        }
    }

    pub fn logical() -> Self {
        Self { follow_links: true }
    }
}

/// Walks `root` depth-first, children in name order. The first visitor error stops the walk.
pub fn walk(root: &Path, options: WalkOptions, visitor: &mut dyn TreeVisitor) -> Result<()> {
    let metadata = stat(root, options)?;
    let mut ancestors = Vec::new();
    visit(
        root,
        Path::new(""),
        0,
        &metadata,
        options,
        visitor,
        &mut ancestors,
    )
}

fn visit(
    path: &Path,
    relative: &Path,
    depth: usize,
    metadata: &Metadata,
    options: WalkOptions,
    visitor: &mut dyn TreeVisitor,
    ancestors: &mut Vec<(u64, u64)>,
) -> Result<()> {
    let entry = TreeEntry {
        path,
        relative,
        depth,
        kind: EntryKind::of(metadata),
        metadata,
    };
    let control = visitor.enter(&entry)?;
    if entry.kind != EntryKind::Dir || control == WalkControl::SkipSubtree {
        return Ok(());
    }

    let key = (metadata.dev(), metadata.ino());
    if ancestors.contains(&key) {
        return Err(anyhow!("directory cycle detected at {}", path.display()));
    }
    ancestors.push(key);

    let mut children = Vec::new();
    for child in fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))?
    {
        let child = child.with_context(|| format!("failed to read {}", path.display()))?;
        children.push(child.file_name());
    }
    children.sort();

    for name in children {
        let child_path = path.join(&name);
        let child_relative: PathBuf = relative.join(&name);
        let child_metadata = stat(&child_path, options)?;
        visit(
            &child_path,
            &child_relative,
            depth + 1,
            &child_metadata,
            options,
            visitor,
            ancestors,
        )?;
    }

    ancestors.pop();
    visitor.leave(&entry)
}

fn stat(path: &Path, options: WalkOptions) -> Result<Metadata> {
    let metadata = if options.follow_links {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    };
    metadata.with_context(|| format!("failed to stat {}", path.display()))
}
