use anyhow::{anyhow, Context, Result};
use fieldup_core::{AppName, EngineConfig, PathBuilder};
use fieldup_security::{Labeler, SmackLabeler};
use std::fs;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::fs_utils::{remove_dir_all_if_exists, run_command, write_atomic};
use crate::probation::{FileProbation, Probation};
use crate::tree::{walk, EntryKind, TreeEntry, TreeVisitor, WalkControl, WalkOptions};
use crate::UpdateLayout;

/// Tree holding per-app entries under `/apps` and the framework settings.
pub const SYSTEM_TREE: &str = "system";

pub fn app_config_node(app: &AppName) -> String {
    format!("{SYSTEM_TREE}:/apps/{app}")
}

/// Hierarchical configuration store. Paths look like `tree:/node/child`.
pub trait ConfigStore {
    fn node_exists(&self, path: &str) -> Result<bool>;
    fn delete_node(&self, path: &str) -> Result<()>;
    /// Replaces the node at `path` with the tree serialized in `source`.
    fn import_tree(&self, path: &str, source: &Path) -> Result<()>;
    fn export_tree(&self, path: &str, dest: &Path) -> Result<()>;
    /// Drops a whole named tree such as an app's private tree.
    fn delete_tree(&self, tree: &str) -> Result<()>;
}

pub trait Principals {
    fn add(&self, app: &AppName) -> Result<()>;
    fn remove(&self, app: &AppName) -> Result<()>;
    fn exists(&self, app: &AppName) -> Result<bool>;
}

pub trait Supervisor {
    fn start_app(&self, app: &AppName) -> Result<()>;
    fn stop_app(&self, app: &AppName) -> Result<()>;
}

pub trait HookRunner {
    /// Runs `script` through the system hook wrapper. A missing script is not an error.
    fn run(&self, script: &Path) -> Result<()>;
}

pub trait BindingsLoader {
    fn reload(&self) -> Result<()>;
}

pub trait InstallEvents {
    fn app_installed(&self, app: &AppName);
    fn app_removed(&self, app: &AppName);
}

/// Everything outside the engine that it calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub labeler: Arc<dyn Labeler>,
    pub probation: Arc<dyn Probation>,
    pub config_store: Arc<dyn ConfigStore>,
    pub principals: Arc<dyn Principals>,
    pub supervisor: Arc<dyn Supervisor>,
    pub hooks: Arc<dyn HookRunner>,
    pub bindings: Arc<dyn BindingsLoader>,
    pub events: Arc<dyn InstallEvents>,
}

impl Collaborators {
    /// File-backed collaborators for running the engine on its own.
    pub fn standalone(config: &EngineConfig) -> Self {
        let layout = UpdateLayout::new(&config.root);
        Self {
            labeler: Arc::new(SmackLabeler::detect()),
            probation: Arc::new(FileProbation::new(layout)),
            config_store: Arc::new(FileConfigStore::new(config.config_tree_dir())),
            principals: Arc::new(FilePrincipals::new(config.principals_dir())),
            supervisor: Arc::new(NullSupervisor),
            hooks: Arc::new(CommandHookRunner::new(config.hook_wrapper())),
            bindings: Arc::new(CommandBindingsLoader::new(config.bindings_reload_command())),
            events: Arc::new(TracingEvents),
        }
    }
}

/// Config store kept as plain files: node `tree:/a/b` lives at `<dir>/tree/a/b`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn node_path(&self, path: &str) -> Result<PathBuf> {
        let (tree, node) = path.split_once(":/").unwrap_or((SYSTEM_TREE, path));
        let mut builder = PathBuilder::new(&self.dir).push(tree)?;
        for component in node.split('/').filter(|part| !part.is_empty()) {
            builder = builder.push(component)?;
        }
        Ok(builder.build())
    }
}

impl ConfigStore for FileConfigStore {
    fn node_exists(&self, path: &str) -> Result<bool> {
        Ok(self.node_path(path)?.exists())
    }

    fn delete_node(&self, path: &str) -> Result<()> {
        remove_dir_all_if_exists(&self.node_path(path)?)
    }

    fn import_tree(&self, path: &str, source: &Path) -> Result<()> {
        let node = self.node_path(path)?;
        let contents = fs::read(source)
            .with_context(|| format!("failed to read config source: {}", source.display()))?;
        remove_dir_all_if_exists(&node)?;
        if let Some(parent) = node.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        write_atomic(&node, &contents)?;
        debug!(node = path, source = %source.display(), "imported config tree");
        Ok(())
    }

    fn export_tree(&self, path: &str, dest: &Path) -> Result<()> {
        let node = self.node_path(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut exporter = TreeExporter::default();
        if node.exists() {
            walk(&node, WalkOptions::physical(), &mut exporter)?;
        }
        write_atomic(dest, &exporter.out)?;
        debug!(node = path, dest = %dest.display(), "exported config tree");
        Ok(())
    }

    fn delete_tree(&self, tree: &str) -> Result<()> {
        remove_dir_all_if_exists(&PathBuilder::new(&self.dir).push(tree)?.build())
    }
}

/// Serializes a node as `[relative/path]` headers followed by each leaf's contents.
#[derive(Default)]
struct TreeExporter {
    out: Vec<u8>,
}

impl TreeVisitor for TreeExporter {
    fn enter(&mut self, entry: &TreeEntry<'_>) -> Result<WalkControl> {
        if entry.kind == EntryKind::File {
            let contents = fs::read(entry.path)
                .with_context(|| format!("failed to read {}", entry.path.display()))?;
            writeln!(self.out, "[{}]", entry.relative.display())?;
            self.out.extend_from_slice(&contents);
            if !contents.ends_with(b"\n") {
                self.out.push(b'\n');
            }
        }
        Ok(WalkControl::Continue)
    }
}

/// One marker file per app identity.
#[derive(Debug, Clone)]
pub struct FilePrincipals {
    dir: PathBuf,
}

impl FilePrincipals {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, app: &AppName) -> PathBuf {
        self.dir.join(app.as_str())
    }
}

impl Principals for FilePrincipals {
    fn add(&self, app: &AppName) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        write_atomic(&self.path(app), format!("app{app}\n").as_bytes())?;
        info!(app = %app, "added app principal");
        Ok(())
    }

    fn remove(&self, app: &AppName) -> Result<()> {
        crate::fs_utils::remove_file_if_exists(&self.path(app))?;
        info!(app = %app, "removed app principal");
        Ok(())
    }

    fn exists(&self, app: &AppName) -> Result<bool> {
        Ok(self.path(app).is_file())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSupervisor;

impl Supervisor for NullSupervisor {
    fn start_app(&self, app: &AppName) -> Result<()> {
        debug!(app = %app, "no supervisor, not starting app");
        Ok(())
    }

    fn stop_app(&self, app: &AppName) -> Result<()> {
        debug!(app = %app, "no supervisor, not stopping app");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandHookRunner {
    wrapper: PathBuf,
}

impl CommandHookRunner {
    pub fn new(wrapper: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
        }
    }
}

impl HookRunner for CommandHookRunner {
    fn run(&self, script: &Path) -> Result<()> {
        if !script.exists() {
            return Ok(());
        }
        let script_name = script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(script = %script.display(), wrapper = %self.wrapper.display(), "running install hook");

        let status = Command::new(&self.wrapper)
            .arg(script)
            .status()
            .with_context(|| {
                format!(
                    "could not run install hook wrapper {}",
                    self.wrapper.display()
                )
            })?;
        if status.success() {
            return Ok(());
        }
        if let Some(signal) = status.signal() {
            error!(script = %script_name, signal, "install hook terminated by signal");
            return Err(anyhow!(
                "install hook '{script_name}' terminated by signal {signal}"
            ));
        }
        let code = status.code().unwrap_or(-1);
        error!(script = %script_name, code, "install hook failed");
        Err(anyhow!("install hook '{script_name}' failed with exit code {code}"))
    }
}

#[derive(Debug, Clone)]
pub struct CommandBindingsLoader {
    command: Vec<String>,
}

impl CommandBindingsLoader {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl BindingsLoader for CommandBindingsLoader {
    fn reload(&self) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("bindings reload command is empty"))?;
        run_command(
            Command::new(program).args(args),
            "failed to load application bindings",
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl InstallEvents for TracingEvents {
    fn app_installed(&self, app: &AppName) {
        info!(app = %app, event = "install", "app install reported");
    }

    fn app_removed(&self, app: &AppName) {
        info!(app = %app, event = "uninstall", "app removal reported");
    }
}
