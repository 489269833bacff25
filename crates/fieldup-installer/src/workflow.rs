use anyhow::{anyhow, Context};
use fieldup_core::{
    AppName, ContentHash, EngineConfig, MarkerKind, Outcome, Status, SystemName, UpdateError,
    UpdateResult,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chain::SystemVersionChain;
use crate::collab::{app_config_node, Collaborators};
use crate::content_store::ContentStore;
use crate::fs_utils::remove_dir_all_if_exists;
use crate::journal::Journal;
use crate::labels::PermissionPropagator;
use crate::lock::UpdateLock;
use crate::mounts::MountInfo;
use crate::probation::Probation;
use crate::recovery::{RecoveryReport, RecoveryScanner};
use crate::snapshot::{SnapshotEngine, SnapshotOutcome};
use crate::writeable::{install_writeable_files, reconcile_writeable_files};
use crate::{HookKind, UpdateLayout};

/// Entry points for installing, upgrading and removing apps on a device.
///
/// Calls are serialized by the update lock. Every call re-reads its inputs from disk, which is
/// what lets boot-time recovery replay interrupted work through the same mutation steps.
pub struct UpdateEngine {
    config: EngineConfig,
    layout: UpdateLayout,
    mounts: MountInfo,
    collab: Collaborators,
}

/// State of the device as reported by `fieldup status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSummary {
    pub root: PathBuf,
    pub read_only: bool,
    pub labels_enabled: bool,
    pub current_index: Option<u32>,
    pub status: Status,
    pub version: Option<String>,
    pub modified: bool,
    pub previous_good_index: Option<u32>,
    pub apps: Vec<AppSummary>,
    pub pending: Vec<PendingSummary>,
    pub systems: Vec<SystemSummary>,
    pub content: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    pub kind: MarkerKind,
    pub app: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemSummary {
    pub name: String,
    pub index: Option<u32>,
    pub status: Status,
}

/// What a garbage collection pass deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub systems: Vec<PathBuf>,
    pub content: Vec<ContentHash>,
}

impl UpdateEngine {
    pub fn new(config: EngineConfig, collab: Collaborators) -> Self {
        let layout = UpdateLayout::new(&config.root);
        let mounts = MountInfo::new(&config.mounts.mountinfo);
        Self {
            config,
            layout,
            mounts,
            collab,
        }
    }

    /// Engine wired to the file-backed collaborators.
    pub fn standalone(config: EngineConfig) -> Self {
        let collab = Collaborators::standalone(&config);
        Self::new(config, collab)
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    pub(crate) fn probation(&self) -> &dyn Probation {
        self.collab.probation.as_ref()
    }

    pub(crate) fn chain(&self) -> SystemVersionChain<'_> {
        SystemVersionChain::new(&self.layout, self.probation(), &self.mounts)
    }

    pub(crate) fn store(&self) -> ContentStore<'_> {
        ContentStore::new(
            &self.layout,
            self.collab.labeler.as_ref(),
            &self.config.labels.framework,
        )
    }

    pub(crate) fn propagator(&self) -> PermissionPropagator<'_> {
        PermissionPropagator::new(
            &self.layout,
            self.collab.labeler.as_ref(),
            &self.config.labels,
            self.config.integrity_protection,
        )
    }

    pub(crate) fn journal(&self) -> Journal<'_> {
        Journal::new(&self.layout)
    }

    fn snapshotter<'a>(&'a self, chain: &'a SystemVersionChain<'a>) -> SnapshotEngine<'a> {
        SnapshotEngine::new(
            &self.layout,
            chain,
            self.probation(),
            &self.mounts,
            self.collab.labeler.as_ref(),
            &self.config.labels.framework,
        )
    }

    fn claim(&self) -> UpdateResult<UpdateLock> {
        if self.config.read_only {
            return Err(UpdateError::Fault(anyhow!(
                "system is read-only, refusing to modify {}",
                self.layout.root().display()
            )));
        }
        UpdateLock::acquire(&self.layout.lock_path())
    }

    /// Installs `app` at `hash`, or upgrades it when it is already installed.
    ///
    /// `payload` is the unpacked payload to move into the store when `hash` is not there yet;
    /// it defaults to `apps/unpack`.
    pub fn install_app(
        &self,
        app: &AppName,
        hash: &ContentHash,
        payload: Option<&Path>,
    ) -> UpdateResult<Outcome> {
        let _lock = self.claim()?;
        self.install_locked(app, hash, payload)
    }

    /// Like [`UpdateEngine::install_app`] but refuses apps that are not installed yet.
    pub fn upgrade_app(
        &self,
        app: &AppName,
        hash: &ContentHash,
        payload: Option<&Path>,
    ) -> UpdateResult<Outcome> {
        let _lock = self.claim()?;
        if !self.chain().has_app(app) {
            return Err(UpdateError::not_found(format!("app '{app}' is not installed")));
        }
        self.install_locked(app, hash, payload)
    }

    fn install_locked(
        &self,
        app: &AppName,
        hash: &ContentHash,
        payload: Option<&Path>,
    ) -> UpdateResult<Outcome> {
        let chain = self.chain();
        let store = self.store();
        let previous = chain.app_hash(app)?;
        if previous.as_ref() == Some(hash) && store.exists(hash) {
            info!(app = %app, hash = %hash, "app is already installed at this version");
            return Ok(Outcome::AlreadyInstalled);
        }
        let upgrading = previous.is_some() && chain.has_app(app);

        let source = if store.exists(hash) {
            None
        } else {
            let source = payload
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.layout.app_unpack_dir());
            if !source.is_dir() {
                return Err(UpdateError::not_found(format!(
                    "no content for hash {hash} and no payload at {}",
                    source.display()
                )));
            }
            Some(source)
        };

        self.snapshotter(&chain).snapshot()?;
        chain.mark_modified()?;
        if let Some(source) = source {
            if let Err(err) = store.materialize(hash, &source) {
                self.probation().mark_bad()?;
                return Err(UpdateError::Fatal(err));
            }
        }
        self.probation().mark_bad()?;

        let journal = self.journal();
        journal.begin_app_upgrade(app, hash)?;

        if upgrading {
            if let Err(err) = self.collab.supervisor.stop_app(app) {
                warn!(app = %app, error = %err, "failed to stop app before upgrade");
            }
            self.apply_upgrade(app, hash)?;
        } else {
            self.apply_install(app, hash)?;
        }

        journal.complete(app)?;
        self.reload_bindings();
        self.run_hook(app, hash, HookKind::PostInstall)?;
        self.probation().set_untried()?;
        self.collab.events.app_installed(app);

        if let Err(err) = self.collab.supervisor.start_app(app) {
            warn!(app = %app, error = %err, "failed to start app");
        }

        let outcome = if upgrading {
            Outcome::Upgraded
        } else {
            Outcome::Installed
        };
        info!(app = %app, hash = %hash, outcome = outcome.as_str(), "app install complete");
        Ok(outcome)
    }

    fn apply_install(&self, app: &AppName, hash: &ContentHash) -> UpdateResult<()> {
        self.run_hook(app, hash, HookKind::PreInstall)?;
        let propagator = self.propagator();
        propagator.label_read_only_tree(hash, app)?;
        self.chain().link_app(SystemName::Current, app, hash)?;
        self.collab.principals.add(app)?;
        self.import_config(app, hash)?;

        let template = self.layout.app_writeable_template_dir(hash);
        if template.is_dir() {
            let dest = self
                .layout
                .system_app_writeable_dir(SystemName::Current, app);
            install_writeable_files(&propagator, app, &template, &dest).with_context(|| {
                format!("failed to install writeable files for app '{app}'")
            })?;
        }
        Ok(())
    }

    /// Mutation steps of an upgrade. Also finishes interrupted installs at boot, so every step
    /// tolerates having already run.
    pub(crate) fn apply_upgrade(&self, app: &AppName, hash: &ContentHash) -> UpdateResult<()> {
        let writeable = self
            .layout
            .system_app_writeable_dir(SystemName::Current, app);
        self.mounts.detach_under(&writeable)?;

        self.run_hook(app, hash, HookKind::PreInstall)?;
        let propagator = self.propagator();
        propagator.label_read_only_tree(hash, app)?;
        self.chain().link_app(SystemName::Current, app, hash)?;
        self.import_config(app, hash)?;
        reconcile_writeable_files(
            &propagator,
            app,
            &self.layout.app_writeable_template_dir(hash),
            &writeable,
        )
        .with_context(|| format!("failed to reconcile writeable files for app '{app}'"))?;

        if !self.collab.principals.exists(app)? {
            self.collab.principals.add(app)?;
        }
        Ok(())
    }

    fn import_config(&self, app: &AppName, hash: &ContentHash) -> UpdateResult<()> {
        let node = app_config_node(app);
        self.collab.config_store.delete_node(&node)?;
        let root_cfg = self.layout.app_root_cfg(hash);
        if !root_cfg.is_file() {
            warn!(app = %app, path = %root_cfg.display(), "app has no configuration to import");
            return Ok(());
        }
        self.collab
            .config_store
            .import_tree(&node, &root_cfg)
            .with_context(|| format!("failed to import configuration of app '{app}'"))?;
        Ok(())
    }

    pub(crate) fn run_hook(
        &self,
        app: &AppName,
        hash: &ContentHash,
        kind: HookKind,
    ) -> UpdateResult<()> {
        let script = self.layout.app_hook_script(hash, kind);
        self.collab.hooks.run(&script).map_err(|err| {
            UpdateError::Fault(err.context(format!("{} hook of app '{app}' failed", kind.as_str())))
        })
    }

    pub(crate) fn reload_bindings(&self) {
        if let Err(err) = self.collab.bindings.reload() {
            let message = format!("{err:#}");
            warn!(error = %message, "failed to reload app bindings");
        }
    }

    pub fn remove_app(&self, app: &AppName) -> UpdateResult<Outcome> {
        let _lock = self.claim()?;
        let chain = self.chain();
        let node = app_config_node(app);
        let bound = chain.app_hash(app)?.is_some();
        if !bound && !self.collab.config_store.node_exists(&node)? {
            return Err(UpdateError::not_found(format!("app '{app}' is not installed")));
        }

        chain.remove_unneeded()?;
        self.store().reclaim_unreferenced()?;

        self.snapshotter(&chain).snapshot()?;
        chain.mark_modified()?;
        let hash = chain.app_hash(app)?;
        self.probation().mark_bad()?;

        let journal = self.journal();
        if let Some(hash) = &hash {
            journal.begin_app_removal(app, hash)?;
        }

        if let Err(err) = self.collab.supervisor.stop_app(app) {
            warn!(app = %app, error = %err, "failed to stop app before removal");
        }
        self.apply_removal(app, hash.as_ref())?;

        journal.complete(app)?;
        self.reload_bindings();
        self.probation().set_untried()?;
        self.collab.events.app_removed(app);
        info!(app = %app, "app removed");
        Ok(Outcome::Removed)
    }

    /// Mutation steps of a removal. Safe to re-run after a crash part way through.
    pub(crate) fn apply_removal(
        &self,
        app: &AppName,
        hash: Option<&ContentHash>,
    ) -> UpdateResult<()> {
        let config_store = &self.collab.config_store;
        config_store.delete_node(&app_config_node(app))?;
        config_store.delete_tree(app.as_str())?;

        let writeable = self
            .layout
            .system_app_writeable_dir(SystemName::Current, app);
        self.mounts.detach_under(&writeable)?;
        remove_dir_all_if_exists(&writeable)?;

        self.chain().unlink_app(SystemName::Current, app)?;
        self.collab.principals.remove(app)?;

        if let Some(hash) = hash {
            let marker = self.journal().marker_path(MarkerKind::Removal, app);
            if self.store().reclaim_ignoring(hash, &[marker])? {
                debug!(app = %app, hash = %hash, "reclaimed content of removed app");
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> UpdateResult<SnapshotOutcome> {
        let _lock = self.claim()?;
        let chain = self.chain();
        self.snapshotter(&chain).snapshot()
    }

    /// Moves the full system update staged in `systems/unpack` into its index slot.
    pub fn finish_system_update(&self) -> UpdateResult<u32> {
        let _lock = self.claim()?;
        let chain = self.chain();
        let propagator = self.propagator();
        self.snapshotter(&chain)
            .finish_system_update(&propagator, self.collab.config_store.as_ref())
    }

    /// Promotes `current` after probation and drops what is no longer needed for rollback.
    pub fn mark_good(&self) -> UpdateResult<GcReport> {
        let _lock = self.claim()?;
        self.probation().mark_good()?;
        self.collect_garbage()
    }

    pub fn mark_bad(&self) -> UpdateResult<()> {
        let _lock = self.claim()?;
        self.probation().mark_bad()?;
        Ok(())
    }

    pub fn gc(&self) -> UpdateResult<GcReport> {
        let _lock = self.claim()?;
        self.collect_garbage()
    }

    fn collect_garbage(&self) -> UpdateResult<GcReport> {
        let systems = self.chain().remove_unneeded()?;
        let content = self.store().reclaim_unreferenced()?;
        Ok(GcReport { systems, content })
    }

    /// Boot-time entry point: finishes interrupted operations, then makes sure every
    /// installed app has a principal.
    pub fn startup(&self) -> UpdateResult<RecoveryReport> {
        if self.config.read_only {
            info!("system is read-only, skipping recovery");
            return Ok(RecoveryReport::default());
        }
        UpdateLock::clear_stale(&self.layout.lock_path())?;
        let _lock = UpdateLock::acquire(&self.layout.lock_path())?;
        self.layout.ensure_base_dirs()?;

        let mut report = RecoveryScanner::new(self).run()?;

        for (app, _) in self.chain().installed_apps()? {
            if !self.collab.principals.exists(&app)? {
                warn!(app = %app, "installed app has no principal, adding one");
                self.collab.principals.add(&app)?;
                report.principals_added.push(app);
            }
        }
        Ok(report)
    }

    pub fn summary(&self) -> UpdateResult<EngineSummary> {
        let chain = self.chain();
        let current_index = chain.index_of(SystemName::Current)?;
        let previous_good_index = match current_index {
            Some(index) => chain.previous_good_index(index)?,
            None => None,
        };

        let apps = chain
            .installed_apps()?
            .into_iter()
            .map(|(app, hash)| AppSummary {
                name: app.to_string(),
                hash: hash.to_string(),
            })
            .collect();
        let pending = self
            .journal()
            .scan_pending()?
            .into_iter()
            .map(|op| PendingSummary {
                kind: op.kind,
                app: op.app.to_string(),
                hash: op.hash.to_string(),
            })
            .collect();

        let mut systems = Vec::new();
        for system in self.system_names()? {
            systems.push(SystemSummary {
                name: system.dir_name(),
                index: chain.index_of(system)?,
                status: self.probation().status_of(system)?,
            });
        }

        let content = self
            .store()
            .list_hashes()?
            .into_iter()
            .map(|hash| hash.to_string())
            .collect();

        Ok(EngineSummary {
            root: self.layout.root().to_path_buf(),
            read_only: self.config.read_only,
            labels_enabled: self.collab.labeler.is_enabled(),
            current_index,
            status: self.probation().current_status()?,
            version: chain.version()?,
            modified: chain.is_modified(),
            previous_good_index,
            apps,
            pending,
            systems,
            content,
        })
    }

    fn system_names(&self) -> UpdateResult<Vec<SystemName>> {
        let systems_dir = self.layout.systems_dir();
        if !systems_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for path in crate::content_store::sorted_entries(&systems_dir)? {
            let name = path.file_name().and_then(|name| name.to_str());
            if let Some(system) = name.and_then(SystemName::parse) {
                names.push(system);
            }
        }
        Ok(names)
    }
}
