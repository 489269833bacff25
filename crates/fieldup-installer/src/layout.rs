use anyhow::{Context, Result};
use fieldup_core::{AppName, ContentHash, SystemName};
use std::fs;
use std::path::{Path, PathBuf};

const READ_ONLY_DIR: &str = "read-only";
const WRITEABLE_DIR: &str = "writeable";

/// Hook scripts a payload may carry under `read-only/script/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreInstall,
    PostInstall,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    root: PathBuf,
}

impl UpdateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn app_unpack_dir(&self) -> PathBuf {
        self.apps_dir().join(fieldup_core::UNPACK_NAME)
    }

    pub fn app_dir(&self, hash: &ContentHash) -> PathBuf {
        self.apps_dir().join(hash.as_str())
    }

    pub fn app_read_only_dir(&self, hash: &ContentHash) -> PathBuf {
        self.app_dir(hash).join(READ_ONLY_DIR)
    }

    pub fn app_writeable_template_dir(&self, hash: &ContentHash) -> PathBuf {
        self.app_dir(hash).join(WRITEABLE_DIR)
    }

    pub fn app_root_cfg(&self, hash: &ContentHash) -> PathBuf {
        self.app_dir(hash).join("root.cfg")
    }

    pub fn app_hook_script(&self, hash: &ContentHash, kind: HookKind) -> PathBuf {
        self.app_read_only_dir(hash)
            .join("script")
            .join(kind.as_str())
    }

    pub fn systems_dir(&self) -> PathBuf {
        self.root.join("systems")
    }

    pub fn system_dir(&self, system: SystemName) -> PathBuf {
        self.systems_dir().join(system.dir_name())
    }

    pub fn system_apps_dir(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("apps")
    }

    pub fn system_app_link(&self, system: SystemName, entry_name: &str) -> PathBuf {
        self.system_apps_dir(system).join(entry_name)
    }

    pub fn system_writeable_dir(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("appsWriteable")
    }

    pub fn system_app_writeable_dir(&self, system: SystemName, app: &AppName) -> PathBuf {
        self.system_writeable_dir(system).join(app.as_str())
    }

    pub fn system_config_dir(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("config")
    }

    pub fn system_index_path(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("index")
    }

    pub fn system_version_path(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("version")
    }

    pub fn system_modified_path(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("modified")
    }

    pub fn system_info_path(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("info.properties")
    }

    pub fn system_status_path(&self, system: SystemName) -> PathBuf {
        self.system_dir(system).join("status")
    }

    /// Target written into app bindings and journal markers.
    pub fn binding_target(&self, hash: &ContentHash) -> PathBuf {
        self.app_dir(hash)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("update.lock")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.apps_dir(),
            self.systems_dir(),
            self.system_apps_dir(SystemName::Current),
            self.system_writeable_dir(SystemName::Current),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
