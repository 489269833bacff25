use anyhow::{anyhow, Context, Result};
use fieldup_core::{AppName, ContentHash, Status, SystemName, UpdateError, UpdateResult};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::content_store::sorted_entries;
use crate::fs_utils::{
    fsync_dir, read_link_basename, read_trimmed, remove_dir_all_if_exists, remove_file_if_exists,
    replace_symlink, write_atomic,
};
use crate::mounts::MountInfo;
use crate::probation::Probation;
use crate::properties::{read_properties, set_property};
use crate::UpdateLayout;

pub const SYSTEM_HASH_KEY: &str = "system.md5";
const MODIFIED_HASH: &str = "modified";
const MODIFIED_SUFFIX: &str = "_modified";
const UNKNOWN_VERSION: &str = "Unknown";

/// The indexed systems on disk and the `current` designation.
pub struct SystemVersionChain<'a> {
    layout: &'a UpdateLayout,
    probation: &'a dyn Probation,
    mounts: &'a MountInfo,
}

impl<'a> SystemVersionChain<'a> {
    pub fn new(
        layout: &'a UpdateLayout,
        probation: &'a dyn Probation,
        mounts: &'a MountInfo,
    ) -> Self {
        Self {
            layout,
            probation,
            mounts,
        }
    }

    /// Reads the `index` file of a system; `None` when it is missing or unreadable.
    pub fn index_of(&self, system: SystemName) -> Result<Option<u32>> {
        let path = self.layout.system_index_path(system);
        let Some(raw) = read_trimmed(&path)? else {
            return Ok(None);
        };
        match raw.parse::<u32>() {
            Ok(index) => Ok(Some(index)),
            Err(_) => {
                warn!(path = %path.display(), content = %raw, "ignoring malformed system index");
                Ok(None)
            }
        }
    }

    /// Index of `current`. A missing index is only tolerated on a system that passed probation.
    pub fn current_index(&self) -> UpdateResult<u32> {
        if let Some(index) = self.index_of(SystemName::Current)? {
            return Ok(index);
        }
        if self.probation.current_status()? != Status::Good {
            return Err(UpdateError::Fatal(anyhow!(
                "current system index is missing or malformed: {}",
                self.layout.system_index_path(SystemName::Current).display()
            )));
        }
        error!("current system index unreadable, assuming 0");
        Ok(0)
    }

    pub fn exists(&self, index: u32) -> UpdateResult<bool> {
        if self
            .layout
            .system_dir(SystemName::Numbered(index))
            .is_dir()
        {
            return Ok(true);
        }
        Ok(self.current_index()? == index)
    }

    pub fn set_index(&self, system: SystemName, index: u32) -> Result<()> {
        write_atomic(
            &self.layout.system_index_path(system),
            index.to_string().as_bytes(),
        )
    }

    /// One more than every index in use, so fresh slots never collide with staged systems.
    pub fn next_index(&self) -> UpdateResult<u32> {
        let mut highest = self.current_index()?;
        for (dir_index, path) in self.numbered_systems()? {
            highest = highest.max(dir_index);
            if let Some(recorded) = read_trimmed(&path.join("index"))?
                .and_then(|raw| raw.parse::<u32>().ok())
            {
                highest = highest.max(recorded);
            }
        }
        highest
            .checked_add(1)
            .ok_or_else(|| UpdateError::Fault(anyhow!("system index space exhausted")))
    }

    /// Highest index below `starting_at` among the systems on disk, ignoring the staging area.
    pub fn previous_good_index(&self, starting_at: u32) -> Result<Option<u32>> {
        let mut found = None;
        for path in self.system_dirs()? {
            let Some(system) = system_name_of(&path) else {
                continue;
            };
            if system == SystemName::Unpack {
                continue;
            }
            if let Some(index) = self.index_of(system)? {
                if index < starting_at && found.map_or(true, |best| index > best) {
                    found = Some(index);
                }
            }
        }
        Ok(found)
    }

    pub fn version(&self) -> Result<Option<String>> {
        Ok(read_trimmed(&self.layout.system_version_path(SystemName::Current))?
            .filter(|version| !version.is_empty()))
    }

    pub fn set_version(&self, version: &str) -> Result<()> {
        write_atomic(
            &self.layout.system_version_path(SystemName::Current),
            format!("{version}\n").as_bytes(),
        )
    }

    pub fn is_modified(&self) -> bool {
        self.layout
            .system_modified_path(SystemName::Current)
            .exists()
    }

    /// Flags `current` as locally modified. Only the first call has any effect.
    pub fn mark_modified(&self) -> Result<()> {
        if self.is_modified() {
            return Ok(());
        }
        let path = self.layout.system_modified_path(SystemName::Current);
        fs::File::create(&path)
            .and_then(|file| file.sync_all())
            .with_context(|| format!("failed to create modified marker: {}", path.display()))?;

        set_property(
            &self.layout.system_info_path(SystemName::Current),
            SYSTEM_HASH_KEY,
            MODIFIED_HASH,
        )?;
        self.probation.set_untried()?;

        let version = self.version()?.unwrap_or_else(|| {
            error!("system version unreadable, recording it as '{UNKNOWN_VERSION}'");
            UNKNOWN_VERSION.to_string()
        });
        self.set_version(&format!("{version}{MODIFIED_SUFFIX}"))?;
        info!("current system is now modified");
        Ok(())
    }

    /// The `system.md5` property of the system holding `index`.
    pub fn system_hash(&self, index: u32) -> UpdateResult<String> {
        if !self.exists(index)? {
            return Err(UpdateError::not_found(format!("system {index}")));
        }
        let system = if self.current_index()? == index {
            SystemName::Current
        } else {
            SystemName::Numbered(index)
        };
        let path = self.layout.system_info_path(system);
        let properties = read_properties(&path)?.ok_or_else(|| {
            UpdateError::not_found(format!("system properties file {}", path.display()))
        })?;
        properties.get(SYSTEM_HASH_KEY).cloned().ok_or_else(|| {
            UpdateError::Fault(anyhow!(
                "{} has no {SYSTEM_HASH_KEY} key",
                path.display()
            ))
        })
    }

    pub fn has_app(&self, app: &AppName) -> bool {
        self.layout
            .system_app_link(SystemName::Current, app.as_str())
            .is_dir()
    }

    /// Hash the `current` binding of `app` points at.
    pub fn app_hash(&self, app: &AppName) -> UpdateResult<Option<ContentHash>> {
        let link = self.layout.system_app_link(SystemName::Current, app.as_str());
        match read_link_basename(&link)? {
            Some(name) => ContentHash::parse(&name).map(Some).map_err(|_| {
                UpdateError::Fault(anyhow!(
                    "binding {} points at a malformed hash '{name}'",
                    link.display()
                ))
            }),
            None => Ok(None),
        }
    }

    /// Bound apps of `current`, in name order. Journal markers are not apps.
    pub fn installed_apps(&self) -> Result<Vec<(AppName, ContentHash)>> {
        self.apps_in(SystemName::Current)
    }

    pub fn apps_in(&self, system: SystemName) -> Result<Vec<(AppName, ContentHash)>> {
        let apps_dir = self.layout.system_apps_dir(system);
        if !apps_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut apps = Vec::new();
        for path in sorted_entries(&apps_dir)? {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Ok(app) = AppName::parse(name) else {
                continue;
            };
            let Some(target) = read_link_basename(&path)? else {
                continue;
            };
            match ContentHash::parse(&target) {
                Ok(hash) => apps.push((app, hash)),
                Err(_) => warn!(app = %app, target = %target, "skipping malformed binding"),
            }
        }
        Ok(apps)
    }

    pub fn link_app(&self, system: SystemName, app: &AppName, hash: &ContentHash) -> Result<()> {
        let apps_dir = self.layout.system_apps_dir(system);
        fs::create_dir_all(&apps_dir)
            .with_context(|| format!("failed to create {}", apps_dir.display()))?;
        let link = self.layout.system_app_link(system, app.as_str());
        let target = self.layout.binding_target(hash);
        info!(link = %link.display(), target = %target.display(), "creating app binding");
        replace_symlink(&target, &link)?;
        fsync_dir(&apps_dir)
    }

    pub fn unlink_app(&self, system: SystemName, app: &AppName) -> Result<()> {
        remove_file_if_exists(&self.layout.system_app_link(system, app.as_str()))
    }

    /// Deletes systems that can no longer serve as a rollback target.
    ///
    /// With a good `current` every other system goes. Otherwise only the newest good system is
    /// kept. Mounts below a system are detached before it is deleted.
    pub fn remove_unneeded(&self) -> Result<Vec<PathBuf>> {
        let current_good = self.probation.current_status()? == Status::Good;
        let mut keep: Option<(u32, PathBuf)> = None;
        let mut doomed = Vec::new();

        for path in self.system_dirs()? {
            let Some(system) = system_name_of(&path) else {
                warn!(path = %path.display(), "ignoring unexpected entry in systems directory");
                continue;
            };
            if system == SystemName::Current {
                continue;
            }
            if current_good || self.probation.status_of(system)? != Status::Good {
                doomed.push(path);
                continue;
            }
            let index = self.index_of(system)?.unwrap_or(0);
            match keep.take() {
                Some((kept_index, kept_path)) if kept_index >= index => {
                    doomed.push(path);
                    keep = Some((kept_index, kept_path));
                }
                Some((_, kept_path)) => {
                    doomed.push(kept_path);
                    keep = Some((index, path));
                }
                None => keep = Some((index, path)),
            }
        }

        for path in &doomed {
            self.mounts.detach_under(path)?;
            remove_dir_all_if_exists(path)?;
            info!(path = %path.display(), "removed unneeded system");
        }
        Ok(doomed)
    }

    fn numbered_systems(&self) -> Result<Vec<(u32, PathBuf)>> {
        Ok(self
            .system_dirs()?
            .into_iter()
            .filter_map(|path| match system_name_of(&path) {
                Some(SystemName::Numbered(index)) => Some((index, path)),
                _ => None,
            })
            .collect())
    }

    fn system_dirs(&self) -> Result<Vec<PathBuf>> {
        let systems_dir = self.layout.systems_dir();
        if !systems_dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(sorted_entries(&systems_dir)?
            .into_iter()
            .filter(|path| {
                fs::symlink_metadata(path)
                    .map(|metadata| metadata.is_dir())
                    .unwrap_or(false)
            })
            .collect())
    }
}

fn system_name_of(path: &std::path::Path) -> Option<SystemName> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(SystemName::parse)
}
