use anyhow::{anyhow, Result};
use fieldup_core::{Status, SystemName};
use tracing::{debug, info};

use crate::fs_utils::{read_trimmed, remove_file_if_exists, write_atomic};
use crate::UpdateLayout;

/// Boot-probation bookkeeping shared with the rollback logic outside the engine.
pub trait Probation {
    fn mark_bad(&self) -> Result<()>;
    fn set_untried(&self) -> Result<()>;
    fn mark_tried(&self) -> Result<()>;
    fn mark_good(&self) -> Result<()>;
    fn current_status(&self) -> Result<Status> {
        self.status_of(SystemName::Current)
    }
    fn status_of(&self, system: SystemName) -> Result<Status>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusRecord {
    Good,
    Bad,
    Tried(u32),
    Untried,
}

impl StatusRecord {
    fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Untried;
        };
        match raw {
            "good" => Self::Good,
            "bad" => Self::Bad,
            "" => Self::Untried,
            other => other
                .strip_prefix("tried ")
                .and_then(|count| count.trim().parse().ok())
                .map(Self::Tried)
                // Anything unreadable is treated as a failed system.
                .unwrap_or(Self::Bad),
        }
    }

    fn status(self) -> Status {
        match self {
            Self::Good => Status::Good,
            Self::Bad => Status::Bad,
            Self::Tried(_) | Self::Untried => Status::Untried,
        }
    }
}

/// Probation state kept in `systems/<name>/status`.
#[derive(Debug, Clone)]
pub struct FileProbation {
    layout: UpdateLayout,
}

impl FileProbation {
    pub fn new(layout: UpdateLayout) -> Self {
        Self { layout }
    }

    /// Boots attempted since the current system became untried.
    pub fn tries(&self) -> Result<u32> {
        Ok(match self.record(SystemName::Current)? {
            StatusRecord::Tried(count) => count,
            _ => 0,
        })
    }

    fn record(&self, system: SystemName) -> Result<StatusRecord> {
        let raw = read_trimmed(&self.layout.system_status_path(system))?;
        Ok(StatusRecord::parse(raw.as_deref()))
    }

    fn write(&self, contents: &[u8]) -> Result<()> {
        let path = self.layout.system_status_path(SystemName::Current);
        if !self.layout.system_dir(SystemName::Current).is_dir() {
            return Err(anyhow!("current system is missing: {}", path.display()));
        }
        write_atomic(&path, contents)
    }
}

impl Probation for FileProbation {
    fn mark_bad(&self) -> Result<()> {
        self.write(b"bad")?;
        debug!("current system marked bad");
        Ok(())
    }

    fn set_untried(&self) -> Result<()> {
        remove_file_if_exists(&self.layout.system_status_path(SystemName::Current))?;
        debug!("current system set untried");
        Ok(())
    }

    fn mark_tried(&self) -> Result<()> {
        let next = match self.record(SystemName::Current)? {
            StatusRecord::Tried(count) => count.saturating_add(1),
            StatusRecord::Untried => 1,
            StatusRecord::Good | StatusRecord::Bad => return Ok(()),
        };
        self.write(format!("tried {next}").as_bytes())
    }

    fn mark_good(&self) -> Result<()> {
        self.write(b"good")?;
        info!("current system marked good");
        Ok(())
    }

    fn status_of(&self, system: SystemName) -> Result<Status> {
        Ok(self.record(system)?.status())
    }
}
