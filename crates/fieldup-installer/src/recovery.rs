use anyhow::anyhow;
use fieldup_core::{AppName, MarkerKind, UpdateError, UpdateResult};
use tracing::{error, info};

use crate::journal::PendingOperation;
use crate::workflow::UpdateEngine;
use crate::HookKind;

/// What boot-time recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Operations found in the journal and finished.
    pub replayed: Vec<PendingOperation>,
    /// Installed apps that were missing their principal.
    pub principals_added: Vec<AppName>,
}

/// Finishes every operation left in the journal by an interrupted run.
///
/// Markers are written after the snapshot of their operation, so replay never snapshots again.
pub struct RecoveryScanner<'a> {
    engine: &'a UpdateEngine,
}

impl<'a> RecoveryScanner<'a> {
    pub fn new(engine: &'a UpdateEngine) -> Self {
        Self { engine }
    }

    pub fn run(&self) -> UpdateResult<RecoveryReport> {
        let pending = self
            .engine
            .journal()
            .scan_pending()
            .map_err(|err| UpdateError::Fatal(err.context("failed to read the update journal")))?;
        let mut report = RecoveryReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        info!(count = pending.len(), "resuming interrupted app operations");
        self.engine.probation().mark_bad()?;

        let mut failed = Vec::new();
        for op in pending {
            match self.replay(&op) {
                Ok(()) => {
                    info!(
                        app = %op.app,
                        hash = %op.hash,
                        kind = op.kind.as_str(),
                        "interrupted operation finished"
                    );
                    report.replayed.push(op);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(
                        app = %op.app,
                        kind = op.kind.as_str(),
                        error = %message,
                        "failed to finish interrupted operation"
                    );
                    failed.push(op.app.to_string());
                }
            }
        }

        if !failed.is_empty() {
            return Err(UpdateError::Fatal(anyhow!(
                "could not finish interrupted operations for: {}",
                failed.join(", ")
            )));
        }

        self.engine.reload_bindings();
        self.engine.probation().set_untried()?;
        Ok(report)
    }

    fn replay(&self, op: &PendingOperation) -> UpdateResult<()> {
        match op.kind {
            MarkerKind::Upgrade => {
                if !self.engine.store().exists(&op.hash) {
                    return Err(UpdateError::not_found(format!(
                        "content {} for app '{}'",
                        op.hash, op.app
                    )));
                }
                self.engine.apply_upgrade(&op.app, &op.hash)?;
                self.engine
                    .run_hook(&op.app, &op.hash, HookKind::PostInstall)?;
            }
            MarkerKind::Removal => {
                self.engine.apply_removal(&op.app, Some(&op.hash))?;
            }
        }
        self.engine.journal().complete(&op.app)?;
        Ok(())
    }
}
