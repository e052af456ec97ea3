//! Persistence writer.
//!
//! Writes the audit rows first, then commits the episodes to the durable
//! store in one transaction. If the audit append fails the store is left
//! untouched, so the store never records a run the audit log is missing. A
//! store failure after a successful append leaves extra audit rows, which is
//! acceptable. Store writes are upserts keyed by `(account_id, detected_at)`,
//! so replaying a commit never duplicates rows. An opening write that lands
//! on an already-resolved episode is refused with
//! [`PersistError::AlreadyResolved`].

use crate::audit::{AuditAction, AuditLog};
use crate::error::PersistError;
use crate::models::{CheckRun, DisconnectionEvent};
use crate::store::StateStore;

pub struct PersistenceWriter<'a> {
    store: &'a dyn StateStore,
    audit: &'a AuditLog,
}

impl<'a> PersistenceWriter<'a> {
    pub fn new(store: &'a dyn StateStore, audit: &'a AuditLog) -> Self {
        Self { store, audit }
    }

    pub async fn commit(
        &self,
        run: &CheckRun,
        new_events: &[DisconnectionEvent],
        resolved_events: &[DisconnectionEvent],
    ) -> Result<(), PersistError> {
        if new_events.is_empty() && resolved_events.is_empty() {
            return Ok(());
        }

        let entries: Vec<(AuditAction, &DisconnectionEvent)> = resolved_events
            .iter()
            .map(|e| (AuditAction::Resolved, e))
            .chain(new_events.iter().map(|e| (AuditAction::Detected, e)))
            .collect();

        let rows = self.audit.append(run, &entries).map_err(|e| {
            tracing::error!(run_id = %run.check_run_id, error = %e, "audit append failed");
            e
        })?;

        self.store.commit_events(resolved_events, new_events).await?;

        tracing::info!(
            run_id = %run.check_run_id,
            new = new_events.len(),
            resolved = resolved_events.len(),
            audit_rows = rows,
            "events committed"
        );
        Ok(())
    }
}
