//! Append-only audit trail.
//!
//! Operations compute their audit events inside the transaction but the
//! rows are written after commit, best effort. A failed audit write is
//! logged and swallowed; it must never undo committed work. The table has
//! no foreign key, so history outlives the ticket it narrates.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::ticket_logs;
use crate::shared::utils::DbPool;
use crate::tickets::models::TicketLogRecord;

/// What happened to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    StatusChanged,
    Assigned,
    WorkStarted,
    WorkStopped,
    WorkLogged,
    WorkEntryDeleted,
    AttachmentAdded,
    AttachmentRemoved,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Assigned => "assigned",
            Self::WorkStarted => "work_started",
            Self::WorkStopped => "work_stopped",
            Self::WorkLogged => "work_logged",
            Self::WorkEntryDeleted => "work_entry_deleted",
            Self::AttachmentAdded => "attachment_added",
            Self::AttachmentRemoved => "attachment_removed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pending audit entry, produced inside a transaction and persisted
/// after it commits.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub ticket_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub action: AuditAction,
    pub description: String,
    pub time_spent_minutes: Option<i32>,
}

impl AuditEvent {
    pub fn new(
        ticket_id: Uuid,
        staff_id: Option<Uuid>,
        action: AuditAction,
        description: impl Into<String>,
    ) -> Self {
        Self {
            ticket_id,
            staff_id,
            action,
            description: description.into(),
            time_spent_minutes: None,
        }
    }

    pub fn with_minutes(mut self, minutes: Option<i32>) -> Self {
        self.time_spent_minutes = minutes;
        self
    }
}

/// Inserts one audit row.
pub(crate) fn record(
    conn: &mut PgConnection,
    event: &AuditEvent,
    now: DateTime<Utc>,
) -> QueryResult<()> {
    let row = TicketLogRecord {
        id: Uuid::new_v4(),
        ticket_id: event.ticket_id,
        staff_id: event.staff_id,
        action: event.action.as_str().to_string(),
        description: event.description.clone(),
        time_spent_minutes: event.time_spent_minutes,
        created_at: now,
    };
    diesel::insert_into(ticket_logs::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

/// Persists a batch of events after the owning transaction committed.
/// Failures are logged and dropped.
pub(crate) fn record_all_best_effort(pool: &DbPool, events: &[AuditEvent]) {
    if events.is_empty() {
        return;
    }
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(err) => {
            warn!("audit trail unavailable, dropping {} event(s): {}", events.len(), err);
            return;
        }
    };
    let now = Utc::now();
    for event in events {
        if let Err(err) = record(&mut conn, event, now) {
            warn!(
                "dropped audit event {} for ticket {}: {}",
                event.action, event.ticket_id, err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_labels_are_stable() {
        assert_eq!(AuditAction::Created.as_str(), "created");
        assert_eq!(AuditAction::StatusChanged.as_str(), "status_changed");
        assert_eq!(AuditAction::WorkEntryDeleted.as_str(), "work_entry_deleted");
        assert_eq!(AuditAction::AttachmentRemoved.as_str(), "attachment_removed");
    }

    #[test]
    fn test_event_builder_carries_minutes() {
        let ticket_id = Uuid::new_v4();
        let event = AuditEvent::new(ticket_id, None, AuditAction::Updated, "Changed priority")
            .with_minutes(Some(45));
        assert_eq!(event.time_spent_minutes, Some(45));
        assert_eq!(event.ticket_id, ticket_id);
    }
}
