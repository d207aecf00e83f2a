//! Ticket lifecycle and work-session subsystem.
//!
//! `TicketService` is the only entry point hosts talk to. Every operation
//! runs its database work on a blocking thread inside one transaction and
//! persists its audit trail after the transaction commits.

pub mod assignments;
pub mod attachments;
pub mod audit;
pub mod duration;
pub mod models;
pub mod service;
pub mod types;
pub mod work_sessions;

use chrono::Utc;
use diesel::Connection;
use log::warn;
use std::sync::Arc;
use uuid::Uuid;

use crate::directory::{Actor, Directory};
use crate::error::TicketError;
use crate::shared::enums::{TicketStatus, WorkType};
use crate::shared::utils::DbPool;

pub use attachments::{AttachmentStore, ALLOWED_EXTENSIONS, MAX_FILE_BYTES, MAX_TICKET_BYTES};
pub use audit::{AuditAction, AuditEvent};
pub use models::{
    AssigneeRecord, AttachmentRecord, TicketLogRecord, TicketRecord, WorkLogRecord,
};
pub use types::{DayEntryInput, TicketInput, UploadedFile, WorkPattern};

/// Facade over the ticket subsystem. Cheap to clone; hosts keep one per
/// process and share it across request handlers.
#[derive(Clone)]
pub struct TicketService {
    pool: DbPool,
    store: AttachmentStore,
    directory: Arc<dyn Directory>,
}

impl TicketService {
    pub fn new(pool: DbPool, store: AttachmentStore, directory: Arc<dyn Directory>) -> Self {
        Self {
            pool,
            store,
            directory,
        }
    }

    pub fn store(&self) -> &AttachmentStore {
        &self.store
    }

    /// Creates a ticket and returns the stored record.
    pub async fn create_ticket(
        &self,
        actor: &Actor,
        input: TicketInput,
    ) -> Result<TicketRecord, TicketError> {
        let pool = self.pool.clone();
        let store = self.store.clone();
        let directory = Arc::clone(&self.directory);
        let actor = actor.clone();

        let (record, events) = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                service::create_ticket_tx(conn, &store, directory.as_ref(), &actor, &input, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(record)
    }

    /// Applies a full-form update to an existing ticket.
    pub async fn update_ticket(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        input: TicketInput,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let store = self.store.clone();
        let directory = Arc::clone(&self.directory);
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                service::update_ticket_tx(
                    conn,
                    &store,
                    directory.as_ref(),
                    &actor,
                    ticket_id,
                    &input,
                    now,
                )
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Moves a ticket to a new status, stamping or clearing `closed_at`.
    pub async fn transition_status(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                service::transition_status_tx(conn, &actor, ticket_id, status, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Promotes a staff member to primary assignee, or clears the whole
    /// allocation with `None`.
    pub async fn set_primary_assignee(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        staff: Option<Uuid>,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let directory = Arc::clone(&self.directory);
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                assignments::set_primary_tx(conn, directory.as_ref(), &actor, ticket_id, staff, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Stamps the work-start marker on a ticket.
    pub async fn start_work(&self, actor: &Actor, ticket_id: Uuid) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                work_sessions::start_work_tx(conn, &actor, ticket_id, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Closes the running timer, appending a ledger entry for the span.
    pub async fn stop_work(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        notes: Option<String>,
        work_type: Option<WorkType>,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                work_sessions::stop_work_tx(conn, &actor, ticket_id, notes, work_type, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Deletes one work entry and adjusts the ticket's hour total.
    pub async fn delete_work_entry(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                work_sessions::delete_entry_tx(conn, &actor, ticket_id, entry_id, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Validates and stores new attachments on an existing ticket.
    pub async fn add_attachments(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        files: Vec<UploadedFile>,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let store = self.store.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                attachments::add_attachments_tx(conn, &store, &actor, ticket_id, &files, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Soft-deletes one attachment descriptor. Stored bytes stay on disk.
    pub async fn remove_attachment(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                attachments::remove_attachment_tx(conn, &actor, ticket_id, attachment_id, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Permanently removes a ticket. Requires a role with delete rights;
    /// closing is the non-destructive alternative.
    pub async fn delete_ticket(&self, actor: &Actor, ticket_id: Uuid) -> Result<(), TicketError> {
        let pool = self.pool.clone();
        let actor = actor.clone();

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let now = Utc::now();
            conn.transaction::<_, TicketError, _>(|conn| {
                service::delete_ticket_tx(conn, &actor, ticket_id, now)
            })
        })
        .await
        .map_err(join_error)??;

        self.record_audit(events).await;
        Ok(())
    }

    /// Writes audit events after the owning transaction committed. Best
    /// effort: failures are logged, never surfaced.
    async fn record_audit(&self, events: Vec<AuditEvent>) {
        if events.is_empty() {
            return;
        }
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            audit::record_all_best_effort(&pool, &events);
        })
        .await;
        if let Err(err) = result {
            warn!("audit recording task failed: {}", err);
        }
    }
}

fn join_error(err: tokio::task::JoinError) -> TicketError {
    TicketError::Storage(format!("Blocking task failed: {}", err))
}
