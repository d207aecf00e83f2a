//! Database records for tickets and their dependent rows.
//!
//! Field order mirrors the column order in `crate::shared::schema`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::{TicketCategory, TicketPriority, TicketStatus, WorkType};
use crate::shared::schema::{
    ticket_assignees, ticket_attachments, ticket_logs, tickets, work_logs,
};

/// A support ticket row.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = tickets)]
pub struct TicketRecord {
    pub id: Uuid,
    pub ticket_number: String,
    pub title: String,
    pub description: Option<String>,
    pub client_id: Uuid,
    pub location_id: Option<Uuid>,
    pub location_text: Option<String>,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    /// Denormalized mirror of the primary assignee, kept by the
    /// assignment resolver.
    pub assigned_to: Option<Uuid>,
    pub estimated_hours: Option<BigDecimal>,
    /// Derived sum of `work_logs.total_hours`, never set directly by input.
    pub total_work_hours: BigDecimal,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub work_end: Option<DateTime<Utc>>,
    pub sla_breach_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Scalar fields writable through a full-form update.
///
/// `treat_none_as_null` makes a `None` clear the column, so reopening a
/// ticket erases `closed_at` and removing a manual location erases
/// `location_text`.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = tickets, treat_none_as_null = true)]
pub struct TicketChangeset {
    pub title: String,
    pub description: Option<String>,
    pub client_id: Uuid,
    pub location_id: Option<Uuid>,
    pub location_text: Option<String>,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub estimated_hours: Option<BigDecimal>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One staff allocation on a ticket. Exactly one row per ticket carries
/// `is_primary` when any rows exist at all.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = ticket_assignees)]
pub struct AssigneeRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub staff_id: Uuid,
    pub is_primary: bool,
    pub assigned_by: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// One work session on a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = work_logs)]
pub struct WorkLogRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub total_hours: BigDecimal,
    pub description: String,
    pub work_type: WorkType,
    pub created_at: DateTime<Utc>,
}

/// Descriptor for a stored attachment. Rows are soft-deleted; the bytes
/// on disk are left in place for recovery tooling.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = ticket_attachments)]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub original_name: String,
    pub stored_name: String,
    pub storage_path: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Append-only audit row. Carries no foreign key so history survives
/// ticket deletion.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = ticket_logs)]
pub struct TicketLogRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub action: String,
    pub description: String,
    pub time_spent_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
}
