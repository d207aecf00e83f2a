//! Input payloads for ticket operations.
//!
//! These are the shapes a host hands to `TicketService` after its own
//! transport decoding (form, JSON, multipart). Everything here is plain
//! data; validation happens inside the operations.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::{TicketCategory, TicketPriority, TicketStatus, WorkType};

/// Full form payload for creating or updating a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketInput {
    pub title: String,
    pub description: Option<String>,
    pub client_id: Uuid,
    /// Reference into the host's location directory.
    pub location_id: Option<Uuid>,
    /// Manual location entry. Wins over `location_id` when both are set.
    pub location_text: Option<String>,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub estimated_hours: Option<BigDecimal>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Requested assignees in submission order. May contain duplicates,
    /// nil ids and unknown staff; the resolver filters them.
    pub assignees: Vec<Uuid>,
    pub work: WorkPattern,
    /// New files to ingest.
    pub attachments: Vec<UploadedFile>,
    /// Attachment ids to soft-delete. Only honored on update.
    pub remove_attachments: Vec<Uuid>,
}

impl TicketInput {
    /// Minimal payload with required fields only.
    pub fn new(title: impl Into<String>, client_id: Uuid) -> Self {
        Self {
            title: title.into(),
            description: None,
            client_id,
            location_id: None,
            location_text: None,
            category: TicketCategory::default(),
            priority: TicketPriority::default(),
            status: TicketStatus::default(),
            estimated_hours: None,
            scheduled_start: None,
            scheduled_end: None,
            assignees: Vec::new(),
            work: WorkPattern::default(),
            attachments: Vec::new(),
            remove_attachments: Vec::new(),
        }
    }
}

/// How the submission reports time spent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkPattern {
    /// Single-day shorthand: an optional minute count recorded as audit
    /// annotation only, never as a ledger row.
    Single { time_spent_minutes: Option<i32> },
    /// Multi-day schedule: the full desired set of work sessions. Replaces
    /// the ledger wholesale.
    Multi { entries: Vec<DayEntryInput> },
}

impl Default for WorkPattern {
    fn default() -> Self {
        Self::Single {
            time_spent_minutes: None,
        }
    }
}

/// One submitted work day. All fields optional at the transport boundary;
/// completeness is enforced per operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayEntryInput {
    pub work_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    /// Performing technician. Defaults to the ticket's primary assignee.
    pub staff_id: Option<Uuid>,
    pub work_type: Option<WorkType>,
}

/// An uploaded file as received from the host's multipart layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub original_name: String,
    /// Client-declared content type. Advisory only; content sniffing wins.
    pub declared_mime: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            declared_mime: None,
            data,
        }
    }
}
