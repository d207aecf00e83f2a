//! Work-session ledger.
//!
//! A ticket's logged time lives in `work_logs`. Full-form submissions
//! replace the ledger wholesale; the timer endpoints and entry deletion
//! adjust it incrementally. `tickets.total_work_hours` is always the sum
//! of the rows and is never taken from input.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::directory::Actor;
use crate::error::TicketError;
use crate::shared::enums::{TicketStatus, WorkType};
use crate::shared::schema::{tickets, work_logs};
use crate::tickets::assignments;
use crate::tickets::audit::{AuditAction, AuditEvent};
use crate::tickets::duration;
use crate::tickets::models::WorkLogRecord;
use crate::tickets::service::{closed_at_transition, lock_ticket};
use crate::tickets::types::DayEntryInput;

/// A day entry that passed completeness validation.
#[derive(Debug, Clone)]
pub(crate) struct CompleteEntry {
    pub work_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub description: String,
    pub staff_id: Option<Uuid>,
    pub work_type: WorkType,
}

/// Checks submitted day entries for completeness.
///
/// Create is lenient: partially filled rows are dropped, mirroring how
/// operators abandon extra blank form rows. Update is strict: a partial
/// row is a mistake and aborts with a 1-based row index so the form can
/// highlight it.
pub(crate) fn validate_day_entries(
    entries: &[DayEntryInput],
    strict: bool,
) -> Result<Vec<CompleteEntry>, TicketError> {
    let mut complete = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let description = entry
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());

        match (entry.work_date, entry.start_time, entry.end_time, description) {
            (Some(work_date), Some(start_time), Some(end_time), Some(description)) => {
                complete.push(CompleteEntry {
                    work_date,
                    start_time,
                    end_time,
                    description: description.to_string(),
                    staff_id: entry.staff_id,
                    work_type: entry.work_type.unwrap_or_default(),
                });
            }
            _ if strict => {
                return Err(TicketError::Validation(format!(
                    "Work day {} is incomplete: date, start time, end time and description are required",
                    index + 1
                )));
            }
            _ => continue,
        }
    }
    Ok(complete)
}

/// Builds ledger rows from validated entries. Entries without an explicit
/// technician fall back to the ticket's primary assignee. Returns the rows
/// and their hour sum.
pub(crate) fn build_session_rows(
    ticket_id: Uuid,
    entries: &[CompleteEntry],
    default_staff: Option<Uuid>,
    now: DateTime<Utc>,
) -> (Vec<WorkLogRecord>, BigDecimal) {
    let mut total = BigDecimal::from(0);
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let hours = duration::session_hours(entry.start_time, entry.end_time);
        total += hours.clone();
        rows.push(WorkLogRecord {
            id: Uuid::new_v4(),
            ticket_id,
            staff_id: entry.staff_id.or(default_staff),
            work_date: entry.work_date,
            start_time: entry.start_time,
            end_time: entry.end_time,
            total_hours: hours,
            description: entry.description.clone(),
            work_type: entry.work_type,
            created_at: now,
        });
    }
    (rows, total.with_scale_round(2, RoundingMode::HalfUp))
}

/// Replaces the ticket's ledger with the given entries and refreshes the
/// derived total. Returns the new total.
pub(crate) fn replace_sessions(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    entries: &[CompleteEntry],
    default_staff: Option<Uuid>,
    now: DateTime<Utc>,
) -> QueryResult<BigDecimal> {
    diesel::delete(work_logs::table.filter(work_logs::ticket_id.eq(ticket_id))).execute(conn)?;

    let (rows, total) = build_session_rows(ticket_id, entries, default_staff, now);
    if !rows.is_empty() {
        diesel::insert_into(work_logs::table)
            .values(&rows)
            .execute(conn)?;
    }

    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::total_work_hours.eq(total.clone()))
        .execute(conn)?;

    Ok(total)
}

// ============================================================================
// TIMER
// ============================================================================

/// Stamps the work-start marker. An already running timer is restamped.
/// Unassigned tickets get the actor as primary, and the ticket moves to
/// in progress, reopening it if it was closed.
pub(crate) fn start_work_tx(
    conn: &mut PgConnection,
    actor: &Actor,
    ticket_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot log work on tickets".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;

    if assignments::load_assignees(conn, ticket_id)?.is_empty() {
        assignments::replace_assignees(conn, ticket_id, &[actor.staff_id], actor.staff_id, now)?;
    }

    let new_status = TicketStatus::InProgress;
    let closed_at = closed_at_transition(ticket.status, new_status, ticket.closed_at, now);

    diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::scheduled_start.eq(Some(now)),
            tickets::work_end.eq(None::<DateTime<Utc>>),
            tickets::status.eq(new_status),
            tickets::closed_at.eq(closed_at),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;

    let mut events = vec![AuditEvent::new(
        ticket.id,
        Some(actor.staff_id),
        AuditAction::WorkStarted,
        format!("Work started by {}", actor.display_name),
    )];
    if new_status != ticket.status {
        events.push(AuditEvent::new(
            ticket.id,
            Some(actor.staff_id),
            AuditAction::StatusChanged,
            format!("Status changed from {} to {}", ticket.status, new_status),
        ));
    }
    Ok(events)
}

/// Closes the running timer: appends a ledger row for the elapsed span,
/// bumps the derived total in the same statement row-locked by the caller
/// and stamps the work-end marker.
pub(crate) fn stop_work_tx(
    conn: &mut PgConnection,
    actor: &Actor,
    ticket_id: Uuid,
    notes: Option<String>,
    work_type: Option<WorkType>,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot log work on tickets".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;

    // Active timer: a start marker with no end marker after it. Stopping
    // twice without a new start is refused.
    let started = match (ticket.scheduled_start, ticket.work_end) {
        (Some(started), None) => started,
        _ => {
            return Err(TicketError::Validation(
                "No active work session on this ticket".to_string(),
            ));
        }
    };

    let hours = duration::elapsed_hours(started, now);
    let minutes = now.signed_duration_since(started).num_minutes().max(0);

    let description = notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Timed work session".to_string());

    let row = WorkLogRecord {
        id: Uuid::new_v4(),
        ticket_id,
        staff_id: Some(actor.staff_id),
        work_date: started.date_naive(),
        start_time: started.time(),
        end_time: now.time(),
        total_hours: hours.clone(),
        description,
        work_type: work_type.unwrap_or_default(),
        created_at: now,
    };
    diesel::insert_into(work_logs::table)
        .values(&row)
        .execute(conn)?;

    diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::total_work_hours.eq(tickets::total_work_hours + hours.clone()),
            tickets::work_end.eq(Some(now)),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;

    let event = AuditEvent::new(
        ticket.id,
        Some(actor.staff_id),
        AuditAction::WorkStopped,
        format!("Work stopped by {}; {} h recorded", actor.display_name, hours),
    )
    .with_minutes(Some(i32::try_from(minutes).unwrap_or(i32::MAX)));

    Ok(vec![event])
}

/// Deletes one ledger row and subtracts its hours from the derived total,
/// flooring at zero.
pub(crate) fn delete_entry_tx(
    conn: &mut PgConnection,
    actor: &Actor,
    ticket_id: Uuid,
    entry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot log work on tickets".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;

    let entry: WorkLogRecord = work_logs::table
        .find(entry_id)
        .first(conn)
        .optional()?
        .filter(|row: &WorkLogRecord| row.ticket_id == ticket_id)
        .ok_or_else(|| TicketError::NotFound("Work entry not found on this ticket".to_string()))?;

    diesel::delete(work_logs::table.find(entry_id)).execute(conn)?;

    let mut new_total = ticket.total_work_hours.clone() - entry.total_hours.clone();
    if new_total < BigDecimal::from(0) {
        new_total = BigDecimal::from(0);
    }

    diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::total_work_hours.eq(new_total),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(vec![AuditEvent::new(
        ticket.id,
        Some(actor.staff_id),
        AuditAction::WorkEntryDeleted,
        format!(
            "Deleted work entry of {} h on {}",
            entry.total_hours, entry.work_date
        ),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn full_entry(day: u32) -> DayEntryInput {
        DayEntryInput {
            work_date: Some(d(2025, 6, day)),
            start_time: Some(t(9, 0)),
            end_time: Some(t(17, 30)),
            description: Some("On-site diagnostics".to_string()),
            staff_id: None,
            work_type: Some(WorkType::OnSite),
        }
    }

    #[test]
    fn test_lenient_validation_drops_partial_rows() {
        let entries = vec![
            full_entry(2),
            DayEntryInput {
                work_date: Some(d(2025, 6, 3)),
                ..Default::default()
            },
            full_entry(4),
        ];
        let complete = validate_day_entries(&entries, false).unwrap();
        assert_eq!(complete.len(), 2);
        assert_eq!(complete[0].work_date, d(2025, 6, 2));
        assert_eq!(complete[1].work_date, d(2025, 6, 4));
    }

    #[test]
    fn test_strict_validation_names_the_offending_row() {
        let entries = vec![full_entry(2), DayEntryInput::default(), full_entry(4)];
        let err = validate_day_entries(&entries, true).unwrap_err();
        match err {
            TicketError::Validation(msg) => assert!(msg.starts_with("Work day 2 ")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_description_counts_as_missing() {
        let mut entry = full_entry(2);
        entry.description = Some("   ".to_string());
        let err = validate_day_entries(&[entry.clone()], true).unwrap_err();
        assert!(matches!(err, TicketError::Validation(_)));

        let complete = validate_day_entries(&[entry], false).unwrap();
        assert!(complete.is_empty());
    }

    #[test]
    fn test_build_rows_sums_hours_and_defaults_staff() {
        let primary = Uuid::new_v4();
        let explicit = Uuid::new_v4();
        let entries = vec![
            CompleteEntry {
                work_date: d(2025, 6, 2),
                start_time: t(9, 0),
                end_time: t(17, 30),
                description: "Rack rebuild".to_string(),
                staff_id: None,
                work_type: WorkType::OnSite,
            },
            CompleteEntry {
                work_date: d(2025, 6, 3),
                start_time: t(22, 0),
                end_time: t(6, 0),
                description: "Overnight migration".to_string(),
                staff_id: Some(explicit),
                work_type: WorkType::Remote,
            },
        ];

        let ticket_id = Uuid::new_v4();
        let (rows, total) = build_session_rows(ticket_id, &entries, Some(primary), Utc::now());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].staff_id, Some(primary));
        assert_eq!(rows[1].staff_id, Some(explicit));
        assert_eq!(rows[0].total_hours.to_string(), "8.50");
        assert_eq!(rows[1].total_hours.to_string(), "8.00");
        assert_eq!(total.to_string(), "16.50");
        assert!(rows.iter().all(|row| row.ticket_id == ticket_id));
    }

    #[test]
    fn test_build_rows_empty_ledger_totals_zero() {
        let (rows, total) = build_session_rows(Uuid::new_v4(), &[], None, Utc::now());
        assert!(rows.is_empty());
        assert_eq!(total.to_string(), "0.00");
    }
}
