//! Multi-assignee allocation.
//!
//! The submitted assignee list is cleaned into an ordered set and the
//! ticket's allocation rows are replaced wholesale. The first surviving
//! entry is the primary technician; `tickets.assigned_to` mirrors it so
//! list queries never need a join.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

use crate::directory::{Actor, Directory};
use crate::error::TicketError;
use crate::shared::schema::{ticket_assignees, tickets};
use crate::tickets::audit::{AuditAction, AuditEvent};
use crate::tickets::models::AssigneeRecord;
use crate::tickets::service::lock_ticket;

/// Cleans a requested assignee list: drops nil ids, unknown staff and
/// duplicates, preserving first-seen order.
pub(crate) fn resolve_assignees(directory: &dyn Directory, requested: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .copied()
        .filter(|id| !id.is_nil())
        .filter(|id| directory.staff_exists(*id))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Builds allocation rows for a resolved list. The first entry is primary.
pub(crate) fn build_assignee_rows(
    ticket_id: Uuid,
    resolved: &[Uuid],
    assigned_by: Uuid,
    now: DateTime<Utc>,
) -> Vec<AssigneeRecord> {
    resolved
        .iter()
        .enumerate()
        .map(|(index, staff_id)| AssigneeRecord {
            id: Uuid::new_v4(),
            ticket_id,
            staff_id: *staff_id,
            is_primary: index == 0,
            assigned_by,
            assigned_at: now,
        })
        .collect()
}

/// Replaces the ticket's allocation rows and refreshes the denormalized
/// primary mirror. Returns the new primary, if any.
pub(crate) fn replace_assignees(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    resolved: &[Uuid],
    assigned_by: Uuid,
    now: DateTime<Utc>,
) -> QueryResult<Option<Uuid>> {
    diesel::delete(ticket_assignees::table.filter(ticket_assignees::ticket_id.eq(ticket_id)))
        .execute(conn)?;

    let rows = build_assignee_rows(ticket_id, resolved, assigned_by, now);
    if !rows.is_empty() {
        diesel::insert_into(ticket_assignees::table)
            .values(&rows)
            .execute(conn)?;
    }

    let primary = resolved.first().copied();
    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::assigned_to.eq(primary))
        .execute(conn)?;

    Ok(primary)
}

/// Current allocation, primary first, then by assignment time.
pub(crate) fn load_assignees(
    conn: &mut PgConnection,
    ticket_id: Uuid,
) -> QueryResult<Vec<AssigneeRecord>> {
    ticket_assignees::table
        .filter(ticket_assignees::ticket_id.eq(ticket_id))
        .order((
            ticket_assignees::is_primary.desc(),
            ticket_assignees::assigned_at.asc(),
        ))
        .load(conn)
}

/// Promotes one staff member to primary, or clears the whole allocation.
///
/// `Some(staff)` demotes everyone else and promotes the given member,
/// inserting an allocation row if they were not assigned yet. `None`
/// removes every allocation row.
pub(crate) fn set_primary_tx(
    conn: &mut PgConnection,
    directory: &dyn Directory,
    actor: &Actor,
    ticket_id: Uuid,
    staff: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot modify ticket assignments".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;

    let description = match staff {
        Some(staff_id) => {
            if staff_id.is_nil() || !directory.staff_exists(staff_id) {
                return Err(TicketError::Validation(
                    "Unknown staff reference for primary assignee".to_string(),
                ));
            }

            diesel::update(
                ticket_assignees::table.filter(ticket_assignees::ticket_id.eq(ticket_id)),
            )
            .set(ticket_assignees::is_primary.eq(false))
            .execute(conn)?;

            let already_assigned = load_assignees(conn, ticket_id)?
                .iter()
                .any(|row| row.staff_id == staff_id);

            if already_assigned {
                diesel::update(
                    ticket_assignees::table
                        .filter(ticket_assignees::ticket_id.eq(ticket_id))
                        .filter(ticket_assignees::staff_id.eq(staff_id)),
                )
                .set(ticket_assignees::is_primary.eq(true))
                .execute(conn)?;
            } else {
                let row = AssigneeRecord {
                    id: Uuid::new_v4(),
                    ticket_id,
                    staff_id,
                    is_primary: true,
                    assigned_by: actor.staff_id,
                    assigned_at: now,
                };
                diesel::insert_into(ticket_assignees::table)
                    .values(&row)
                    .execute(conn)?;
            }

            diesel::update(tickets::table.find(ticket_id))
                .set((
                    tickets::assigned_to.eq(Some(staff_id)),
                    tickets::updated_at.eq(now),
                ))
                .execute(conn)?;

            let name = directory
                .staff_name(staff_id)
                .unwrap_or_else(|| staff_id.to_string());
            format!("Primary assignee set to {}", name)
        }
        None => {
            diesel::delete(
                ticket_assignees::table.filter(ticket_assignees::ticket_id.eq(ticket_id)),
            )
            .execute(conn)?;

            diesel::update(tickets::table.find(ticket_id))
                .set((
                    tickets::assigned_to.eq(None::<Uuid>),
                    tickets::updated_at.eq(now),
                ))
                .execute(conn)?;

            "All assignees cleared".to_string()
        }
    };

    Ok(vec![AuditEvent::new(
        ticket.id,
        Some(actor.staff_id),
        AuditAction::Assigned,
        description,
    )])
}
