//! Diesel table definitions for the ticket subsystem.
//!
//! Column order here is load-bearing: every record struct in
//! `crate::tickets::models` lists its fields in the same order.

diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Varchar,
        title -> Varchar,
        description -> Nullable<Text>,
        client_id -> Uuid,
        location_id -> Nullable<Uuid>,
        location_text -> Nullable<Varchar>,
        category -> SmallInt,
        priority -> SmallInt,
        status -> SmallInt,
        assigned_to -> Nullable<Uuid>,
        estimated_hours -> Nullable<Numeric>,
        total_work_hours -> Numeric,
        scheduled_start -> Nullable<Timestamptz>,
        scheduled_end -> Nullable<Timestamptz>,
        work_end -> Nullable<Timestamptz>,
        sla_breach_at -> Nullable<Timestamptz>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        closed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    ticket_assignees (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        staff_id -> Uuid,
        is_primary -> Bool,
        assigned_by -> Uuid,
        assigned_at -> Timestamptz,
    }
}

diesel::table! {
    work_logs (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        staff_id -> Nullable<Uuid>,
        work_date -> Date,
        start_time -> Time,
        end_time -> Time,
        total_hours -> Numeric,
        description -> Text,
        work_type -> SmallInt,
        created_at -> Timestamptz,
    }
}

// No foreign key on purpose: descriptor rows are soft-deleted and must
// survive ticket deletion.
diesel::table! {
    ticket_attachments (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        original_name -> Varchar,
        stored_name -> Varchar,
        storage_path -> Varchar,
        mime_type -> Varchar,
        byte_size -> Int8,
        uploaded_by -> Uuid,
        uploaded_at -> Timestamptz,
        is_deleted -> Bool,
        deleted_at -> Nullable<Timestamptz>,
    }
}

// No foreign key on purpose: audit rows must survive ticket deletion.
diesel::table! {
    ticket_logs (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        staff_id -> Nullable<Uuid>,
        action -> Varchar,
        description -> Text,
        time_spent_minutes -> Nullable<Int4>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(ticket_assignees -> tickets (ticket_id));
diesel::joinable!(work_logs -> tickets (ticket_id));
diesel::joinable!(ticket_attachments -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    tickets,
    ticket_assignees,
    work_logs,
    ticket_attachments,
    ticket_logs,
);
