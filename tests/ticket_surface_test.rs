#[cfg(test)]
mod ticket_surface_integration_tests {
    use opsdesk::tickets::{AttachmentStore, MAX_FILE_BYTES, MAX_TICKET_BYTES};
    use opsdesk::{
        AppConfig, StaffRole, StaticDirectory, TicketCategory, TicketInput, TicketPriority,
        TicketStatus, WorkPattern,
    };
    use opsdesk::directory::Directory;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn test_store_layout_is_per_ticket() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(tmp.path());

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        // Two tickets, same stored name: the per-ticket namespace keeps
        // them apart.
        let path_a = store
            .persist(first, "20250601120000_abcd0001.txt", b"alpha")
            .unwrap();
        let path_b = store
            .persist(second, "20250601120000_abcd0001.txt", b"beta")
            .unwrap();

        assert_ne!(path_a, path_b);
        assert_eq!(std::fs::read(&path_a).unwrap(), b"alpha");
        assert_eq!(std::fs::read(&path_b).unwrap(), b"beta");

        let rel = format!("tickets/{}/20250601120000_abcd0001.txt", first);
        assert_eq!(store.resolve(&rel), path_a);
    }

    #[test]
    fn test_ceilings_are_ordered() {
        assert!(MAX_FILE_BYTES < MAX_TICKET_BYTES);
        assert_eq!(MAX_FILE_BYTES, 200 * 1024 * 1024);
        assert_eq!(MAX_TICKET_BYTES, 500 * 1024 * 1024);
    }

    #[test]
    fn test_input_round_trips_through_json() {
        let client = Uuid::new_v4();
        let mut input = TicketInput::new("Replace failed PSU", client);
        input.priority = TicketPriority::High;
        input.category = TicketCategory::Hardware;
        input.location_text = Some("Server room B".to_string());
        input.work = WorkPattern::Single {
            time_spent_minutes: Some(90),
        };

        let encoded = serde_json::to_string(&input).unwrap();
        let decoded: TicketInput = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.title, "Replace failed PSU");
        assert_eq!(decoded.client_id, client);
        assert_eq!(decoded.priority, TicketPriority::High);
        match decoded.work {
            WorkPattern::Single { time_spent_minutes } => {
                assert_eq!(time_spent_minutes, Some(90))
            }
            other => panic!("unexpected work pattern: {:?}", other),
        }
    }

    #[test]
    fn test_status_labels_round_trip() {
        for label in ["open", "in_progress", "waiting", "resolved", "closed"] {
            let status = TicketStatus::from_str(label).unwrap();
            assert_eq!(status.to_string(), label);
        }
    }

    #[test]
    fn test_directory_roles_and_lookups() {
        let staff = Uuid::new_v4();
        let directory = StaticDirectory::new().with_staff(&[staff]);

        assert!(directory.staff_exists(staff));
        assert!(!directory.client_exists(staff));
        assert!(StaffRole::Admin.can_delete_tickets());
        assert!(!StaffRole::ReadOnly.can_edit_tickets());
    }

    #[test]
    fn test_config_defaults_boot_without_env() {
        let config = AppConfig::default();
        assert!(config.database.url.contains("opsdesk"));
        assert!(config.database.max_connections > 0);
    }

    // Extracts one CREATE TABLE block from the migration source.
    fn table_block<'a>(sql: &'a str, table: &str) -> &'a str {
        let header = format!("CREATE TABLE {} (", table);
        let start = sql
            .find(&header)
            .unwrap_or_else(|| panic!("no CREATE TABLE for {}", table));
        let end = sql[start..].find(");").expect("unterminated block") + start;
        &sql[start..end]
    }

    #[test]
    fn test_attachment_and_audit_rows_survive_ticket_deletion() {
        let sql = include_str!("../migrations/2025-06-17-093015_create_ticket_tables/up.sql");

        // Soft-deleted descriptors and the audit trail must outlive the
        // ticket row, so neither table may reference tickets(id).
        for table in ["ticket_attachments", "ticket_logs"] {
            assert!(
                !table_block(sql, table).contains("REFERENCES"),
                "{} must not have a foreign key",
                table
            );
        }

        // Assignees and work logs are hard-deleted with the ticket and
        // keep the cascading key as a backstop.
        for table in ["ticket_assignees", "work_logs"] {
            assert!(
                table_block(sql, table).contains("REFERENCES tickets (id) ON DELETE CASCADE"),
                "{} must cascade on ticket deletion",
                table
            );
        }
    }
}
