//! Read-only directory of staff, clients and service locations.
//!
//! The ticket subsystem never owns these entities; it validates references
//! against this trait and resolves display names for audit narration. Hosts
//! back it with their own people/CRM tables.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Role of a staff member, as granted by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    Manager,
    Technician,
    ReadOnly,
}

impl StaffRole {
    pub fn can_edit_tickets(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    pub fn can_delete_tickets(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

/// The authenticated staff member performing an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub staff_id: Uuid,
    pub display_name: String,
    pub role: StaffRole,
}

impl Actor {
    pub fn new(staff_id: Uuid, display_name: impl Into<String>, role: StaffRole) -> Self {
        Self {
            staff_id,
            display_name: display_name.into(),
            role,
        }
    }
}

/// Lookup interface the host must provide.
///
/// Existence checks gate referential integrity; name lookups are optional
/// and only improve audit readability.
pub trait Directory: Send + Sync {
    fn staff_exists(&self, staff_id: Uuid) -> bool;
    fn client_exists(&self, client_id: Uuid) -> bool;
    fn location_exists(&self, location_id: Uuid) -> bool;

    fn staff_name(&self, _staff_id: Uuid) -> Option<String> {
        None
    }

    fn client_name(&self, _client_id: Uuid) -> Option<String> {
        None
    }
}

/// In-memory directory backed by id sets. Useful for tests and small
/// deployments where the host preloads its roster.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    staff: HashSet<Uuid>,
    clients: HashSet<Uuid>,
    locations: HashSet<Uuid>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_staff(mut self, ids: &[Uuid]) -> Self {
        self.staff.extend(ids.iter().copied());
        self
    }

    pub fn with_clients(mut self, ids: &[Uuid]) -> Self {
        self.clients.extend(ids.iter().copied());
        self
    }

    pub fn with_locations(mut self, ids: &[Uuid]) -> Self {
        self.locations.extend(ids.iter().copied());
        self
    }
}

impl Directory for StaticDirectory {
    fn staff_exists(&self, staff_id: Uuid) -> bool {
        self.staff.contains(&staff_id)
    }

    fn client_exists(&self, client_id: Uuid) -> bool {
        self.clients.contains(&client_id)
    }

    fn location_exists(&self, location_id: Uuid) -> bool {
        self.locations.contains(&location_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permissions() {
        assert!(StaffRole::Admin.can_delete_tickets());
        assert!(StaffRole::Manager.can_delete_tickets());
        assert!(!StaffRole::Technician.can_delete_tickets());
        assert!(StaffRole::Technician.can_edit_tickets());
        assert!(!StaffRole::ReadOnly.can_edit_tickets());
    }

    #[test]
    fn test_static_directory_lookups() {
        let staff_id = Uuid::new_v4();
        let directory = StaticDirectory::new().with_staff(&[staff_id]);
        assert!(directory.staff_exists(staff_id));
        assert!(!directory.staff_exists(Uuid::new_v4()));
        assert!(directory.staff_name(staff_id).is_none());
    }
}
