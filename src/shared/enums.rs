//! Database enum types for the ticket subsystem.
//!
//! Rust enums that map directly to PostgreSQL SMALLINT columns:
//! type safety at compile time, cheap storage and comparisons, and
//! automatic validation at the deserialization boundary.
//!
//! All enums derive the traits Diesel needs for column mapping.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::SmallInt;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

// ============================================================================
// TICKET STATUS
// ============================================================================

/// Lifecycle state of a support ticket.
///
/// The transition set is unrestricted; `closed_at` bookkeeping is the only
/// state-dependent side effect and is handled by the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TicketStatus {
    Open = 0,
    InProgress = 1,
    Waiting = 2,
    Resolved = 3,
    Closed = 4,
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl ToSql<SmallInt, Pg> for TicketStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for TicketStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::InProgress),
            2 => Ok(Self::Waiting),
            3 => Ok(Self::Resolved),
            4 => Ok(Self::Closed),
            _ => Err(format!("Unknown TicketStatus: {}", value).into()),
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Waiting => write!(f, "waiting"),
            Self::Resolved => write!(f, "resolved"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "in progress" => Ok(Self::InProgress),
            "waiting" => Ok(Self::Waiting),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown ticket status: {}", s)),
        }
    }
}

// ============================================================================
// TICKET PRIORITY
// ============================================================================

/// Urgency classification for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TicketPriority {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl ToSql<SmallInt, Pg> for TicketPriority {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for TicketPriority {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            3 => Ok(Self::Critical),
            _ => Err(format!("Unknown TicketPriority: {}", value).into()),
        }
    }
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TicketPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            _ => Err(format!("Unknown ticket priority: {}", s)),
        }
    }
}

// ============================================================================
// TICKET CATEGORY
// ============================================================================

/// Service area a ticket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TicketCategory {
    Hardware = 0,
    Software = 1,
    Network = 2,
    Security = 3,
    Maintenance = 4,
    Other = 5,
}

impl Default for TicketCategory {
    fn default() -> Self {
        Self::Other
    }
}

impl ToSql<SmallInt, Pg> for TicketCategory {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for TicketCategory {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Hardware),
            1 => Ok(Self::Software),
            2 => Ok(Self::Network),
            3 => Ok(Self::Security),
            4 => Ok(Self::Maintenance),
            5 => Ok(Self::Other),
            _ => Err(format!("Unknown TicketCategory: {}", value).into()),
        }
    }
}

impl std::fmt::Display for TicketCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "hardware"),
            Self::Software => write!(f, "software"),
            Self::Network => write!(f, "network"),
            Self::Security => write!(f, "security"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for TicketCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" => Ok(Self::Hardware),
            "software" => Ok(Self::Software),
            "network" => Ok(Self::Network),
            "security" => Ok(Self::Security),
            "maintenance" => Ok(Self::Maintenance),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown ticket category: {}", s)),
        }
    }
}

// ============================================================================
// WORK TYPE
// ============================================================================

/// How a work session was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum WorkType {
    Remote = 0,
    OnSite = 1,
    Phone = 2,
    Workshop = 3,
}

impl Default for WorkType {
    fn default() -> Self {
        Self::Remote
    }
}

impl ToSql<SmallInt, Pg> for WorkType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for WorkType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Remote),
            1 => Ok(Self::OnSite),
            2 => Ok(Self::Phone),
            3 => Ok(Self::Workshop),
            _ => Err(format!("Unknown WorkType: {}", value).into()),
        }
    }
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::OnSite => write!(f, "on_site"),
            Self::Phone => write!(f, "phone"),
            Self::Workshop => write!(f, "workshop"),
        }
    }
}

impl std::str::FromStr for WorkType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "on_site" | "onsite" | "on-site" => Ok(Self::OnSite),
            "phone" => Ok(Self::Phone),
            "workshop" => Ok(Self::Workshop),
            _ => Err(format!("Unknown work type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Waiting,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TicketPriority::Critical > TicketPriority::High);
        assert!(TicketPriority::High > TicketPriority::Medium);
        assert!(TicketPriority::Medium > TicketPriority::Low);
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(TicketStatus::from_str("archived").is_err());
        assert!(WorkType::from_str("telepathy").is_err());
    }
}
