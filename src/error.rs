//! Error taxonomy for ticket operations.
//!
//! Callers branch on the variant to pick a response: validation and quota
//! problems are user-correctable, permission problems are actor-correctable,
//! storage problems are operational.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TicketError {
    /// Input failed a structural or semantic check. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An attachment ceiling (per-file or per-ticket) would be exceeded.
    #[error("Quota exceeded: {0}")]
    Quota(String),

    /// The actor's role does not allow the operation.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The referenced ticket, work entry or attachment does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database or filesystem failure; the transaction was rolled back.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<diesel::result::Error> for TicketError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => {
                TicketError::NotFound("Record not found".to_string())
            }
            other => TicketError::Storage(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for TicketError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        TicketError::Storage(format!("Connection pool error: {}", err))
    }
}

impl From<std::io::Error> for TicketError {
    fn from(err: std::io::Error) -> Self {
        TicketError::Storage(format!("I/O error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: TicketError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, TicketError::NotFound(_)));
    }

    #[test]
    fn test_messages_carry_context() {
        let err = TicketError::Quota("File exceeds 200.00 MB".to_string());
        assert_eq!(err.to_string(), "Quota exceeded: File exceeds 200.00 MB");
    }
}
