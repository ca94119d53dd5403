use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("The requested reservation #{0} does not exist")]
    ReservationNotFound(i64),
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("The requested refund #{0} does not exist")]
    RefundNotFound(i64),
    #[error("A storage invariant would be violated: {0}")]
    IntegrityViolation(String),
    #[error("Stored data could not be decoded: {0}")]
    CorruptData(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_check_violation() || is_trigger_abort(db.message()) => {
                StorageError::IntegrityViolation(db.message().to_string())
            },
            _ => StorageError::DatabaseError(e.to_string()),
        }
    }
}

/// Messages raised by the schema's guard triggers.
fn is_trigger_abort(message: &str) -> bool {
    ["exceed", "would become negative"].iter().any(|m| message.contains(m))
}
