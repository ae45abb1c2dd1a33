use sqlx::error::ErrorKind;
use thiserror::Error;

/// SQLSTATE raised when a serializable transaction cannot be committed.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised when the deadlock detector aborts a transaction.
const DEADLOCK_DETECTED: &str = "40P01";

/// Repository error, classified so services can react to constraint names and retries.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// The transaction lost a serialization race (or a deadlock) and was rolled back.
    /// Retrying against fresh state may succeed.
    #[error("Transaction could not be serialized: {message}")]
    SerializationFailure { message: String },

    /// Connection loss, decode failures and every other unexpected error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Whether the error was raised by the named unique constraint or index.
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation { constraint: Some(c), .. } if c == name)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let db_err = match &err {
            sqlx::Error::RowNotFound => return DbError::NotFound,
            sqlx::Error::Database(db_err) => db_err,
            _ => return DbError::Other(err.into()),
        };

        let message = db_err.message().to_string();
        if matches!(db_err.code().as_deref(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)) {
            return DbError::SerializationFailure { message };
        }

        let constraint = db_err.constraint().map(str::to_owned);
        let table = db_err.table().map(str::to_owned);
        match db_err.kind() {
            ErrorKind::UniqueViolation => DbError::UniqueViolation { constraint, table, message },
            ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { constraint, table, message },
            ErrorKind::CheckViolation => DbError::CheckViolation { constraint, table, message },
            _ => DbError::Other(err.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
