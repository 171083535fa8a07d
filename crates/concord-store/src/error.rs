use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A unique constraint was violated (duplicate primary key or unique
    /// index).
    #[error("Record already exists")]
    Conflict,

    /// A foreign-key constraint was violated (e.g. unknown sender id).
    #[error("Referenced record does not exist")]
    ForeignKey,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON (de)serialization failure for a structured column.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// A stored enum column held an unknown value.
    #[error("Invalid stored value for {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },

    /// Caller-supplied input violated a data-model invariant.
    #[error("Invalid input: {0}")]
    Invalid(&'static str),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            match err.code {
                ErrorCode::ConstraintViolation => {
                    // Distinguish FK violations from uniqueness violations
                    // via the extended result code.
                    const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
                    const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
                    const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
                    return match err.extended_code {
                        SQLITE_CONSTRAINT_FOREIGNKEY => StoreError::ForeignKey,
                        SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE => {
                            StoreError::Conflict
                        }
                        _ => StoreError::Conflict,
                    };
                }
                _ => return StoreError::Sqlite(e),
            }
        }

        StoreError::Sqlite(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
