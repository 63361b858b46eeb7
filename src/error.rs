/*!
Error types shared by the store, the import pipeline and the summary service
*/

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing database could not be opened. Nothing to recover locally.
    #[error("history store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    /// A record carried an explicit id that is already stored.
    #[error("duplicate record id {0}")]
    DuplicateRecord(i64),

    /// Missing or invalid `ts` / `ms_played`.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("preference source error: {0}")]
    Preferences(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Per-record errors are counted as skipped during an import,
    /// everything else aborts it.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Error::DuplicateRecord(_) | Error::MalformedRecord(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
