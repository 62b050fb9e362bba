//! Error types for tile store and seeding operations

/// Result type alias for tile store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tile store error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error (MBTiles and MD5 sidecars)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol buffer error
    #[error("Protocol buffer error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// PMTiles error
    #[error("PMTiles error: {0}")]
    PmTiles(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Tile absent from the store
    #[error("tile not found")]
    TileNotFound,

    /// No persisted MD5 and no bytes to compute one from
    #[error("tile MD5 not found")]
    TileMd5NotFound,

    /// No creation timestamp recorded for the tile
    #[error("tile created time not found")]
    CreatedNotFound,

    /// Upstream responded with a retryable non-2xx status
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    /// Upstream responded 204/404: the tile does not exist upstream
    #[error("upstream has no tile")]
    UpstreamEmpty,

    /// Sidecar lock could not be acquired within the timeout
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// A bounded retry loop exhausted its timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Schema mismatch or undecodable data; fatal for the store
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// Metadata failed validation; fatal for the id
    #[error("invalid metadata: {0}")]
    Validation(String),

    /// Tile coordinate out of range
    #[error("invalid tile coordinate: {0}")]
    InvalidCoordinate(String),

    /// Bounding box out of range
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    /// Requested tile format does not match the store
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Operation not supported by this backend
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Repository id is not served
    #[error("id not found: {0}")]
    IdNotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Style, sprite or glyph error
    #[error("style error: {0}")]
    Style(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new corrupt-store error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Error::Corrupt(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new HTTP error
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Error::Http(msg.into())
    }

    /// Create a new style error
    pub fn style<S: Into<String>>(msg: S) -> Self {
        Error::Style(msg.into())
    }

    /// Whether a bounded attempt loop may retry after this error.
    /// Missing tiles, empty upstream responses and validation failures
    /// are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamStatus(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::LockTimeout(_)
                | Error::Io(_)
        ) || self.is_busy()
    }

    /// Whether the error is a transient backend-busy condition that a
    /// bounded poll loop may retry.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Database(sqlx::Error::Database(db)) => {
                // 55P03 = lock_not_available, 40P01 = deadlock_detected
                matches!(db.code().as_deref(), Some("55P03") | Some("40P01"))
            }
            _ => false,
        }
    }
}
