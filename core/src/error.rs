use thiserror::Error;

pub type DynaResult<T> = Result<T, DynaError>;

/// Errors surfaced by the schema catalog, the query translator and the
/// table operator.
///
/// Validation failures (see [`DynaError::is_caller_error`]) are reported
/// before any storage work starts. Everything else is raised after the
/// in-flight unit of work has been rolled back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DynaError {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Invalid sort direction '{0}', expected 'asc' or 'desc'")]
    InvalidSortDirection(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Update payload must assign at least one column")]
    EmptyUpdate,

    #[error("Invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Insert failed: {0}")]
    InsertFailed(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Table '{0}' already exists")]
    DuplicateTable(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl DynaError {
    /// Short, stable error code used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            DynaError::InvalidSchema(_) => "invalid_schema",
            DynaError::UnsupportedType(_) => "unsupported_type",
            DynaError::TableNotFound(_) => "table_not_found",
            DynaError::UnknownColumn { .. } => "unknown_column",
            DynaError::InvalidSortDirection(_) => "invalid_sort_direction",
            DynaError::InvalidPagination(_) => "invalid_pagination",
            DynaError::EmptyUpdate => "empty_update",
            DynaError::InvalidValue { .. } => "invalid_value",
            DynaError::InsertFailed(_) => "insert_failed",
            DynaError::StorageFailure(_) => "storage_failure",
            DynaError::DuplicateTable(_) => "duplicate_table",
            DynaError::Timeout => "timeout",
            DynaError::Config(_) => "config_error",
            DynaError::Io(_) => "io_error",
            DynaError::Protocol(_) => "protocol_error",
            DynaError::Connection(_) => "connection_error",
        }
    }

    /// Rebuild an error from a wire code and its rendered message.
    ///
    /// Structured payloads (the column of `UnknownColumn`, for example) do not
    /// survive the trip; the message is carried in the closest variant.
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            "invalid_schema" => DynaError::InvalidSchema(message),
            "unsupported_type" => DynaError::UnsupportedType(message),
            "table_not_found" => DynaError::TableNotFound(message),
            "unknown_column" => DynaError::UnknownColumn {
                table: String::new(),
                column: message,
            },
            "invalid_sort_direction" => DynaError::InvalidSortDirection(message),
            "invalid_pagination" => DynaError::InvalidPagination(message),
            "empty_update" => DynaError::EmptyUpdate,
            "invalid_value" => DynaError::InvalidValue {
                column: String::new(),
                reason: message,
            },
            "insert_failed" => DynaError::InsertFailed(message),
            "duplicate_table" => DynaError::DuplicateTable(message),
            "timeout" => DynaError::Timeout,
            "config_error" => DynaError::Config(message),
            "io_error" => DynaError::Io(message),
            "protocol_error" => DynaError::Protocol(message),
            "connection_error" => DynaError::Connection(message),
            _ => DynaError::StorageFailure(message),
        }
    }

    /// Validation errors: the request was wrong, nothing touched storage.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DynaError::InvalidSchema(_)
                | DynaError::UnsupportedType(_)
                | DynaError::TableNotFound(_)
                | DynaError::UnknownColumn { .. }
                | DynaError::InvalidSortDirection(_)
                | DynaError::InvalidPagination(_)
                | DynaError::EmptyUpdate
                | DynaError::InvalidValue { .. }
        )
    }

    pub(crate) fn unknown_column(table: &str, column: &str) -> Self {
        DynaError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl From<std::io::Error> for DynaError {
    fn from(err: std::io::Error) -> Self {
        DynaError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for DynaError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::OperationInterrupted) => DynaError::Timeout,
            _ => DynaError::StorageFailure(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for DynaError {
    fn from(err: r2d2::Error) -> Self {
        DynaError::StorageFailure(format!("connection pool: {}", err))
    }
}
