use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Schema '{0}' not found")]
    UnknownSchema(String),

    #[error("Schema '{0}' already registered")]
    SchemaExists(String),

    #[error("Column '{column}' not found in schema '{schema}'")]
    UnknownColumn { column: String, schema: String },

    #[error("Column '{column}' in schema '{schema}' is read-only")]
    ReadOnlyColumn { column: String, schema: String },

    #[error("Type mismatch: column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Row {key} not found in schema '{schema}'")]
    RowNotFound { schema: String, key: String },

    #[error("Computed column dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Invalid schema definition: {0}")]
    InvalidSchema(String),

    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Errors raised at the validation boundary, before any mutation is applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownSchema(_)
                | Self::UnknownColumn { .. }
                | Self::ReadOnlyColumn { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidKey(_)
                | Self::ConstraintViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
