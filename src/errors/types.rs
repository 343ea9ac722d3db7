//! # Error Types
//!
//! Error types for the warden service using `thiserror`.

/// Custom result type for warden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the warden service
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Request payload failed validation
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Caller broke a registry contract (unknown key, unregistered or already released channel)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The caller could not be authenticated
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The caller is authenticated but not allowed to perform the action
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Resource conflict errors (e.g., already exists)
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// A server-side contract that should be unreachable was observed
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Wrap a sqlx error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden { message: message.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InvariantViolation { message: message.into() }
    }

    /// Create an internal server error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Add context to an error
    pub fn context<S: Into<String>>(mut self, context: S) -> Self {
        let context = context.into();
        match &mut self {
            Error::Io { context: ref mut ctx, .. }
            | Error::Database { context: ref mut ctx, .. }
            | Error::Serialization { context: ref mut ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            Error::Internal { message, .. } => {
                *message = format!("{}: {}", context, message);
            }
            _ => {}
        }
        self
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 500,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Serialization { .. } => 500,
            Error::Validation { .. } => 400,
            Error::InvalidArgument { .. } => 400,
            Error::Unauthorized { .. } => 401,
            Error::Forbidden { .. } => 403,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 409,
            Error::InvariantViolation { .. } => 500,
            Error::Internal { .. } => 500,
        }
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
