//! Error taxonomy for the engine (spec §7).

/// Result type alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the engine. Variant names follow the semantic kinds
/// from the error-handling design rather than the originating crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Database-related errors (metadata or vector store).
    #[error("storage error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client errors (native API transport, model download).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IMAP protocol errors.
    #[error("imap error: {0}")]
    Imap(String),

    /// SMTP sending errors.
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Email parsing errors.
    #[error("parse error: {0}")]
    Parse(String),

    /// JSON (de)serialization errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No valid credential for the account; caller must re-authenticate.
    #[error("authentication required for account {account_id}")]
    AuthRequired { account_id: String },

    /// A stored OAuth credential has expired and could not be refreshed.
    #[error("credential expired for account {account_id}: {message}")]
    CredentialExpired { account_id: String, message: String },

    /// Retryable transport failure.
    #[error("transient transport error: {message}")]
    TransportTransient { message: String },

    /// Non-retryable transport failure.
    #[error("permanent transport error: {message}")]
    TransportPermanent { message: String },

    /// No LLM is activated; caller should use the fallback path.
    #[error("model unavailable: {message}")]
    ModelUnavailable { message: String },

    /// A singleton task (indexing, embedding, generation) is already running.
    #[error("busy: {message}")]
    Busy { message: String },

    /// Lookup by id found nothing.
    #[error("not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    /// Database unreachable or corrupt.
    #[error("storage unavailable: {message}")]
    Storage { message: String },

    /// Cooperative cancellation was observed.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for conditions without a dedicated variant.
    #[error("{message}")]
    Other { message: String },
}

impl EngineError {
    pub fn auth_required(account_id: impl Into<String>) -> Self {
        Self::AuthRequired {
            account_id: account_id.into(),
        }
    }

    pub fn credential_expired(account_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CredentialExpired {
            account_id: account_id.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransportTransient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::TransportPermanent {
            message: message.into(),
        }
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether the caller should retry this operation (spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Http(_) | EngineError::TransportTransient { .. } | EngineError::Io(_)
        )
    }

    /// Whether this error means the stored credential needs refreshing/replacing.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            EngineError::AuthRequired { .. } | EngineError::CredentialExpired { .. }
        )
    }

    /// Error category, for logging/metrics.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Database(_) => "database",
            EngineError::Http(_) => "http",
            EngineError::Imap(_) => "imap",
            EngineError::Smtp(_) => "smtp",
            EngineError::Parse(_) => "parse",
            EngineError::Json(_) => "json",
            EngineError::Io(_) => "io",
            EngineError::AuthRequired { .. } => "auth_required",
            EngineError::CredentialExpired { .. } => "credential_expired",
            EngineError::TransportTransient { .. } => "transport_transient",
            EngineError::TransportPermanent { .. } => "transport_permanent",
            EngineError::ModelUnavailable { .. } => "model_unavailable",
            EngineError::Busy { .. } => "busy",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Storage { .. } => "storage",
            EngineError::Cancelled => "cancelled",
            EngineError::Other { .. } => "other",
        }
    }
}

impl From<async_imap::error::Error> for EngineError {
    fn from(error: async_imap::error::Error) -> Self {
        EngineError::Imap(error.to_string())
    }
}

impl From<mailparse::MailParseError> for EngineError {
    fn from(error: mailparse::MailParseError) -> Self {
        EngineError::Parse(error.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(error: url::ParseError) -> Self {
        EngineError::Other {
            message: format!("url parse error: {error}"),
        }
    }
}
