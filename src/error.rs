//! Error types for the wallet bot

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Credential errors
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Wrong password")]
    WrongPassword,

    #[error("No account found for this private key")]
    NoAccountForKey,

    #[error("No account linked")]
    NoCredential,

    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),

    // Session errors
    #[error("Session expired, please authorize again")]
    SessionExpired,

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    // Price feed errors
    #[error("Price feed unavailable: {0}")]
    PriceFeed(String),

    // Transaction errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    /// Upstream rejection, message kept verbatim
    #[error("{0}")]
    TransactionSend(String),

    #[error("Account name unavailable: {0}")]
    NameUnavailable(String),

    // Order errors
    #[error("You can only have {0} pending RAM orders at a time")]
    OrderLimitReached(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    // Payment errors
    #[error("Payment provider error: {0}")]
    Payment(String),

    // Persistence errors
    #[error("Database error: {0}")]
    Database(String),

    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Upstream substrings that indicate the account ran out of a metered resource
const RESOURCE_EXHAUSTION_MARKERS: &[&str] = &[
    "cpu",
    "net",
    "ram_usage_exceeded",
    "insufficient ram",
];

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::RpcConnection(_) | Error::PriceFeed(_)
        )
    }

    /// Check if the upstream rejected the transaction for lack of CPU, NET or RAM
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Error::TransactionSend(msg) | Error::Rpc(msg) => is_resource_message(msg),
            _ => false,
        }
    }
}

/// Match resource exhaustion markers case-insensitively
pub fn is_resource_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    RESOURCE_EXHAUSTION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::Database(format!("Migration failed: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else if e.is_connect() {
            Error::RpcConnection(e.to_string())
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

impl From<teloxide::RequestError> for Error {
    fn from(e: teloxide::RequestError) -> Self {
        Error::Internal(format!("Telegram request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhaustion_detection() {
        let err = Error::TransactionSend(
            "transaction exceeded the current CPU usage limit imposed on the transaction".into(),
        );
        assert!(err.is_resource_exhaustion());

        let err = Error::TransactionSend("insufficient cpu".into());
        assert!(err.is_resource_exhaustion());

        let err = Error::TransactionSend("overdrawn balance".into());
        assert!(!err.is_resource_exhaustion());

        assert!(!Error::WrongPassword.is_resource_exhaustion());
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Rpc("503".into()).is_retryable());
        assert!(Error::PriceFeed("down".into()).is_retryable());
        assert!(!Error::TransactionSend("assertion failure".into()).is_retryable());
        assert!(!Error::SessionExpired.is_retryable());
    }

    #[test]
    fn test_upstream_message_is_verbatim() {
        let err = Error::TransactionSend("assertion failure with message: overdrawn balance".into());
        assert_eq!(err.to_string(), "assertion failure with message: overdrawn balance");
    }
}
