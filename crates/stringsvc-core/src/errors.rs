/// Business-level errors raised by the string operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("empty string")]
    EmptyInput,
}

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed credential entry `{0}`, expected `principal:secret`")]
    MalformedCredential(String),

    #[error("credential store is empty")]
    NoCredentials,
}
