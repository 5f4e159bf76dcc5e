use thiserror::Error;

/// Errors raised while building or validating adapter configuration.
///
/// These always surface before any query reaches the engine.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
