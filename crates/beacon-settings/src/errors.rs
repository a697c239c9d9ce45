//! Settings error types.

use beacon_core::NegotiationError;
use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The protocol list is unusable.
    #[error("invalid protocol list: {0}")]
    Protocols(#[from] NegotiationError),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("beatIntervalMs must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid settings value: beatIntervalMs must be > 0"
        );
    }

    #[test]
    fn protocol_error_from_conversion() {
        let err: SettingsError = NegotiationError::EmptyTag.into();
        assert!(matches!(err, SettingsError::Protocols(_)));
        assert!(err.to_string().contains("must not be empty"));
    }
}
