//! Configuration error model.

use thiserror::Error;

use crate::value::ScalarKind;

/// Result type used by configuration-time APIs.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-time error.
///
/// These are raised while sagas are registered or settings are loaded, never as
/// a consequence of the contents of an individual message. The enum is `Clone`
/// so a cached build result can be handed to every caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A correlation rule points at a path the saga data does not expose.
    #[error("saga data '{data_type}' has no correlatable property '{property}'")]
    UnknownProperty { data_type: String, property: String },

    /// A correlation rule extracts a value that can never be converted to the property's type.
    #[error("property '{property}' of saga data '{data_type}' cannot be correlated with a {kind} value")]
    DisallowedType {
        data_type: String,
        property: String,
        kind: String,
    },

    /// A saga was asked to correlate a message type it declares no rule for.
    #[error("saga '{saga_type}' has no correlation rule for message type '{message_type}'")]
    NoCorrelation {
        saga_type: String,
        message_type: String,
    },

    /// Two different saga implementations registered under the same name.
    #[error("saga type '{saga_type}' is already registered with data type '{existing}'")]
    DuplicateSagaType { saga_type: String, existing: String },

    /// A setting could not be parsed or was out of range.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ConfigError {
    pub fn unknown_property(data_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            data_type: data_type.into(),
            property: property.into(),
        }
    }

    pub fn disallowed_type(
        data_type: impl Into<String>,
        property: impl Into<String>,
        kind: ScalarKind,
    ) -> Self {
        Self::DisallowedType {
            data_type: data_type.into(),
            property: property.into(),
            kind: kind.to_string(),
        }
    }

    pub fn no_correlation(saga_type: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::NoCorrelation {
            saga_type: saga_type.into(),
            message_type: message_type.into(),
        }
    }

    pub fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
