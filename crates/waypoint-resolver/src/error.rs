//! Resolver error types.

use thiserror::Error;
use waypoint_core::RegistryError;

use crate::endpoint::MalformedRecordError;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Registry unavailable for service {service}: {source}")]
    RegistryUnavailable {
        service: String,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Resolver stopped")]
    Stopped,
}

impl ResolverError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::MalformedRecord(_) => "malformed_record",
            Self::InvalidTarget(_) => "invalid_target",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a later attempt could succeed without operator action.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable { .. })
    }
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types() {
        let unavailable = ResolverError::RegistryUnavailable {
            service: "orders".into(),
            source: RegistryError::Timeout,
        };
        assert_eq!(unavailable.error_type(), "registry_unavailable");
        assert!(unavailable.is_transient());

        let malformed =
            ResolverError::from(MalformedRecordError::new("bad", "missing port separator"));
        assert_eq!(malformed.error_type(), "malformed_record");
        assert!(!malformed.is_transient());

        assert_eq!(ResolverError::Stopped.error_type(), "stopped");
    }

    #[test]
    fn messages_name_the_service() {
        let err = ResolverError::RegistryUnavailable {
            service: "orders".into(),
            source: RegistryError::Unavailable("connection refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "Registry unavailable for service orders: Registry unavailable: connection refused"
        );
    }
}
