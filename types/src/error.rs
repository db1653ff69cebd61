//! Error taxonomy shared by the verifier, the REST client and the query cache.

use thiserror::Error;

/// Failure of a call against the backend.
///
/// `Clone` because one in-flight result is handed to every consumer waiting
/// on the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Credential absent, expired, or rejected.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// The request could not complete (connect, timeout, reset).
    #[error("network error: {message}")]
    Network { message: String },
    /// 4xx other than 401.
    #[error("request failed ({status}): {message}")]
    Client { status: u16, message: String },
    /// 5xx.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// The response arrived but could not be understood.
    #[error("invalid response: {message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized { message },
            400..=499 => Self::Client { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Decode {
                message: format!("unexpected status {status}: {message}"),
            },
        }
    }

    /// HTTP-style status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Network { .. } | Self::Decode { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    /// Errors worth retrying: the same request may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Server { .. })
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_classification() {
        assert!(matches!(
            ApiError::from_status(401, "expired"),
            ApiError::Unauthorized { .. }
        ));
        assert!(matches!(
            ApiError::from_status(404, "missing"),
            ApiError::Client { status: 404, .. }
        ));
        assert!(matches!(
            ApiError::from_status(422, "bad field"),
            ApiError::Client { status: 422, .. }
        ));
        assert!(matches!(
            ApiError::from_status(502, "bad gateway"),
            ApiError::Server { status: 502, .. }
        ));
        assert!(matches!(
            ApiError::from_status(302, "moved"),
            ApiError::Decode { .. }
        ));
    }

    #[test]
    fn client_errors_are_not_transient() {
        for status in [400, 401, 403, 404, 409, 429, 499] {
            let err = ApiError::from_status(status, "");
            assert!(err.is_client_error(), "{status} should be a client error");
            assert!(!err.is_transient(), "{status} should not be transient");
        }
    }

    #[test]
    fn server_and_network_errors_are_transient() {
        assert!(ApiError::from_status(500, "").is_transient());
        assert!(ApiError::from_status(503, "").is_transient());
        assert!(ApiError::network("connection reset").is_transient());
        assert!(!ApiError::decode("not json").is_transient());
    }

    #[test]
    fn status_accessor() {
        assert_eq!(ApiError::unauthorized("x").status(), Some(401));
        assert_eq!(ApiError::from_status(418, "teapot").status(), Some(418));
        assert_eq!(ApiError::network("down").status(), None);
    }
}
