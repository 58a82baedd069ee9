//! Errors raised by the authentication and authorization flows.
//!
//! Every variant maps to exactly one HTTP outcome. Messages are safe to show to clients:
//! upstream failures and API key rejections never say which internal check failed.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Why a session token could not be used.
///
/// Never surfaced to clients; the orchestrator turns it into a login redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInvalidReason {
    NoSession,
    Expired,
    RefreshFailed,
}

impl SessionInvalidReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::Expired => "EXPIRED",
            Self::RefreshFailed => "REFRESH_FAILED",
        }
    }
}

impl fmt::Display for SessionInvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for all authentication and authorization operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Authorization session expired or was already used, please start the sign-in again")]
    MissingVerifier,

    #[error("Authentication failed")]
    UpstreamAuthFailure,

    #[error("Registration required")]
    RegistrationRequired { registration_url: String },

    #[error("This account has been deleted")]
    AccountDeleted,

    #[error("Session invalid: {0}")]
    SessionInvalid(SessionInvalidReason),

    #[error("Invalid or expired API key")]
    ApiKeyInvalid,

    #[error("Authentication required")]
    Unauthenticated,
}

impl AuthError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::MissingCode
            | Self::MissingVerifier
            | Self::UpstreamAuthFailure => StatusCode::BAD_REQUEST,
            Self::RegistrationRequired { .. } | Self::AccountDeleted => StatusCode::FORBIDDEN,
            Self::SessionInvalid(_) | Self::ApiKeyInvalid | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::MissingCode => "MISSING_CODE",
            Self::MissingVerifier => "MISSING_VERIFIER",
            Self::UpstreamAuthFailure => "AUTHENTICATION_FAILED",
            Self::RegistrationRequired { .. } => "REGISTRATION_REQUIRED",
            Self::AccountDeleted => "ACCOUNT_DELETED",
            Self::SessionInvalid(_) | Self::Unauthenticated => "UNAUTHENTICATED",
            Self::ApiKeyInvalid => "INVALID_API_KEY",
        }
    }
}
