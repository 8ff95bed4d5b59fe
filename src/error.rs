/// Unified error types for the authentication engine
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::{Field, FieldViolation};

/// Stable numeric error identifier.
///
/// Values are fixed; new kinds get new numbers, existing numbers never move.
pub type ErrorId = u16;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum AuthError {
    /// Required identifying field(s) missing
    #[error("Not enough information to identify the account")]
    NotEnoughInfo,

    /// One or more field rules failed
    #[error("Invalid account data: {}", describe_violations(.0))]
    UserInvalid(Vec<FieldViolation>),

    #[error("Username already exists")]
    UsernameExists,

    #[error("Email already exists")]
    EmailExists,

    #[error("Error: the user specified was not found")]
    UserNotFound,

    #[error("Password cannot be empty")]
    EmptyPassword,

    #[error("There is no password to compare")]
    NoPasswordToCompare,

    /// Wrong credentials
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Account is banned")]
    Banned,

    #[error("Account does not have enough power")]
    InsufficientPower,

    #[error("Invalid ban: {0}")]
    InvalidBan(String),

    #[error("Invalid activation code")]
    InvalidActivationCode,

    /// Token header algorithm differs from the configured one
    #[error("Invalid token signing method")]
    InvalidSigningMethod,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Failed to decrypt token claim")]
    DecryptionFailed,

    /// Password cost calibration failed (fatal at startup)
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Invalid or missing configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema missing or migration failed (fatal at startup)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Anything else, wrapped with the underlying message
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Stable numeric id a caller can branch on.
    pub fn id(&self) -> ErrorId {
        match self {
            AuthError::UserInvalid(violations) => match violations.first().map(|v| v.field) {
                Some(Field::Username) => 1,
                Some(Field::Email) => 2,
                Some(Field::Password) => 3,
                Some(Field::Name) | None => 98,
            },
            AuthError::UsernameExists => 4,
            AuthError::EmailExists => 5,
            AuthError::UserNotFound => 6,
            AuthError::NotEnoughInfo => 7,
            AuthError::Banned => 8,
            AuthError::InsufficientPower => 9,
            AuthError::InvalidSigningMethod => 10,
            AuthError::Expired => 11,
            AuthError::NotYetValid => 12,
            AuthError::Malformed(_) => 13,
            AuthError::DecryptionFailed => 14,
            AuthError::EmptyPassword => 15,
            AuthError::NoPasswordToCompare => 16,
            AuthError::InvalidBan(_) => 17,
            AuthError::InvalidSignature => 18,
            AuthError::InvalidActivationCode => 19,
            AuthError::Schema(_) => 94,
            AuthError::Config(_) => 95,
            AuthError::Calibration(_) => 96,
            AuthError::Unauthorized => 97,
            AuthError::Database(_) | AuthError::Unknown(_) => 99,
        }
    }

    /// Startup-only failures that leave the process unable to serve.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::Calibration(_) | AuthError::Config(_) | AuthError::Schema(_)
        )
    }

    /// Serializable body for callers that ship errors over a wire.
    pub fn body(&self) -> ErrorResponse {
        let message = match self {
            // Don't leak storage details
            AuthError::Database(_) => "Unknown error".to_string(),
            _ => self.to_string(),
        };

        ErrorResponse {
            success: false,
            error: ErrorDetail {
                id: self.id(),
                message,
            },
        }
    }
}

/// Error response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub id: ErrorId,
    pub message: String,
}

impl From<sqlx::migrate::MigrateError> for AuthError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AuthError::Schema(err.to_string())
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field.as_str(), v.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for engine operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(AuthError::UsernameExists.id(), 4);
        assert_eq!(AuthError::EmailExists.id(), 5);
        assert_eq!(AuthError::UserNotFound.id(), 6);
        assert_eq!(AuthError::NotEnoughInfo.id(), 7);
        assert_eq!(AuthError::InvalidSigningMethod.id(), 10);
        assert_eq!(AuthError::Unknown("boom".into()).id(), 99);
    }

    #[test]
    fn test_user_invalid_id_follows_first_field() {
        let err = AuthError::UserInvalid(vec![FieldViolation {
            field: Field::Email,
            message: "must be a valid email address".to_string(),
        }]);
        assert_eq!(err.id(), 2);
        assert!(err.to_string().contains("email"));

        assert_eq!(AuthError::UserInvalid(Vec::new()).id(), 98);
    }

    #[test]
    fn test_body_shape() {
        let body = AuthError::UserNotFound.body();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["id"], 6);
        assert_eq!(json["error"]["message"], "Error: the user specified was not found");
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(AuthError::Calibration("x".into()).is_fatal());
        assert!(AuthError::Schema("x".into()).is_fatal());
        assert!(!AuthError::Expired.is_fatal());
    }
}
