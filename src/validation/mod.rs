/// Account field validation
///
/// Rules are declared statically per field. Only non-empty fields are checked,
/// so a sparsely-populated update payload validates without requiring every
/// field to be present.
use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

/// Account fields that carry validation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Username,
    Name,
    Email,
    Password,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Username => "username",
            Field::Name => "name",
            Field::Email => "email",
            Field::Password => "password",
        }
    }
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: Field,
    pub message: String,
}

/// Character class a field must be made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// `[a-zA-Z0-9_]`
    Handle,
    /// `[a-zA-Z0-9]`
    Alphanumeric,
    /// RFC-shaped address
    Email,
    Any,
}

impl Charset {
    fn accepts(&self, value: &str) -> bool {
        match self {
            Charset::Handle => value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            Charset::Alphanumeric => value.chars().all(|c| c.is_ascii_alphanumeric()),
            Charset::Email => ValidateEmail::validate_email(&value),
            Charset::Any => true,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Charset::Handle => "may only contain letters, digits and underscores",
            Charset::Alphanumeric => "may only contain letters and digits",
            Charset::Email => "must be a valid email address",
            Charset::Any => "",
        }
    }
}

/// A single field rule. Lengths count characters, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: Field,
    pub min: usize,
    pub max: usize,
    pub charset: Charset,
}

/// Rule table for the account entity
pub const ACCOUNT_RULES: &[FieldRule] = &[
    FieldRule { field: Field::Username, min: 3, max: 25, charset: Charset::Handle },
    FieldRule { field: Field::Name, min: 3, max: 20, charset: Charset::Alphanumeric },
    FieldRule { field: Field::Email, min: 6, max: 255, charset: Charset::Email },
    FieldRule { field: Field::Password, min: 3, max: 255, charset: Charset::Any },
];

/// Borrowed view of the validatable account fields
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountFields<'a> {
    pub username: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

impl<'a> AccountFields<'a> {
    fn value(&self, field: Field) -> &'a str {
        match field {
            Field::Username => self.username,
            Field::Name => self.name,
            Field::Email => self.email,
            Field::Password => self.password,
        }
    }
}

impl FieldRule {
    fn check(&self, value: &str) -> Option<FieldViolation> {
        let length = value.chars().count();

        if length < self.min || length > self.max {
            return Some(FieldViolation {
                field: self.field,
                message: format!(
                    "must be between {} and {} characters, got {}",
                    self.min, self.max, length
                ),
            });
        }

        if !self.charset.accepts(value) {
            return Some(FieldViolation {
                field: self.field,
                message: self.charset.describe().to_string(),
            });
        }

        None
    }
}

/// Collect every violation of `rules` among the non-empty fields
pub fn violations(fields: &AccountFields<'_>, rules: &[FieldRule]) -> Vec<FieldViolation> {
    rules
        .iter()
        .filter_map(|rule| {
            let value = fields.value(rule.field);
            if value.is_empty() {
                None
            } else {
                rule.check(value)
            }
        })
        .collect()
}

/// Validate the non-empty account fields against [`ACCOUNT_RULES`]
pub fn validate(fields: &AccountFields<'_>) -> AuthResult<()> {
    let found = violations(fields, ACCOUNT_RULES);

    if found.is_empty() {
        tracing::debug!("Account fields validated");
        Ok(())
    } else {
        tracing::debug!(violations = found.len(), "Account fields rejected");
        Err(AuthError::UserInvalid(found))
    }
}
