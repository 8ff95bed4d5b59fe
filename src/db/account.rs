/// Account database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Power;
use crate::validation::AccountFields;

/// Account record in the database
///
/// `id == 0` means the account has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub email: String,
    /// bcrypt hash, never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub power: Power,
    pub deleted: bool,
    pub activated: bool,
    pub created: DateTime<Utc>,
    pub seen: Option<DateTime<Utc>>,
    /// Ban overlay cached by the last ban evaluation, not a column
    #[serde(skip)]
    pub ban: Option<Ban>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            username: String::new(),
            email: String::new(),
            password_hash: String::new(),
            power: Power::None,
            deleted: false,
            activated: false,
            created: Utc::now(),
            seen: None,
            ban: None,
        }
    }
}

impl Account {
    /// Lookup stub carrying only an id
    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Lookup stub carrying only a username
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Lookup stub carrying only an email
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    /// Identifying fields only; the hash is not a validatable password
    pub fn fields(&self) -> AccountFields<'_> {
        AccountFields {
            username: &self.username,
            name: &self.name,
            email: &self.email,
            password: "",
        }
    }
}

/// Account creation payload with a plaintext password
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl NewAccount {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn fields(&self) -> AccountFields<'_> {
        AccountFields {
            username: &self.username,
            name: &self.name,
            email: &self.email,
            password: &self.password,
        }
    }
}

/// Ban record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub id: i64,
    pub account_id: i64,
    /// Active flag
    pub state: bool,
    pub temporary: bool,
    pub starts: Option<DateTime<Utc>>,
    /// Expiry of a temporary ban; `None` on permanent bans
    pub until: Option<DateTime<Utc>>,
}

impl Ban {
    /// Active and not past its expiry
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.state && self.until.map_or(true, |until| until > now)
    }

    /// Active but past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state && self.until.is_some_and(|until| until <= now)
    }
}

/// Activation code record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCode {
    pub id: i64,
    pub account_id: i64,
    pub code: String,
}

/// Account event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub account_id: i64,
    pub event: String,
    pub data: Option<String>,
    pub ip: String,
    pub at: DateTime<Utc>,
}
