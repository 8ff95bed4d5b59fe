/// Account management system
///
/// Handles account creation, authentication, bans, activation and deletion.

mod manager;
mod power;

pub use manager::{AccountManager, ACTIVATION_CODE_LEN};
pub use power::Power;

use crate::db::account::Account;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account as shown to callers outside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccount {
    /// Obfuscated id, decimal string
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub power: Power,
    pub activated: bool,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub seen: Option<DateTime<Utc>>,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct Session {
    pub account: Account,
    /// Signed token with encrypted claims
    pub token: String,
}
