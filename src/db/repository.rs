/// Storage contract consumed by the account manager
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::account::{Account, ActivationCode, Ban, Event};
use crate::error::{AuthError, AuthResult};

/// Row selector for account lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Id(i64),
    Username(String),
    Email(String),
}

impl Condition {
    /// Pick the first identifying field set on `account`: id, then username,
    /// then email.
    pub fn from_account(account: &Account) -> AuthResult<Self> {
        if account.id != 0 {
            Ok(Condition::Id(account.id))
        } else if !account.username.is_empty() {
            Ok(Condition::Username(account.username.clone()))
        } else if !account.email.is_empty() {
            Ok(Condition::Email(account.email.clone()))
        } else {
            Err(AuthError::NotEnoughInfo)
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Condition::Id(_) => "id",
            Condition::Username(_) => "username",
            Condition::Email(_) => "email",
        }
    }
}

/// Rows removed by a cascading account delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedRows {
    pub accounts: u64,
    pub bans: u64,
    pub activation_codes: u64,
    pub events: u64,
}

/// Persistence for accounts and the records keyed by them.
///
/// Implementations must enforce username/email uniqueness themselves and
/// report violations as [`AuthError::UsernameExists`] /
/// [`AuthError::EmailExists`]. Every call is expected to be bounded by a
/// storage timeout and to surface it as an error.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_account(&self, condition: &Condition) -> AuthResult<Option<Account>>;

    async fn count_accounts(&self, condition: &Condition) -> AuthResult<u64>;

    /// Insert and return the assigned id
    async fn insert_account(&self, account: &Account) -> AuthResult<i64>;

    /// Update every mutable column except an empty password; returns rows changed
    async fn update_account(&self, condition: &Condition, account: &Account) -> AuthResult<u64>;

    /// All accounts, oldest first
    async fn list_accounts(&self) -> AuthResult<Vec<Account>>;

    async fn touch_seen(&self, account_id: i64, seen: DateTime<Utc>) -> AuthResult<()>;

    /// Active ban that outlasts the others (permanent first), if any
    async fn find_active_ban(&self, account_id: i64) -> AuthResult<Option<Ban>>;

    async fn insert_ban(&self, ban: &Ban) -> AuthResult<i64>;

    /// Clear the active flag of one ban. Idempotent; returns rows changed.
    async fn deactivate_ban(&self, ban_id: i64) -> AuthResult<u64>;

    /// Clear every active ban of an account; returns rows changed
    async fn lift_bans(&self, account_id: i64) -> AuthResult<u64>;

    async fn count_bans(&self, account_id: i64) -> AuthResult<u64>;

    async fn insert_activation_code(&self, account_id: i64, code: &str) -> AuthResult<ActivationCode>;

    async fn count_activation_codes(&self, account_id: i64) -> AuthResult<u64>;

    /// Atomically delete the matching code and mark the account activated.
    /// Returns false when no code matched.
    async fn consume_activation_code(&self, account_id: i64, code: &str) -> AuthResult<bool>;

    async fn insert_event(&self, event: &Event) -> AuthResult<i64>;

    async fn count_events(&self, account_id: i64) -> AuthResult<u64>;

    /// Delete the account with its bans, activation codes and events as one
    /// unit. Either every row goes or none does.
    async fn delete_account_cascade(&self, account_id: i64) -> AuthResult<DeletedRows>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_precedence() {
        let mut account = Account {
            id: 7,
            username: "gopher".to_string(),
            email: "gopher@ufo.gov".to_string(),
            ..Default::default()
        };
        assert_eq!(Condition::from_account(&account).unwrap(), Condition::Id(7));

        account.id = 0;
        assert_eq!(
            Condition::from_account(&account).unwrap(),
            Condition::Username("gopher".to_string())
        );

        account.username.clear();
        assert_eq!(
            Condition::from_account(&account).unwrap(),
            Condition::Email("gopher@ufo.gov".to_string())
        );

        account.email.clear();
        assert!(matches!(
            Condition::from_account(&account),
            Err(AuthError::NotEnoughInfo)
        ));
    }
}
