/// Account manager implementation
///
/// Owns the account state machine: creation, lookup, updates, bans,
/// activation, authentication and deletion. Storage goes through the
/// [`UserRepository`] handle so the manager never builds SQL itself.
use crate::{
    account::{Power, PublicAccount, Session},
    db::{
        account::{Account, ActivationCode, Ban, Event, NewAccount},
        repository::{Condition, DeletedRows, UserRepository},
    },
    error::{AuthError, AuthResult},
    obfuscate::IdObfuscator,
    password::PasswordHasher,
    token::TokenIssuer,
    validation::{self, AccountFields},
};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;

/// Length of generated activation codes
pub const ACTIVATION_CODE_LEN: usize = 32;

/// Account manager service
#[derive(Clone)]
pub struct AccountManager {
    repository: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    tokens: Arc<TokenIssuer>,
    ids: IdObfuscator,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        repository: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        tokens: Arc<TokenIssuer>,
        ids: IdObfuscator,
    ) -> Self {
        Self {
            repository,
            hasher,
            tokens,
            ids,
        }
    }

    pub fn repository(&self) -> &Arc<dyn UserRepository> {
        &self.repository
    }

    pub fn hasher(&self) -> PasswordHasher {
        self.hasher
    }

    /// Create a new account
    pub async fn create(&self, new: NewAccount) -> AuthResult<Account> {
        if new.username.is_empty() || new.email.is_empty() || new.password.is_empty() {
            tracing::warn!(username = %new.username, "Account creation without enough info");
            return Err(AuthError::NotEnoughInfo);
        }

        validation::validate(&new.fields())?;

        // Fast path; the unique constraints catch whatever races past these
        if self
            .exists_with_condition(&Condition::Username(new.username.clone()))
            .await?
        {
            tracing::debug!(username = %new.username, "Username taken");
            return Err(AuthError::UsernameExists);
        }

        if self
            .exists_with_condition(&Condition::Email(new.email.clone()))
            .await?
        {
            tracing::debug!(email = %new.email, "Email taken");
            return Err(AuthError::EmailExists);
        }

        let password_hash = self.hasher.hash_blocking(new.password).await?;

        let mut account = Account {
            name: new.name,
            username: new.username,
            email: new.email,
            password_hash,
            power: Power::None,
            activated: false,
            deleted: false,
            created: Utc::now(),
            ..Default::default()
        };

        account.id = self.repository.insert_account(&account).await?;

        tracing::info!(id = account.id, username = %account.username, "Account created");
        Ok(account)
    }

    /// Find using the first identifying field set on `account`
    pub async fn find(&self, account: &Account) -> AuthResult<Account> {
        let condition = Condition::from_account(account)?;
        self.find_with_condition(&condition).await
    }

    /// Find by an explicit condition; the ban overlay is evaluated before
    /// returning
    pub async fn find_with_condition(&self, condition: &Condition) -> AuthResult<Account> {
        validate_condition(condition)?;

        let mut account = self
            .repository
            .find_account(condition)
            .await?
            .ok_or_else(|| {
                tracing::debug!(condition = ?condition, "Account not found");
                AuthError::UserNotFound
            })?;

        self.is_banned(&mut account).await?;
        Ok(account)
    }

    /// Persist every mutable field; an empty password hash keeps the stored one
    pub async fn save(&self, account: &Account) -> AuthResult<()> {
        let condition = Condition::from_account(account)?;
        self.save_with_condition(&condition, account).await
    }

    pub async fn save_with_condition(&self, condition: &Condition, account: &Account) -> AuthResult<()> {
        validation::validate(&account.fields())?;

        let updated = self.repository.update_account(condition, account).await?;
        if updated == 0 {
            tracing::debug!(condition = ?condition, "Nothing to save");
            return Err(AuthError::UserNotFound);
        }

        tracing::debug!(condition = ?condition, "Account saved");
        Ok(())
    }

    pub async fn exists(&self, account: &Account) -> AuthResult<bool> {
        let condition = Condition::from_account(account)?;
        self.exists_with_condition(&condition).await
    }

    pub async fn exists_with_condition(&self, condition: &Condition) -> AuthResult<bool> {
        Ok(self.repository.count_accounts(condition).await? > 0)
    }

    /// Evaluate the ban overlay.
    ///
    /// An active ban past its expiry is cleared in storage on the way out,
    /// so expiry needs no scheduler. The clear is a predicate update and
    /// racing callers converge. Clearing one expired ban moves on to the
    /// next active one, so an older permanent ban still holds.
    pub async fn is_banned(&self, account: &mut Account) -> AuthResult<bool> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        let now = Utc::now();
        if account.ban.as_ref().is_some_and(|ban| ban.is_in_force(now)) {
            return Ok(true);
        }

        let mut cleared = None;
        // Each pass deactivates a row, so this ends
        while let Some(mut ban) = self.repository.find_active_ban(account.id).await? {
            if ban.is_in_force(now) {
                account.ban = Some(ban);
                return Ok(true);
            }

            self.repository.deactivate_ban(ban.id).await?;
            ban.state = false;
            tracing::info!(account_id = account.id, ban_id = ban.id, "Expired ban cleared");
            cleared = Some(ban);
        }

        account.ban = cleared;
        Ok(false)
    }

    /// Ban an account. Temporary bans need an expiry; permanent bans ignore it.
    pub async fn ban(
        &self,
        account: &Account,
        temporary: bool,
        until: Option<DateTime<Utc>>,
    ) -> AuthResult<Ban> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        if temporary && until.is_none() {
            return Err(AuthError::InvalidBan(
                "a temporary ban needs an expiry".to_string(),
            ));
        }

        let mut ban = Ban {
            id: 0,
            account_id: account.id,
            state: true,
            temporary,
            starts: Some(Utc::now()),
            until: if temporary { until } else { None },
        };

        ban.id = self.repository.insert_ban(&ban).await?;

        tracing::info!(
            account_id = account.id,
            ban_id = ban.id,
            temporary,
            until = ?ban.until,
            "Account banned"
        );
        Ok(ban)
    }

    /// Clear every active ban; returns how many were cleared
    pub async fn lift_ban(&self, account: &mut Account) -> AuthResult<u64> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        let lifted = self.repository.lift_bans(account.id).await?;
        account.ban = None;

        tracing::info!(account_id = account.id, lifted, "Bans lifted");
        Ok(lifted)
    }

    /// Flag as deleted and deactivate; the row stays
    pub async fn soft_delete(&self, account: &mut Account) -> AuthResult<()> {
        account.deleted = true;
        account.activated = false;
        self.save(account).await?;

        tracing::info!(id = account.id, "Account soft deleted");
        Ok(())
    }

    /// Remove the account with its bans, activation codes and events
    pub async fn hard_delete(&self, account: &Account) -> AuthResult<DeletedRows> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        let deleted = self.repository.delete_account_cascade(account.id).await?;
        if deleted.accounts == 0 {
            return Err(AuthError::UserNotFound);
        }

        tracing::info!(
            id = account.id,
            bans = deleted.bans,
            activation_codes = deleted.activation_codes,
            events = deleted.events,
            "Account hard deleted"
        );
        Ok(deleted)
    }

    /// Log in by username or email (anything containing `@` is an email)
    pub async fn authenticate(&self, identifier: &str, password: &str) -> AuthResult<Session> {
        if identifier.is_empty() || password.is_empty() {
            return Err(AuthError::NotEnoughInfo);
        }

        validation::validate(&AccountFields {
            password,
            ..Default::default()
        })?;

        let condition = if identifier.contains('@') {
            Condition::Email(identifier.to_string())
        } else {
            Condition::Username(identifier.to_string())
        };

        let mut account = self.find_with_condition(&condition).await?;

        if account.deleted {
            tracing::debug!(id = account.id, "Login attempt on a deleted account");
            return Err(AuthError::UserNotFound);
        }

        // Evaluated by find, answered from the cache
        if self.is_banned(&mut account).await? {
            tracing::warn!(id = account.id, "Login attempt on a banned account");
            return Err(AuthError::Banned);
        }

        self.compare_password(&account, password).await?;

        let seen = Utc::now();
        self.repository.touch_seen(account.id, seen).await?;
        account.seen = Some(seen);

        let token = self.tokens.create_token(account.id, account.power, true)?;

        tracing::info!(id = account.id, "Account authenticated");
        Ok(Session { account, token })
    }

    /// `Unauthorized` unless `password` matches the stored hash
    pub async fn compare_password(&self, account: &Account, password: &str) -> AuthResult<()> {
        if account.password_hash.is_empty() || password.is_empty() {
            return Err(AuthError::NoPasswordToCompare);
        }

        let matches = self
            .hasher
            .verify_blocking(account.password_hash.clone(), password.to_string())
            .await?;

        if !matches {
            tracing::warn!(id = account.id, "Password mismatch");
            return Err(AuthError::Unauthorized);
        }

        Ok(())
    }

    pub async fn change_password(&self, account: &mut Account, new_password: &str) -> AuthResult<()> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        validation::validate(&AccountFields {
            password: new_password,
            ..Default::default()
        })?;

        let hash = self.hasher.hash_blocking(new_password.to_string()).await?;
        account.password_hash = hash;
        self.save_with_condition(&Condition::Id(account.id), account).await?;

        tracing::info!(id = account.id, "Password changed");
        Ok(())
    }

    /// Generate and store a fresh activation code
    pub async fn issue_activation_code(&self, account: &Account) -> AuthResult<ActivationCode> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ACTIVATION_CODE_LEN)
            .map(char::from)
            .collect();

        let stored = self
            .repository
            .insert_activation_code(account.id, &code)
            .await?;

        tracing::debug!(account_id = account.id, "Activation code issued");
        Ok(stored)
    }

    /// Consume `code`, mark the account activated and raise `None` to `Normal`
    pub async fn activate(&self, account: &mut Account, code: &str) -> AuthResult<()> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        if code.is_empty() || !self.repository.consume_activation_code(account.id, code).await? {
            tracing::warn!(account_id = account.id, "Invalid activation code");
            return Err(AuthError::InvalidActivationCode);
        }

        account.activated = true;
        account.power = account.power.max(Power::Normal);

        tracing::info!(account_id = account.id, "Account activated");
        Ok(())
    }

    /// Append to the account's event log
    pub async fn record_event(
        &self,
        account: &Account,
        event: &str,
        data: Option<String>,
        ip: &str,
    ) -> AuthResult<Event> {
        if !account.is_persisted() {
            return Err(AuthError::NotEnoughInfo);
        }

        let mut record = Event {
            id: 0,
            account_id: account.id,
            event: event.to_string(),
            data,
            ip: ip.to_string(),
            at: Utc::now(),
        };
        record.id = self.repository.insert_event(&record).await?;

        tracing::debug!(account_id = account.id, event, "Event recorded");
        Ok(record)
    }

    /// All accounts, oldest first
    pub async fn list_accounts(&self) -> AuthResult<Vec<Account>> {
        self.repository.list_accounts().await
    }

    pub fn require_power(&self, account: &Account, required: Power) -> AuthResult<()> {
        if account.power.can_act_as(required) {
            Ok(())
        } else {
            tracing::warn!(
                id = account.id,
                power = account.power.as_str(),
                required = required.as_str(),
                "Insufficient power"
            );
            Err(AuthError::InsufficientPower)
        }
    }

    /// Wire representation with the id obfuscated
    pub fn public_view(&self, account: &Account) -> PublicAccount {
        PublicAccount {
            id: self.ids.obfuscate_str(account.id),
            name: account.name.clone(),
            username: account.username.clone(),
            email: account.email.clone(),
            power: account.power,
            activated: account.activated,
            deleted: account.deleted,
            created: account.created,
            seen: account.seen,
        }
    }

    /// Row id behind a public id
    pub fn id_from_public(&self, public: &str) -> AuthResult<i64> {
        self.ids.reveal_str(public)
    }
}

fn validate_condition(condition: &Condition) -> AuthResult<()> {
    match condition {
        Condition::Id(id) if *id <= 0 => Err(AuthError::NotEnoughInfo),
        Condition::Id(_) => Ok(()),
        Condition::Username(username) => validation::validate(&AccountFields {
            username,
            ..Default::default()
        }),
        Condition::Email(email) => validation::validate(&AccountFields {
            email,
            ..Default::default()
        }),
    }
}
