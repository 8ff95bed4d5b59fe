/// SQLite implementation of the storage contract
///
/// Uses runtime query building rather than compile-time macros so no
/// DATABASE_URL is needed during compilation.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
    Row, Sqlite, SqlitePool,
};

use super::account::{Account, ActivationCode, Ban, Event};
use super::repository::{Condition, DeletedRows, UserRepository};
use crate::account::Power;
use crate::error::{AuthError, AuthResult};

pub const ACCOUNTS_TABLE: &str = "accounts";
pub const BANS_TABLE: &str = "bans";
pub const ACTIVATION_CODES_TABLE: &str = "activation_codes";
pub const EVENTS_TABLE: &str = "events";

const ACCOUNT_COLUMNS: &str =
    "id, name, username, password, email, deleted, activated, power, created, seen";
const BAN_COLUMNS: &str = "id, account_id, state, temporary, starts, until";

/// Account repository backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteUserRepository {
    db: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    async fn count_by_account(&self, table: &str, account_id: i64) -> AuthResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE account_id = ?1", table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(account_id)
            .fetch_one(&self.db)
            .await?;

        Ok(count as u64)
    }
}

fn bind_condition<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    condition: &'q Condition,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match condition {
        Condition::Id(id) => query.bind(*id),
        Condition::Username(username) => query.bind(username.as_str()),
        Condition::Email(email) => query.bind(email.as_str()),
    }
}

fn account_from_row(row: &SqliteRow) -> AuthResult<Account> {
    let power: i32 = row.try_get("power")?;

    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
        power: Power::from_level(power)?,
        deleted: row.try_get("deleted")?,
        activated: row.try_get("activated")?,
        created: row.try_get("created")?,
        seen: row.try_get("seen")?,
        ban: None,
    })
}

fn ban_from_row(row: &SqliteRow) -> AuthResult<Ban> {
    Ok(Ban {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        state: row.try_get("state")?,
        temporary: row.try_get("temporary")?,
        starts: row.try_get("starts")?,
        until: row.try_get("until")?,
    })
}

/// Translate unique-constraint violations into conflict kinds. The
/// constraint is the authoritative guard; pre-insert existence checks race.
fn map_write_error(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            // SQLite reports "UNIQUE constraint failed: accounts.username"
            let detail = db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db_err.message().to_string());

            if detail.contains("username") {
                return AuthError::UsernameExists;
            }
            if detail.contains("email") {
                return AuthError::EmailExists;
            }
        }
    }

    tracing::error!(error = %err, "Account write failed");
    AuthError::Database(err)
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_account(&self, condition: &Condition) -> AuthResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            ACCOUNT_COLUMNS,
            ACCOUNTS_TABLE,
            condition.column()
        );

        let row = bind_condition(sqlx::query(&sql), condition)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn count_accounts(&self, condition: &Condition) -> AuthResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {} = ?1",
            ACCOUNTS_TABLE,
            condition.column()
        );

        let row = bind_condition(sqlx::query(&sql), condition)
            .fetch_one(&self.db)
            .await?;
        let count: i64 = row.try_get("count")?;

        Ok(count as u64)
    }

    async fn insert_account(&self, account: &Account) -> AuthResult<i64> {
        let result = sqlx::query(
            "INSERT INTO accounts (name, username, password, email, deleted, activated, power, created, seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&account.name)
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(&account.email)
        .bind(account.deleted)
        .bind(account.activated)
        .bind(account.power.level())
        .bind(account.created)
        .bind(account.seen)
        .execute(&self.db)
        .await
        .map_err(map_write_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn update_account(&self, condition: &Condition, account: &Account) -> AuthResult<u64> {
        // An empty hash keeps the stored one
        let sql = format!(
            "UPDATE {} SET name = ?1, username = ?2,
                 password = CASE WHEN ?3 = '' THEN password ELSE ?3 END,
                 email = ?4, deleted = ?5, activated = ?6, power = ?7, seen = ?8
             WHERE {} = ?9",
            ACCOUNTS_TABLE,
            condition.column()
        );

        let query = sqlx::query(&sql)
            .bind(&account.name)
            .bind(&account.username)
            .bind(&account.password_hash)
            .bind(&account.email)
            .bind(account.deleted)
            .bind(account.activated)
            .bind(account.power.level())
            .bind(account.seen);

        let result = bind_condition(query, condition)
            .execute(&self.db)
            .await
            .map_err(map_write_error)?;

        Ok(result.rows_affected())
    }

    async fn list_accounts(&self) -> AuthResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created ASC, id ASC",
            ACCOUNT_COLUMNS, ACCOUNTS_TABLE
        );

        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn touch_seen(&self, account_id: i64, seen: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("UPDATE accounts SET seen = ?1 WHERE id = ?2")
            .bind(seen)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn find_active_ban(&self, account_id: i64) -> AuthResult<Option<Ban>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE account_id = ?1 AND state = 1
             ORDER BY until IS NULL DESC, until DESC, id DESC LIMIT 1",
            BAN_COLUMNS, BANS_TABLE
        );

        let row = sqlx::query(&sql)
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(ban_from_row).transpose()
    }

    async fn insert_ban(&self, ban: &Ban) -> AuthResult<i64> {
        let result = sqlx::query(
            "INSERT INTO bans (account_id, state, temporary, starts, until)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(ban.account_id)
        .bind(ban.state)
        .bind(ban.temporary)
        .bind(ban.starts)
        .bind(ban.until)
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn deactivate_ban(&self, ban_id: i64) -> AuthResult<u64> {
        // Predicate on the current state: racing writers converge on state = 0
        let result = sqlx::query("UPDATE bans SET state = 0 WHERE id = ?1 AND state = 1")
            .bind(ban_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn lift_bans(&self, account_id: i64) -> AuthResult<u64> {
        let result = sqlx::query("UPDATE bans SET state = 0 WHERE account_id = ?1 AND state = 1")
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_bans(&self, account_id: i64) -> AuthResult<u64> {
        self.count_by_account(BANS_TABLE, account_id).await
    }

    async fn insert_activation_code(&self, account_id: i64, code: &str) -> AuthResult<ActivationCode> {
        let result = sqlx::query("INSERT INTO activation_codes (code, account_id) VALUES (?1, ?2)")
            .bind(code)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(ActivationCode {
            id: result.last_insert_rowid(),
            account_id,
            code: code.to_string(),
        })
    }

    async fn count_activation_codes(&self, account_id: i64) -> AuthResult<u64> {
        self.count_by_account(ACTIVATION_CODES_TABLE, account_id).await
    }

    async fn consume_activation_code(&self, account_id: i64, code: &str) -> AuthResult<bool> {
        let mut tx = self.db.begin().await?;

        let matched: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activation_codes WHERE account_id = ?1 AND code = ?2",
        )
        .bind(account_id)
        .bind(code)
        .fetch_one(&mut *tx)
        .await?;

        if matched == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM activation_codes WHERE account_id = ?1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE accounts SET activated = 1, power = MAX(power, ?1) WHERE id = ?2")
            .bind(Power::Normal.level())
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_event(&self, event: &Event) -> AuthResult<i64> {
        let result = sqlx::query(
            "INSERT INTO events (account_id, event, data, ip, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(event.account_id)
        .bind(&event.event)
        .bind(&event.data)
        .bind(&event.ip)
        .bind(event.at)
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn count_events(&self, account_id: i64) -> AuthResult<u64> {
        self.count_by_account(EVENTS_TABLE, account_id).await
    }

    async fn delete_account_cascade(&self, account_id: i64) -> AuthResult<DeletedRows> {
        // Dropping the transaction on an early return rolls everything back
        let mut tx = self.db.begin().await?;

        let accounts = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // Unknown account: leave rows that merely share the id alone
        if accounts == 0 {
            tx.rollback().await?;
            return Ok(DeletedRows::default());
        }

        let mut removed = [0u64; 3];
        for (slot, table) in removed
            .iter_mut()
            .zip([BANS_TABLE, ACTIVATION_CODES_TABLE, EVENTS_TABLE])
        {
            let sql = format!("DELETE FROM {} WHERE account_id = ?1", table);
            *slot = sqlx::query(&sql)
                .bind(account_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;

        let [bans, activation_codes, events] = removed;
        Ok(DeletedRows {
            accounts,
            bans,
            activation_codes,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn repository() -> SqliteUserRepository {
        let pool = db::memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        SqliteUserRepository::new(pool)
    }

    fn account(username: &str, email: &str) -> Account {
        Account {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$2b$04$notarealhashbutnotempty".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();
        assert!(id > 0);

        let by_id = repo.find_account(&Condition::Id(id)).await.unwrap().unwrap();
        assert_eq!(by_id.username, "gopher");
        assert_eq!(by_id.power, Power::None);

        let by_email = repo
            .find_account(&Condition::Email("gopher@ufo.gov".to_string()))
            .await
            .unwrap();
        assert_eq!(by_email.map(|a| a.id), Some(id));

        assert!(repo
            .find_account(&Condition::Username("nobody".to_string()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unique_violations_map_to_conflicts() {
        let repo = repository().await;
        repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();

        let username = repo.insert_account(&account("gopher", "other@ufo.gov")).await;
        assert!(matches!(username, Err(AuthError::UsernameExists)));

        let email = repo.insert_account(&account("other", "gopher@ufo.gov")).await;
        assert!(matches!(email, Err(AuthError::EmailExists)));
    }

    #[tokio::test]
    async fn test_update_unique_violations_map_to_conflicts() {
        let repo = repository().await;
        repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();
        let id = repo.insert_account(&account("other", "other@ufo.gov")).await.unwrap();

        let mut renamed = account("gopher", "other@ufo.gov");
        renamed.id = id;
        let username = repo.update_account(&Condition::Id(id), &renamed).await;
        assert!(matches!(username, Err(AuthError::UsernameExists)));

        let mut moved = account("other", "gopher@ufo.gov");
        moved.id = id;
        let email = repo.update_account(&Condition::Id(id), &moved).await;
        assert!(matches!(email, Err(AuthError::EmailExists)));

        let stored = repo.find_account(&Condition::Id(id)).await.unwrap().unwrap();
        assert_eq!(stored.username, "other");
        assert_eq!(stored.email, "other@ufo.gov");
    }

    #[tokio::test]
    async fn test_update_keeps_hash_when_empty() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();

        let mut changed = repo.find_account(&Condition::Id(id)).await.unwrap().unwrap();
        let original_hash = changed.password_hash.clone();
        changed.password_hash.clear();
        changed.name = "Gopher".to_string();

        let rows = repo.update_account(&Condition::Id(id), &changed).await.unwrap();
        assert_eq!(rows, 1);

        let stored = repo.find_account(&Condition::Id(id)).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, original_hash);
        assert_eq!(stored.name, "Gopher");
    }

    #[tokio::test]
    async fn test_deactivate_ban_is_idempotent() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();

        let ban_id = repo
            .insert_ban(&Ban {
                id: 0,
                account_id: id,
                state: true,
                temporary: false,
                starts: Some(Utc::now()),
                until: None,
            })
            .await
            .unwrap();

        assert!(repo.find_active_ban(id).await.unwrap().is_some());
        assert_eq!(repo.deactivate_ban(ban_id).await.unwrap(), 1);
        assert_eq!(repo.deactivate_ban(ban_id).await.unwrap(), 0);
        assert!(repo.find_active_ban(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_ban_prefers_permanent() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();

        let permanent = repo
            .insert_ban(&Ban {
                id: 0,
                account_id: id,
                state: true,
                temporary: false,
                starts: Some(Utc::now()),
                until: None,
            })
            .await
            .unwrap();
        repo.insert_ban(&Ban {
            id: 0,
            account_id: id,
            state: true,
            temporary: true,
            starts: Some(Utc::now()),
            until: Some(Utc::now() - chrono::Duration::hours(1)),
        })
        .await
        .unwrap();

        let found = repo.find_active_ban(id).await.unwrap().unwrap();
        assert_eq!(found.id, permanent);
        assert!(found.until.is_none());
    }

    #[tokio::test]
    async fn test_temporary_ban_requires_until() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();

        let result = repo
            .insert_ban(&Ban {
                id: 0,
                account_id: id,
                state: true,
                temporary: true,
                starts: Some(Utc::now()),
                until: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cascade_rolls_back_on_failure() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();
        repo.insert_activation_code(id, "code").await.unwrap();

        // Break the last step of the cascade
        sqlx::query("DROP TABLE events")
            .execute(repo.pool())
            .await
            .unwrap();

        assert!(repo.delete_account_cascade(id).await.is_err());

        // Nothing was removed
        assert_eq!(repo.count_accounts(&Condition::Id(id)).await.unwrap(), 1);
        assert_eq!(repo.count_activation_codes(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cascade_for_unknown_account_touches_nothing() {
        let repo = repository().await;
        let orphan = 4242;

        repo.insert_ban(&Ban {
            id: 0,
            account_id: orphan,
            state: true,
            temporary: false,
            starts: Some(Utc::now()),
            until: None,
        })
        .await
        .unwrap();
        repo.insert_activation_code(orphan, "code").await.unwrap();

        let deleted = repo.delete_account_cascade(orphan).await.unwrap();
        assert_eq!(deleted, DeletedRows::default());

        assert_eq!(repo.count_bans(orphan).await.unwrap(), 1);
        assert_eq!(repo.count_activation_codes(orphan).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consume_activation_code() {
        let repo = repository().await;
        let id = repo.insert_account(&account("gopher", "gopher@ufo.gov")).await.unwrap();
        repo.insert_activation_code(id, "right").await.unwrap();

        assert!(!repo.consume_activation_code(id, "wrong").await.unwrap());
        assert_eq!(repo.count_activation_codes(id).await.unwrap(), 1);

        assert!(repo.consume_activation_code(id, "right").await.unwrap());
        assert_eq!(repo.count_activation_codes(id).await.unwrap(), 0);

        let stored = repo.find_account(&Condition::Id(id)).await.unwrap().unwrap();
        assert!(stored.activated);
        assert_eq!(stored.power, Power::Normal);
    }
}
