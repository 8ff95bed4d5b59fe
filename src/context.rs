/// Application context and dependency injection
use crate::{
    account::AccountManager,
    config::{EngineConfig, HashingConfig},
    db::{self, sqlite::SqliteUserRepository},
    error::{AuthError, AuthResult},
    obfuscate::IdObfuscator,
    password::{self, PasswordHasher},
    token::TokenIssuer,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services.
///
/// Everything in here is immutable once built.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<EngineConfig>,
    pub account_db: SqlitePool,
    pub repository: Arc<SqliteUserRepository>,
    pub hasher: PasswordHasher,
    pub token_issuer: Arc<TokenIssuer>,
    pub ids: IdObfuscator,
    pub account_manager: Arc<AccountManager>,
}

impl AppContext {
    /// Create a new application context from configuration.
    ///
    /// Calibrates the password cost first, then opens and checks storage.
    pub async fn new(config: EngineConfig) -> AuthResult<Self> {
        config.validate()?;

        let hasher = Self::calibrated_hasher(&config.hashing).await?;

        let account_db = db::create_pool(&config.database.path, config.database.options()).await?;

        Self::assemble(config, hasher, account_db).await
    }

    /// Same wiring over a private in-memory database
    pub async fn in_memory(config: EngineConfig) -> AuthResult<Self> {
        config.validate()?;

        let hasher = Self::calibrated_hasher(&config.hashing).await?;
        let account_db = db::memory_pool().await?;

        Self::assemble(config, hasher, account_db).await
    }

    async fn assemble(
        config: EngineConfig,
        hasher: PasswordHasher,
        account_db: SqlitePool,
    ) -> AuthResult<Self> {
        // Run migrations
        db::run_migrations(&account_db).await?;

        // Test connection
        db::test_connection(&account_db).await?;
        db::verify_schema(&account_db).await?;

        let token_issuer = Arc::new(TokenIssuer::new(&config.token)?);
        let ids = IdObfuscator::new(config.ids.prime, config.ids.xor)?;
        let repository = Arc::new(SqliteUserRepository::new(account_db.clone()));

        let account_manager = Arc::new(AccountManager::new(
            repository.clone(),
            hasher,
            token_issuer.clone(),
            ids,
        ));

        Ok(Self {
            config: Arc::new(config),
            account_db,
            repository,
            hasher,
            token_issuer,
            ids,
            account_manager,
        })
    }

    /// Fixed cost when configured, otherwise a one-time calibration on the
    /// blocking pool
    async fn calibrated_hasher(hashing: &HashingConfig) -> AuthResult<PasswordHasher> {
        let cost = match hashing.cost {
            Some(cost) => {
                tracing::info!(cost, "Using configured password hash cost");
                cost
            }
            None => {
                let start_cost = hashing.start_cost;
                let target = hashing.target();
                tokio::task::spawn_blocking(move || password::calibrate(start_cost, target))
                    .await
                    .map_err(|e| AuthError::Calibration(format!("calibration task failed: {}", e)))??
            }
        };

        Ok(PasswordHasher::new(cost))
    }
}
