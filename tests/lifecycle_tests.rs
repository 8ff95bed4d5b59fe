/// End-to-end account lifecycle tests against file-backed and in-memory
/// SQLite databases

use authed::{
    db::repository::UserRepository, Account, AppContext, AuthError, EngineConfig, NewAccount, Power,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

const SECRET: &str = "an-hmac-secret-that-is-long-enough-for-tests";
const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::with_secrets(SECRET, KEY);
    config.hashing.cost = Some(4);
    config
}

async fn memory_context() -> AppContext {
    AppContext::in_memory(test_config()).await.unwrap()
}

async fn file_context() -> (AppContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.database.path = dir.path().join("authed.sqlite");

    let ctx = AppContext::new(config).await.unwrap();
    (ctx, dir)
}

async fn create_gopher(ctx: &AppContext) -> Account {
    ctx.account_manager
        .create(NewAccount::new("gopher", "gopher@ufo.gov", "wood"))
        .await
        .unwrap()
}

#[tokio::test]
async fn create_then_conflict_on_username() {
    let ctx = memory_context().await;

    let account = create_gopher(&ctx).await;
    assert!(account.id > 0);

    let result = ctx
        .account_manager
        .create(NewAccount::new("gopher", "elsewhere@ufo.gov", "wood"))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::UsernameExists));
    assert_eq!(err.id(), 4);
}

#[tokio::test]
async fn expired_ban_reads_as_not_banned_twice() {
    let ctx = memory_context().await;
    let account = create_gopher(&ctx).await;

    ctx.account_manager
        .ban(&account, true, Some(Utc::now() - Duration::minutes(1)))
        .await
        .unwrap();

    for _ in 0..2 {
        let mut lookup = Account::with_id(account.id);
        let banned = ctx.account_manager.is_banned(&mut lookup).await.unwrap();
        assert!(!banned);
    }
}

#[tokio::test]
async fn encrypted_token_round_trip() {
    let ctx = memory_context().await;
    let issuer = &ctx.token_issuer;

    let token = issuer.create_token(42, Power::Normal, true).unwrap();
    let claims = issuer.parse(&token).unwrap();

    assert_eq!(issuer.decrypt_subject_id(&claims).unwrap(), 42);
    assert_eq!(issuer.decrypt_power(&claims).unwrap(), Power::Normal);
}

#[tokio::test]
async fn session_token_identifies_the_account() {
    let ctx = memory_context().await;
    let account = create_gopher(&ctx).await;

    let session = ctx
        .account_manager
        .authenticate("gopher@ufo.gov", "wood")
        .await
        .unwrap();

    let claims = ctx.token_issuer.parse(&session.token).unwrap();
    assert_eq!(ctx.token_issuer.decrypt_subject_id(&claims).unwrap(), account.id);
    assert_eq!(ctx.token_issuer.decrypt_power(&claims).unwrap(), Power::None);
    assert!(!claims.will_expire(Utc::now()));
}

#[tokio::test]
async fn soft_then_hard_delete() {
    let ctx = memory_context().await;
    let manager = &ctx.account_manager;
    let mut account = create_gopher(&ctx).await;

    manager.issue_activation_code(&account).await.unwrap();
    manager
        .ban(&account, true, Some(Utc::now() + Duration::hours(1)))
        .await
        .unwrap();
    manager
        .record_event(&account, "login", Some("{\"ok\":true}".to_string()), "127.0.0.1")
        .await
        .unwrap();

    manager.soft_delete(&mut account).await.unwrap();
    assert!(manager.exists(&Account::with_id(account.id)).await.unwrap());

    let stored = manager.find(&Account::with_id(account.id)).await.unwrap();
    assert!(stored.deleted);
    assert!(!stored.activated);

    let removed = manager.hard_delete(&account).await.unwrap();
    assert_eq!(removed.accounts, 1);
    assert_eq!(removed.bans, 1);
    assert_eq!(removed.activation_codes, 1);
    assert_eq!(removed.events, 1);

    assert!(!manager.exists(&Account::with_id(account.id)).await.unwrap());

    let repository = &ctx.repository;
    assert_eq!(repository.count_bans(account.id).await.unwrap(), 0);
    assert_eq!(repository.count_activation_codes(account.id).await.unwrap(), 0);
    assert_eq!(repository.count_events(account.id).await.unwrap(), 0);

    let again = manager.hard_delete(&account).await;
    assert!(matches!(again, Err(AuthError::UserNotFound)));
}

#[tokio::test]
async fn full_activation_flow() {
    let ctx = memory_context().await;
    let manager = &ctx.account_manager;
    let mut account = create_gopher(&ctx).await;

    let code = manager.issue_activation_code(&account).await.unwrap();
    manager.activate(&mut account, &code.code).await.unwrap();

    let session = manager.authenticate("gopher", "wood").await.unwrap();
    assert!(session.account.activated);
    assert_eq!(session.account.power, Power::Normal);

    let claims = ctx.token_issuer.parse(&session.token).unwrap();
    assert_eq!(ctx.token_issuer.decrypt_power(&claims).unwrap(), Power::Normal);
}

#[tokio::test]
async fn file_backed_context_persists() {
    let (ctx, dir) = file_context().await;
    let account = create_gopher(&ctx).await;
    drop(ctx);

    let mut config = test_config();
    config.database.path = dir.path().join("authed.sqlite");
    let reopened = AppContext::new(config).await.unwrap();

    let found = reopened
        .account_manager
        .find(&Account::with_username("gopher"))
        .await
        .unwrap();
    assert_eq!(found.id, account.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_expiry_checks_agree() {
    let (ctx, _dir) = file_context().await;
    let account = create_gopher(&ctx).await;

    let ban = ctx
        .account_manager
        .ban(&account, true, Some(Utc::now() - Duration::seconds(1)))
        .await
        .unwrap();

    let manager = Arc::clone(&ctx.account_manager);
    let checks = (0..16).map(|_| {
        let manager = Arc::clone(&manager);
        let id = account.id;
        tokio::spawn(async move {
            let mut lookup = Account::with_id(id);
            manager.is_banned(&mut lookup).await
        })
    });

    for outcome in futures::future::join_all(checks).await {
        let banned = outcome.unwrap().unwrap();
        assert!(!banned);
    }

    // Cleared exactly once and stays cleared
    assert!(ctx.repository.find_active_ban(account.id).await.unwrap().is_none());
    assert_eq!(ctx.repository.deactivate_ban(ban.id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_yield_one_account() {
    let (ctx, _dir) = file_context().await;
    let manager = Arc::clone(&ctx.account_manager);

    let attempts = (0..8).map(|i| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .create(NewAccount::new("gopher", format!("gopher{}@ufo.gov", i), "wood"))
                .await
        })
    });

    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AuthError::UsernameExists)));
}

#[tokio::test]
async fn error_bodies_are_stable() {
    let ctx = memory_context().await;

    let err = ctx
        .account_manager
        .find(&Account::with_username("nobody"))
        .await
        .unwrap_err();

    let body = serde_json::to_value(err.body()).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["id"], 6);
}
