/// authed - boots the engine and reports its state
///
/// Loads configuration, calibrates the password cost, opens and migrates the
/// account database, then logs a summary. Transports embed the library.

use authed::{AppContext, AuthResult, EngineConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AuthResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = EngineConfig::from_env()?;

    // Create application context
    let ctx = match AppContext::new(config).await {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!(id = err.id(), error = %err, "Startup failed");
            return Err(err);
        }
    };

    let accounts = ctx.account_manager.list_accounts().await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %ctx.config.database.path.display(),
        hash_cost = ctx.hasher.cost(),
        token_algorithm = ?ctx.token_issuer.algorithm(),
        token_ttl_secs = ctx.token_issuer.ttl().num_seconds(),
        accounts = accounts.len(),
        "Engine ready"
    );

    Ok(())
}
