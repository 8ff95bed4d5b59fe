/// authed - authentication and account lifecycle engine
///
/// Calibrated password hashing, field validation, signed tokens with
/// encrypted claims, and the ban/activation/deletion state machine for
/// accounts stored in SQLite.

pub mod account;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod obfuscate;
pub mod password;
pub mod token;
pub mod validation;

pub use account::{AccountManager, Power, PublicAccount, Session};
pub use config::EngineConfig;
pub use context::AppContext;
pub use db::account::{Account, Ban, NewAccount};
pub use error::{AuthError, AuthResult};
