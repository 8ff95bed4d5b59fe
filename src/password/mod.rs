/// Password hashing at a calibrated bcrypt cost
///
/// The cost is chosen once at startup (see [`calibrate`]) and stays fixed for
/// the life of the process.
pub mod calibrate;

pub use calibrate::{calibrate, Calibrator};

use crate::error::{AuthError, AuthResult};

/// Lowest work factor bcrypt accepts
pub const MIN_COST: u32 = 4;
/// Highest work factor bcrypt accepts
pub const MAX_COST: u32 = 31;

/// Salted password hasher bound to a fixed cost
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Create a hasher, clamping `cost` into bcrypt's accepted range
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        if password.is_empty() {
            tracing::warn!("Refusing to hash an empty password");
            return Err(AuthError::EmptyPassword);
        }

        let hashed = bcrypt::hash(password, self.cost).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            AuthError::Unknown(format!("Password hashing failed: {}", e))
        })?;

        tracing::debug!(cost = self.cost, "Password hashed");
        Ok(hashed)
    }

    /// Check a password against a stored hash.
    ///
    /// A mismatch is `Ok(false)`; only a structurally broken hash is an error.
    pub fn verify(&self, hash: &str, password: &str) -> AuthResult<bool> {
        bcrypt::verify(password, hash)
            .map_err(|e| AuthError::Unknown(format!("Password verification failed: {}", e)))
    }

    /// [`hash`](Self::hash) on the blocking pool
    pub async fn hash_blocking(&self, password: String) -> AuthResult<String> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Unknown(format!("Password hashing task panicked: {}", e)))?
    }

    /// [`verify`](Self::verify) on the blocking pool
    pub async fn verify_blocking(&self, hash: String, password: String) -> AuthResult<bool> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| {
                AuthError::Unknown(format!("Password verification task panicked: {}", e))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::new(MIN_COST);

        let first = hasher.hash("password").unwrap();
        let second = hasher.hash("password").unwrap();

        // Salted: same input, different output
        assert_ne!(first, second);
        assert!(hasher.verify(&first, "password").unwrap());
        assert!(hasher.verify(&second, "password").unwrap());
        assert!(!hasher.verify(&first, "err").unwrap());
    }

    #[test]
    fn test_empty_password() {
        let hasher = PasswordHasher::new(MIN_COST);
        assert!(matches!(hasher.hash(""), Err(AuthError::EmptyPassword)));
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let hasher = PasswordHasher::new(MIN_COST);
        assert!(hasher.verify("not-a-bcrypt-hash", "password").is_err());
    }

    #[test]
    fn test_cost_is_clamped() {
        assert_eq!(PasswordHasher::new(1).cost(), MIN_COST);
        assert_eq!(PasswordHasher::new(40).cost(), MAX_COST);
        assert_eq!(PasswordHasher::new(12).cost(), 12);
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hasher = PasswordHasher::new(MIN_COST);
        let hash = hasher.hash_blocking("wood".to_string()).await.unwrap();
        assert!(hasher
            .verify_blocking(hash, "wood".to_string())
            .await
            .unwrap());
    }
}
