/// Signed session tokens
///
/// HMAC-signed JWTs carrying the account id and power level. Both claims
/// can be sealed with [`ClaimCipher`] so the token body reveals nothing.
pub mod cipher;

pub use cipher::{parse_key_material, ClaimCipher};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Power;
use crate::config::TokenConfig;
use crate::error::{AuthError, AuthResult};

/// Tokens expiring sooner than this are not worth refreshing yet
pub const REFRESH_WINDOW_START_MINUTES: i64 = 5;
/// Tokens expiring later than this don't need refreshing
pub const REFRESH_WINDOW_END_MINUTES: i64 = 30;

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id, plain decimal or sealed
    pub id: String,
    /// Power level, plain decimal or sealed
    pub power: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl TokenClaims {
    /// Account id of an unencrypted token
    pub fn subject_id(&self) -> AuthResult<i64> {
        self.id
            .parse()
            .map_err(|_| AuthError::Malformed("id claim is not a number".to_string()))
    }

    /// Power of an unencrypted token
    pub fn power_level(&self) -> AuthResult<Power> {
        let level: i32 = self
            .power
            .parse()
            .map_err(|_| AuthError::Malformed("power claim is not a number".to_string()))?;
        Power::from_level(level).map_err(|_| AuthError::Malformed(format!("unknown power {}", level)))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// Whether the token is due for a refresh, see [`will_expire`]
    pub fn will_expire(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| will_expire(exp, now))
    }
}

/// True when `exp_at` falls strictly between five and thirty minutes from
/// `now`.
pub fn will_expire(exp_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now + Duration::minutes(REFRESH_WINDOW_START_MINUTES) < exp_at
        && exp_at < now + Duration::minutes(REFRESH_WINDOW_END_MINUTES)
}

/// Mints and verifies tokens with one algorithm and secret
#[derive(Clone)]
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    cipher: ClaimCipher,
    issuer: String,
    ttl: Duration,
    leeway: u64,
}

impl TokenIssuer {
    pub fn new(config: &TokenConfig) -> AuthResult<Self> {
        if !matches!(
            config.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::Config(format!(
                "token algorithm {:?} is not an HMAC algorithm",
                config.algorithm
            )));
        }

        let ttl = i64::try_from(config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| AuthError::Config("token TTL out of range".to_string()))?;

        Ok(Self {
            algorithm: config.algorithm,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            cipher: ClaimCipher::from_key_material(&config.encryption_key)?,
            issuer: config.issuer.clone(),
            ttl,
            leeway: config.leeway_secs,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token valid from now for the configured TTL
    pub fn create_token(&self, subject_id: i64, power: Power, encrypt: bool) -> AuthResult<String> {
        self.create_token_at(subject_id, power, encrypt, Utc::now())
    }

    /// Mint a token as if issued at `issued_at`
    pub fn create_token_at(
        &self,
        subject_id: i64,
        power: Power,
        encrypt: bool,
        issued_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let id = subject_id.to_string();
        let level = power.level().to_string();

        let (id, power_claim) = if encrypt {
            (self.cipher.encrypt(&id)?, self.cipher.encrypt(&level)?)
        } else {
            (id, level)
        };

        let claims = TokenClaims {
            id,
            power: power_claim,
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Unknown(format!("Failed to sign token: {}", e)))?;

        tracing::debug!(subject_id, power = power.as_str(), encrypt, "Token issued");
        Ok(token)
    }

    /// Verify signature, algorithm, issuer and time claims
    pub fn parse(&self, token: &str) -> AuthResult<TokenClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            let err = match e.kind() {
                ErrorKind::InvalidAlgorithm => AuthError::InvalidSigningMethod,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::ImmatureSignature => AuthError::NotYetValid,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed(e.to_string()),
            };
            tracing::warn!(error = %e, "Token rejected");
            err
        })?;

        Ok(data.claims)
    }

    /// Open a sealed `id` claim
    pub fn decrypt_subject_id(&self, claims: &TokenClaims) -> AuthResult<i64> {
        self.cipher
            .decrypt(&claims.id)?
            .parse()
            .map_err(|_| AuthError::DecryptionFailed)
    }

    /// Open a sealed `power` claim
    pub fn decrypt_power(&self, claims: &TokenClaims) -> AuthResult<Power> {
        let level: i32 = self
            .cipher
            .decrypt(&claims.power)?
            .parse()
            .map_err(|_| AuthError::DecryptionFailed)?;

        Power::from_level(level).map_err(|_| AuthError::DecryptionFailed)
    }
}
