/// Reversible obfuscation of account ids
///
/// Sequential row ids leak how many accounts exist. The public form is
/// `((id * prime) mod 2^63) xor salt`, inverted with the multiplicative
/// inverse of the prime.
use crate::error::{AuthError, AuthResult};

const MASK: u64 = (1 << 63) - 1;

pub const DEFAULT_PRIME: u64 = 8_432_571_981_118_615_261;
pub const DEFAULT_XOR: u64 = 4_365_681_490_325_845_181;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdObfuscator {
    prime: u64,
    inverse: u64,
    xor: u64,
}

impl Default for IdObfuscator {
    fn default() -> Self {
        // DEFAULT_PRIME is odd
        Self::from_parts(DEFAULT_PRIME, DEFAULT_XOR)
    }
}

impl IdObfuscator {
    /// `prime` must be odd to be invertible modulo a power of two
    pub fn new(prime: u64, xor: u64) -> AuthResult<Self> {
        if prime % 2 == 0 {
            return Err(AuthError::Config(format!("id prime {} is not odd", prime)));
        }

        Ok(Self::from_parts(prime, xor))
    }

    fn from_parts(prime: u64, xor: u64) -> Self {
        Self {
            prime,
            inverse: modular_inverse(prime),
            xor: xor & MASK,
        }
    }

    pub fn obfuscate(&self, id: i64) -> i64 {
        let hidden = ((id as u64).wrapping_mul(self.prime) & MASK) ^ self.xor;
        hidden as i64
    }

    pub fn reveal(&self, hidden: i64) -> i64 {
        let id = (((hidden as u64) ^ self.xor).wrapping_mul(self.inverse)) & MASK;
        id as i64
    }

    pub fn obfuscate_str(&self, id: i64) -> String {
        self.obfuscate(id).to_string()
    }

    /// Parse the decimal public form; anything unparseable is
    /// [`AuthError::UserNotFound`]
    pub fn reveal_str(&self, public: &str) -> AuthResult<i64> {
        let hidden: i64 = public.trim().parse().map_err(|_| AuthError::UserNotFound)?;
        if hidden < 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(self.reveal(hidden))
    }
}

/// Inverse of an odd number modulo 2^64 by Newton iteration. Each round
/// doubles the number of correct low bits, starting from 3.
fn modular_inverse(odd: u64) -> u64 {
    let mut inverse = odd;
    for _ in 0..5 {
        inverse = inverse.wrapping_mul(2u64.wrapping_sub(odd.wrapping_mul(inverse)));
    }
    inverse
}
