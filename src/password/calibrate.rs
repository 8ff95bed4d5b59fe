/// Work-factor calibration
///
/// Finds the most expensive bcrypt cost whose hashing time stays under a
/// target duration on this host. The answer depends on CPU speed and on the
/// load at the moment calibration runs, so two boots of the same binary may
/// settle on different costs. Pin `AUTHED_HASH_COST` when that matters.
use std::time::{Duration, Instant};

use super::{MAX_COST, MIN_COST};
use crate::error::{AuthError, AuthResult};

/// Fixed secret hashed while measuring
const TEST_SECRET: &str = "123456";

/// Monotonic cost search driven by a hash timer
pub struct Calibrator<P> {
    timer: P,
}

impl<P> Calibrator<P>
where
    P: FnMut(u32) -> AuthResult<Duration>,
{
    /// Use `timer(cost)` to measure one hash at `cost`
    pub fn with_timer(timer: P) -> Self {
        Self { timer }
    }

    /// Increase the cost one step at a time until a measurement reaches
    /// `target`, then settle on the last cost that stayed below it.
    pub fn run(&mut self, start_cost: u32, target: Duration) -> AuthResult<u32> {
        tracing::info!(start_cost, target_ms = target.as_millis() as u64, "Calibrating password hash cost");

        let mut cost = start_cost.clamp(MIN_COST, MAX_COST);

        loop {
            let elapsed = (self.timer)(cost)?;

            if elapsed >= target {
                let chosen = cost.saturating_sub(1);

                if chosen < MIN_COST {
                    tracing::warn!(
                        cost,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Starting cost already exceeds the target, using the minimum cost"
                    );
                    return Ok(MIN_COST);
                }

                tracing::info!(
                    cost = chosen,
                    exceeded_at = cost,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Password hash cost calibrated"
                );
                return Ok(chosen);
            }

            tracing::debug!(
                cost,
                elapsed_ms = elapsed.as_millis() as u64,
                "Not enough to reach the target"
            );

            if cost == MAX_COST {
                tracing::warn!("Reached the maximum cost without hitting the target");
                return Ok(MAX_COST);
            }

            cost += 1;
        }
    }
}

/// Time a single bcrypt hash of the test secret
fn bcrypt_timing(cost: u32) -> AuthResult<Duration> {
    let started = Instant::now();
    bcrypt::hash(TEST_SECRET, cost)
        .map_err(|e| AuthError::Calibration(format!("hash failed at cost {}: {}", cost, e)))?;
    Ok(started.elapsed())
}

/// Calibrate against the real bcrypt primitive. Blocks the calling thread.
pub fn calibrate(start_cost: u32, target: Duration) -> AuthResult<u32> {
    Calibrator::with_timer(bcrypt_timing).run(start_cost, target)
}
