//! Per-target brute-force protection for decryption.
//!
//! Each target path owns a ledger of failure timestamps. Entries older than
//! the window are pruned before every decision; once the ledger reaches the
//! attempt threshold, further tries are refused until the lockout has
//! elapsed since the *last* failure, so every new failure restarts the clock.
//!
//! The ledger is owned by whoever constructs the limiter. It lives only in
//! memory and is lost when the process exits.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::config::{RATE_LIMIT_LOCKOUT, RATE_LIMIT_MAX_ATTEMPTS, RATE_LIMIT_WINDOW};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Locked { wait: Duration },
}

impl Verdict {
    #[inline]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Maps a lockout onto [`Error::RateLimited`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Locked { wait } => Err(Error::RateLimited { wait }),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Policy {
    pub max_attempts: usize,
    pub lockout: Duration,
    pub window: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self { max_attempts: RATE_LIMIT_MAX_ATTEMPTS, lockout: RATE_LIMIT_LOCKOUT, window: RATE_LIMIT_WINDOW }
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    policy: Policy,
    ledger: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(policy: Policy) -> Self {
        Self { policy, ledger: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, target: &str) -> Verdict {
        self.check_at(target, Instant::now())
    }

    pub fn record_failure(&self, target: &str) {
        self.record_failure_at(target, Instant::now());
    }

    /// Drops the whole ledger for `target`.
    pub fn clear(&self, target: &str) {
        if self.lock().remove(target).is_some() {
            debug!(key = target, "cleared failure ledger");
        }
    }

    /// Number of failures currently retained for `target`.
    pub fn failures(&self, target: &str) -> usize {
        self.lock().get(target).map_or(0, Vec::len)
    }

    pub(crate) fn check_at(&self, target: &str, now: Instant) -> Verdict {
        let mut ledger = self.lock();
        let Some(attempts) = ledger.get_mut(target) else {
            return Verdict::Allowed;
        };

        attempts.retain(|t| now.saturating_duration_since(*t) < self.policy.window);
        if attempts.is_empty() {
            ledger.remove(target);
            return Verdict::Allowed;
        }

        if attempts.len() >= self.policy.max_attempts
            && let Some(last) = attempts.last()
        {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.policy.lockout {
                let wait = self.policy.lockout - elapsed;
                warn!(key = target, failures = attempts.len(), wait_secs = wait.as_secs(), "decryption rate limited");
                return Verdict::Locked { wait };
            }
        }

        Verdict::Allowed
    }

    pub(crate) fn record_failure_at(&self, target: &str, now: Instant) {
        let mut ledger = self.lock();
        let attempts = ledger.entry(target.to_owned()).or_default();
        attempts.push(now);
        debug!(key = target, failures = attempts.len(), "recorded failed attempt");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
