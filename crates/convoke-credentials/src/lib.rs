//! Rotating, failure-aware credential pool
//!
//! The pool owns every credential outright. Callers get a
//! [`CredentialLease`] (id plus a key clone) from [`CredentialPool::acquire`]
//! and hand the observed outcome back through [`CredentialPool::report`];
//! no other component may inspect or mutate credential state. All
//! mutation happens under one mutex inside those two calls, so concurrent
//! workers never observe a torn state update.
//!
//! Selection is round-robin over credentials currently available. A
//! retryable failure moves the credential into a cooling-down window that
//! doubles per consecutive failure (capped); an invalid credential leaves
//! rotation permanently. `acquire` never blocks: when nothing qualifies
//! it returns `None` and the caller decides how long to wait.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use convoke_config::CredentialsConfig;
use convoke_utils::types::{CredentialId, mask_key};

/// Outcome of one call, reported back to the pool by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded; the credential stays in rotation.
    Success,
    /// Provider signalled quota (429); cool the credential down.
    RateLimited,
    /// Credential rejected (401/403); remove it permanently.
    Invalid,
    /// Transient transport/provider fault; cool the credential down.
    TransientError,
}

/// Lifecycle state of one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Available,
    CoolingDown,
    Exhausted,
}

/// A borrowed right to use one credential for one call.
///
/// Carries a clone of the key; the pool retains ownership of all state.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    pub id: CredentialId,
    pub key: String,
}

/// Operator-facing view of one credential, with the key masked.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub id: CredentialId,
    pub key_masked: String,
    pub state: CredentialState,
    pub uses: u64,
    pub errors: u64,
}

#[derive(Debug)]
struct Credential {
    id: CredentialId,
    key: String,
    uses: u64,
    errors: u64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    state: CredentialState,
}

impl Credential {
    fn new(id: CredentialId, key: String) -> Self {
        Self {
            id,
            key,
            uses: 0,
            errors: 0,
            consecutive_failures: 0,
            cooldown_until: None,
            state: CredentialState::Available,
        }
    }
}

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configured env var held no usable keys.
    #[error("no API keys found in env var {env}; set it to a comma-separated key list")]
    NoKeys { env: String },
}

struct PoolInner {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// The credential router: one owned structure, injected where needed.
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
    cooldown_base: Duration,
    cooldown_cap: Duration,
}

impl CredentialPool {
    /// Build a pool over an explicit key list.
    #[must_use]
    pub fn from_keys(keys: Vec<String>, config: &CredentialsConfig) -> Self {
        let credentials = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| Credential::new(CredentialId(i as u32), key))
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                credentials,
                cursor: 0,
            }),
            cooldown_base: Duration::from_secs(config.cooldown_base_secs),
            cooldown_cap: Duration::from_secs(config.cooldown_cap_secs),
        }
    }

    /// Build a pool from the comma-separated key list in the configured
    /// env var.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NoKeys` when the variable is unset or holds
    /// no non-empty entries.
    pub fn from_env(config: &CredentialsConfig) -> Result<Self, PoolError> {
        let raw = std::env::var(&config.api_keys_env).unwrap_or_default();
        let keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            return Err(PoolError::NoKeys {
                env: config.api_keys_env.clone(),
            });
        }
        debug!(count = keys.len(), env = %config.api_keys_env, "Loaded credential pool");
        Ok(Self::from_keys(keys, config))
    }

    /// Select the next usable credential, round-robin.
    ///
    /// Skips exhausted credentials and cooling-down credentials whose
    /// window has not elapsed; an elapsed window re-admits the credential
    /// on the spot. Returns `None` when nothing qualifies — a
    /// retry-later condition for the caller, not a fatal error.
    #[must_use]
    pub fn acquire(&self) -> Option<CredentialLease> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("credential pool lock poisoned");
        let len = inner.credentials.len();

        for offset in 0..len {
            let idx = (inner.cursor + offset) % len;
            let cred = &mut inner.credentials[idx];

            match cred.state {
                CredentialState::Exhausted => continue,
                CredentialState::CoolingDown => {
                    match cred.cooldown_until {
                        Some(until) if now < until => continue,
                        _ => {
                            debug!(credential = %cred.id, "Cooldown elapsed, re-admitting");
                            cred.state = CredentialState::Available;
                            cred.cooldown_until = None;
                        }
                    }
                }
                CredentialState::Available => {}
            }

            cred.uses += 1;
            let lease = CredentialLease {
                id: cred.id,
                key: cred.key.clone(),
            };
            inner.cursor = (idx + 1) % len;
            return Some(lease);
        }

        debug!("No credential available");
        None
    }

    /// Record the outcome of a call made with `id`.
    ///
    /// An exhausted credential is never resurrected, whatever the
    /// reported outcome.
    pub fn report(&self, id: CredentialId, outcome: Outcome) {
        let mut inner = self.inner.lock().expect("credential pool lock poisoned");
        let Some(cred) = inner.credentials.iter_mut().find(|c| c.id == id) else {
            warn!(credential = %id, "Report for unknown credential ignored");
            return;
        };

        if cred.state == CredentialState::Exhausted {
            return;
        }

        match outcome {
            Outcome::Success => {
                cred.consecutive_failures = 0;
                cred.cooldown_until = None;
                cred.state = CredentialState::Available;
            }
            Outcome::RateLimited | Outcome::TransientError => {
                cred.errors += 1;
                cred.consecutive_failures += 1;
                let window = self.cooldown_window(cred.consecutive_failures);
                cred.cooldown_until = Some(Instant::now() + window);
                cred.state = CredentialState::CoolingDown;
                debug!(
                    credential = %cred.id,
                    key = %mask_key(&cred.key),
                    window_secs = window.as_secs_f64(),
                    consecutive = cred.consecutive_failures,
                    "Credential cooling down"
                );
            }
            Outcome::Invalid => {
                cred.errors += 1;
                cred.state = CredentialState::Exhausted;
                cred.cooldown_until = None;
                warn!(
                    credential = %cred.id,
                    key = %mask_key(&cred.key),
                    "Credential invalid, removed from rotation"
                );
            }
        }
    }

    /// Exponential window: base doubled per consecutive failure, capped.
    fn cooldown_window(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let window = self.cooldown_base.saturating_mul(1u32 << exponent);
        window.min(self.cooldown_cap)
    }

    /// Total credentials in the pool, whatever their state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("credential pool lock poisoned")
            .credentials
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Masked, serializable view of every credential for status output.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        let inner = self.inner.lock().expect("credential pool lock poisoned");
        inner
            .credentials
            .iter()
            .map(|c| CredentialStatus {
                id: c.id,
                key_masked: mask_key(&c.key),
                state: c.state,
                uses: c.uses,
                errors: c.errors,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_config(base_secs: u64, cap_secs: u64) -> CredentialsConfig {
        CredentialsConfig {
            api_keys_env: "TEST_KEYS".to_string(),
            cooldown_base_secs: base_secs,
            cooldown_cap_secs: cap_secs,
        }
    }

    fn pool_of(n: usize, base_secs: u64) -> CredentialPool {
        let keys = (0..n).map(|i| format!("key-{i}-abcdef")).collect();
        CredentialPool::from_keys(keys, &test_config(base_secs, base_secs * 16))
    }

    #[test]
    fn round_robin_rotates_over_available_credentials() {
        let pool = pool_of(3, 30);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let d = pool.acquire().unwrap();
        assert_eq!(a.id, CredentialId(0));
        assert_eq!(b.id, CredentialId(1));
        assert_eq!(c.id, CredentialId(2));
        assert_eq!(d.id, CredentialId(0));
    }

    #[test]
    fn rate_limited_credential_is_skipped_while_cooling() {
        let pool = pool_of(2, 3600);
        let a = pool.acquire().unwrap();
        pool.report(a.id, Outcome::RateLimited);

        // Only the other credential rotates now.
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(b.id, CredentialId(1));
        assert_eq!(c.id, CredentialId(1));
    }

    #[test]
    fn elapsed_cooldown_readmits_credential() {
        // Zero base means the window has elapsed by the next acquire.
        let pool = pool_of(1, 0);
        let a = pool.acquire().unwrap();
        pool.report(a.id, Outcome::TransientError);

        let again = pool.acquire();
        assert!(again.is_some());
        assert_eq!(again.unwrap().id, a.id);
    }

    #[test]
    fn invalid_credential_never_returns() {
        let pool = pool_of(2, 0);
        let a = pool.acquire().unwrap();
        pool.report(a.id, Outcome::Invalid);

        for _ in 0..10 {
            let lease = pool.acquire().unwrap();
            assert_ne!(lease.id, a.id, "exhausted credential resurrected");
        }

        // Even a later success report cannot resurrect it.
        pool.report(a.id, Outcome::Success);
        for _ in 0..10 {
            assert_ne!(pool.acquire().unwrap().id, a.id);
        }
    }

    #[test]
    fn acquire_returns_none_when_pool_fully_unavailable() {
        let pool = pool_of(2, 3600);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.report(a.id, Outcome::Invalid);
        pool.report(b.id, Outcome::RateLimited);

        assert!(pool.acquire().is_none());
    }

    #[test]
    fn success_resets_the_doubling_window() {
        let pool = pool_of(1, 0);
        let a = pool.acquire().unwrap();
        pool.report(a.id, Outcome::TransientError);
        pool.report(a.id, Outcome::TransientError);
        pool.report(a.id, Outcome::Success);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].state, CredentialState::Available);
        assert_eq!(snapshot[0].errors, 2);
    }

    #[test]
    fn cooldown_window_doubles_and_caps() {
        let pool = CredentialPool::from_keys(
            vec!["k-aaaaaaaa".to_string()],
            &test_config(30, 480),
        );
        assert_eq!(pool.cooldown_window(1), Duration::from_secs(30));
        assert_eq!(pool.cooldown_window(2), Duration::from_secs(60));
        assert_eq!(pool.cooldown_window(3), Duration::from_secs(120));
        assert_eq!(pool.cooldown_window(5), Duration::from_secs(480));
        assert_eq!(pool.cooldown_window(12), Duration::from_secs(480));
    }

    #[test]
    fn snapshot_masks_keys() {
        let pool = pool_of(1, 30);
        let snapshot = pool.snapshot();
        assert!(snapshot[0].key_masked.starts_with("..."));
        assert!(!snapshot[0].key_masked.contains("key-0-abcdef"));
    }

    proptest! {
        /// Liveness: any failure sequence that leaves at least one
        /// credential un-invalidated cannot wedge the pool (with an
        /// already-elapsed cooldown window).
        #[test]
        fn acquire_survives_partial_failure(outcomes in proptest::collection::vec(0u8..3, 1..60)) {
            let pool = pool_of(4, 0);

            for (i, kind) in outcomes.iter().enumerate() {
                // Credential 3 is never reported invalid.
                let id = CredentialId((i % 3) as u32);
                let outcome = match kind {
                    0 => Outcome::RateLimited,
                    1 => Outcome::TransientError,
                    _ => Outcome::Invalid,
                };
                pool.report(id, outcome);
            }

            prop_assert!(pool.acquire().is_some());
        }

        /// No resurrection: once invalid, a credential is never handed
        /// out again regardless of later traffic.
        #[test]
        fn exhausted_stays_exhausted(later in proptest::collection::vec(0u8..2, 0..40)) {
            let pool = pool_of(3, 0);
            pool.report(CredentialId(0), Outcome::Invalid);

            for kind in later {
                let outcome = if kind == 0 { Outcome::Success } else { Outcome::TransientError };
                pool.report(CredentialId(0), outcome);
                if let Some(lease) = pool.acquire() {
                    prop_assert_ne!(lease.id, CredentialId(0));
                }
            }
        }
    }
}
