//! PIN credential guard.
//!
//! Owns the per-account lockout state machine. Verification is linearizable
//! per owner: concurrent calls serialize their read-modify-write of the
//! security state behind a per-owner mutex, so two parallel wrong guesses can
//! never both observe a counter below threshold and skip the lock.
//!
//! Attempts during an active lockout window are rejected before any hash
//! comparison and mutate nothing: probing neither extends `locked_until` nor
//! burns attempts. Once the window elapses, the next attempt starts a fresh
//! attempt-1 window.

use argon2::Argon2;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::core::config::LockoutConfig;
use crate::core::domain::AccountSecurityState;
use crate::core::errors::VaultError;
use crate::storage::VaultStorageTrait;

const PIN_HASH_LEN: usize = 32;
const PIN_SALT_LEN: usize = 16;

// Salt used to equalize timing when the owner row does not exist.
const DUMMY_SALT: [u8; PIN_SALT_LEN] = [0x5a; PIN_SALT_LEN];

pub struct PinGuard {
    storage: Arc<dyn VaultStorageTrait>,
    config: LockoutConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PinGuard {
    pub fn new(storage: Arc<dyn VaultStorageTrait>, config: LockoutConfig) -> Result<Self, VaultError> {
        config.validate()?;
        Ok(Self { storage, config, locks: Mutex::new(HashMap::new()) })
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Hash a PIN under a salt with Argon2id. Slow and memory-hard on
    /// purpose; the PIN space is tiny.
    pub fn hash_pin(pin: &str, salt: &[u8]) -> Result<Zeroizing<[u8; PIN_HASH_LEN]>, VaultError> {
        let mut out = Zeroizing::new([0u8; PIN_HASH_LEN]);
        Argon2::default()
            .hash_password_into(pin.as_bytes(), salt, out.as_mut_slice())
            .map_err(|_| VaultError::Configuration("PIN hashing failed".to_string()))?;
        Ok(out)
    }

    /// Store a fresh PIN credential for `owner_id`. Creates the security
    /// state row on first use; plaintext never persists.
    pub async fn set_pin(&self, owner_id: &str, pin: &str) -> Result<(), VaultError> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut salt = vec![0u8; PIN_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = Self::hash_pin(pin, &salt)?;

        let state = AccountSecurityState::new(owner_id, hash.to_vec(), salt);
        self.storage.upsert_security_state(&state).await?;
        debug!(owner_id = %owner_id, "PIN credential set");
        Ok(())
    }

    /// Whether the owner already has a PIN credential.
    pub async fn has_pin(&self, owner_id: &str) -> Result<bool, VaultError> {
        Ok(self.storage.get_security_state(owner_id).await?.is_some())
    }

    /// Whether the owner is currently inside a lockout window.
    pub async fn is_locked(&self, owner_id: &str) -> Result<bool, VaultError> {
        let state = self.storage.get_security_state(owner_id).await?;
        Ok(state.map(|s| s.is_locked(Utc::now())).unwrap_or(false))
    }

    /// Run the verification state machine for one attempt.
    pub async fn verify_pin(&self, owner_id: &str, pin: &str) -> Result<(), VaultError> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let state = match self.storage.get_security_state(owner_id).await? {
            Some(state) => state,
            None => {
                // Unknown owner: burn a comparable amount of work and answer
                // exactly like a first wrong attempt, so the boundary cannot
                // enumerate accounts.
                let dummy = Self::hash_pin(pin, &DUMMY_SALT)?;
                let _ = bool::from(dummy.ct_eq(&[0u8; PIN_HASH_LEN]));
                return Err(VaultError::InvalidPin {
                    failed_attempts: 1,
                    attempts_remaining: self.config.max_failed_attempts.saturating_sub(1),
                });
            }
        };

        if let Some(locked_until) = state.locked_until {
            if locked_until > now {
                // Locked: reject before any comparison, mutate nothing.
                return Err(VaultError::AccountLocked { locked_until });
            }
        }

        // An elapsed window restarts counting from zero.
        let prior_failures = if state.locked_until.is_some() { 0 } else { state.failed_attempts };

        let candidate = Self::hash_pin(pin, &state.pin_salt)?;
        let matches = bool::from(candidate.ct_eq(state.pin_hash.as_slice()));

        if matches {
            let mut next = state.clone();
            next.failed_attempts = 0;
            next.locked_until = None;
            next.last_attempt = Some(now);
            self.storage.upsert_security_state(&next).await?;
            return Ok(());
        }

        let failed = prior_failures + 1;
        let mut next = state.clone();
        next.failed_attempts = failed;
        next.last_attempt = Some(now);

        if failed >= self.config.max_failed_attempts {
            let locked_until = now + Duration::seconds(self.config.lockout_duration_secs as i64);
            next.locked_until = Some(locked_until);
            self.storage.upsert_security_state(&next).await?;
            warn!(
                owner_id = %owner_id,
                failed_attempts = failed,
                "account locked after repeated PIN failures"
            );
            return Err(VaultError::AccountLocked { locked_until });
        }

        next.locked_until = None;
        self.storage.upsert_security_state(&next).await?;
        Err(VaultError::InvalidPin {
            failed_attempts: failed,
            attempts_remaining: self.config.max_failed_attempts - failed,
        })
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop entries nobody holds anymore, so the map stays bounded by the
        // number of owners with an attempt in flight.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(owner_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[cfg(test)]
    async fn tracked_owner_locks(&self) -> usize {
        self.locks.lock().await.len()
    }
}
