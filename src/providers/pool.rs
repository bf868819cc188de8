//! Per-provider credential pool with rotation and rate-limit isolation.
//!
//! Each credential moves through Healthy -> Disabled -> Healthy:
//! - **Healthy**: selectable; rate-limit failures are counted
//! - **Disabled**: skipped by rotation after `FAILURE_THRESHOLD` rate-limit failures
//! - re-enabled once its last failure is older than `COOLDOWN`, or forcibly
//!   when every credential in the pool is disabled
//!
//! Only rate-limit/quota failures count against a credential. Bad requests
//! and network blips say nothing about the key itself.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{ApiKey, ConfigError};

/// Rate-limit failures before a credential is taken out of rotation.
const FAILURE_THRESHOLD: u32 = 3;

/// How long a disabled credential sits out before it is re-enabled.
const COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Substrings (lowercase) that mark an error as rate-limit or quota related.
const RATE_LIMIT_MARKERS: [&str; 4] = ["429", "rate limit", "quota exceeded", "resource exhausted"];

/// Whether an error message describes a rate-limit or quota failure.
pub fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase().replace('_', " ");
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// One secret plus its health record.
struct Credential {
    key: ApiKey,
    failure_count: u32,
    last_failure: Option<Instant>,
    disabled: bool,
}

impl Credential {
    fn new(key: ApiKey) -> Self {
        Self {
            key,
            failure_count: 0,
            last_failure: None,
            disabled: false,
        }
    }

    fn enable(&mut self) {
        self.disabled = false;
        self.failure_count = 0;
    }
}

/// Health of a single credential, safe to expose (no secret material).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub failure_count: u32,
    pub disabled: bool,
}

/// Rotation state (not thread-safe on its own; guarded by [`CredentialPool`]).
struct PoolState {
    credentials: Vec<Credential>,
    cursor: usize,
}

impl PoolState {
    fn position(&self, key: &ApiKey) -> Option<usize> {
        self.credentials.iter().position(|c| &c.key == key)
    }

    /// Re-enable disabled credentials whose last failure has aged out.
    fn expire_cooldowns(&mut self, provider: &str, now: Instant) {
        for (index, credential) in self.credentials.iter_mut().enumerate() {
            if !credential.disabled {
                continue;
            }
            let expired = credential
                .last_failure
                .map_or(true, |at| now.duration_since(at) >= COOLDOWN);
            if expired {
                credential.enable();
                credential.last_failure = None;
                tracing::info!(
                    provider = %provider,
                    credential = index,
                    "credential re-enabled after cooldown"
                );
            }
        }
    }

    fn select(&mut self, provider: &str) -> ApiKey {
        let now = Instant::now();
        self.expire_cooldowns(provider, now);

        let len = self.credentials.len();
        let start = self.cursor;
        // The cursor moves one step per call whatever gets picked.
        self.cursor = (self.cursor + 1) % len;

        for offset in 0..len {
            let index = (start + offset) % len;
            if !self.credentials[index].disabled {
                return self.credentials[index].key.clone();
            }
        }

        // Every credential is disabled: serve the one that failed longest ago.
        let index = self
            .credentials
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.last_failure)
            .map(|(index, _)| index)
            .unwrap_or(0);
        let credential = &mut self.credentials[index];
        credential.enable();
        tracing::warn!(
            provider = %provider,
            credential = index,
            "all credentials disabled, force-reactivating oldest failure"
        );
        credential.key.clone()
    }
}

/// Thread-safe credential pool for one provider.
///
/// The lock is only held for bookkeeping, never across a network call.
pub struct CredentialPool {
    provider: String,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from the provider's configured keys.
    ///
    /// Fails with [`ConfigError::NoCredentials`] when `keys` is empty.
    /// Repeated keys are collapsed so each secret has one health record.
    pub fn new(provider: impl Into<String>, keys: Vec<ApiKey>) -> Result<Self, ConfigError> {
        let provider = provider.into();
        let mut credentials: Vec<Credential> = Vec::with_capacity(keys.len());
        for key in keys {
            if !credentials.iter().any(|c| c.key == key) {
                credentials.push(Credential::new(key));
            }
        }
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials { provider });
        }

        Ok(Self {
            provider,
            state: Mutex::new(PoolState {
                credentials,
                cursor: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provider this pool belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Number of credentials in rotation (enabled or not).
    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    /// Always false; construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.lock().credentials.is_empty()
    }

    /// Pick the next credential to use.
    ///
    /// Never fails: when every credential is disabled, the one with the
    /// oldest failure is force-reactivated and returned.
    pub fn select(&self) -> ApiKey {
        self.lock().select(&self.provider)
    }

    /// Index of `key` within the pool, for logging without the secret.
    pub fn index_of(&self, key: &ApiKey) -> Option<usize> {
        self.lock().position(key)
    }

    /// Record a failed call made with `key`.
    ///
    /// Only rate-limit/quota errors are counted. Returns whether the error
    /// was classified as such, so callers can decide to rotate.
    pub fn report_failure(&self, key: &ApiKey, message: &str) -> bool {
        if !is_rate_limit_error(message) {
            return false;
        }

        let mut state = self.lock();
        let Some(index) = state.position(key) else {
            return true;
        };
        let credential = &mut state.credentials[index];
        credential.failure_count += 1;
        credential.last_failure = Some(Instant::now());

        if credential.failure_count >= FAILURE_THRESHOLD && !credential.disabled {
            credential.disabled = true;
            tracing::warn!(
                provider = %self.provider,
                credential = index,
                failure_count = credential.failure_count,
                "credential DISABLED: repeated rate-limit failures"
            );
        } else {
            tracing::debug!(
                provider = %self.provider,
                credential = index,
                failure_count = credential.failure_count,
                "rate-limit failure recorded"
            );
        }
        true
    }

    /// Record a successful call made with `key`. Clears all failure history.
    pub fn report_success(&self, key: &ApiKey) {
        let mut state = self.lock();
        if let Some(index) = state.position(key) {
            let credential = &mut state.credentials[index];
            if credential.failure_count > 0 {
                credential.failure_count = 0;
                credential.last_failure = None;
                tracing::debug!(
                    provider = %self.provider,
                    credential = index,
                    "credential recovered"
                );
            }
        }
    }

    /// Snapshot of every credential's health, in rotation order.
    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        self.lock()
            .credentials
            .iter()
            .enumerate()
            .map(|(index, c)| CredentialStatus {
                index,
                failure_count: c.failure_count,
                disabled: c.disabled,
            })
            .collect()
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("provider", &self.provider)
            .field("credentials", &self.snapshot())
            .finish()
    }
}
