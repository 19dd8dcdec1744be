//! Provider calls with retry and idempotency.
//!
//! Every gateway call made by the runtime goes through [`ProviderGateway`]:
//! a cached response for the same idempotency key is returned without
//! contacting the provider, and transient failures
//! ([`remit_core::ProviderError::is_transient`]) are retried with exponential backoff.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use remit_core::ProviderResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Hex characters kept from the key digest.
const KEY_LEN: usize = 32;

/// Derives the idempotency key of `operation` at `provider` over `args`.
///
/// The same inputs always give the same key.
pub fn idempotency_key(provider: &str, operation: &str, args: &[&str]) -> String {
    let material = format!("{provider}:{operation}:{}", args.join(":"));
    let digest = hex::encode(Sha256::digest(material.as_bytes()));
    digest[..KEY_LEN].to_string()
}

// =============================================================================
// Idempotency store
// =============================================================================

/// Cache of successful provider responses by idempotency key.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The cached response, unless missing or expired.
    async fn check(&self, key: &str) -> Option<Value>;

    async fn store(&self, key: &str, response: Value, ttl: Duration);

    async fn delete(&self, key: &str);
}

/// Process-local [`IdempotencyStore`]. Expired entries are dropped on read.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn store(&self, key: &str, response: Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), (response, expires_at));
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

// =============================================================================
// Retry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

// =============================================================================
// ProviderGateway
// =============================================================================

/// Runs provider calls under a [`RetryPolicy`] and an [`IdempotencyStore`].
#[derive(Clone)]
pub struct ProviderGateway {
    retry: RetryPolicy,
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl ProviderGateway {
    pub fn new(retry: RetryPolicy, store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { retry, store, ttl }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// Runs `call` with retries, unless `key` already has a cached response.
    ///
    /// Only successful responses are cached, so a failed call runs again
    /// the next time the same key is used.
    pub async fn call<T, F, Fut>(&self, key: &str, operation: &str, call: F) -> ProviderResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        if let Some(cached) = self.store.check(key).await {
            match serde_json::from_value(cached) {
                Ok(response) => {
                    debug!(operation, key, "Idempotent replay");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(operation, key, error = %e, "Unreadable cached response dropped");
                    self.store.delete(key).await;
                }
            }
        }

        let response = self.with_retry(operation, call).await?;
        match serde_json::to_value(&response) {
            Ok(value) => self.store.store(key, value, self.ttl).await,
            Err(e) => warn!(operation, key, error = %e, "Response not cached"),
        }
        Ok(response)
    }

    /// Runs `call`, retrying transient failures with exponential backoff.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt + 1, error = %e, "Provider retries exhausted");
                    }
                    return Err(e);
                }
                Ok(response) => return Ok(response),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use remit_core::ProviderError;

    use super::*;

    fn gateway(max_retries: u32) -> ProviderGateway {
        ProviderGateway::new(
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
            },
            Arc::new(MemoryIdempotencyStore::new()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = idempotency_key("mock_payment", "create_charge", &["inv_1"]);
        assert_eq!(a.len(), 32);
        assert_eq!(a, idempotency_key("mock_payment", "create_charge", &["inv_1"]));
        assert_ne!(a, idempotency_key("mock_payment", "create_charge", &["inv_2"]));
        assert_ne!(a, idempotency_key("mock_payment", "capture_payment", &["inv_1"]));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let gateway = gateway(3);
        let attempts = &AtomicU32::new(0);
        let result = gateway
            .with_retry("create_customer", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Unavailable("busy".into()))
                } else {
                    Ok("cus_1".to_string())
                }
            })
            .await;
        assert_eq!(result.unwrap(), "cus_1");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let gateway = gateway(3);
        let attempts = &AtomicU32::new(0);
        let result: ProviderResult<String> = gateway
            .with_retry("create_charge", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Declined("card".into()))
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Declined(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let gateway = gateway(2);
        let attempts = &AtomicU32::new(0);
        let result: ProviderResult<String> = gateway
            .with_retry("capture_payment", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout(Duration::from_millis(5)))
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_only_successes_are_cached() {
        let gateway = gateway(0);
        let attempts = &AtomicU32::new(0);
        let key = idempotency_key("mock_payment", "create_customer", &["inv_1"]);

        let failed: ProviderResult<String> = gateway
            .call(&key, "create_customer", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Unavailable("busy".into()))
            })
            .await;
        assert!(failed.is_err());
        assert!(gateway.store().check(&key).await.is_none());

        for _ in 0..2 {
            let customer = gateway
                .call(&key, "create_customer", move || async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("cus_{n}"))
                })
                .await
                .unwrap();
            assert_eq!(customer, "cus_1");
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let store = MemoryIdempotencyStore::new();
        store
            .store("k", serde_json::json!("v"), Duration::from_millis(0))
            .await;
        assert!(store.check("k").await.is_none());
        assert!(store.is_empty());
    }
}
