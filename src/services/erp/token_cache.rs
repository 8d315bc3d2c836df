// ============================================================================
// Bearer Token Cache
// ============================================================================
//
// One entry per (tenant, scope). Entries are overwritten on refresh and never
// evicted; concurrent misses may both fetch, which only costs a redundant
// token request.
//
// ============================================================================

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Source of "now", injectable so expiry can be tested deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub tenant: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenCache<C: Clock = SystemClock> {
    entries: DashMap<TokenKey, CachedToken>,
    clock: C,
    refresh_margin: Duration,
}

impl TokenCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TokenCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TokenCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            refresh_margin: Duration::seconds(60),
        }
    }

    /// Cached token if it is still valid for at least the refresh margin.
    pub fn get(&self, key: &TokenKey) -> Option<String> {
        let entry = self.entries.get(key)?;
        if self.clock.now() + self.refresh_margin < entry.expires_at {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }

    /// Return the cached token or run `fetch` and store its result.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: TokenKey, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedToken, E>>,
    {
        if let Some(token) = self.get(&key) {
            return Ok(token);
        }

        tracing::debug!(tenant = %key.tenant, "Access token missing or expiring, requesting a new one");
        let fresh = fetch().await?;
        let access_token = fresh.access_token.clone();
        self.entries.insert(key, fresh);
        Ok(access_token)
    }

    /// Drop a token the upstream rejected.
    pub fn invalidate(&self, key: &TokenKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for &ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn key() -> TokenKey {
        TokenKey {
            tenant: "tenant-a".to_string(),
            scope: "scope".to_string(),
        }
    }

    #[tokio::test]
    async fn test_token_reused_until_expiry() {
        let manual = ManualClock(Mutex::new(Utc::now()));
        let clock = &manual;
        let cache = TokenCache::with_clock(clock);
        let counter = AtomicUsize::new(0);
        let fetches = &counter;

        let fetch = move || async move {
            let n = fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(CachedToken {
                access_token: format!("token-{}", n),
                expires_at: clock.now() + Duration::seconds(3600),
            })
        };

        assert_eq!(cache.get_or_fetch(key(), fetch).await.unwrap(), "token-0");
        assert_eq!(cache.get_or_fetch(key(), fetch).await.unwrap(), "token-0");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Inside the refresh margin the token is treated as expired
        manual.advance(Duration::seconds(3550));
        assert_eq!(cache.get_or_fetch(key(), fetch).await.unwrap(), "token-1");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = TokenCache::new();
        let result = cache
            .get_or_fetch(key(), || async { Err::<CachedToken, _>("denied") })
            .await;
        assert_eq!(result, Err("denied"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TokenCache::new();
        cache
            .get_or_fetch(key(), || async {
                Ok::<_, ()>(CachedToken {
                    access_token: "t".to_string(),
                    expires_at: Utc::now() + Duration::seconds(3600),
                })
            })
            .await
            .unwrap();
        assert!(cache.get(&key()).is_some());
        cache.invalidate(&key());
        assert!(cache.get(&key()).is_none());
    }
}
