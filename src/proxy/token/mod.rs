pub mod cooldown;
pub mod refresher;
pub mod store;
pub mod types;

pub use cooldown::CooldownTracker;
pub use refresher::{AuthTokenRefresher, GoogleTokenRefresher, RefreshedToken};
pub use store::{CloudAccountStore, FileAccountStore};
pub use types::PooledToken;

use crate::models::AccountToken;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const RATE_LIMIT_COOLDOWN_MS: i64 = 5 * 60 * 1000;
pub const FORBIDDEN_COOLDOWN_MS: i64 = 30 * 60 * 1000;
pub const SESSION_BINDING_TTL_MS: i64 = 10 * 60 * 1000;
// Refresh when the access token has less than this many seconds left.
const REFRESH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct SessionBinding {
    account_id: String,
    expires_at: i64,
}

#[derive(Debug, Default)]
pub struct SelectOptions<'a> {
    pub session_key: Option<&'a str>,
    pub exclude_account_ids: Option<&'a HashSet<String>>,
}

// Process-wide account pool: selection, cooldowns, sticky sessions, lazy
// refresh. Accounts are loaded through the store and held detached in
// memory; the rotation index advance and candidate computation form a
// single critical section so concurrent selectors never collide.
pub struct TokenPool {
    store: Arc<dyn CloudAccountStore>,
    refresher: Arc<dyn AuthTokenRefresher>,
    tokens: DashMap<String, PooledToken>,
    rotation_index: Mutex<usize>,
    cooldowns: CooldownTracker,
    session_bindings: DashMap<String, SessionBinding>,
    sweeper: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl TokenPool {
    pub fn new(store: Arc<dyn CloudAccountStore>, refresher: Arc<dyn AuthTokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            tokens: DashMap::new(),
            rotation_index: Mutex::new(0),
            cooldowns: CooldownTracker::new(),
            session_bindings: DashMap::new(),
            sweeper: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    // Re-reads the store. Resets the rotation index so a reloaded pool
    // starts from a known position.
    pub async fn reload(&self) -> Result<usize, String> {
        let accounts = self
            .store
            .list_accounts()
            .await
            .map_err(|e| format!("failed to list accounts: {}", e))?;

        self.tokens.clear();
        for account in &accounts {
            self.tokens
                .insert(account.id.clone(), PooledToken::from_account(account));
        }
        if let Ok(mut index) = self.rotation_index.lock() {
            *index = 0;
        }

        tracing::info!("Token pool loaded {} account(s)", self.tokens.len());
        Ok(self.tokens.len())
    }

    pub fn account_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    // Selects an account for one request. Returns None only when the pool
    // is empty even after a reload attempt.
    pub async fn select_next(&self, opts: SelectOptions<'_>) -> Option<PooledToken> {
        if self.tokens.is_empty() {
            if let Err(e) = self.reload().await {
                tracing::warn!("Pool reload on empty access failed: {}", e);
            }
            if self.tokens.is_empty() {
                return None;
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.expire_session_bindings(now_ms);

        let picked = self.pick_candidate(opts.session_key, opts.exclude_account_ids, now_ms)?;
        Some(self.finalize_selection(picked, opts.session_key, now_ms).await)
    }

    // Candidate computation and rotation advance under one lock. No I/O in
    // here; refresh happens after the lock is released.
    fn pick_candidate(
        &self,
        session_key: Option<&str>,
        exclude: Option<&HashSet<String>>,
        now_ms: i64,
    ) -> Option<PooledToken> {
        let mut index = self.rotation_index.lock().ok()?;

        let mut all: Vec<PooledToken> = self.tokens.iter().map(|e| e.value().clone()).collect();
        // Deterministic rotation order regardless of map internals.
        all.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let excluded_ids = exclude.filter(|set| !set.is_empty());
        let mut candidates: Vec<&PooledToken> = match excluded_ids {
            Some(set) => all.iter().filter(|t| !set.contains(&t.account_id)).collect(),
            None => all.iter().collect(),
        };
        if candidates.is_empty() && excluded_ids.is_some() {
            tracing::warn!("All candidates excluded for this request, falling back to the full pool");
            candidates = all.iter().collect();
        }
        if candidates.is_empty() {
            return None;
        }

        let available: Vec<&PooledToken> = candidates
            .iter()
            .copied()
            .filter(|t| !self.cooldowns.is_cooled(&t.account_id, now_ms))
            .collect();
        let pool = if available.is_empty() {
            tracing::warn!("All candidate accounts are cooling down, bypassing cooldown to keep service available");
            candidates
        } else {
            available
        };

        if let Some(key) = session_key {
            if let Some(binding) = self.session_bindings.get(key) {
                if binding.expires_at > now_ms {
                    if let Some(bound) = pool.iter().find(|t| t.account_id == binding.account_id) {
                        tracing::debug!(
                            "Sticky session {}: reusing bound account {}",
                            key,
                            bound.email
                        );
                        return Some((*bound).clone());
                    }
                }
            }
        }

        let idx = *index % pool.len();
        *index = index.wrapping_add(1);
        Some(pool[idx].clone())
    }

    async fn finalize_selection(
        &self,
        mut token: PooledToken,
        session_key: Option<&str>,
        now_ms: i64,
    ) -> PooledToken {
        self.refresh_if_needed(&mut token).await;
        token.sanitize_project_id();

        if let Some(key) = session_key {
            self.session_bindings.insert(
                key.to_string(),
                SessionBinding {
                    account_id: token.account_id.clone(),
                    expires_at: now_ms + SESSION_BINDING_TTL_MS,
                },
            );
        }

        token
    }

    async fn refresh_if_needed(&self, token: &mut PooledToken) {
        let now = chrono::Utc::now().timestamp();
        if token.expiry_timestamp - now >= REFRESH_WINDOW_SECS {
            return;
        }

        match self.refresher.refresh(&token.refresh_token).await {
            Ok(fresh) => {
                token.access_token = fresh.access_token.clone();
                token.expires_in = fresh.expires_in;
                token.expiry_timestamp = now + fresh.expires_in;

                if let Some(mut entry) = self.tokens.get_mut(&token.account_id) {
                    entry.access_token = token.access_token.clone();
                    entry.expires_in = token.expires_in;
                    entry.expiry_timestamp = token.expiry_timestamp;
                }

                let persisted = AccountToken {
                    access_token: token.access_token.clone(),
                    refresh_token: token.refresh_token.clone(),
                    token_type: "Bearer".to_string(),
                    expires_in: token.expires_in,
                    expiry_timestamp: token.expiry_timestamp,
                    project_id: if token.project_id.is_empty() {
                        None
                    } else {
                        Some(token.project_id.clone())
                    },
                    session_id: None,
                    upstream_proxy_url: None,
                };
                if let Err(e) = self.store.update_token(&token.account_id, &persisted).await {
                    tracing::warn!("Failed to persist refreshed token for {}: {}", token.email, e);
                }
                tracing::info!("Refreshed access token for account {}", token.email);
            }
            Err(e) => {
                tracing::warn!(
                    "Token refresh failed for {}: {}. Proceeding with the stale token",
                    token.email,
                    e
                );
            }
        }
    }

    fn expire_session_bindings(&self, now_ms: i64) {
        self.session_bindings.retain(|_, b| b.expires_at > now_ms);
    }

    fn resolve_account_id(&self, id_or_email: &str) -> Option<String> {
        if self.tokens.contains_key(id_or_email) {
            return Some(id_or_email.to_string());
        }
        self.tokens
            .iter()
            .find(|e| e.email == id_or_email)
            .map(|e| e.account_id.clone())
    }

    pub fn mark_rate_limited(&self, id_or_email: &str) {
        if let Some(id) = self.resolve_account_id(id_or_email) {
            self.cooldowns.set(&id, RATE_LIMIT_COOLDOWN_MS);
            tracing::warn!("Account {} marked rate-limited, cooling down 5 minutes", id_or_email);
        } else {
            tracing::debug!("mark_rate_limited: unknown account {}", id_or_email);
        }
    }

    pub fn mark_forbidden(&self, id_or_email: &str) {
        if let Some(id) = self.resolve_account_id(id_or_email) {
            self.cooldowns.set(&id, FORBIDDEN_COOLDOWN_MS);
            tracing::warn!("Account {} marked forbidden, cooling down 30 minutes", id_or_email);
        } else {
            tracing::debug!("mark_forbidden: unknown account {}", id_or_email);
        }
    }

    pub fn cooldown_remaining_ms(&self, account_id: &str) -> i64 {
        self.cooldowns.remaining_ms(account_id)
    }

    // Drops expired cooldown entries every 15 seconds until shutdown.
    pub async fn start_cooldown_sweeper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let cleaned = pool.cooldowns.cleanup_expired();
                        if cleaned > 0 {
                            tracing::debug!("Cooldown sweeper removed {} expired record(s)", cleaned);
                        }
                    }
                }
            }
        });

        let mut guard = self.sweeper.lock().await;
        if let Some(old) = guard.take() {
            old.abort();
        }
        *guard = Some(handle);
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut guard = self.sweeper.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{account_fixture, MemoryAccountStore, StaticRefresher};
    use std::sync::atomic::Ordering;

    async fn pool_with(ids: &[&str]) -> Arc<TokenPool> {
        let store = Arc::new(MemoryAccountStore::new(
            ids.iter().map(|id| account_fixture(id)).collect(),
        ));
        let pool = Arc::new(TokenPool::new(store, Arc::new(StaticRefresher::default())));
        pool.reload().await.expect("initial load");
        pool
    }

    #[tokio::test]
    async fn round_robin_without_session_key() {
        let pool = pool_with(&["a", "b"]).await;
        let mut picked = Vec::new();
        for _ in 0..3 {
            let token = pool.select_next(SelectOptions::default()).await.unwrap();
            picked.push(token.account_id);
        }
        assert_eq!(picked, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn sticky_session_reuses_bound_account() {
        let pool = pool_with(&["a", "b"]).await;
        let opts = SelectOptions {
            session_key: Some("anthropic:s1"),
            exclude_account_ids: None,
        };
        let first = pool.select_next(opts).await.unwrap();
        for _ in 0..3 {
            let again = pool
                .select_next(SelectOptions {
                    session_key: Some("anthropic:s1"),
                    exclude_account_ids: None,
                })
                .await
                .unwrap();
            assert_eq!(again.account_id, first.account_id);
        }
    }

    #[tokio::test]
    async fn expired_session_binding_is_not_reused() {
        let pool = pool_with(&["a", "b"]).await;
        // Bind the session to "b", but in the past.
        pool.session_bindings.insert(
            "anthropic:s1".to_string(),
            SessionBinding {
                account_id: "b".to_string(),
                expires_at: chrono::Utc::now().timestamp_millis() - 1,
            },
        );

        let token = pool
            .select_next(SelectOptions {
                session_key: Some("anthropic:s1"),
                exclude_account_ids: None,
            })
            .await
            .unwrap();
        // Rotation starts from index 0, so the expired binding to "b" must
        // not win over round-robin.
        assert_eq!(token.account_id, "a");
    }

    #[tokio::test]
    async fn exclusions_remove_attempted_accounts() {
        let pool = pool_with(&["a", "b"]).await;
        let mut excluded = HashSet::new();
        excluded.insert("a".to_string());

        let token = pool
            .select_next(SelectOptions {
                session_key: None,
                exclude_account_ids: Some(&excluded),
            })
            .await
            .unwrap();
        assert_eq!(token.account_id, "b");
    }

    #[tokio::test]
    async fn full_exclusion_falls_back_to_whole_pool() {
        let pool = pool_with(&["a", "b"]).await;
        let excluded: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();

        let token = pool
            .select_next(SelectOptions {
                session_key: None,
                exclude_account_ids: Some(&excluded),
            })
            .await;
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn cooled_accounts_are_skipped() {
        let pool = pool_with(&["a", "b"]).await;
        pool.mark_rate_limited("a");

        for _ in 0..3 {
            let token = pool.select_next(SelectOptions::default()).await.unwrap();
            assert_eq!(token.account_id, "b");
        }
    }

    #[tokio::test]
    async fn all_cooled_bypasses_cooldown() {
        let pool = pool_with(&["a", "b"]).await;
        pool.mark_rate_limited("a");
        pool.mark_forbidden("b");

        let token = pool.select_next(SelectOptions::default()).await;
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn forbidden_cooldown_is_longer_than_rate_limit() {
        let pool = pool_with(&["a", "b"]).await;
        pool.mark_rate_limited("a");
        pool.mark_forbidden("b");

        let rate_limited = pool.cooldown_remaining_ms("a");
        let forbidden = pool.cooldown_remaining_ms("b");
        assert!(rate_limited > 4 * 60 * 1000 && rate_limited <= 5 * 60 * 1000);
        assert!(forbidden > 29 * 60 * 1000 && forbidden <= 30 * 60 * 1000);
    }

    #[tokio::test]
    async fn marks_resolve_by_email_too() {
        let pool = pool_with(&["a"]).await;
        pool.reload().await.unwrap();
        pool.mark_rate_limited("a@example.com");
        assert!(pool.cooldown_remaining_ms("a") > 0);
    }

    #[tokio::test]
    async fn empty_store_yields_none() {
        let store = Arc::new(MemoryAccountStore::new(Vec::new()));
        let pool = TokenPool::new(store, Arc::new(StaticRefresher::default()));
        assert!(pool.select_next(SelectOptions::default()).await.is_none());
    }

    #[tokio::test]
    async fn near_expiry_triggers_refresh_and_persists() {
        let mut account = account_fixture("a");
        account.token.expiry_timestamp = chrono::Utc::now().timestamp() + 60;
        let store = Arc::new(MemoryAccountStore::new(vec![account]));
        let refresher = Arc::new(StaticRefresher::default());
        let pool = TokenPool::new(store.clone(), refresher.clone());

        let token = pool.select_next(SelectOptions::default()).await.unwrap();
        assert_eq!(token.access_token, "refreshed-access-token");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.accounts.lock().unwrap()[0].token.access_token,
            "refreshed-access-token"
        );
    }

    #[tokio::test]
    async fn failed_refresh_proceeds_with_stale_token() {
        let mut account = account_fixture("a");
        account.token.expiry_timestamp = chrono::Utc::now().timestamp() + 60;
        let store = Arc::new(MemoryAccountStore::new(vec![account]));
        let refresher = Arc::new(StaticRefresher::failing());
        let pool = TokenPool::new(store, refresher);

        let token = pool.select_next(SelectOptions::default()).await.unwrap();
        assert_eq!(token.access_token, "access-token-a");
    }

    #[tokio::test]
    async fn synthetic_project_id_is_cleared_on_selection() {
        let mut account = account_fixture("a");
        account.token.project_id = Some("cloud-code-42".to_string());
        let store = Arc::new(MemoryAccountStore::new(vec![account]));
        let pool = TokenPool::new(store, Arc::new(StaticRefresher::default()));

        let token = pool.select_next(SelectOptions::default()).await.unwrap();
        assert!(token.project_id.is_empty());
    }
}
