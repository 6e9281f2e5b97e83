use crate::error::{AppError, AppResult};
use crate::models::{Account, AccountToken, Provider};
use crate::proxy::token::{AuthTokenRefresher, CloudAccountStore, RefreshedToken};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn account_fixture(id: &str) -> Account {
    Account {
        id: id.to_string(),
        provider: Provider::Google,
        email: format!("{}@example.com", id),
        token: AccountToken {
            access_token: format!("access-token-{}", id),
            refresh_token: format!("refresh-token-{}", id),
            token_type: "Bearer".to_string(),
            expires_in: 3599,
            // Far in the future so tests do not trip the refresh window.
            expiry_timestamp: 4_102_444_800,
            project_id: None,
            session_id: None,
            upstream_proxy_url: None,
        },
        quota: None,
        status: None,
        is_active: true,
        created_at: None,
        last_used: None,
    }
}

pub struct MemoryAccountStore {
    pub accounts: Mutex<Vec<Account>>,
}

impl MemoryAccountStore {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: Mutex::new(accounts),
        }
    }
}

#[async_trait]
impl CloudAccountStore for MemoryAccountStore {
    async fn list_accounts(&self) -> AppResult<Vec<Account>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn update_token(&self, account_id: &str, token: &AccountToken) -> AppResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.iter_mut().find(|a| a.id == account_id) {
            Some(account) => {
                account.token = token.clone();
                Ok(())
            }
            None => Err(AppError::Account(format!("no such account: {}", account_id))),
        }
    }
}

#[derive(Default)]
pub struct StaticRefresher {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StaticRefresher {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl AuthTokenRefresher for StaticRefresher {
    async fn refresh(&self, _refresh_token: &str) -> AppResult<RefreshedToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Account("invalid_grant".to_string()));
        }
        Ok(RefreshedToken {
            access_token: "refreshed-access-token".to_string(),
            expires_in: 3600,
        })
    }
}
