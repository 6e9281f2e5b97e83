use crate::error::{AppError, AppResult};
use crate::models::{Account, AccountToken};
use async_trait::async_trait;
use std::path::PathBuf;

// Persistence seam for account records. The pool only ever lists records
// and writes refreshed tokens back; everything else (creation, OAuth
// consent, deletion) belongs to the host application.
#[async_trait]
pub trait CloudAccountStore: Send + Sync {
    async fn list_accounts(&self) -> AppResult<Vec<Account>>;
    async fn update_token(&self, account_id: &str, token: &AccountToken) -> AppResult<()>;
}

// One JSON file per account under `<data_dir>/accounts/`.
pub struct FileAccountStore {
    accounts_dir: PathBuf,
}

impl FileAccountStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            accounts_dir: data_dir.into().join("accounts"),
        }
    }

    fn account_path(&self, account_id: &str) -> PathBuf {
        self.accounts_dir.join(format!("{}.json", account_id))
    }
}

#[async_trait]
impl CloudAccountStore for FileAccountStore {
    async fn list_accounts(&self) -> AppResult<Vec<Account>> {
        if !self.accounts_dir.exists() {
            return Ok(Vec::new());
        }

        let mut accounts = Vec::new();
        for entry in std::fs::read_dir(&self.accounts_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("Failed to read account file {:?}: {}", path, e);
                    continue;
                }
            };

            match serde_json::from_str::<Account>(&content) {
                Ok(account) => {
                    if !account.is_active {
                        tracing::debug!(
                            "Skipping inactive account file: {:?} (email={})",
                            path,
                            account.email
                        );
                        continue;
                    }
                    accounts.push(account);
                }
                Err(e) => {
                    tracing::debug!("Failed to parse account file {:?}: {}", path, e);
                }
            }
        }

        Ok(accounts)
    }

    async fn update_token(&self, account_id: &str, token: &AccountToken) -> AppResult<()> {
        let path = self.account_path(account_id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Account(format!("account file missing for {}: {}", account_id, e))
        })?;
        let mut account: Account = serde_json::from_str(&content)?;
        account.token = token.clone();
        account.last_used = Some(chrono::Utc::now().timestamp());
        std::fs::write(&path, serde_json::to_string_pretty(&account)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (FileAccountStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("trestle-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("accounts")).unwrap();
        (FileAccountStore::new(dir.clone()), dir)
    }

    fn write_account(dir: &PathBuf, id: &str, is_active: bool) {
        let body = json!({
            "id": id,
            "email": format!("{}@example.com", id),
            "is_active": is_active,
            "token": {
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 3599,
                "expiry_timestamp": 4102444800i64
            }
        });
        std::fs::write(
            dir.join("accounts").join(format!("{}.json", id)),
            serde_json::to_string_pretty(&body).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn lists_active_accounts_and_skips_inactive() {
        let (store, dir) = temp_store();
        write_account(&dir, "a", true);
        write_account(&dir, "b", false);
        std::fs::write(dir.join("accounts/garbage.json"), "{not json").unwrap();

        let accounts = store.list_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, "a");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn update_token_persists_new_access_token() {
        let (store, dir) = temp_store();
        write_account(&dir, "a", true);

        let mut token: AccountToken = serde_json::from_value(json!({
            "access_token": "fresh",
            "refresh_token": "rt",
            "expires_in": 3599,
            "expiry_timestamp": 4102444800i64
        }))
        .unwrap();
        token.project_id = Some("proj".to_string());
        store.update_token("a", &token).await.unwrap();

        let reloaded = store.list_accounts().await.unwrap();
        assert_eq!(reloaded[0].token.access_token, "fresh");
        assert_eq!(reloaded[0].token.project_id.as_deref(), Some("proj"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_accounts_dir_is_empty_not_error() {
        let store = FileAccountStore::new(std::env::temp_dir().join("trestle-does-not-exist"));
        let accounts = store.list_accounts().await.unwrap();
        assert!(accounts.is_empty());
    }
}
