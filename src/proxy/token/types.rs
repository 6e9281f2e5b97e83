use crate::models::Account;
use once_cell::sync::Lazy;
use regex::Regex;

// Placeholder project ids stamped by some login flows; upstream rejects
// them with licensing errors, so they are cleared before use.
static SYNTHETIC_PROJECT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^cloud-code-\d+$").expect("synthetic project id regex"));

pub fn is_synthetic_project_id(project_id: &str) -> bool {
    SYNTHETIC_PROJECT_ID.is_match(project_id)
}

// In-memory view of one pooled credential, detached from the persisted
// account record so selection never touches the store.
#[derive(Debug, Clone)]
pub struct PooledToken {
    pub account_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub expiry_timestamp: i64,
    pub project_id: String,
}

impl PooledToken {
    pub fn from_account(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            email: account.email.clone(),
            access_token: account.token.access_token.clone(),
            refresh_token: account.token.refresh_token.clone(),
            expires_in: account.token.expires_in,
            expiry_timestamp: account.token.expiry_timestamp,
            project_id: account.token.project_id.clone().unwrap_or_default(),
        }
    }

    // Clears placeholder project ids in place.
    pub fn sanitize_project_id(&mut self) {
        if !self.project_id.is_empty() && is_synthetic_project_id(&self.project_id) {
            tracing::debug!(
                "Discarding synthetic project_id '{}' for account {}",
                self.project_id,
                self.email
            );
            self.project_id.clear();
        }
    }
}
