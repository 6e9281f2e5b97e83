use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Anthropic,
}

impl Default for Provider {
    fn default() -> Self {
        Self::Google
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    RateLimited,
    Expired,
}

// One pooled credential. `id` is stable and unique; `email` is a label and
// is never validated as an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub provider: Provider,
    pub email: String,
    pub token: AccountToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<Quota>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountToken {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    // Informational; expiry_timestamp is the authoritative deadline.
    #[serde(default)]
    pub expires_in: i64,
    // Absolute unix seconds.
    #[serde(default)]
    pub expiry_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_proxy_url: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_percentage: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn account_deserializes_with_defaults() {
        let account: Account = serde_json::from_value(json!({
            "id": "acc-1",
            "email": "a@example.com",
            "token": {
                "access_token": "ya29.test",
                "refresh_token": "1//refresh",
                "expires_in": 3599,
                "expiry_timestamp": 1700000000
            }
        }))
        .expect("account should deserialize");

        assert_eq!(account.provider, Provider::Google);
        assert!(account.is_active);
        assert_eq!(account.token.token_type, "Bearer");
        assert!(account.token.project_id.is_none());
    }

    #[test]
    fn status_round_trips_snake_case() {
        let s = serde_json::to_string(&AccountStatus::RateLimited).unwrap();
        assert_eq!(s, "\"rate_limited\"");
    }
}
