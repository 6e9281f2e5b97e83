use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: i64,
}

// Exchange seam: refresh_token in, fresh access token out. The pool never
// talks OAuth directly.
#[async_trait]
pub trait AuthTokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> AppResult<RefreshedToken>;
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct GoogleTokenRefresher {
    client: reqwest::Client,
}

impl GoogleTokenRefresher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for GoogleTokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthTokenRefresher for GoogleTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> AppResult<RefreshedToken> {
        let params = [
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.client.post(TOKEN_URL).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Account(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let parsed: TokenEndpointResponse = response.json().await?;
        Ok(RefreshedToken {
            access_token: parsed.access_token,
            expires_in: parsed.expires_in.unwrap_or(3600),
        })
    }
}
