//! Installation-scoped GitHub API client.
//!
//! Wraps an installation access token together with its expiry. The broker
//! itself only mints these; the service sitting behind it drives the actual
//! API calls through the generic request helpers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GITHUB_ACCEPT, GITHUB_API_VERSION, USER_AGENT};

/// A GitHub client authenticated as one App installation.
///
/// The token is short-lived; check [`is_expired`](Self::is_expired) before
/// reusing a client that was minted earlier.
#[derive(Debug)]
pub struct InstallationClient {
    token: String,
    expires_at: DateTime<Utc>,
    http: reqwest::Client,
}

impl InstallationClient {
    pub(crate) fn new(token: String, expires_at: DateTime<Utc>, http: reqwest::Client) -> Self {
        Self {
            token,
            expires_at,
            http,
        }
    }

    /// The raw installation access token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When GitHub invalidates this token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Authenticated GET returning deserialized JSON.
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", GITHUB_ACCEPT)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse GitHub API response")
    }

    /// Authenticated POST with a JSON body, returning deserialized JSON.
    pub async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", GITHUB_ACCEPT)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .json(body)
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse GitHub API response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let http = reqwest::Client::new();

        let live = InstallationClient::new(
            "ghs_token".to_string(),
            Utc::now() + Duration::minutes(30),
            http.clone(),
        );
        assert!(!live.is_expired());

        let stale = InstallationClient::new(
            "ghs_token".to_string(),
            Utc::now() - Duration::seconds(1),
            http,
        );
        assert!(stale.is_expired());
    }
}
