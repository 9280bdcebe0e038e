//! User authentication: the GitHub OAuth2 authorization-code flow and the
//! broker's own signed session tokens.
//!
//! The [`Authenticator`] is built once at startup and shared read-only across
//! handlers. Login state rides in a short-lived signed token handed back to
//! the client, so concurrent login attempts never share any server-side slot.
//! Sessions are self-contained HS256 tokens; verifying one needs no lookup.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError};
use crate::github::{GITHUB_ACCEPT, GITHUB_API_VERSION, USER_AGENT};

/// Per-request failures of the login flow.
///
/// The externally visible response for each variant is generic; the carried
/// detail exists for logs only and must never reach the client.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Callback state missing, expired, already consumed, or not ours.
    /// Security-relevant: always a rejection, checked before any network call.
    #[error("login state mismatch")]
    StateMismatch,

    #[error("code exchange failed: {0}")]
    OAuthExchange(String),

    #[error("identity fetch failed: {0}")]
    IdentityFetch(String),

    #[error("failed to sign token: {0}")]
    TokenMint(#[from] jsonwebtoken::errors::Error),
}

/// Why a presented session token was rejected. Internal distinction only;
/// every variant maps to the same generic unauthenticated response.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session expired")]
    Expired,

    #[error("invalid session signature")]
    InvalidSignature,

    #[error("malformed session token")]
    Malformed,
}

/// Claims of the short-lived login-state token. `jti` is the nonce that also
/// travels through GitHub as the OAuth `state` parameter.
#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    jti: String,
    iat: i64,
    exp: i64,
}

/// Claims of an issued session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// GitHub login of the authenticated user.
    pub sub: String,
    /// Numeric GitHub user ID.
    pub uid: i64,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}

/// A freshly minted session token together with its decoded claims.
pub struct SessionToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// A started login attempt: the nonce for the authorize URL and the signed
/// token binding it to this client.
pub struct LoginAttempt {
    pub state: String,
    pub state_token: String,
    pub authorize_url: String,
}

/// Identity returned by the user endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: i64,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth2 login flow plus session issuance and verification.
pub struct Authenticator {
    client_id: String,
    client_secret: String,
    redirect_url: Url,
    authorize_url: Url,
    token_url: Url,
    user_url: Url,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl: Duration,
    state_ttl: Duration,
    cookie_secure: bool,
    http: reqwest::Client,
}

impl Authenticator {
    /// Build the authenticator from validated configuration. URL problems are
    /// caught here, once, so no per-request path can hit them.
    pub fn new(config: &Config, http: reqwest::Client) -> Result<Self, ConfigError> {
        let base_url = config.parse_base_url()?;
        let redirect_url =
            base_url
                .join("/login/callback")
                .map_err(|e| ConfigError::InvalidBaseUrl {
                    url: config.server.base_url.clone(),
                    reason: e.to_string(),
                })?;

        let parse_endpoint = |field: &'static str, value: &str| {
            Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: e.to_string(),
            })
        };
        let authorize_url = parse_endpoint("oauth.authorize_url", &config.oauth.authorize_url)?;
        let token_url = parse_endpoint("oauth.token_url", &config.oauth.token_url)?;
        let user_url = parse_endpoint("oauth.user_url", &config.oauth.user_url)?;

        let cookie_secure = base_url.scheme() == "https";

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            redirect_url,
            authorize_url,
            token_url,
            user_url,
            encoding_key: EncodingKey::from_secret(config.oauth.signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.oauth.signing_key.as_bytes()),
            session_ttl: Duration::seconds(config.oauth.session_ttl_secs as i64),
            state_ttl: Duration::seconds(config.oauth.state_ttl_secs as i64),
            cookie_secure,
            http,
        })
    }

    pub fn session_ttl_secs(&self) -> i64 {
        self.session_ttl.num_seconds()
    }

    pub fn state_ttl_secs(&self) -> i64 {
        self.state_ttl.num_seconds()
    }

    /// Whether issued cookies should carry the `Secure` attribute.
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    /// Start a login attempt: fresh random nonce, signed state token, and the
    /// authorize URL to redirect the browser to. No network call.
    pub fn begin_login(&self) -> Result<LoginAttempt, AuthError> {
        let mut rng = rand::rng();
        let nonce: [u8; 32] = rng.random();
        let state = hex::encode(nonce);

        let now = Utc::now();
        let claims = StateClaims {
            jti: state.clone(),
            iat: now.timestamp(),
            exp: (now + self.state_ttl).timestamp(),
        };
        let state_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        let mut authorize_url = self.authorize_url.clone();
        authorize_url
            .query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("state", &state);

        Ok(LoginAttempt {
            state,
            state_token,
            authorize_url: authorize_url.into(),
        })
    }

    /// Validate the callback's `state` parameter against the state token the
    /// client presented. Must pass before any network call is made.
    pub fn verify_state(
        &self,
        state_token: Option<&str>,
        state_param: &str,
    ) -> Result<(), AuthError> {
        let state_token = state_token.ok_or(AuthError::StateMismatch)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<StateClaims>(state_token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!(kind = ?e.kind(), "state token rejected");
                AuthError::StateMismatch
            })?;

        let matches: bool = data
            .claims
            .jti
            .as_bytes()
            .ct_eq(state_param.as_bytes())
            .into();
        if !matches {
            return Err(AuthError::StateMismatch);
        }

        Ok(())
    }

    /// Exchange the authorization code for a GitHub OAuth access token.
    ///
    /// GitHub reports exchange failures both as non-2xx responses and as
    /// 200 bodies carrying an `error` field; both are rejections.
    pub async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::OAuthExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::OAuthExchange(format!("{} - {}", status, body)));
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::OAuthExchange(e.to_string()))?;

        if let Some(error) = body.error {
            let description = body.error_description.unwrap_or_default();
            return Err(AuthError::OAuthExchange(format!(
                "{} {}",
                error, description
            )));
        }

        body.access_token
            .ok_or_else(|| AuthError::OAuthExchange("response missing access_token".to_string()))
    }

    /// Fetch the authenticated user's identity with the OAuth access token.
    pub async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, AuthError> {
        let response = self
            .http
            .get(self.user_url.clone())
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", GITHUB_ACCEPT)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(|e| AuthError::IdentityFetch(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::IdentityFetch(format!("{} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::IdentityFetch(e.to_string()))
    }

    /// Mint a session token for an authenticated user.
    pub fn mint_session(&self, user: &GitHubUser) -> Result<SessionToken, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.login.clone(),
            uid: user.id,
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(SessionToken { token, claims })
    }

    /// Verify a presented session token: signature first, then strict expiry
    /// (zero leeway). Callers must map every variant to the same generic
    /// unauthenticated response.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        match decode::<SessionClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(SessionError::Expired),
                ErrorKind::InvalidSignature => Err(SessionError::InvalidSignature),
                _ => Err(SessionError::Malformed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.oauth.client_id = "Iv1.test".to_string();
        config.oauth.client_secret = "secret".to_string();
        config.oauth.signing_key = "0123456789abcdef0123456789abcdef".to_string();
        config
    }

    fn test_authenticator() -> Authenticator {
        Authenticator::new(&test_config(), reqwest::Client::new()).unwrap()
    }

    fn test_user() -> GitHubUser {
        GitHubUser {
            login: "alice".to_string(),
            id: 1,
            name: Some("Alice".to_string()),
            avatar_url: None,
        }
    }

    /// Sign arbitrary claims with the authenticator's key.
    fn sign_with<T: Serialize>(auth: &Authenticator, claims: &T) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &auth.encoding_key).unwrap()
    }

    #[test]
    fn test_rejects_unjoinable_base_url() {
        let mut config = test_config();
        config.server.base_url = "http://".to_string();
        assert!(Authenticator::new(&config, reqwest::Client::new()).is_err());
    }

    #[test]
    fn test_begin_login_builds_authorize_url() {
        let auth = test_authenticator();
        let attempt = auth.begin_login().unwrap();

        let url = Url::parse(&attempt.authorize_url).unwrap();
        assert_eq!(url.host_str(), Some("github.com"));

        let params: std::collections::HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(params["client_id"], "Iv1.test");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/login/callback");
        assert_eq!(params["state"], attempt.state.as_str());
        // 32 random bytes, hex-encoded
        assert_eq!(attempt.state.len(), 64);
    }

    #[test]
    fn test_login_attempts_get_distinct_states() {
        let auth = test_authenticator();
        let first = auth.begin_login().unwrap();
        let second = auth.begin_login().unwrap();
        assert_ne!(first.state, second.state);

        // Each attempt only validates against its own state
        assert!(auth
            .verify_state(Some(&first.state_token), &first.state)
            .is_ok());
        assert!(auth
            .verify_state(Some(&second.state_token), &second.state)
            .is_ok());
        assert!(matches!(
            auth.verify_state(Some(&first.state_token), &second.state),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_missing_state_token_rejected() {
        let auth = test_authenticator();
        let attempt = auth.begin_login().unwrap();
        assert!(matches!(
            auth.verify_state(None, &attempt.state),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_expired_state_rejected() {
        let auth = test_authenticator();
        let now = Utc::now();
        let claims = StateClaims {
            jti: "a".repeat(64),
            iat: (now - Duration::minutes(20)).timestamp(),
            exp: (now - Duration::minutes(10)).timestamp(),
        };
        let stale = sign_with(&auth, &claims);

        assert!(matches!(
            auth.verify_state(Some(&stale), &"a".repeat(64)),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_foreign_state_token_rejected() {
        let auth = test_authenticator();

        let mut other_config = test_config();
        other_config.oauth.signing_key = "ffffffffffffffffffffffffffffffff".to_string();
        let other = Authenticator::new(&other_config, reqwest::Client::new()).unwrap();

        let attempt = other.begin_login().unwrap();
        assert!(matches!(
            auth.verify_state(Some(&attempt.state_token), &attempt.state),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_session_round_trip() {
        let auth = test_authenticator();
        let minted = auth.mint_session(&test_user()).unwrap();

        let claims = auth.verify_session(&minted.token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.uid, 1);
        assert_eq!(claims.exp - claims.iat, auth.session_ttl_secs());
    }

    #[test]
    fn test_expired_session_rejected() {
        let auth = test_authenticator();
        let now = Utc::now();
        let claims = SessionClaims {
            sub: "alice".to_string(),
            uid: 1,
            iat: (now - Duration::hours(13)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
        };
        let stale = sign_with(&auth, &claims);

        assert_eq!(auth.verify_session(&stale), Err(SessionError::Expired));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let auth = test_authenticator();
        let minted = auth.mint_session(&test_user()).unwrap();

        // Corrupt one character well inside the signature segment
        let mut token = minted.token;
        let flip_at = token.len() - 10;
        let original = token.as_bytes()[flip_at];
        let replacement = if original == b'A' { 'B' } else { 'A' };
        token.replace_range(flip_at..flip_at + 1, &replacement.to_string());

        assert_eq!(
            auth.verify_session(&token),
            Err(SessionError::InvalidSignature)
        );
    }

    #[test]
    fn test_garbage_session_rejected() {
        let auth = test_authenticator();
        assert_eq!(
            auth.verify_session("not-a-token"),
            Err(SessionError::Malformed)
        );
        assert_eq!(auth.verify_session(""), Err(SessionError::Malformed));
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_exchange_code_ok() {
        let router = Router::new().route(
            "/token",
            post(|| async {
                Json(serde_json::json!({
                    "access_token": "gho_usertoken",
                    "token_type": "bearer",
                    "scope": ""
                }))
            }),
        );
        let base = spawn_server(router).await;

        let mut config = test_config();
        config.oauth.token_url = format!("{}/token", base);
        let auth = Authenticator::new(&config, reqwest::Client::new()).unwrap();

        let token = auth.exchange_code("good-code").await.unwrap();
        assert_eq!(token, "gho_usertoken");
    }

    #[tokio::test]
    async fn test_exchange_code_error_body() {
        // GitHub answers 200 with an error field for a bad code
        let router = Router::new().route(
            "/token",
            post(|| async {
                Json(serde_json::json!({
                    "error": "bad_verification_code",
                    "error_description": "The code passed is incorrect or expired."
                }))
            }),
        );
        let base = spawn_server(router).await;

        let mut config = test_config();
        config.oauth.token_url = format!("{}/token", base);
        let auth = Authenticator::new(&config, reqwest::Client::new()).unwrap();

        let err = auth.exchange_code("bad-code").await.unwrap_err();
        assert!(matches!(err, AuthError::OAuthExchange(_)));
    }
}
