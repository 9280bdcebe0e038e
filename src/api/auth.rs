//! Login, callback and whoami handlers.
//!
//! The state nonce and the session token both travel as `HttpOnly` cookies;
//! the session token is additionally returned in the callback body and
//! accepted as a bearer token, for clients that prefer headers over cookies.

use axum::extract::{Query, State};
use axum::http::header::{HeaderValue, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::SessionToken;
use crate::AppState;

/// Cookie carrying the signed login-state token between /login and the
/// callback.
pub const STATE_COOKIE: &str = "hubgate_state";
/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "hubgate_session";

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by GitHub instead of `code` when the user cancels or the request
    /// is invalid.
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub login: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub login: String,
    pub id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Build a Set-Cookie value. `Max-Age=0` clears the cookie.
fn cookie_header(name: &str, value: &str, max_age_secs: i64, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    // Cookie names and token values are ASCII by construction
    HeaderValue::from_str(&cookie).expect("cookie header is valid ASCII")
}

/// GET /login - start a login attempt.
///
/// Issues a fresh state nonce bound to this client through a signed cookie
/// and redirects to GitHub's authorize endpoint. No network call happens
/// here.
pub async fn login(State(app): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let attempt = app.auth.begin_login()?;

    let state_cookie = cookie_header(
        STATE_COOKIE,
        &attempt.state_token,
        app.auth.state_ttl_secs(),
        app.auth.cookie_secure(),
    );
    let location =
        HeaderValue::from_str(&attempt.authorize_url).map_err(|_| {
            ApiError::internal("authorize URL is not a valid header value")
        })?;

    Ok((
        StatusCode::FOUND,
        AppendHeaders([(LOCATION, location), (SET_COOKIE, state_cookie)]),
    ))
}

/// GET /login/callback - finish a login attempt.
///
/// The state cookie is consumed on every callback, success or not, so an
/// already-used state can never be replayed.
pub async fn callback(
    State(app): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let state_token = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let secure = app.auth.cookie_secure();

    let mut response = match complete_login(&app, state_token.as_deref(), &query).await {
        Ok(session) => {
            let session_cookie = cookie_header(
                SESSION_COOKIE,
                &session.token,
                app.auth.session_ttl_secs(),
                secure,
            );
            let body = SessionResponse {
                login: session.claims.sub.clone(),
                expires_at: session.claims.expires_at(),
                token: session.token,
            };
            tracing::info!(login = %body.login, "user authenticated");
            (AppendHeaders([(SET_COOKIE, session_cookie)]), Json(body)).into_response()
        }
        Err(e) => e.into_response(),
    };

    // Consume the state cookie exactly once, on every outcome
    response
        .headers_mut()
        .append(SET_COOKIE, cookie_header(STATE_COOKIE, "", 0, secure));
    response
}

async fn complete_login(
    app: &AppState,
    state_token: Option<&str>,
    query: &CallbackQuery,
) -> Result<SessionToken, ApiError> {
    if let Some(error) = &query.error {
        tracing::warn!(%error, "GitHub reported a login error");
        return Err(ApiError::bad_request("GitHub login was cancelled or failed"));
    }

    // CSRF defense: checked before anything leaves this process
    let state_param = query
        .state
        .as_deref()
        .ok_or(crate::auth::AuthError::StateMismatch)?;
    app.auth.verify_state(state_token, state_param)?;

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing code parameter"))?;

    let access_token = app.auth.exchange_code(code).await?;
    let user = app.auth.fetch_user(&access_token).await?;
    let session = app.auth.mint_session(&user)?;
    Ok(session)
}

/// GET /whoami - resolve the presented session token to an identity.
///
/// Every failure (missing, malformed, forged, expired) produces the same
/// generic 401; the distinction only exists in the logs.
pub async fn whoami(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<WhoAmIResponse>, ApiError> {
    let token = extract_token(&headers, &jar).ok_or_else(|| {
        tracing::debug!("whoami without a session token");
        ApiError::unauthenticated()
    })?;

    match app.auth.verify_session(&token) {
        Ok(claims) => {
            let expires_at = claims.expires_at();
            Ok(Json(WhoAmIResponse {
                login: claims.sub,
                id: claims.uid,
                expires_at,
            }))
        }
        Err(reason) => {
            tracing::debug!(%reason, "session token rejected");
            Err(ApiError::unauthenticated())
        }
    }
}

/// Extract the session token: Authorization header first, cookie fallback.
fn extract_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}
