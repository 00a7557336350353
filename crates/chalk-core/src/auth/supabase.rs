//! Supabase GoTrue client

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    AuthError, AuthResult, AuthSession, AuthUser, Identity, IdentityProvider, SessionPersistence,
};
use crate::util::is_http_url;

/// Email/password auth against a Supabase project.
///
/// The last known session is cached in memory and persisted through `S`;
/// expired sessions are refreshed on demand.
pub struct SupabaseAuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
    cached: Mutex<Option<AuthSession>>,
}

impl<S: SessionPersistence> SupabaseAuthClient<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
            cached: Mutex::new(None),
        })
    }

    /// Load the persisted session, refreshing it when expired. A session
    /// that cannot be refreshed is cleared.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.cached().or(self.store.load_session()?) else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            self.remember(Some(stored_session.clone()));
            return Ok(Some(stored_session));
        }

        match self.refresh_session(&stored_session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.remember(None);
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        let session = self
            .grant("password", json!({ "email": email, "password": password }))
            .await?;
        tracing::info!("Signed in as {}", session.user.id);
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }
        let session = self
            .grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        tracing::debug!("Refreshed session for {}", session.user.id);
        Ok(session)
    }

    /// Revoke the session remotely and forget it locally. An already
    /// invalid token still clears local state.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let Some(session) = self.cached().or(self.store.load_session()?) else {
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            ensure_success(response).await?;
        }

        self.remember(None);
        self.store.clear_session()?;
        tracing::info!("Signed out {}", session.user.id);
        Ok(())
    }

    /// `POST /token?grant_type=...`; the resulting session is persisted and cached.
    async fn grant(&self, grant_type: &str, body: Value) -> AuthResult<AuthSession> {
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&body)
            .send()
            .await?;
        let session = ensure_success(response)
            .await?
            .json::<SupabaseAuthResponse>()
            .await?
            .into_session()?;

        self.store.save_session(&session)?;
        self.remember(Some(session.clone()));
        Ok(session)
    }

    fn cached(&self) -> Option<AuthSession> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, session: Option<AuthSession>) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

#[async_trait]
impl<S: SessionPersistence> IdentityProvider for SupabaseAuthClient<S> {
    async fn current_identity(&self) -> Option<Identity> {
        match self.restore_session().await {
            Ok(session) => session.map(|session| session.identity()),
            Err(error) => {
                tracing::warn!("Failed to resolve signed-in identity: {error}");
                None
            }
        }
    }
}

async fn ensure_success(response: Response) -> AuthResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AuthError::Api(parse_api_error(status, &body)))
}

/// `https://x.supabase.co` -> `https://x.supabase.co/auth/v1`
pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !is_http_url(trimmed) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::Api("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
}

impl SupabaseAuthResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| chrono::Utc::now().timestamp().saturating_add(expires_in))
        });

        match (self.access_token, self.refresh_token, expires_at, self.user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user: AuthUser {
                        id: user.id,
                        email: user.email,
                    },
                })
            }
            _ => Err(AuthError::Api(
                "Auth response did not include an active session".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

pub fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", crate::util::compact_text(trimmed), status.as_u16())
    }
}
