use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use axum::{
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::{clock::Clock, error::ApiError};

const MAX_PENDING_STATES: usize = 32;
const EXPIRY_SKEW: Duration = Duration::seconds(60);
const TOKEN_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    NotAuthorized(String),
    #[error("invalid or expired authorization state")]
    InvalidState,
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("invalid OAuth client configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// OAuth client registration, as found under the `installed` or `web` key
/// of a downloaded client secret file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AuthError> {
        let file: ClientSecretFile =
            serde_json::from_str(contents).map_err(|e| AuthError::Config(e.to_string()))?;
        let secret = file
            .installed
            .or(file.web)
            .ok_or_else(|| AuthError::Config("expected an \"installed\" or \"web\" client".to_string()))?;
        if secret.redirect_uris.is_empty() {
            return Err(AuthError::Config("client has no redirect_uris".to_string()));
        }
        Ok(secret)
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris.first().map(String::as_str).unwrap_or_default()
    }
}

/// Stored access credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<OffsetDateTime>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Treats the credential as expired slightly early so it is not used
    /// right at the edge of its lifetime.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| now + EXPIRY_SKEW >= at)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, now: OffsetDateTime, previous_refresh: Option<String>) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            token_type: self.token_type.unwrap_or_else(default_token_type),
            scope: self.scope,
            // A lifetime past the representable date range is kept as no expiry.
            expires_at: self
                .expires_in
                .and_then(|secs| now.checked_add(Duration::seconds(secs))),
        }
    }
}

pub struct OAuthClient {
    secret: ClientSecret,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(secret: ClientSecret, scopes: Vec<String>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self { secret, scopes, http })
    }

    /// Consent URL asking for offline access, so the exchange yields a
    /// refresh token.
    pub fn authorize_url(&self, state: &str) -> Result<String, AuthError> {
        let scope = self.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", self.secret.redirect_uri()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::Config(format!("auth_uri: {}", e)))?;
        Ok(url.into())
    }

    pub async fn exchange(&self, code: &str, now: OffsetDateTime) -> Result<Credential, AuthError> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("redirect_uri", self.secret.redirect_uri()),
            ])
            .await?;
        Ok(response.into_credential(now, None))
    }

    pub async fn refresh(&self, credential: &Credential, now: OffsetDateTime) -> Result<Credential, AuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::NotAuthorized("credential has no refresh token".to_string()))?;
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
            ])
            .await?;
        Ok(response.into_credential(now, credential.refresh_token.clone()))
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("token endpoint returned {}: {}", status, body)));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))
    }
}

/// The persisted credential and its in-memory copy.
pub struct CredentialHolder {
    path: PathBuf,
    current: tokio::sync::Mutex<Option<Credential>>,
}

impl CredentialHolder {
    /// Loads the credential file if there is one. An unreadable file is
    /// logged and treated as no credential.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<Credential>(&json) {
                Ok(credential) => Some(credential),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid stored credential");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read stored credential");
                None
            }
        };
        Self {
            path,
            current: tokio::sync::Mutex::new(current),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn store(&self, credential: Credential) -> Result<(), AuthError> {
        let mut current = self.current.lock().await;
        self.persist(&credential).await?;
        *current = Some(credential);
        Ok(())
    }

    /// Returns a usable credential, refreshing an expired one when it
    /// carries a refresh token.
    pub async fn current(&self, client: &OAuthClient, clock: &dyn Clock) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        let credential = current.as_ref().ok_or_else(|| {
            AuthError::NotAuthorized("no stored credential; visit /auth to authorize".to_string())
        })?;

        let now = clock.now();
        if !credential.is_expired(now) {
            return Ok(credential.clone());
        }
        if credential.refresh_token.is_none() {
            return Err(AuthError::NotAuthorized(
                "stored credential expired; visit /auth to authorize again".to_string(),
            ));
        }

        let refreshed = client.refresh(credential, now).await.map_err(|e| {
            tracing::warn!(error = %e, "Credential refresh failed");
            AuthError::NotAuthorized("credential refresh failed; visit /auth to authorize again".to_string())
        })?;
        self.persist(&refreshed).await?;
        tracing::info!("Credential refreshed");
        *current = Some(refreshed.clone());
        Ok(refreshed)
    }

    async fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(credential)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Authorization flow state shared by the `/auth` routes and the
/// credential middleware.
pub struct OAuth {
    client: OAuthClient,
    credentials: CredentialHolder,
    clock: Arc<dyn Clock>,
    pending_states: Mutex<VecDeque<String>>,
}

impl OAuth {
    pub fn new(client: OAuthClient, credentials: CredentialHolder, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            credentials,
            clock,
            pending_states: Mutex::new(VecDeque::new()),
        }
    }

    /// Starts an authorization and returns the consent URL to redirect to.
    pub fn begin(&self) -> Result<String, AuthError> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = self.client.authorize_url(&state)?;
        let mut pending = self.pending_states.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() == MAX_PENDING_STATES {
            pending.pop_front();
        }
        pending.push_back(state);
        Ok(url)
    }

    /// Finishes an authorization: checks `state`, exchanges `code` and
    /// persists the resulting credential.
    pub async fn complete(&self, code: &str, state: &str) -> Result<Credential, AuthError> {
        self.take_state(state)?;
        let credential = self.client.exchange(code, self.clock.now()).await?;
        self.credentials.store(credential.clone()).await?;
        tracing::info!(path = %self.credentials.path().display(), "Credential stored");
        Ok(credential)
    }

    pub async fn credential(&self) -> Result<Credential, AuthError> {
        self.credentials.current(&self.client, self.clock.as_ref()).await
    }

    fn take_state(&self, state: &str) -> Result<(), AuthError> {
        let mut pending = self.pending_states.lock().unwrap_or_else(PoisonError::into_inner);
        let position = pending
            .iter()
            .position(|p| bool::from(p.as_bytes().ct_eq(state.as_bytes())))
            .ok_or(AuthError::InvalidState)?;
        pending.remove(position);
        Ok(())
    }
}

/// Rejects requests with 401 until a usable credential is stored.
pub async fn require_credential<B>(
    Extension(oauth): Extension<Arc<OAuth>>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    match oauth.credential().await {
        Ok(_) => next.run(req).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}
