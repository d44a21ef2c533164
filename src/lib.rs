//! expin: a small expense/income ledger served over HTTP, with named
//! invoice exports and an optional OAuth credential flow.

use std::sync::Arc;

use thiserror::Error;

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod documents;
pub mod error;
pub mod file_storage;
pub mod storage;

use crate::{
    api::AppState,
    auth::{AuthError, ClientSecret, CredentialHolder, OAuth, OAuthClient},
    clock::Clock,
    config::Config,
    documents::CachedDocuments,
    file_storage::{FileDocumentStore, JsonFileRecordStore},
    storage::StorageError,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("OAuth setup failed: {0}")]
    Auth(#[from] AuthError),
}

/// Opens the file-backed stores under the configured data directory and,
/// when enabled, loads the OAuth client. A missing client secret file is
/// fatal.
pub fn build_state(config: &Config, clock: Arc<dyn Clock>) -> Result<AppState, StartupError> {
    let records = JsonFileRecordStore::open(config.storage.ledger_path())?;
    let store = FileDocumentStore::open(config.storage.invoices_dir())?;
    tracing::info!(
        ledger = %records.path().display(),
        invoices = %config.storage.invoices_dir().display(),
        "Storage ready"
    );

    let oauth = if config.oauth.enabled {
        let secret = ClientSecret::from_file(&config.oauth.credentials_file)?;
        let client = OAuthClient::new(secret, config.oauth.scopes.clone())?;
        let credentials = CredentialHolder::load(config.oauth.token_file.clone());
        Some(Arc::new(OAuth::new(client, credentials, clock.clone())))
    } else {
        None
    };

    Ok(AppState {
        records: Arc::new(records),
        documents: CachedDocuments::new(Arc::new(store), clock, Some(config.cache.ttl())),
        oauth,
        reset_on_export: config.export.reset_ledger,
        metrics: None,
    })
}
