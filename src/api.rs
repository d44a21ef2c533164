use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{MatchedPath, Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use expin_core::{Area, LedgerEntry, LedgerSummary};

use crate::{
    auth::{require_credential, OAuth},
    documents::CachedDocuments,
    error::ApiError,
    storage::RecordStore,
};

pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub documents: CachedDocuments,
    pub oauth: Option<Arc<OAuth>>,
    pub reset_on_export: bool,
    pub metrics: Option<PrometheusHandle>,
}

/// Body of `POST /api/data`. Exactly one of the three shapes is accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DataRequest {
    Replace(Vec<LedgerEntry>),
    Append(LedgerEntry),
    Clear(ClearRequest),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClearRequest {
    pub clear: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportRequest {
    pub title: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveRequest {
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub area: Area,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct LedgerResponse {
    message: &'static str,
    count: usize,
}

#[derive(Serialize)]
struct DocumentResponse {
    message: String,
    file: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveResponse {
    moved_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let ledger = Router::new()
        .route("/api/data", get(get_data).post(post_data))
        .route("/api/entries", post(post_entry))
        .route("/api/summary", get(get_summary))
        .route("/api/clear", post(clear_data))
        .route("/reset", post(clear_data));

    let documents = Router::new()
        .route("/api/export", post(export))
        .route("/api/invoice/:filename", post(put_invoice).delete(delete_invoice))
        .route("/api/invoices", get(list_invoices))
        .route("/api/invoices/:name", get(get_invoice))
        .route("/api/move-invoices", post(move_invoices));
    let documents = match &state.oauth {
        Some(oauth) => documents
            .route_layer(middleware::from_fn(require_credential))
            .layer(Extension(oauth.clone())),
        None => documents,
    };

    Router::new()
        .merge(ledger)
        .merge(documents)
        .route("/auth", get(auth_start))
        .route("/oauth2callback", get(oauth_callback))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(record_request))
        .with_state(state)
}

/// Counts every response by matched route and status code.
async fn record_request<B>(req: Request<B>, next: Next<B>) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    metrics::increment_counter!(
        "expin_http_requests_total",
        "route" => route,
        "status" => response.status().as_u16().to_string()
    );
    response
}

/// Runs store work on the blocking pool. The file stores take advisory locks
/// and do synchronous I/O.
async fn run_blocking<T, F>(state: &Arc<AppState>, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))?
}

fn parse_body<T: DeserializeOwned>(body: &Bytes, expected: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("expected {}: {}", expected, e)))
}

fn validate_entries(entries: &[LedgerEntry]) -> Result<(), ApiError> {
    for (index, entry) in entries.iter().enumerate() {
        entry
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("entry {}: {}", index, e)))?;
    }
    Ok(())
}

async fn get_data(State(state): State<Arc<AppState>>) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let entries = run_blocking(&state, |s| Ok(s.records.load()?)).await?;
    Ok(Json(entries))
}

async fn post_data(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<LedgerResponse>, ApiError> {
    let request: DataRequest = serde_json::from_slice(&body).map_err(|_| {
        ApiError::BadRequest(
            "body must be a ledger entry, an array of ledger entries, or {\"clear\": true}".to_string(),
        )
    })?;

    let response = match request {
        DataRequest::Replace(entries) => {
            validate_entries(&entries)?;
            let count = entries.len();
            run_blocking(&state, move |s| Ok(s.records.save(&entries)?)).await?;
            LedgerResponse {
                message: "Data saved.",
                count,
            }
        }
        DataRequest::Append(entry) => {
            entry.validate()?;
            LedgerResponse {
                message: "Entry added.",
                count: run_blocking(&state, move |s| Ok(s.records.append(&entry)?)).await?,
            }
        }
        DataRequest::Clear(ClearRequest { clear: true }) => {
            run_blocking(&state, |s| Ok(s.records.clear()?)).await?;
            LedgerResponse {
                message: "Data cleared.",
                count: 0,
            }
        }
        DataRequest::Clear(ClearRequest { clear: false }) => {
            return Err(ApiError::BadRequest("\"clear\" must be true".to_string()));
        }
    };
    tracing::info!(count = response.count, "{}", response.message);
    Ok(Json(response))
}

async fn post_entry(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<LedgerResponse>, ApiError> {
    let entry: LedgerEntry = parse_body(&body, "a ledger entry")?;
    entry.validate()?;
    let kind = entry.kind;
    let count = run_blocking(&state, move |s| Ok(s.records.append(&entry)?)).await?;
    tracing::info!(count, %kind, "Entry added");
    Ok(Json(LedgerResponse {
        message: "Entry added.",
        count,
    }))
}

async fn get_summary(State(state): State<Arc<AppState>>) -> Result<Json<LedgerSummary>, ApiError> {
    let summary = run_blocking(&state, |s| Ok(s.records.summary()?)).await?;
    Ok(Json(summary))
}

async fn clear_data(State(state): State<Arc<AppState>>) -> Result<Json<MessageResponse>, ApiError> {
    run_blocking(&state, |s| Ok(s.records.clear()?)).await?;
    tracing::info!("Ledger cleared");
    Ok(Json(MessageResponse {
        message: "Data cleared.".to_string(),
    }))
}

async fn export(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<DocumentResponse>, ApiError> {
    let request: ExportRequest = parse_body(&body, "{\"title\": string, \"data\": object}")?;
    let reset = state.reset_on_export;
    let file = run_blocking(&state, move |s| {
        let file = s.documents.put(&request.title, &request.data)?;
        if reset {
            s.records.clear()?;
        }
        Ok(file)
    })
    .await?;

    let message = if reset { "Exported and reset." } else { "Exported." };
    tracing::info!(%file, reset, "Ledger exported");
    Ok(Json(DocumentResponse {
        message: message.to_string(),
        file,
    }))
}

async fn put_invoice(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<Json<DocumentResponse>, ApiError> {
    let content: Value = parse_body(&body, "a JSON object")?;
    let raw_name = filename.strip_suffix(".json").unwrap_or(&filename).to_string();
    let file = run_blocking(&state, move |s| Ok(s.documents.put(&raw_name, &content)?)).await?;
    Ok(Json(DocumentResponse {
        message: format!("Invoice {} saved.", file),
        file,
    }))
}

async fn list_invoices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = run_blocking(&state, move |s| Ok(s.documents.list(query.area, query.refresh)?)).await?;
    Ok(Json(names))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let document = run_blocking(&state, move |s| Ok(s.documents.get(&name)?)).await?;
    Ok(Json(Value::Object(document.content)))
}

async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let name = filename.clone();
    run_blocking(&state, move |s| Ok(s.documents.delete(&name)?)).await?;
    Ok(Json(MessageResponse {
        message: format!("Invoice {} deleted.", filename),
    }))
}

async fn move_invoices(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let request: MoveRequest = parse_body(&body, "{\"files\": [string]}")?;
    if request.files.is_empty() {
        return Err(ApiError::BadRequest("\"files\" must list at least one invoice".to_string()));
    }

    let report = run_blocking(&state, move |s| {
        Ok(s.documents
            .move_documents(&request.files, Area::Active, Area::Downloaded))
    })
    .await?;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    tracing::info!(moved = report.moved.len(), failed = report.errors.len(), "Invoices moved");

    Ok((
        status,
        Json(MoveResponse {
            moved_files: report.moved,
            errors: report.errors,
        }),
    )
        .into_response())
}

fn oauth(state: &AppState) -> Result<&OAuth, ApiError> {
    state
        .oauth
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("OAuth is not enabled".to_string()))
}

async fn auth_start(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let url = oauth(&state)?.begin()?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Html<&'static str>, ApiError> {
    let oauth = oauth(&state)?;
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".to_string()))?;
    let callback_state = query.state.unwrap_or_default();

    oauth.complete(&code, &callback_state).await?;
    Ok(Html(
        "<!doctype html><html><body><h1>Authorization complete</h1>\
         <p>The credential was saved. You can close this tab.</p></body></html>",
    ))
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or_else(|| ApiError::NotFound("metrics recorder is not installed".to_string()))
}
