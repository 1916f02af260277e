use crate::error::ApiError;
use crate::rate_limit::{enforce, FixedWindowLimiter};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempbox_core::{
    is_valid_address, is_valid_message_id, Account, AccountCredentials, MailMessage, ProviderKind,
};
use tempbox_storage::account_key;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub const CREDENTIALS_HEADER: &str = "x-account-credentials";

type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub email: String,
    pub expires_in: Option<u64>,
    pub created_at: i64,
    pub provider: ProviderKind,
    pub permanent: bool,
    pub credentials: AccountCredentials,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    pub emails: Vec<MailMessage>,
    pub count: usize,
    pub expires_at: Option<i64>,
    pub permanent: bool,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub providers: Vec<ProviderKind>,
    pub active_provider: ProviderKind,
    pub provider_failures: BTreeMap<ProviderKind, u32>,
    pub provider_usage: BTreeMap<ProviderKind, u64>,
    pub email_lifetime: Option<u64>,
    pub redis_connected: bool,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<ProviderKind>,
    pub active_provider: ProviderKind,
    pub redis: bool,
}

pub fn router(state: SharedState) -> Router {
    let limits = state.rate_limits.clone();
    let max_body = state.config.server.max_body_bytes;

    let create = limited(
        Router::new().route("/api/generate-email", post(generate_email)),
        limits.enabled,
        limits.create,
    );
    let reads = limited(
        Router::new()
            .route("/api/emails/:address", get(list_emails))
            .route(
                "/api/emails/:address/:email_id",
                get(get_email).delete(delete_email),
            ),
        limits.enabled,
        limits.reads,
    );

    Router::new()
        .merge(create)
        .merge(reads)
        .route("/api/account/:address", delete(delete_account))
        .route("/api/info", get(info))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body))
}

fn limited(
    routes: Router<SharedState>,
    enabled: bool,
    limiter: FixedWindowLimiter,
) -> Router<SharedState> {
    if enabled {
        routes.route_layer(middleware::from_fn_with_state(limiter, enforce))
    } else {
        routes
    }
}

fn validate_address(address: &str) -> Result<(), ApiError> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(ApiError::InvalidAddress)
    }
}

fn validate_message_id(id: &str) -> Result<(), ApiError> {
    if is_valid_message_id(id) {
        Ok(())
    } else {
        Err(ApiError::InvalidMessageId)
    }
}

fn credentials_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CREDENTIALS_HEADER)
        .and_then(|value| value.to_str().ok())
}

async fn generate_email(
    State(state): State<SharedState>,
    Query(query): Query<GenerateQuery>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let preferred = match query.provider.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(name) => Some(
            name.parse::<ProviderKind>()
                .map_err(|_| ApiError::InvalidProvider(name.to_string()))?,
        ),
        None => None,
    };

    let account: Account = state.providers.create_account(preferred).await?;
    state.persist_account(&account).await;
    tracing::info!(address = %account.email, provider = %account.provider, "inbox generated");

    Ok(Json(GenerateResponse {
        credentials: account.credentials(),
        email: account.email,
        expires_in: None,
        created_at: account.created_at.timestamp_millis(),
        provider: account.provider,
        permanent: true,
    }))
}

async fn list_emails(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InboxResponse>, ApiError> {
    validate_address(&address)?;
    let account = state
        .resolve_account(&address, credentials_header(&headers))
        .await?;

    let messages = state.providers.get_messages(&address, account.provider).await;
    state.sync_token(&account).await;

    let mut emails = state.enricher.enrich_all(messages).await;
    emails.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    Ok(Json(InboxResponse {
        count: emails.len(),
        emails,
        expires_at: None,
        permanent: true,
    }))
}

async fn get_email(
    State(state): State<SharedState>,
    Path((address, email_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<MailMessage>, ApiError> {
    validate_address(&address)?;
    validate_message_id(&email_id)?;
    let account = state
        .resolve_account(&address, credentials_header(&headers))
        .await?;

    let message = state
        .providers
        .get_message(&address, account.provider, &email_id)
        .await;
    state.sync_token(&account).await;
    Ok(Json(state.enricher.enrich(message?).await))
}

async fn delete_email(
    State(state): State<SharedState>,
    Path((address, email_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    validate_address(&address)?;
    validate_message_id(&email_id)?;
    let account = state
        .resolve_account(&address, credentials_header(&headers))
        .await?;

    let result = state
        .providers
        .delete_message(&address, account.provider, &email_id)
        .await;
    state.sync_token(&account).await;
    result?;

    Ok(Json(SuccessResponse {
        success: true,
        message: None,
    }))
}

async fn delete_account(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    validate_address(&address)?;
    state.sessions.del(&account_key(&address)).await;
    if state.providers.remove_account(&address).await.is_some() {
        tracing::info!(address = %address, "account removed");
    }

    Ok(Json(SuccessResponse {
        success: true,
        message: Some("Account deleted".to_string()),
    }))
}

async fn info(State(state): State<SharedState>) -> Json<InfoResponse> {
    let stats = state.providers.stats().await;
    Json(InfoResponse {
        providers: stats.providers,
        active_provider: stats.best_provider,
        provider_failures: stats.failures,
        provider_usage: stats.usage,
        email_lifetime: None,
        redis_connected: state.redis_connected(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let stats = state.providers.stats().await;
    Json(HealthResponse {
        status: "ok",
        providers: stats.providers,
        active_provider: stats.best_provider,
        redis: state.redis_connected(),
    })
}
