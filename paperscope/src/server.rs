/*!
HTTP layer: the public aggregation endpoint plus the admin console API
(registry CRUD and feed testing). Handlers stay thin; everything with
actual logic lives in the aggregator/processing modules.
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};

use common::{ArticleGroup, Config, FeedSource, FeedType, SourceStore};

use crate::aggregator;
use crate::cache::{AggregationCache, DEFAULT_CACHE_TTL_SECS};
use crate::ingestion::{self, FetchOptions};

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub cache: AggregationCache,
    pub refresh_guard: tokio::sync::Mutex<()>,
    pub store: Arc<dyn SourceStore>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<dyn SourceStore>) -> Self {
        let ttl_secs = config
            .aggregation
            .as_ref()
            .and_then(|a| a.cache_ttl_seconds)
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        Self {
            started_at: Utc::now(),
            config,
            cache: AggregationCache::new(Duration::from_secs(ttl_secs)),
            refresh_guard: tokio::sync::Mutex::new(()),
            store,
        }
    }
}

/// Plain message body used by the admin endpoints.
#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

type ApiError = (Status, Json<MessageResponse>);

fn api_error(status: Status, message: &str) -> ApiError {
    (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    source_count: usize,
    cache_fresh: bool,
}

/// Error body for the public aggregation endpoint.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning simple JSON with uptime and basic state info.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Result<Json<StatusResponse>, Status> {
    let now = Utc::now();
    let sources = state.store.load_sources().await.map_err(|e| {
        tracing::error!("failed to load sources: {:#}", e);
        Status::InternalServerError
    })?;

    Ok(Json(StatusResponse {
        status: "ok",
        uptime_seconds: (now - state.started_at).num_seconds(),
        source_count: sources.len(),
        cache_fresh: state.cache.get().is_some(),
    }))
}

/// The aggregation read endpoint: cached groups, or a fresh full pass.
/// Individual feed failures are already degraded to empty groups inside the
/// aggregator; only an unexpected top-level failure surfaces an error here.
#[get("/api/rss")]
async fn list_articles(
    state: &State<AppState>,
) -> Result<Json<Vec<ArticleGroup>>, (Status, Json<ErrorResponse>)> {
    match aggregator::aggregate(
        &state.config,
        state.store.as_ref(),
        &state.cache,
        &state.refresh_guard,
    )
    .await
    {
        Ok(groups) => Ok(Json(groups)),
        Err(e) => {
            tracing::error!("aggregation failed: {:#}", e);
            Err((
                Status::InternalServerError,
                Json(ErrorResponse {
                    error: "Failed to fetch RSS feeds".to_string(),
                }),
            ))
        }
    }
}

/// Request body for the admin feed tester.
#[derive(Deserialize)]
struct TestFeedRequest {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct TestFeedResponse {
    success: bool,
    #[serde(rename = "articleCount", skip_serializing_if = "Option::is_none")]
    article_count: Option<usize>,
    message: String,
    #[serde(rename = "sampleTitles", skip_serializing_if = "Option::is_none")]
    sample_titles: Option<Vec<String>>,
}

/// Run the simplified single-feed pipeline against an arbitrary URL so the
/// operator can validate a feed before adding it to the registry.
#[post("/api/admin/test-feed", data = "<body>")]
async fn test_feed(
    state: &State<AppState>,
    body: Json<TestFeedRequest>,
) -> Result<Json<TestFeedResponse>, (Status, Json<TestFeedResponse>)> {
    if body.url.is_empty() {
        return Err((
            Status::BadRequest,
            Json(TestFeedResponse {
                success: false,
                article_count: None,
                message: "URL is required".to_string(),
                sample_titles: None,
            }),
        ));
    }

    let opts = FetchOptions::from_config(&state.config);
    match ingestion::fetch_and_parse_feed(&body.url, &opts).await {
        Ok(articles) => Ok(Json(TestFeedResponse {
            success: true,
            article_count: Some(articles.len()),
            message: format!(
                "Successfully parsed RSS feed with {} articles",
                articles.len()
            ),
            sample_titles: Some(articles.iter().take(3).map(|a| a.title.clone()).collect()),
        })),
        Err(e) => {
            tracing::warn!("feed test failed for {}: {:#}", body.url, e);
            Err((
                Status::BadRequest,
                Json(TestFeedResponse {
                    success: false,
                    article_count: None,
                    message: format!("{:#}", e),
                    sample_titles: None,
                }),
            ))
        }
    }
}

/// Journal payload for add/update. Missing fields deserialize to empty
/// strings so validation can answer with a message instead of a 422.
#[derive(Deserialize)]
struct JournalUpsert {
    #[serde(rename = "journalName", default)]
    journal_name: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "type", default)]
    feed_type: FeedType,
}

#[derive(Deserialize)]
struct JournalDelete {
    #[serde(rename = "journalName", default)]
    journal_name: String,
}

fn validate_journal(body: &JournalUpsert) -> Result<(), ApiError> {
    if body.journal_name.is_empty() || body.url.is_empty() {
        return Err(api_error(
            Status::BadRequest,
            "Journal name and URL are required",
        ));
    }
    let parsed = url::Url::parse(&body.url)
        .map_err(|_| api_error(Status::BadRequest, "Invalid feed URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(api_error(Status::BadRequest, "Invalid feed URL"));
    }
    Ok(())
}

#[get("/api/admin/journals")]
async fn list_journals(state: &State<AppState>) -> Result<Json<Vec<FeedSource>>, ApiError> {
    match state.store.load_sources().await {
        Ok(sources) => Ok(Json(sources)),
        Err(e) => {
            tracing::error!("failed to load sources: {:#}", e);
            Err(api_error(
                Status::InternalServerError,
                "Failed to fetch journals",
            ))
        }
    }
}

#[post("/api/admin/journals", data = "<body>")]
async fn add_journal(
    state: &State<AppState>,
    body: Json<JournalUpsert>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_journal(&body)?;

    let mut sources = state.store.load_sources().await.map_err(|e| {
        tracing::error!("failed to load sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to add journal")
    })?;

    // Journal names are the registry key; matching is case-insensitive so
    // "Technovation" and "technovation" cannot coexist.
    if sources
        .iter()
        .any(|s| s.journal_name.eq_ignore_ascii_case(&body.journal_name))
    {
        return Err(api_error(
            Status::Conflict,
            "Journal with this name already exists",
        ));
    }

    sources.push(FeedSource {
        journal_name: body.journal_name.clone(),
        url: body.url.clone(),
        feed_type: body.feed_type,
    });

    state.store.save_sources(&sources).await.map_err(|e| {
        tracing::error!("failed to save sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to add journal")
    })?;

    Ok(Json(MessageResponse {
        message: "Journal added successfully".to_string(),
    }))
}

#[put("/api/admin/journals", data = "<body>")]
async fn update_journal(
    state: &State<AppState>,
    body: Json<JournalUpsert>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_journal(&body)?;

    let mut sources = state.store.load_sources().await.map_err(|e| {
        tracing::error!("failed to load sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to update journal")
    })?;

    let position = sources
        .iter()
        .position(|s| s.journal_name == body.journal_name)
        .ok_or_else(|| api_error(Status::NotFound, "Journal not found"))?;

    sources[position] = FeedSource {
        journal_name: body.journal_name.clone(),
        url: body.url.clone(),
        feed_type: body.feed_type,
    };

    state.store.save_sources(&sources).await.map_err(|e| {
        tracing::error!("failed to save sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to update journal")
    })?;

    Ok(Json(MessageResponse {
        message: "Journal updated successfully".to_string(),
    }))
}

#[delete("/api/admin/journals", data = "<body>")]
async fn delete_journal(
    state: &State<AppState>,
    body: Json<JournalDelete>,
) -> Result<Json<MessageResponse>, ApiError> {
    if body.journal_name.is_empty() {
        return Err(api_error(Status::BadRequest, "Journal name is required"));
    }

    let sources = state.store.load_sources().await.map_err(|e| {
        tracing::error!("failed to load sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to delete journal")
    })?;

    let remaining: Vec<FeedSource> = sources
        .iter()
        .filter(|s| s.journal_name != body.journal_name)
        .cloned()
        .collect();

    if remaining.len() == sources.len() {
        return Err(api_error(Status::NotFound, "Journal not found"));
    }

    state.store.save_sources(&remaining).await.map_err(|e| {
        tracing::error!("failed to save sources: {:#}", e);
        api_error(Status::InternalServerError, "Failed to delete journal")
    })?;

    Ok(Json(MessageResponse {
        message: "Journal deleted successfully".to_string(),
    }))
}

/// Build the Rocket instance with managed state and all routes mounted.
/// Split from `launch_rocket` so tests can drive it with a local client.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();

    // Apply [server] bind/port from the application config if present.
    if let Some(server) = &state.config.server {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    rocket::custom(fig).manage(state).mount(
        "/",
        routes![
            health,
            status,
            list_articles,
            test_feed,
            list_journals,
            add_journal,
            update_journal,
            delete_journal,
        ],
    )
}

/// Build and launch the Rocket server.
///
/// This function blocks until the Rocket server shuts down (it awaits
/// `rocket.launch().await`) and returns an error if Rocket fails to start.
pub async fn launch_rocket(state: AppState) -> Result<()> {
    let rocket = build_rocket(state);

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
