use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::aggregator;
use crate::config::Config;
use crate::fetcher::{FetchError, Fetcher};
use crate::rss::{self, CONTENT_TYPE, FEED_UNAVAILABLE, NO_CONTENT};

const UNAVAILABLE_DESCRIPTION: &str =
    "The feed could not be generated right now. Please try again later.";

pub struct AppState {
    pub config: Config,
    pub fetcher: Fetcher,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let fetcher = Fetcher::new(Duration::from_secs(config.fetch_timeout))?;
        Ok(Self { config, fetcher })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/rss/news.xml", get(news))
        .route("/api/rss/:file", get(source_feed))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

// Wrapper for RSS responses
pub struct RssResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RssResponse {
    fn ok(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn bad_gateway(body: String) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body,
        }
    }
}

impl IntoResponse for RssResponse {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, CONTENT_TYPE)], self.body).into_response()
    }
}

// Custom error type, rendered as an RSS error document
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Failed to render feed: {}", self.0);
        match rss::write_error_feed(FEED_UNAVAILABLE, "", UNAVAILABLE_DESCRIPTION) {
            Ok(body) => RssResponse::bad_gateway(body).into_response(),
            Err(e) => {
                error!("Failed to render error feed: {}", e);
                (StatusCode::BAD_GATEWAY, FEED_UNAVAILABLE).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

fn unavailable(link: &str) -> Result<RssResponse, AppError> {
    let body = rss::write_error_feed(FEED_UNAVAILABLE, link, UNAVAILABLE_DESCRIPTION)?;
    Ok(RssResponse::bad_gateway(body))
}

// Route handlers
pub async fn news(State(state): State<Arc<AppState>>) -> Result<RssResponse, AppError> {
    let config = &state.config;

    let items = match aggregator::aggregate(
        &state.fetcher,
        &config.sources,
        config.max_concurrent_fetches,
    )
    .await
    {
        Ok(items) => items,
        Err(e) => {
            error!("Aggregation failed: {}", e);
            return unavailable(&config.channel.link);
        }
    };

    if items.is_empty() {
        warn!("No source returned any items");
        let mut channel = config.channel.clone();
        channel.description = NO_CONTENT.to_string();
        return Ok(RssResponse::ok(rss::write_feed(&channel, &[])?));
    }

    Ok(RssResponse::ok(rss::write_feed(&config.channel, &items)?))
}

pub async fn source_feed(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    let source = match file
        .strip_suffix(".xml")
        .and_then(|slug| state.config.source(slug))
    {
        Some(source) => source,
        None => return Ok((StatusCode::NOT_FOUND, "Feed not found").into_response()),
    };

    let channel = source.channel();
    let response = match state.fetcher.fetch_source(source).await {
        Ok(items) => RssResponse::ok(rss::write_feed(&channel, &items)?),
        Err(FetchError::Status(status)) => {
            warn!("Upstream for '{}' returned {}", source.name, status);
            let body = rss::write_error_feed(
                &format!("{} Feed Error", source.name),
                &channel.link,
                &format!(
                    "Unable to fetch the {} feed: upstream returned HTTP {}",
                    source.name,
                    status.as_u16()
                ),
            )?;
            RssResponse::bad_gateway(body)
        }
        Err(e) => {
            error!("Failed to fetch '{}': {}", source.name, e);
            unavailable(&channel.link)?
        }
    };

    Ok(response.into_response())
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
