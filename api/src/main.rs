mod fetch;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use slidedeck_common::config::{Config, FetchConfig};
use slidedeck_extractor::{CancelToken, DeckOutcome, Pipeline};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    pipeline: Pipeline,
    fetch: FetchConfig,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("Please provide a YouTube URL.")]
    MissingUrl,
    #[error("Invalid YouTube URL.")]
    InvalidUrl,
    #[error("Malformed form data: {0}")]
    Form(#[from] MultipartError),
    #[error("No slides could be extracted from this video.")]
    NoSlides,
    #[error("An error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    fn internal(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(e.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingUrl | ApiError::InvalidUrl | ApiError::Form(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NoSlides => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Stops the blocking run when the request future is dropped.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Video to slides</title></head>
<body>
<h1>Video to slides</h1>
<form method="post" action="/" enctype="multipart/form-data">
  <p><label>YouTube URL <input type="url" name="url" required></label></p>
  <p><label>Cookies (.txt, optional) <input type="file" name="cookie_file" accept=".txt"></label></p>
  <p><button type="submit">Convert</button></p>
</form>
</body>
</html>
"#;

/// GET /
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

/// GET /healthz
async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// POST / with multipart `url` and optional `cookie_file`. Replies with the PDF.
async fn convert(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    match convert_inner(&state, multipart).await {
        Ok(resp) => resp,
        Err(e) => {
            if e.status().is_server_error() {
                error!(error = %e, "conversion failed");
            } else {
                warn!(error = %e, "conversion rejected");
            }
            e.into_response()
        }
    }
}

async fn convert_inner(state: &AppState, mut multipart: Multipart) -> Result<Response, ApiError> {
    // Removed on drop, on every exit path.
    let workdir = tempfile::tempdir().map_err(ApiError::internal)?;
    let mut url: Option<String> = None;
    let mut cookies: Option<PathBuf> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "url" => {
                let text = field.text().await?;
                let text = text.trim();
                if !text.is_empty() {
                    url = Some(text.to_string());
                }
            }
            "cookie_file" => {
                if !field.file_name().is_some_and(|n| n.ends_with(".txt")) {
                    continue;
                }
                let data = field.bytes().await?;
                if data.is_empty() {
                    continue;
                }
                let path = workdir.path().join("cookies.txt");
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(ApiError::internal)?;
                cookies = Some(path);
            }
            _ => {}
        }
    }

    let url = url.ok_or(ApiError::MissingUrl)?;
    let video_id = fetch::video_id(&url).ok_or(ApiError::InvalidUrl)?;

    let title = fetch::video_title(&state.fetch, &url, cookies.as_deref()).await;
    let stem = fetch::file_stem(&title);
    info!(video_id = %video_id, title = %title, "fetching video");

    let video = workdir.path().join(format!("{video_id}.mp4"));
    fetch::download(&state.fetch, &url, &video, cookies.as_deref())
        .await
        .map_err(ApiError::internal)?;

    let pipeline = state.pipeline.clone().with_cancel(CancelToken::new());
    let _guard = CancelOnDrop(pipeline.cancel_token());
    let outcome = tokio::task::spawn_blocking(move || {
        let outcome = pipeline.run_file(&video);
        drop(workdir);
        outcome
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::internal)?;

    match outcome {
        DeckOutcome::Slides { deck, stats } => {
            info!(
                video_id = %video_id,
                slides = deck.keyframes.len(),
                frames = stats.frames_decoded,
                "slide deck ready"
            );
            Ok((
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
                    (header::CONTENT_DISPOSITION, attachment(&stem)),
                ],
                deck.pdf,
            )
                .into_response())
        }
        DeckOutcome::Empty { stats } => {
            info!(video_id = %video_id, frames = stats.frames_decoded, "no slides extracted");
            Err(ApiError::NoSlides)
        }
    }
}

/// `Content-Disposition` for `<stem>.pdf`, restricted to printable ASCII.
fn attachment(stem: &str) -> HeaderValue {
    let ascii: String = stem
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{ascii}.pdf\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"video.pdf\""))
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(convert))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match Config::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let pipeline = match Pipeline::new(config.pipeline) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid pipeline configuration: {e}");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        pipeline,
        fetch: config.fetch,
    });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(addr, "slidedeck server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app(state)).await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
