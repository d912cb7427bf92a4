//! HTTP adapter over [ViewTracker](crate::engine::ViewTracker).
//!
//! The app surface lives under `/api` and queues views; the widget surface lives under
//! `/widget`, is reachable cross-origin and always writes immediately.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::error::InvalidFieldSnafu;
use crate::identity::{self, Identity, ViewerRequest, VIEWER_TOKEN};
use crate::model::{BatchStats, Source, Stat, ViewCount};
use crate::queue::Enqueued;
use crate::scheduler::FlushState;
use crate::store::ViewStore;

mod error;
mod state;

pub use error::*;
pub use state::*;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Identity of a signed in viewer, inserted into request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedViewer(pub String);

/// The resolved identity of whoever sent the request.
#[derive(Debug, Clone)]
pub struct Viewer(pub Identity);

#[axum::async_trait]
impl<T: Send + Sync> FromRequestParts<T> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        let authenticated = parts
            .extensions
            .get::<AuthenticatedViewer>()
            .map(|viewer| viewer.0.as_str());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let request = ViewerRequest::from_headers(&parts.headers, authenticated, peer);
        Ok(Viewer(identity::resolve(&request)))
    }
}

pub fn router<S: ViewStore>(app: App<S>) -> Router {
    let content = Router::new()
        .route("/content/stats", post(batch_stats::<S>))
        .route("/content/:id/views", post(queue_view::<S>).get(view_count::<S>))
        .route("/content/:id/views/sync", post(track_view::<S>));

    let widget = Router::new()
        .route("/content/:id/views", post(widget_view::<S>).get(view_count::<S>))
        .layer(CorsLayer::permissive());

    Router::new()
        .nest("/api", content)
        .nest("/widget", widget)
        .route("/health", get(health::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Echoes a freshly minted viewer id so the client can replay it.
fn viewer_header(identity: &Identity) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if identity.minted {
        if let Ok(value) = HeaderValue::from_str(&identity.viewer_id) {
            headers.insert(VIEWER_TOKEN, value);
        }
    }

    headers
}

#[derive(Debug, Serialize)]
struct Queued {
    status: Enqueued,
}

#[instrument(skip(app, viewer))]
async fn queue_view<S: ViewStore>(
    State(app): State<App<S>>, Path(id): Path<String>, Viewer(viewer): Viewer,
) -> Result<(StatusCode, HeaderMap, Json<Queued>)> {
    if id.trim().is_empty() {
        return Err(InvalidFieldSnafu { field: "content_id" }.build().into());
    }

    let status = app.queue_view(&id, &viewer.viewer_id, &viewer.client_ip, Source::App);

    Ok((StatusCode::ACCEPTED, viewer_header(&viewer), Json(Queued { status })))
}

#[instrument(skip(app, viewer))]
async fn track_view<S: ViewStore>(
    State(app): State<App<S>>, Path(id): Path<String>, Viewer(viewer): Viewer,
) -> Result<(HeaderMap, Json<ViewCount>)> {
    let count = app
        .track_view_sync(&id, &viewer.viewer_id, &viewer.client_ip, Source::App)
        .await?;

    Ok((viewer_header(&viewer), Json(count)))
}

#[instrument(skip(app, viewer))]
async fn widget_view<S: ViewStore>(
    State(app): State<App<S>>, Path(id): Path<String>, Viewer(viewer): Viewer,
) -> Result<(HeaderMap, Json<ViewCount>)> {
    let count = app
        .track_view_sync(&id, &viewer.viewer_id, &viewer.client_ip, Source::Widget)
        .await?;

    Ok((viewer_header(&viewer), Json(count)))
}

async fn view_count<S: ViewStore>(
    State(app): State<App<S>>, Path(id): Path<String>,
) -> Json<ViewCount> {
    Json(app.get_view_count(&id).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsRequest {
    content_ids: Vec<String>,
    #[serde(default)]
    stats: Vec<Stat>,
}

async fn batch_stats<S: ViewStore>(
    State(app): State<App<S>>, Json(request): Json<StatsRequest>,
) -> Result<Json<BatchStats>> {
    let stats = app
        .get_batch_stats(&request.content_ids, &request.stats)
        .await?;

    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    pending: usize,
    state: FlushState,
}

async fn health<S: ViewStore>(State(app): State<App<S>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        pending: app.queue_stats().pending,
        state: app.flush_state(),
    })
}
