//! HTTP API: a thin axum adapter over the presence table and the use cases.
//!
//! | Route           | Purpose                                            |
//! |-----------------|----------------------------------------------------|
//! | `GET /status`   | One record (`?mac=`) or every record               |
//! | `POST /wake`    | Send a magic packet to `{"mac": ...}`              |
//! | `POST /update`  | Probe one device (`{"mac": ...}`) or all, now      |
//!
//! Every error body is `{"error": "<message>"}`.  Requests whose `Host`
//! header is not allow-listed are refused with 403 before reaching a route
//! (see [`host_filter`]).

pub mod handlers;
pub mod host_filter;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use lanwake_core::PresenceTable;
use tokio::net::TcpListener;
use tracing::info;

use crate::application::scan_presence::ScanPresenceUseCase;
use crate::application::wake_device::WakeDeviceUseCase;
use handlers::{ApiResponse, StatusQuery};
use host_filter::HostAllowList;

/// Everything the routes need.
pub struct ApiState {
    /// `None` when presence tracking is disabled.
    pub table: Option<Arc<PresenceTable>>,
    /// One scanner per interface.  Empty when scanning is disabled.
    pub scanners: Vec<Arc<ScanPresenceUseCase>>,
    pub waker: Arc<WakeDeviceUseCase>,
}

/// Builds the router with the host allow-list applied to every route.
pub fn router(state: ApiState, allowed_hosts: HostAllowList) -> Router {
    Router::new()
        .route("/status", get(status_route))
        .route("/wake", post(wake_route))
        .route("/update", post(update_route))
        .layer(middleware::from_fn_with_state(
            Arc::new(allowed_hosts),
            host_filter::host_filter,
        ))
        .with_state(Arc::new(state))
}

/// Binds the API listener.
///
/// # Errors
///
/// Returns the bind error unchanged.
pub async fn bind_api(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serves `app` until `running` is cleared, then drains in-flight requests.
///
/// # Errors
///
/// Returns an I/O error if the server fails.
pub async fn serve(listener: TcpListener, app: Router, running: Arc<AtomicBool>) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while running.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            info!("shutdown flag set; stopping HTTP API");
        })
        .await
}

async fn status_route(State(state): State<Arc<ApiState>>, Query(query): Query<StatusQuery>) -> ApiResponse {
    handlers::status(&state, query.mac.as_deref())
}

async fn wake_route(State(state): State<Arc<ApiState>>, body: Bytes) -> ApiResponse {
    handlers::wake(&state, &body).await
}

async fn update_route(State(state): State<Arc<ApiState>>, body: Bytes) -> ApiResponse {
    handlers::update(&state, &body).await
}
