//! HTTP collector: `PUT /` with a JSON submission body.

use super::CollectorState;
use crate::error::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Body of a successful submission
pub const ACK: &str = "Ok.\n";

pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/", put(collect_handler))
        .with_state(state)
}

/// Serve [`router`] on `listener` until cancelled
pub async fn serve(
    listener: TcpListener,
    state: CollectorState,
    cancel: CancellationToken,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "http collector listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    info!("http collector stopped");
    Ok(())
}

/// PUT /
async fn collect_handler(State(state): State<CollectorState>, body: Bytes) -> Response {
    match state.accept_json(&body).await {
        Ok(outcome) => {
            debug!(?outcome, "submission accepted");
            plain(StatusCode::OK, ACK.to_string())
        }
        Err(e) if e.is_invalid_input() => {
            debug!(error = %e, "rejected submission");
            plain(StatusCode::BAD_REQUEST, format!("{}\n", e))
        }
        Err(e) => {
            warn!(error = %e, "could not relay submission");
            plain(StatusCode::SERVICE_UNAVAILABLE, format!("{}\n", e))
        }
    }
}

fn plain(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}
