//! HTTP surface: `POST /api/email`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mailrelay_core::{DispatchError, Dispatcher, SendRequest};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

/// Reply body for any failure that is not the caller's fault.
pub const SEND_FAILED: &str = "An error occurred while sending the email.";

/// Reply body for a sender or recipient that does not parse.
pub const INVALID_ADDRESS: &str = "The sender or recipient address is invalid.";

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/email", post(send_email))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
}

async fn send_email(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<String, ApiError> {
    let delivery = state.dispatcher.dispatch(&request).await?;
    Ok(delivery.acknowledgement())
}

/// Maps dispatch failures onto replies that carry no internal detail.
///
/// The dispatcher has already logged the cause chain.
struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, INVALID_ADDRESS).into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, SEND_FAILED).into_response()
        }
    }
}
