//! API layer -- axum routes, handlers, and middleware.

pub mod error;
mod routes;
pub mod state;

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use self::state::AppState;

pub use self::routes::{risk_level, severity};

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_allow_origins);
    routes::api_routes()
        .fallback(fallback)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            tracing::info_span!(
                "http",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %Uuid::new_v4()
            )
        }))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}
