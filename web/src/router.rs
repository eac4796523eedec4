use crate::{
    controller::{health_check_controller, stream_controller},
    sse, AppState,
};
use axum::{
    routing::{delete, get},
    Router,
};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(sse_routes(app_state.clone()))
        .merge(stream_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse::handler::sse_handler))
        .with_state(app_state)
}

// Operator endpoints. Both honour the X-Stream-Scope header.
fn stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/admin/stream", get(stream_controller::read))
        .route(
            "/admin/stream/backlog",
            delete(stream_controller::clear_backlog),
        )
        .with_state(app_state)
}
