pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::{ApiDoc, AppState};

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/systems", post(handlers::create_system))
        .route("/systems/summaries", get(handlers::list_summaries))
        .route(
            "/systems/{id}",
            get(handlers::get_system)
                .patch(handlers::update_system)
                .delete(handlers::delete_system),
        )
        .route("/systems/{id}/history", get(handlers::system_history))
        .route("/devices/{device_id}/latest", get(handlers::device_latest))
        .route("/devices/{device_id}/history", get(handlers::device_history))
        .route("/collection/run", post(handlers::run_collection))
        .route("/readings/manual", post(handlers::submit_manual_reading))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
