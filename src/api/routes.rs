use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Multipart framing adds a little on top of the file itself.
    let upload_limit = state.config.max_upload_size as usize + 64 * 1024;

    Router::new()
        // Objects
        .route(
            "/api/storage/upload",
            post(handlers::upload_object).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/storage/download/*blob_name",
            get(handlers::download_object),
        )
        .route(
            "/api/storage/delete/*blob_name",
            delete(handlers::delete_object),
        )
        // Wildcards never match an empty tail
        .route("/api/storage/download/", get(handlers::missing_blob_name))
        .route("/api/storage/delete/", delete(handlers::missing_blob_name))
        .route("/api/storage/list", get(handlers::list_objects))
        // Users
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/users/:id",
            get(handlers::get_user).delete(handlers::delete_user),
        )
        .route("/api/users/:id/files", get(handlers::list_user_files))
        .route(
            "/api/users/:id/profile-picture",
            post(handlers::upload_profile_picture)
                .layer(DefaultBodyLimit::max(upload_limit))
                .delete(handlers::delete_profile_picture),
        )
        // Internal
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
