pub mod api;
pub mod identity;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::state::AppState;

/// Multipart framing allowance on top of the largest permitted file.
const MULTIPART_OVERHEAD: usize = 1_048_576;

pub fn router(state: AppState) -> Router<AppState> {
    let upload_body_limit = usize::try_from(state.config.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/uploads",
            post(api::upload).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/files/{id}", get(api::get_file).delete(api::delete_file))
        .route("/files/{id}/process", post(api::process_file))
        .route("/activity", get(api::activity))
}
