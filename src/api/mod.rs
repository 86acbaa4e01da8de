pub mod handlers;

use axum::{routing::post, Router};
use std::sync::Arc;

use handlers::{handle_auction, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/openrtb2/auction", post(handle_auction))
        .with_state(state)
}
