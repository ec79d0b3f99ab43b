mod page;

use axum::{routing::get, Router};

use crate::AppState;

pub use page::ProfileView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(page::profile))
}
