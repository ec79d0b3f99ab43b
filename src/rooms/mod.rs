pub mod frame;
pub mod gateway;
pub mod msg;
pub mod registry;
mod new;
mod room;
mod search;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use gateway::{Gateway, GatewayError, Session, SessionState};
pub use search::highlight;

/// REST routes, nested under `/api/channels`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::list_channels).post(new::new_channel))
        .route("/{channel_id}/messages", get(room::recent_messages))
        .route("/{channel_id}/search", get(search::search_messages))
}

/// Socket route, nested under `/ws`.
pub fn ws_router() -> Router<AppState> {
    Router::new()
        .route("/chat/{channel_id}", get(ws::room_ws))
}
