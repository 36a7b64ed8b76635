//! WebSocket upgrade

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;

use crate::session::Session;
use crate::state::ServerState;

/// Upgrade a device connection and hand it to a new session
pub(crate) async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    let max = state.config.max_message_size;

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| async move {
            // The session logs its own outcome.
            let _ = Session::new(state).run(socket).await;
        })
}
