use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use signage_contracts::command::LiveCommand;

use crate::infra::app_state::AppState;

/// `POST /control`: accepts one of the live commands as a JSON body and
/// dispatches it through the same handler the live-command channel drives
/// in production. Reconnection/transport for a real live channel is out of
/// scope; this is the synchronous equivalent for the demo binary.
pub async fn post_control(State(state): State<AppState>, Json(command): Json<LiveCommand>) -> StatusCode {
    state.orchestrator.handle_command(command).await;
    StatusCode::ACCEPTED
}
