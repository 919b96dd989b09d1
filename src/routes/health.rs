use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::HealthResponse, state::SharedState};

/// Return the current health status of the backend and the live room count.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: state.room_count(),
    })
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthcheck", get(healthcheck))
}
