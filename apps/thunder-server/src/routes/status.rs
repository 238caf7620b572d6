//! Server status endpoint

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::format::readable_time;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    server_status: &'static str,
    uptime: String,
    connected_bots: usize,
    loads: BTreeMap<String, usize>,
    version: &'static str,
}

/// Read-only snapshot of the connection pool
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pool = state.pool();
    Json(StatusResponse {
        server_status: "running",
        uptime: readable_time(state.uptime().as_secs()),
        connected_bots: pool.len(),
        loads: pool
            .loads()
            .into_iter()
            .map(|(index, load)| (format!("bot{}", index), load))
            .collect(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
