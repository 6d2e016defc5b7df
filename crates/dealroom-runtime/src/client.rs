//! Wiring of the HTTP collaborators into a room controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dealroom_client::{HttpNegotiationApi, RoomController, SharedSessions, SseTransport};

use crate::cli::StreamOpts;
use crate::render::format_error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build http client")
}

pub fn build_controller(
    server: &str,
    opts: &StreamOpts,
    sessions: SharedSessions,
    use_color: bool,
) -> anyhow::Result<RoomController<HttpNegotiationApi>> {
    let http = http_client()?;
    let api = HttpNegotiationApi::new(http.clone(), server);
    let transport = Arc::new(SseTransport::new(http, server));
    let controller = RoomController::new(api, transport, sessions, opts.client_config())
        .with_error_callback(move |room_id, err| {
            eprintln!("{}", format_error(room_id, err, use_color));
        });
    Ok(controller)
}
