//! Non-streaming calls the controller depends on.

use std::future::Future;

use dealroom_core::room::RoomSnapshot;
use dealroom_core::types::DealroomError;
use reqwest::StatusCode;

/// Result of the start handshake. Both variants mean the stream may open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Server answered 409: the negotiation was already running.
    AlreadyActive,
}

pub trait NegotiationApi: Send + Sync + 'static {
    fn start_negotiation(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<StartOutcome, DealroomError>> + Send;

    fn fetch_history(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<RoomSnapshot, DealroomError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpNegotiationApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNegotiationApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, room_id: &str, action: &str) -> String {
        format!(
            "{}/api/v1/negotiation/{}/{}",
            self.base_url.trim_end_matches('/'),
            room_id,
            action
        )
    }
}

/// Map a start-handshake status code.
pub fn classify_start(status: StatusCode) -> Option<StartOutcome> {
    if status.is_success() {
        Some(StartOutcome::Started)
    } else if status == StatusCode::CONFLICT {
        Some(StartOutcome::AlreadyActive)
    } else {
        None
    }
}

impl NegotiationApi for HttpNegotiationApi {
    async fn start_negotiation(&self, room_id: &str) -> Result<StartOutcome, DealroomError> {
        let url = self.endpoint(room_id, "start");
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| DealroomError::Handshake(e.to_string()))?;

        let status = resp.status();
        match classify_start(status) {
            Some(outcome) => {
                tracing::debug!(room_id, %status, ?outcome, "start handshake");
                Ok(outcome)
            }
            None => {
                let body = resp.text().await.unwrap_or_default();
                Err(DealroomError::Handshake(format!("{status}: {}", body.trim())))
            }
        }
    }

    async fn fetch_history(&self, room_id: &str) -> Result<RoomSnapshot, DealroomError> {
        let url = self.endpoint(room_id, "state");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DealroomError::Transport(e.to_string()))?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| DealroomError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| DealroomError::Protocol(e.to_string()))
    }
}
