//! Stream transports: where a room's raw frames come from.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dealroom_core::types::{DealroomError, RoomId};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::sse::SseDecoder;

/// Raw JSON payloads of one open stream. Ends (or yields an error) when the
/// underlying connection drops.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, DealroomError>> + Send>>;

/// Opens one push stream per room.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a stream. Connection failures may surface either here
    /// or as the first item of the returned stream.
    fn open(&self, room_id: &str) -> Result<FrameStream, DealroomError>;
}

// ─── HTTP / SSE ───────────────────────────────────────────────────

/// `GET {base}/api/v1/negotiation/{room}/stream` as `text/event-stream`.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn stream_url(&self, room_id: &str) -> Result<reqwest::Url, DealroomError> {
        let raw = format!(
            "{}/api/v1/negotiation/{}/stream",
            self.base_url.trim_end_matches('/'),
            room_id
        );
        reqwest::Url::parse(&raw).map_err(|e| DealroomError::Transport(format!("{raw}: {e}")))
    }
}

enum SseState {
    Connect {
        client: reqwest::Client,
        url: reqwest::Url,
    },
    Read {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        decoder: SseDecoder,
        ready: VecDeque<String>,
    },
    Done,
}

impl Transport for SseTransport {
    fn open(&self, room_id: &str) -> Result<FrameStream, DealroomError> {
        let url = self.stream_url(room_id)?;
        let initial = SseState::Connect {
            client: self.client.clone(),
            url,
        };

        let frames = stream::unfold(initial, |mut state| async move {
            loop {
                state = match state {
                    SseState::Done => return None,
                    SseState::Connect { client, url } => {
                        let response = client
                            .get(url.clone())
                            .header(reqwest::header::ACCEPT, "text/event-stream")
                            .send()
                            .await;
                        match response {
                            Ok(resp) if resp.status().is_success() => {
                                tracing::debug!(%url, "sse: stream opened");
                                SseState::Read {
                                    body: resp.bytes_stream().boxed(),
                                    decoder: SseDecoder::new(),
                                    ready: VecDeque::new(),
                                }
                            }
                            Ok(resp) => {
                                let err = DealroomError::Transport(format!(
                                    "stream request returned {}",
                                    resp.status()
                                ));
                                return Some((Err(err), SseState::Done));
                            }
                            Err(e) => {
                                return Some((
                                    Err(DealroomError::Transport(e.to_string())),
                                    SseState::Done,
                                ));
                            }
                        }
                    }
                    SseState::Read {
                        mut body,
                        mut decoder,
                        mut ready,
                    } => {
                        if let Some(frame) = ready.pop_front() {
                            return Some((Ok(frame), SseState::Read { body, decoder, ready }));
                        }
                        match body.next().await {
                            Some(Ok(chunk)) => {
                                ready.extend(decoder.push(&chunk));
                                SseState::Read { body, decoder, ready }
                            }
                            Some(Err(e)) => {
                                return Some((
                                    Err(DealroomError::Transport(e.to_string())),
                                    SseState::Done,
                                ));
                            }
                            None => {
                                return decoder.finish().map(|f| (Ok(f), SseState::Done));
                            }
                        }
                    }
                };
            }
        });

        Ok(Box::pin(frames))
    }
}

// ─── In-memory ────────────────────────────────────────────────────

/// Sender half of one scripted link.
pub type LinkSender = mpsc::UnboundedSender<Result<String, DealroomError>>;

/// In-memory transport fed by channels.
///
/// Each [`ChannelTransport::push_link`] queues one link; every `open`
/// consumes the next queued link. Dropping the sender ends that stream.
/// `open` with nothing queued yields a stream whose only item is a
/// transport error, the way a refused connection surfaces over SSE.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    inner: Arc<Mutex<ChannelInner>>,
}

#[derive(Default)]
struct ChannelInner {
    queued: VecDeque<mpsc::UnboundedReceiver<Result<String, DealroomError>>>,
    opened: Vec<RoomId>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a link for the next `open`; returns its sender.
    pub fn push_link(&self) -> LinkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.queued.push_back(rx);
        }
        tx
    }

    /// Rooms passed to `open`, in call order.
    pub fn opened(&self) -> Vec<RoomId> {
        self.inner
            .lock()
            .map(|inner| inner.opened.clone())
            .unwrap_or_default()
    }
}

impl Transport for ChannelTransport {
    fn open(&self, room_id: &str) -> Result<FrameStream, DealroomError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DealroomError::Transport("channel transport poisoned".into()))?;
        inner.opened.push(room_id.to_owned());
        let Some(rx) = inner.queued.pop_front() else {
            let refused: Result<String, DealroomError> =
                Err(DealroomError::Transport("no link available".into()));
            return Ok(Box::pin(stream::iter([refused])));
        };
        let frames = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_joins_base() {
        let t = SseTransport::new(reqwest::Client::new(), "http://localhost:8000/");
        let url = t.stream_url("room-7").expect("valid url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/v1/negotiation/room-7/stream"
        );
    }

    #[test]
    fn bad_base_is_a_transport_error() {
        let t = SseTransport::new(reqwest::Client::new(), "not a url");
        assert!(matches!(
            t.open("r1"),
            Err(DealroomError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn channel_links_are_consumed_in_order() {
        let t = ChannelTransport::new();
        let first = t.push_link();
        let second = t.push_link();

        let mut a = t.open("r1").expect("first link");
        let mut b = t.open("r1").expect("second link");
        let mut c = t.open("r1").expect("refused link still opens");
        assert_eq!(t.opened(), vec!["r1", "r1", "r1"]);
        assert!(matches!(c.next().await, Some(Err(DealroomError::Transport(_)))));
        assert!(c.next().await.is_none());

        first.send(Ok("one".into())).expect("send");
        second.send(Ok("two".into())).expect("send");
        drop(first);

        assert_eq!(a.next().await, Some(Ok("one".to_owned())));
        assert_eq!(a.next().await, None);
        assert_eq!(b.next().await, Some(Ok("two".to_owned())));
    }
}
