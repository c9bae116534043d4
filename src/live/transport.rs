//! WebSocket transport for the Gemini Live session.
//!
//! [`LiveConnector`] is the seam between the call controller and the network.
//! [`GeminiLiveConnector`] implements it with `tokio-tungstenite`:
//!
//! ```text
//! connect_async ──▶ send setup ──▶ wait for setupComplete ──▶ LiveLink
//!                                                             │
//!   pump task (tokio::select!)                                │
//!     audio_rx (EncodedChunk) ──▶ realtimeInput text frame    │
//!     socket frames ──▶ ServerMessage ──▶ EventSink           │
//!     shutdown ──▶ close frame                        ◀───────┘ close()
//! ```
//!
//! The returned [`LiveLink`] owns the outbound queue sender and the shutdown
//! trigger; inbound traffic is reported through the [`EventSink`] callback.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::audio::codec::EncodedChunk;
use crate::config::AppConfig;

use super::messages::{RealtimeInputMessage, ServerMessage, SessionSetup, SetupMessage};

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failures of the live session transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no API key configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("session closed during setup: {0}")]
    Rejected(String),

    #[error("connection closed before setup completed")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// LinkEvent / EventSink
// ---------------------------------------------------------------------------

/// Something that happened on an open link.
#[derive(Debug)]
pub enum LinkEvent {
    Message(ServerMessage),
    /// The remote closed the socket.  `clean` is true for a normal closure.
    Closed { clean: bool, reason: String },
    /// Sending or receiving failed; the link is gone.
    Failed(TransportError),
}

/// Callback receiving [`LinkEvent`]s from the pump task.
pub type EventSink = Arc<dyn Fn(LinkEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// LiveLink
// ---------------------------------------------------------------------------

/// Handle to an open live session.
///
/// Dropping the link closes it.
pub struct LiveLink {
    audio_tx: Option<mpsc::Sender<EncodedChunk>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl LiveLink {
    /// Wrap the outbound queue and shutdown trigger of a session.
    pub fn new(audio_tx: mpsc::Sender<EncodedChunk>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            audio_tx: Some(audio_tx),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Sender side of the bounded outbound audio queue.
    ///
    /// `None` once the link is closed.
    pub fn audio_sender(&self) -> Option<mpsc::Sender<EncodedChunk>> {
        self.audio_tx.clone()
    }

    /// Close the session.  Safe to call more than once.
    pub fn close(&mut self) {
        self.audio_tx = None;
        if let Some(tx) = self.shutdown_tx.take() {
            // The pump task sends the close frame and exits on its own.
            let _ = tx.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_tx.is_none()
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// LiveConnector
// ---------------------------------------------------------------------------

/// Opens live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect, send `setup`, and resolve once the server accepted it.
    async fn connect(
        &self,
        setup: SessionSetup,
        events: EventSink,
    ) -> Result<LiveLink, TransportError>;
}

// ---------------------------------------------------------------------------
// GeminiLiveConnector
// ---------------------------------------------------------------------------

/// [`LiveConnector`] speaking the Gemini Live WebSocket protocol.
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
    outbound_queue: usize,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, outbound_queue: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            outbound_queue: outbound_queue.max(1),
        }
    }

    /// Build from the `[api]` and `[audio]` sections.
    ///
    /// # Errors
    ///
    /// [`TransportError::MissingApiKey`] when neither the config file nor the
    /// environment provides a key.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransportError> {
        let api_key = config
            .api
            .resolved_api_key()
            .ok_or(TransportError::MissingApiKey)?;
        Ok(Self::new(
            config.api.live_url.clone(),
            api_key,
            config.audio.outbound_queue,
        ))
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        setup: SessionSetup,
        events: EventSink,
    ) -> Result<LiveLink, TransportError> {
        log::info!("Connecting live session (model {}, voice {})", setup.model, setup.voice_name);

        let (ws, _response) = tokio_tungstenite::connect_async(self.url()).await?;
        let (mut sink, mut stream) = ws.split();

        let setup_json = serde_json::to_string(&SetupMessage::new(&setup))?;
        sink.send(Message::Text(setup_json.into())).await?;

        // Wait for the server to accept the setup.
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    let (_, reason) = describe_close(frame);
                    return Err(TransportError::Rejected(reason));
                }
                Some(Ok(msg)) => match parse_frame(&msg) {
                    Some(Ok(ServerMessage::SetupComplete)) => break,
                    Some(Ok(other)) => log::debug!("ignoring pre-setup message: {other:?}"),
                    Some(Err(e)) => log::warn!("unparseable frame during setup: {e}"),
                    None => {}
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Disconnected),
            }
        }

        log::info!("Live session open");

        let (audio_tx, audio_rx) = mpsc::channel::<EncodedChunk>(self.outbound_queue);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(pump(sink, stream, audio_rx, shutdown_rx, events));
        Ok(LiveLink::new(audio_tx, shutdown_tx))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Shuttle frames between the socket, the outbound queue and `events`.
async fn pump(
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    mut stream: futures::stream::SplitStream<WsStream>,
    mut audio_rx: mpsc::Receiver<EncodedChunk>,
    mut shutdown_rx: oneshot::Receiver<()>,
    events: EventSink,
) {
    loop {
        tokio::select! {
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&RealtimeInputMessage::from(chunk)) {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("failed to serialize audio chunk: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    log::error!("live send failed: {e}");
                    events(LinkEvent::Failed(e.into()));
                    break;
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Close(frame))) => {
                        let (clean, reason) = describe_close(frame);
                        log::info!("Live session closed by remote (clean: {clean}) {reason}");
                        events(LinkEvent::Closed { clean, reason });
                        break;
                    }
                    Some(Ok(msg)) => match parse_frame(&msg) {
                        Some(Ok(parsed)) => events(LinkEvent::Message(parsed)),
                        Some(Err(e)) => log::warn!("unparseable live frame: {e}"),
                        None => {}
                    },
                    Some(Err(e)) => {
                        log::error!("live receive failed: {e}");
                        events(LinkEvent::Failed(e.into()));
                        break;
                    }
                    None => {
                        events(LinkEvent::Closed {
                            clean: false,
                            reason: "stream ended without close frame".into(),
                        });
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    log::debug!("live pump exited");
}

/// JSON payload of a text or binary frame; `None` for control frames.
fn parse_frame(msg: &Message) -> Option<Result<ServerMessage, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(ServerMessage::parse(text.as_str())),
        Message::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Some(ServerMessage::parse(text)),
            Err(_) => {
                log::warn!("dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                None
            }
        },
        _ => None,
    }
}

fn describe_close(frame: Option<CloseFrame>) -> (bool, String) {
    match frame {
        Some(frame) => (frame.code == CloseCode::Normal, frame.reason.as_str().to_owned()),
        None => (true, String::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    use crate::audio::codec::encode;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "test-model".into(),
            voice_name: "Kore".into(),
            system_instruction: "hi".into(),
        }
    }

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<LinkEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let sink: EventSink = Arc::new(move |ev| store.lock().unwrap().push(ev));
        (sink, seen)
    }

    async fn wait_for_events(seen: &Arc<Mutex<Vec<LinkEvent>>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} events");
    }

    #[tokio::test]
    async fn full_session_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let setup = ws.next().await.unwrap().unwrap();
            let setup: serde_json::Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
            assert_eq!(setup["setup"]["model"], "models/test-model");
            ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                .await
                .unwrap();

            let audio = ws.next().await.unwrap().unwrap();
            let audio: serde_json::Value = serde_json::from_str(audio.to_text().unwrap()).unwrap();
            assert_eq!(
                audio["realtimeInput"]["mediaChunks"][0]["mimeType"],
                "audio/pcm;rate=16000"
            );

            let content = r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#;
            ws.send(Message::Binary(content.as_bytes().to_vec().into()))
                .await
                .unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        });

        let connector = GeminiLiveConnector::new(format!("ws://{addr}/"), "k", 4);
        let (sink, seen) = collecting_sink();
        let link = connector.connect(setup(), sink).await.unwrap();

        link.audio_sender()
            .unwrap()
            .send(encode(&[0.1; 8], 16_000))
            .await
            .unwrap();

        wait_for_events(&seen, 2).await;
        server.await.unwrap();

        let events = seen.lock().unwrap();
        assert!(matches!(
            &events[0],
            LinkEvent::Message(ServerMessage::Content(c)) if c.audio.len() == 1
        ));
        assert!(matches!(
            &events[1],
            LinkEvent::Closed { clean: true, reason } if reason == "bye"
        ));
    }

    #[tokio::test]
    async fn close_during_setup_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "invalid model".into(),
                }))
                .await;
        });

        let connector = GeminiLiveConnector::new(format!("ws://{addr}/"), "k", 4);
        let (sink, _) = collecting_sink();
        let err = connector.connect(setup(), sink).await.err().unwrap();
        assert!(matches!(err, TransportError::Rejected(reason) if reason == "invalid model"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let connector = GeminiLiveConnector::new(format!("ws://{addr}/"), "k", 4);
        let (sink, _) = collecting_sink();
        let err = connector.connect(setup(), sink).await.err().unwrap();
        assert!(matches!(err, TransportError::WebSocket(_)));
    }

    #[test]
    fn link_close_is_idempotent() {
        let (audio_tx, _audio_rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut link = LiveLink::new(audio_tx, shutdown_tx);

        assert!(!link.is_closed());
        link.close();
        link.close();
        assert!(link.is_closed());
        assert!(link.audio_sender().is_none());
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[test]
    fn describe_close_codes() {
        assert_eq!(describe_close(None), (true, String::new()));
        let (clean, reason) = describe_close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "boom".into(),
        }));
        assert!(!clean);
        assert_eq!(reason, "boom");
    }
}
