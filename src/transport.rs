//! Realtime transport
//!
//! Owns the WebSocket to the realtime service. The socket is split: a reader
//! task decodes inbound events and forwards them in arrival order, while the
//! session loop writes through the sink half. The transport never acts on what
//! it receives.

use crate::audio::encode_frame;
use crate::config::InterviewConfig;
use crate::credential::Credential;
use crate::error::{InterviewError, Result};
use crate::protocol::{ClientEvent, ServerEvent};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Inbound events buffered between the reader task and the session loop
const EVENT_QUEUE: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// What the reader task reports
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Server(ServerEvent),
    /// Remote closed the connection, normally or not
    Closed { reason: Option<String> },
    /// Connection error; the socket is unusable
    Failed(String),
}

/// Write half of an open connection
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &ClientEvent) -> Result<()>;

    async fn close(&mut self);
}

/// A freshly opened connection
pub struct Connection {
    pub sink: Box<dyn EventSink>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub reader: Option<JoinHandle<()>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Connection>;
}

/// Connects to the realtime WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(config: &InterviewConfig) -> Self {
        Self {
            url: format!("{}?model={}", config.realtime_url, config.model),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, credential: &Credential) -> Result<Connection> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.secret()))
            .map_err(|_| InterviewError::Credential("credential is not a valid header".to_string()))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        info!("Connecting to realtime API at {}", self.url);
        let (ws_stream, resp) = connect_async(request).await?;
        debug!("WebSocket handshake status: {}", resp.status());

        let (sink, stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let reader = tokio::spawn(read_events(stream, tx));

        Ok(Connection {
            sink: Box::new(WsEventSink { sink }),
            events: rx,
            reader: Some(reader),
        })
    }
}

struct WsEventSink {
    sink: WsSink,
}

#[async_trait]
impl EventSink for WsEventSink {
    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        self.sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
        if let Err(e) = self.sink.close().await {
            debug!("Sink close failed: {}", e);
        }
    }
}

async fn read_events(mut stream: WsStream, tx: mpsc::Sender<TransportEvent>) {
    debug!("Inbound event task started");

    let last = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match ServerEvent::parse(text.as_str()) {
                Ok(event) => {
                    if let ServerEvent::AudioDelta { delta } = &event {
                        debug!("🔊 Audio delta ({} bytes b64)", delta.len());
                    } else {
                        debug!("📥 {}", event.name());
                    }
                    if tx.send(TransportEvent::Server(event)).await.is_err() {
                        debug!("Event receiver dropped");
                        return;
                    }
                }
                Err(e) => warn!("Undecodable server event: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                info!("WebSocket closed: {:?}", frame);
                break TransportEvent::Closed {
                    reason: frame.map(|f| f.reason.as_str().to_string()),
                };
            }
            Some(Ok(_)) => {
                // Binary, ping and pong carry nothing for us
            }
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break TransportEvent::Failed(e.to_string());
            }
            None => break TransportEvent::Closed { reason: None },
        }
    };

    let _ = tx.send(last).await;
    debug!("Inbound event task terminated");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportState {
    Idle,
    Open,
    Closed,
}

/// One realtime session's connection. Opens at most once.
pub struct RealtimeTransport {
    connector: Arc<dyn Connector>,
    state: TransportState,
    sink: Option<Box<dyn EventSink>>,
    reader: Option<JoinHandle<()>>,
    frames_sent: u64,
}

impl RealtimeTransport {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: TransportState::Idle,
            sink: None,
            reader: None,
            frames_sent: 0,
        }
    }

    /// Connect using `credential`, which is consumed whether or not this works.
    pub async fn open(&mut self, credential: Credential) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.state != TransportState::Idle {
            return Err(InterviewError::Connection(
                "transport has already been opened".to_string(),
            ));
        }
        if credential.is_expired(Utc::now()) {
            return Err(InterviewError::Credential(
                "credential missing or expired".to_string(),
            ));
        }

        let connection = self.connector.connect(&credential).await?;
        drop(credential);

        self.sink = Some(connection.sink);
        self.reader = connection.reader;
        self.state = TransportState::Open;
        info!("✅ Realtime transport open");
        Ok(connection.events)
    }

    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Send a control event.
    pub async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        match (&self.state, self.sink.as_mut()) {
            (TransportState::Open, Some(sink)) => sink.send(event).await,
            _ => Err(InterviewError::Connection("transport is not open".to_string())),
        }
    }

    /// Send one captured frame. Does nothing unless open.
    pub async fn send_audio_frame(&mut self, samples: &[i16]) -> Result<()> {
        if !self.is_open() || samples.is_empty() {
            return Ok(());
        }
        let event = ClientEvent::InputAudioBufferAppend {
            audio: encode_frame(samples),
        };
        self.send(&event).await?;
        self.frames_sent += 1;
        if self.frames_sent % 100 == 0 {
            debug!("🎤 Sent {} audio frames", self.frames_sent);
        }
        Ok(())
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == TransportState::Closed {
            return;
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.state == TransportState::Open {
            info!("🔌 Realtime transport closed after {} frames", self.frames_sent);
        }
        self.state = TransportState::Closed;
    }
}

impl Drop for RealtimeTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
