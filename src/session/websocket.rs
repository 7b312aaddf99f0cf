//! JSON-over-WebSocket speech channel
//!
//! ## Protocol
//! Every message is a JSON text frame tagged by `type`.
//! - **Client → Server**: one `setup` right after the socket opens, then an
//!   `audio` message per captured frame (base64 PCM, `mime_type` names the rate)
//! - **Server → Client**: `audio` (base64 PCM at the output rate),
//!   `interrupted`, `turn_complete`, `error`

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::codec::transport::{decode_text, encode_text};
use crate::error::SessionError;
use crate::session::channel::{ChannelEvent, ChannelSetup, SpeechChannel};

/// Messages sent to the speech service
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    Setup {
        voice: &'a str,
        system_instruction: &'a str,
        input_sample_rate: u32,
        output_sample_rate: u32,
    },
    Audio {
        mime_type: &'a str,
        data: String,
    },
}

/// Messages received from the speech service
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Audio { data: String },
    Interrupted,
    TurnComplete,
    Error { message: String },
}

/// Translate one text frame. Frames that carry nothing usable are dropped.
fn parse_server_text(text: &str) -> Option<ChannelEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unrecognized server message");
            return None;
        }
    };

    match message {
        ServerMessage::Audio { data } => match decode_text(&data) {
            Ok(pcm) => Some(ChannelEvent::Chunk(Bytes::from(pcm))),
            Err(e) => {
                tracing::warn!(error = %e, "dropping audio chunk");
                None
            }
        },
        ServerMessage::Interrupted => Some(ChannelEvent::Interrupted),
        ServerMessage::TurnComplete => Some(ChannelEvent::TurnComplete),
        ServerMessage::Error { message } => Some(ChannelEvent::Error(message)),
    }
}

/// [`SpeechChannel`] over a WebSocket connection
///
/// The socket is driven by a spawned task; `send` only queues.
pub struct WebSocketChannel {
    url: String,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl SpeechChannel for WebSocketChannel {
    fn open(
        &mut self,
        setup: &ChannelSetup,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), SessionError> {
        self.close();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_connection(self.url.clone(), setup.clone(), rx, events));
        self.outbound = Some(tx);

        tracing::debug!(url = %self.url, "connecting speech channel");
        Ok(())
    }

    fn send(&mut self, pcm: Bytes) -> Result<(), SessionError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| SessionError::Transport("channel is not open".to_string()))?;
        tx.send(pcm)
            .map_err(|_| SessionError::Transport("connection closed".to_string()))
    }

    fn close(&mut self) {
        // The connection task sends a close frame once the queue is gone
        self.outbound = None;
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    url: String,
    setup: ChannelSetup,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let (socket, _) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            let _ = events.send(ChannelEvent::Error(format!("connect to {url} failed: {e}")));
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    let hello = ClientMessage::Setup {
        voice: &setup.voice,
        system_instruction: &setup.system_instruction,
        input_sample_rate: setup.input_sample_rate,
        output_sample_rate: setup.output_sample_rate,
    };
    if let Err(e) = send_json(&mut sink, &hello).await {
        let _ = events.send(ChannelEvent::Error(e));
        return;
    }
    if events.send(ChannelEvent::Opened).is_err() {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            pcm = outbound.recv() => match pcm {
                Some(pcm) => {
                    let message = ClientMessage::Audio {
                        mime_type: &setup.mime_type,
                        data: encode_text(&pcm),
                    };
                    if let Err(e) = send_json(&mut sink, &message).await {
                        let _ = events.send(ChannelEvent::Error(e));
                        return;
                    }
                }
                None => {
                    tracing::debug!("speech channel closed locally");
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_server_text(&text) {
                        if events.send(event).is_err() {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(ChannelEvent::Closed);
                    return;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    return;
                }
            },
        }
    }
}

async fn send_json<S>(sink: &mut S, message: &ClientMessage<'_>) -> Result<(), String>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
