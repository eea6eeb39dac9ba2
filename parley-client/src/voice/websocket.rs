//! WebSocket transport for the conversational endpoint
//!
//! Connects with tokio-tungstenite, sends the setup message, then runs a
//! full-duplex loop: session commands go out as JSON text frames while
//! server messages are parsed into [`ChannelEvent`]s.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use parley_common::ChannelEvent;
use parley_common::protocol::{ChannelConfig, ClientMessage, ServerMessage};

use super::channel::{ChannelCommand, ChannelHandle, ChannelTransport, Endpoint, channel_pair};
use crate::error::ChannelError;

/// Give up on a connection attempt after this long
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// How long to wait for the server to answer our close frame
const CLOSE_HANDSHAKE_TIMEOUT_MS: u64 = 1000;

/// Opens channels over a WebSocket URL
#[derive(Debug, Clone)]
pub struct WebSocketEndpoint {
    url: String,
}

impl WebSocketEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Endpoint for WebSocketEndpoint {
    /// Spawn the transport task on the current tokio runtime
    fn open(&self, config: &ChannelConfig) -> Result<ChannelHandle, ChannelError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Connect(format!("no async runtime: {e}")))?;

        let (mut handle, transport) = channel_pair();
        handle.task = Some(runtime.spawn(run_channel_client(
            self.url.clone(),
            config.clone(),
            transport,
        )));
        Ok(handle)
    }
}

/// Encode a client message and send it as a text frame
async fn send_message<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = message
        .to_json()
        .map_err(|e| ChannelError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))
}

/// Wait for the server's reply to our close frame so the handshake completes
async fn finish_close<S>(stream: &mut S)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let drain = async {
        while let Some(Ok(msg)) = stream.next().await {
            if msg.is_close() {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_millis(CLOSE_HANDSHAKE_TIMEOUT_MS), drain)
        .await
        .is_err()
    {
        tracing::debug!("server did not acknowledge close");
    }
}

/// Parse one server payload and forward its events
fn forward_payload(transport: &ChannelTransport, payload: &[u8]) {
    match ServerMessage::parse_bytes(payload) {
        Ok(message) => {
            for event in message.into_events() {
                transport.emit(event);
            }
        }
        Err(e) => tracing::warn!(error = %e, "ignoring unparseable server message"),
    }
}

/// Run one channel until either side closes it
///
/// Connection failures and transport errors are reported as
/// [`ChannelEvent::Error`]; a clean close from either side as
/// [`ChannelEvent::Closed`].
pub async fn run_channel_client(
    url: String,
    config: ChannelConfig,
    mut transport: ChannelTransport,
) {
    let connect = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        connect_async(url.as_str()),
    )
    .await;

    let ws = match connect {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            let error = ChannelError::Connect(e.to_string());
            transport.emit(ChannelEvent::Error(error.to_string()));
            return;
        }
        Err(_) => {
            transport.emit(ChannelEvent::Error(
                ChannelError::Connect("connection timed out".to_string()).to_string(),
            ));
            return;
        }
    };
    tracing::debug!(%url, "channel connected");

    let (mut sink, mut stream) = ws.split();

    if let Err(e) = send_message(&mut sink, &ClientMessage::setup(&config)).await {
        transport.emit(ChannelEvent::Error(e.to_string()));
        return;
    }

    loop {
        tokio::select! {
            cmd = transport.commands.recv() => {
                match cmd {
                    Some(ChannelCommand::SendAudio(frame)) => {
                        if let Err(e) = send_message(&mut sink, &ClientMessage::audio(frame)).await {
                            transport.emit(ChannelEvent::Error(e.to_string()));
                            return;
                        }
                    }
                    Some(ChannelCommand::Close) | None => {
                        if sink.send(Message::Close(None)).await.is_ok() {
                            finish_close(&mut stream).await;
                        }
                        transport.emit(ChannelEvent::Closed);
                        return;
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => forward_payload(&transport, text.as_bytes()),
                    Some(Ok(Message::Binary(data))) => forward_payload(&transport, &data),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "server closed channel");
                        transport.emit(ChannelEvent::Closed);
                        return;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        transport.emit(ChannelEvent::Error(
                            ChannelError::Transport(e.to_string()).to_string(),
                        ));
                        return;
                    }
                    None => {
                        transport.emit(ChannelEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}
