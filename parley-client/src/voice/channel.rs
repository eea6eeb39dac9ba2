//! Remote channel boundary
//!
//! An [`Endpoint`] opens a bidirectional channel to the conversational agent.
//! The session holds the command side; the event side is drained by the
//! session loop. Transports (the WebSocket client, test fakes) hold the
//! opposite ends through a [`ChannelTransport`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_common::protocol::ChannelConfig;
use parley_common::{ChannelEvent, WireFrame};

use crate::error::ChannelError;

/// Commands from the session to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCommand {
    /// Transmit one encoded capture frame
    SendAudio(WireFrame),
    /// Close the channel gracefully
    Close,
}

/// Receiver for inbound channel events
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Session-side command sender
#[derive(Debug, Clone)]
pub struct ChannelSender {
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelSender {
    /// Queue a frame without waiting for the network
    pub fn send(&self, frame: WireFrame) -> Result<(), ChannelError> {
        self.commands
            .send(ChannelCommand::SendAudio(frame))
            .map_err(|_| ChannelError::Closed)
    }

    /// Ask the transport to close; a transport that is already gone is fine
    pub fn close(&self) {
        let _ = self.commands.send(ChannelCommand::Close);
    }
}

/// Session side of an open channel
#[derive(Debug)]
pub struct ChannelHandle {
    pub sender: ChannelSender,
    pub events: ChannelEvents,
    /// Transport task, if the endpoint spawned one
    pub task: Option<JoinHandle<()>>,
}

/// Transport side of an open channel
#[derive(Debug)]
pub struct ChannelTransport {
    pub commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelTransport {
    /// Deliver an event to the session, ignoring a session that has gone away
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

/// Create a connected handle/transport pair
pub fn channel_pair() -> (ChannelHandle, ChannelTransport) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ChannelHandle {
            sender: ChannelSender {
                commands: command_tx,
            },
            events: event_rx,
            task: None,
        },
        ChannelTransport {
            commands: command_rx,
            events: event_tx,
        },
    )
}

/// Something that can open a channel to a conversational agent
///
/// `open` returns immediately; connection progress is reported through the
/// event stream (`Ready` on success, `Error` on failure).
pub trait Endpoint: Send {
    fn open(&self, config: &ChannelConfig) -> Result<ChannelHandle, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_flow_to_transport() {
        let (handle, mut transport) = channel_pair();
        handle.sender.send(WireFrame::from_base64("AAA=")).unwrap();
        handle.sender.close();

        assert_eq!(
            transport.commands.try_recv().unwrap(),
            ChannelCommand::SendAudio(WireFrame::from_base64("AAA="))
        );
        assert_eq!(transport.commands.try_recv().unwrap(), ChannelCommand::Close);
    }

    #[test]
    fn test_events_flow_to_session() {
        let (mut handle, transport) = channel_pair();
        transport.emit(ChannelEvent::Ready);
        transport.emit(ChannelEvent::Interrupted);

        assert_eq!(handle.events.try_recv().unwrap(), ChannelEvent::Ready);
        assert_eq!(handle.events.try_recv().unwrap(), ChannelEvent::Interrupted);
    }

    #[test]
    fn test_send_after_transport_dropped() {
        let (handle, transport) = channel_pair();
        drop(transport);

        assert_eq!(
            handle.sender.send(WireFrame::default()),
            Err(ChannelError::Closed)
        );
        // Close never fails
        handle.sender.close();
    }
}
