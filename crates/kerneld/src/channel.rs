//! Channel endpoints: one bidirectional, message-oriented transport per
//! protocol role.
//!
//! [`Transport`] abstracts the socket so the event loop and handlers can be
//! driven over in-memory pairs as well as real ZeroMQ ROUTER sockets. A
//! `recv` returning `None` means the channel closed; that is the normal
//! shutdown signal, not a failure.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::warn;
use tokio::sync::mpsc;
use zeromq::{RouterSocket, SocketRecv, SocketSend, ZmqMessage};

use jupyter_wire::{decode, encode, Message, Signer};

use crate::error::{KernelError, Result};

/// Logical role of a channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Shell,
    Control,
    Stdin,
    Iopub,
    Heartbeat,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Shell => "shell",
            ChannelRole::Control => "control",
            ChannelRole::Stdin => "stdin",
            ChannelRole::Iopub => "iopub",
            ChannelRole::Heartbeat => "heartbeat",
        }
    }
}

/// Raw frame transport underneath a channel.
pub trait Transport: Send {
    /// Receive the next multipart message; `None` when the channel closed.
    fn recv(&mut self) -> BoxFuture<'_, Option<Vec<Bytes>>>;

    /// Send one multipart message.
    fn send(&mut self, frames: Vec<Bytes>) -> BoxFuture<'_, Result<()>>;
}

/// A transport bound to one protocol role, with wire codec helpers.
pub struct Channel {
    pub role: ChannelRole,
    transport: Box<dyn Transport>,
}

impl Channel {
    pub fn new(role: ChannelRole, transport: Box<dyn Transport>) -> Self {
        Channel { role, transport }
    }

    /// Receive raw frames; `None` when the channel closed.
    pub async fn recv(&mut self) -> Option<Vec<Bytes>> {
        self.transport.recv().await
    }

    /// Send raw frames, bypassing the codec.
    pub async fn send_frames(&mut self, frames: Vec<Bytes>) -> Result<()> {
        self.transport.send(frames).await
    }

    /// Encode and send one message.
    pub async fn send_message(&mut self, message: &Message, signer: &Signer) -> Result<()> {
        let frames = encode(message, signer)?;
        self.transport.send(frames).await
    }

    /// Decode received frames.
    pub fn decode(&self, frames: &[Bytes], signer: &Signer) -> Result<Message> {
        Ok(decode(frames, signer)?)
    }
}

/// ZeroMQ ROUTER transport used for the shell, control, and stdin channels.
pub struct ZmqTransport {
    role: ChannelRole,
    socket: RouterSocket,
}

impl ZmqTransport {
    pub fn new(role: ChannelRole, socket: RouterSocket) -> Self {
        ZmqTransport { role, socket }
    }
}

impl Transport for ZmqTransport {
    fn recv(&mut self) -> BoxFuture<'_, Option<Vec<Bytes>>> {
        async move {
            match self.socket.recv().await {
                Ok(message) => Some(message.into_vec()),
                Err(e) => {
                    warn!("[{}] socket receive failed, closing: {}", self.role.as_str(), e);
                    None
                }
            }
        }
        .boxed()
    }

    fn send(&mut self, frames: Vec<Bytes>) -> BoxFuture<'_, Result<()>> {
        async move {
            let message = zmq_message_from_frames(frames)?;
            self.socket.send(message).await?;
            Ok(())
        }
        .boxed()
    }
}

/// Build a multipart ZmqMessage from frames; errors on an empty frame list.
pub(crate) fn zmq_message_from_frames(frames: Vec<Bytes>) -> Result<ZmqMessage> {
    let mut iter = frames.into_iter();
    let first = iter.next().ok_or(KernelError::ChannelClosed)?;
    let mut message = ZmqMessage::from(first);
    for frame in iter {
        message.push_back(frame);
    }
    Ok(message)
}

/// In-memory transport for tests and embedding: a pair of connected
/// endpoints exchanging frame vectors over unbounded queues.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<Bytes>>,
    rx: mpsc::UnboundedReceiver<Vec<Bytes>>,
}

impl MemoryTransport {
    /// Create a connected pair. Frames sent on one end arrive on the other;
    /// dropping an end closes the peer's receive side.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport { tx: a_tx, rx: b_rx },
            MemoryTransport { tx: b_tx, rx: a_rx },
        )
    }
}

impl Transport for MemoryTransport {
    fn recv(&mut self) -> BoxFuture<'_, Option<Vec<Bytes>>> {
        async move { self.rx.recv().await }.boxed()
    }

    fn send(&mut self, frames: Vec<Bytes>) -> BoxFuture<'_, Result<()>> {
        async move {
            self.tx
                .send(frames)
                .map_err(|_| KernelError::ChannelClosed)
        }
        .boxed()
    }
}
