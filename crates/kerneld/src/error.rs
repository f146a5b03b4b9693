//! Error taxonomy for the kernel runtime.
//!
//! The important distinction is [`KernelError::Interrupted`]: a user-requested
//! cancellation of an in-flight execution. It is never reported as an error
//! broadcast; the owning event loop restarts instead of surfacing it.

use jupyter_wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zmq(#[from] zeromq::ZmqError),

    /// User-requested cancellation of an in-flight execution.
    #[error("execution interrupted")]
    Interrupted,

    /// No handler registered for a message type. Answered with an explicit
    /// error reply, not a broadcast.
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    /// The transport endpoint closed underneath a send.
    #[error("channel closed")]
    ChannelClosed,

    /// A handler failed while servicing one request.
    #[error("{0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;
