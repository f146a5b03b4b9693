//! jupyter-wire - the Jupyter messaging wire protocol.
//!
//! This crate implements the data model and framing for Jupyter protocol
//! traffic: the [`Message`] envelope (header, parent header, metadata,
//! content), the multipart wire representation with its `<IDS|MSG>`
//! delimiter, and HMAC signing over the four JSON payload frames.
//!
//! Transport is out of scope here; the codec works on `Vec<Bytes>` frames
//! and leaves sockets to the caller.

pub mod connection;
pub mod message;
pub mod signature;
pub mod wire;

pub use connection::ConnectionInfo;
pub use message::{reply_type_for, Header, Message};
pub use signature::{SignatureScheme, Signer};
pub use wire::{decode, encode, DELIMITER};

/// Protocol version advertised in message headers and kernel_info replies.
pub const PROTOCOL_VERSION: &str = "5.4";

/// Error type for wire-level failures.
///
/// Authentication and framing failures are always local to one message;
/// callers are expected to drop or report the message and keep going.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame list contains no `<IDS|MSG>` delimiter.
    #[error("missing <IDS|MSG> delimiter frame")]
    MissingDelimiter,

    /// Fewer than five frames follow the delimiter (signature + four parts).
    #[error("truncated message: expected signature and four payload frames")]
    Truncated,

    /// The supplied signature does not match the recomputed digest.
    #[error("message signature verification failed")]
    AuthenticationFailed,

    /// One of the four JSON parts failed to parse.
    #[error("malformed {part} frame: {source}")]
    MalformedPart {
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The connection file names a digest we do not implement.
    #[error("unsupported signature scheme: {0}")]
    UnsupportedScheme(String),

    /// The signing key could not be used to construct an HMAC.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("failed to read connection file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
