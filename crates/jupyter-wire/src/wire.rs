//! Multipart frame codec.
//!
//! Wire layout per message:
//!
//! ```text
//! [identity frames...] <IDS|MSG> <signature> <header> <parent_header> <metadata> <content>
//! ```
//!
//! The signature is a hex HMAC over the four JSON frames that follow it.
//! Verification happens before any parsing so that unauthenticated input is
//! never fed to the JSON parser.

use bytes::Bytes;
use serde_json::Value;

use crate::message::{Header, Message};
use crate::signature::Signer;
use crate::WireError;

/// Delimiter frame separating routing identities from the signed payload.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Serialize a message to its signed wire frames.
pub fn encode(message: &Message, signer: &Signer) -> Result<Vec<Bytes>, WireError> {
    let header = serde_json::to_vec(&message.header)?;
    let parent_header = match &message.parent_header {
        Some(parent) => serde_json::to_vec(parent)?,
        None => b"{}".to_vec(),
    };
    let metadata = serde_json::to_vec(&message.metadata)?;
    let content = serde_json::to_vec(&message.content)?;

    let signature = signer.sign(&[
        header.as_slice(),
        parent_header.as_slice(),
        metadata.as_slice(),
        content.as_slice(),
    ]);

    let mut frames = Vec::with_capacity(message.identities.len() + 6);
    frames.extend(message.identities.iter().cloned());
    frames.push(Bytes::from_static(DELIMITER));
    frames.push(Bytes::from(signature.into_bytes()));
    frames.push(Bytes::from(header));
    frames.push(Bytes::from(parent_header));
    frames.push(Bytes::from(metadata));
    frames.push(Bytes::from(content));
    Ok(frames)
}

/// Parse and authenticate wire frames into a message.
///
/// Fails with [`WireError::AuthenticationFailed`] before any payload parsing
/// when the signature does not match; parse failures name the offending part.
pub fn decode(frames: &[Bytes], signer: &Signer) -> Result<Message, WireError> {
    let delimiter_index = frames
        .iter()
        .position(|frame| frame.as_ref() == DELIMITER)
        .ok_or(WireError::MissingDelimiter)?;

    let identities = frames[..delimiter_index].to_vec();
    let payload = &frames[delimiter_index + 1..];
    if payload.len() < 5 {
        return Err(WireError::Truncated);
    }
    let signature = &payload[0];
    let (header, parent_header, metadata, content) =
        (&payload[1], &payload[2], &payload[3], &payload[4]);

    if !signer.verify(
        signature,
        &[
            header.as_ref(),
            parent_header.as_ref(),
            metadata.as_ref(),
            content.as_ref(),
        ],
    ) {
        return Err(WireError::AuthenticationFailed);
    }

    let header: Header = serde_json::from_slice(header)
        .map_err(|source| WireError::MalformedPart { part: "header", source })?;
    let parent_header = parse_parent_header(parent_header)?;
    let metadata: Value = serde_json::from_slice(metadata)
        .map_err(|source| WireError::MalformedPart { part: "metadata", source })?;
    let content: Value = serde_json::from_slice(content)
        .map_err(|source| WireError::MalformedPart { part: "content", source })?;

    Ok(Message {
        identities,
        header,
        parent_header,
        metadata,
        content,
    })
}

/// Parent headers arrive as `{}`, `null`, or a full header object.
fn parse_parent_header(bytes: &[u8]) -> Result<Option<Header>, WireError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|source| WireError::MalformedPart { part: "parent_header", source })?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(|source| WireError::MalformedPart { part: "parent_header", source }),
    }
}
