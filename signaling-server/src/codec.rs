//! Websocket frame encoding. Clients may speak JSON in text frames or
//! MessagePack in binary frames, and are answered in the same encoding.

use axum::extract::ws::Message;
use peer_calls_protocol::SignalMessage;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Encoding {
    #[default]
    Json,
    MessagePack,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed messagepack frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("could not encode messagepack frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Decode a data frame. Control frames yield `Ok(None)`.
pub fn decode(message: &Message) -> Result<Option<(SignalMessage, Encoding)>, CodecError> {
    match message {
        Message::Text(text) => Ok(Some((serde_json::from_str(text)?, Encoding::Json))),
        Message::Binary(bytes) => Ok(Some((
            rmp_serde::from_slice(bytes)?,
            Encoding::MessagePack,
        ))),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
    }
}

pub fn encode(message: &SignalMessage, encoding: Encoding) -> Result<Message, CodecError> {
    Ok(match encoding {
        Encoding::Json => Message::Text(serde_json::to_string(message)?),
        Encoding::MessagePack => Message::Binary(rmp_serde::to_vec_named(message)?),
    })
}
