//! Serialization and deserialization for the Taskboard wire protocol.
//!
//! Frames are postcard-encoded [`StoreRequest`] and [`StoreResponse`]
//! values. WebSocket framing preserves message boundaries, so no length
//! prefix is added.

use crate::wire::{StoreRequest, StoreResponse};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`StoreRequest`] into a byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the request cannot be serialized.
pub fn encode_request(request: &StoreRequest) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(request).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`StoreRequest`] from a byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid request.
pub fn decode_request(bytes: &[u8]) -> Result<StoreRequest, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`StoreResponse`] into a byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the response cannot be serialized.
pub fn encode_response(response: &StoreResponse) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(response).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`StoreResponse`] from a byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid response.
pub fn decode_response(bytes: &[u8]) -> Result<StoreResponse, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
