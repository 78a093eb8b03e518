//! Message framing utilities for the transport layer.
//!
//! Every frame starts with a one-byte mime-type length, followed by the mime
//! type itself and then the serialized payload:
//! `[mime length (1 byte)][mime type][payload]`.

use crate::message::{Request, Response};
use crate::Error;

/// Maximum payload size (64 MB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// The only mime type spoken on the wire.
pub const MIME_TYPE: &str = "application/json";

/// Size of the mime header (length byte plus mime type) in bytes.
pub const HEADER_SIZE: usize = 1 + MIME_TYPE.len();

/// Encode a payload with the mime header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.push(MIME_TYPE.len() as u8);
    frame.extend_from_slice(MIME_TYPE.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read the mime type from the start of a frame.
///
/// Returns the mime type and a slice starting after the header.
pub fn read_mime_header(frame: &[u8]) -> Result<(&str, &[u8]), Error> {
    let Some((&len, rest)) = frame.split_first() else {
        return Err(Error::InvalidMessage("frame too short".to_string()));
    };

    let len = len as usize;
    if rest.len() < len {
        return Err(Error::InvalidMessage(format!(
            "buffer too short for mime header: {} < {}",
            rest.len(),
            len
        )));
    }

    let mime = std::str::from_utf8(&rest[..len])
        .map_err(|e| Error::InvalidMessage(format!("mime type is not utf-8: {}", e)))?;
    Ok((mime, &rest[len..]))
}

/// Extract the payload from a complete frame.
pub fn extract_payload(frame: &[u8]) -> Result<&[u8], Error> {
    let (mime, payload) = read_mime_header(frame)?;
    if mime != MIME_TYPE {
        return Err(Error::UnsupportedMimeType(mime.to_string()));
    }

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    Ok(payload)
}

/// Serialize and frame a request.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, Error> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| Error::Serialization(format!("failed to serialize request: {}", e)))?;
    encode_frame(&payload)
}

/// Unframe and deserialize a response.
pub fn decode_response(frame: &[u8]) -> Result<Response, Error> {
    let payload = extract_payload(frame)?;
    serde_json::from_slice(payload)
        .map_err(|e| Error::Deserialization(format!("failed to deserialize response: {}", e)))
}

/// Unframe and deserialize a request.
pub fn decode_request(frame: &[u8]) -> Result<Request, Error> {
    let payload = extract_payload(frame)?;
    serde_json::from_slice(payload)
        .map_err(|e| Error::Deserialization(format!("failed to deserialize request: {}", e)))
}

/// Serialize and frame a response.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, Error> {
    let payload = serde_json::to_vec(response)
        .map_err(|e| Error::Serialization(format!("failed to serialize response: {}", e)))?;
    encode_frame(&payload)
}
