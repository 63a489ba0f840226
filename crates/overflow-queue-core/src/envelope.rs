//! # Envelope Codec
//!
//! Framing for queue bodies written by the queue manager.
//!
//! Every body is a tagged frame, either the inline payload or an envelope
//! naming the blob that holds the payload:
//!
//! ```text
//! {"kind":"inline","body":<payload>}
//! {"kind":"envelope","body":{"blob_name":"<name>"}}
//! ```
//!
//! Bodies that do not decode as a frame (plain text, legacy producers) fall
//! back to literal text. Blob contents must decode as an inline frame.

use crate::error::SerializationError;
use crate::serializer::ByteSerializer;
use crate::BlobName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Size limit of the queue services this crate targets (64 KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Pointer record enqueued in place of an oversized payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub blob_name: BlobName,
}

impl Envelope {
    /// Create envelope for a blob
    pub fn new(blob_name: BlobName) -> Self {
        Self { blob_name }
    }
}

/// Tagged frame written to queue bodies and blobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum MessageBody<T> {
    Inline(T),
    Envelope(Envelope),
}

/// Result of decoding a raw queue body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBody<T> {
    /// Payload carried directly in the queue body
    Inline(T),
    /// Payload lives in the named blob
    Envelope(Envelope),
    /// Body was not a frame; delivered as literal text
    Text(String),
}

/// Number of bytes `len` input bytes occupy once base64 encoded
pub const fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Largest serialized payload size eligible for direct enqueue
///
/// Derived from the queue's raw message limit: the largest length whose
/// base64 encoding still fits in `max_message_size - 1` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OffloadThreshold(usize);

impl OffloadThreshold {
    /// Compute the threshold for a queue's raw message size limit
    pub const fn from_max_message_size(max_message_size: usize) -> Self {
        if max_message_size == 0 {
            return Self(0);
        }
        Self(((max_message_size - 1) / 4) * 3)
    }

    /// Threshold in bytes
    pub const fn bytes(&self) -> usize {
        self.0
    }

    /// Check if a serialized payload of `len` bytes must be offloaded
    pub const fn requires_offload(&self, len: usize) -> bool {
        len > self.0
    }
}

impl Default for OffloadThreshold {
    fn default() -> Self {
        Self::from_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

/// Encodes payloads and envelopes into frames and decodes them back
#[derive(Debug, Clone)]
pub struct EnvelopeCodec<S> {
    serializer: S,
    threshold: OffloadThreshold,
}

impl<S: ByteSerializer> EnvelopeCodec<S> {
    /// Create codec with a serializer and threshold
    pub fn new(serializer: S, threshold: OffloadThreshold) -> Self {
        Self {
            serializer,
            threshold,
        }
    }

    /// Offload threshold in effect
    pub fn threshold(&self) -> OffloadThreshold {
        self.threshold
    }

    /// Serializer in use
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Serialize a payload as an inline frame
    pub fn encode_payload<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<Vec<u8>, SerializationError> {
        self.serializer.serialize(&MessageBody::Inline(payload))
    }

    /// Serialize an envelope frame
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, SerializationError> {
        self.serializer
            .serialize(&MessageBody::<()>::Envelope(envelope.clone()))
    }

    /// Decode a raw queue body
    ///
    /// Never fails: anything that is not a frame of the expected payload type
    /// is returned as text.
    pub fn decode_queue_body<T: DeserializeOwned>(&self, body: &[u8]) -> DecodedBody<T> {
        match self.serializer.deserialize::<MessageBody<T>>(body) {
            Ok(MessageBody::Inline(payload)) => DecodedBody::Inline(payload),
            Ok(MessageBody::Envelope(envelope)) => DecodedBody::Envelope(envelope),
            Err(_) => DecodedBody::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// Decode the content of an offloaded blob
    ///
    /// No text fallback: a blob that is not an inline frame is corrupt.
    pub fn decode_offloaded<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, SerializationError> {
        match self.serializer.deserialize::<MessageBody<T>>(data)? {
            MessageBody::Inline(payload) => Ok(payload),
            MessageBody::Envelope(envelope) => Err(SerializationError::UnexpectedFrame {
                message: format!(
                    "blob contains an envelope pointing at '{}'",
                    envelope.blob_name
                ),
            }),
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
