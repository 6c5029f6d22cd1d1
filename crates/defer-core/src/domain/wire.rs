//! MessagePack wire helpers.
//!
//! All payloads use `rmp-serde` with named fields so that the bytes are
//! self-describing. Pub/sub messages may batch several `SendTask`s, each
//! framed with a big-endian `u32` length prefix.

use serde::{Deserialize, Serialize};

use super::errors::{CodecError, TransportError};
use super::task::SendTask;

const FRAME_HEADER_LEN: usize = 4;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec_named(value).map_err(CodecError::Encode)
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CodecError> {
    rmp_serde::from_slice(bytes).map_err(CodecError::Decode)
}

/// Frame a batch of tasks into one pub/sub message.
pub fn encode_frames(tasks: &[SendTask]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    for task in tasks {
        let body = encode(task)?;
        let len =
            u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge(body.len()))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&body);
    }
    Ok(buf)
}

/// Split one pub/sub message into the tasks it carries. An empty message
/// carries zero tasks.
pub fn decode_frames(mut bytes: &[u8]) -> Result<Vec<SendTask>, TransportError> {
    let mut tasks = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(TransportError::Frame(format!(
                "truncated frame header ({} bytes)",
                bytes.len()
            )));
        }
        let (header, rest) = bytes.split_at(FRAME_HEADER_LEN);
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if rest.len() < len {
            return Err(TransportError::Frame(format!(
                "truncated frame body: {} < {len}",
                rest.len()
            )));
        }
        let (body, rest) = rest.split_at(len);
        let task = decode::<SendTask>(body).map_err(|e| TransportError::Frame(e.to_string()))?;
        tasks.push(task);
        bytes = rest;
    }
    Ok(tasks)
}
