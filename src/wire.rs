//! Framed message send/receive.
//!
//! The real BSON codec and wire-protocol framer live in a separate layer
//! of a full driver; this module implements a minimal length-prefixed
//! envelope that is sufficient to exercise every operation `SocketRecord`
//! exposes end-to-end over a real socket: a 16-byte header (message
//! length, request id, response-to, opcode) followed by a
//! `serde_json::Value` body standing in for a BSON document.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::stream::BoxedStream;

/// Stands in for a BSON document.
pub type Document = serde_json::Value;

pub const HEADER_LEN: usize = 16;

pub const OP_COMMAND: u32 = 2010;
pub const OP_COMMAND_REPLY: u32 = 2011;
pub const OP_REPLY: u32 = 1;

/// Writes one complete framed message. Callers must issue one full send
/// before the matching receive.
pub async fn send_message(
    stream: &mut BoxedStream,
    request_id: u32,
    opcode: u32,
    doc: &Document,
) -> io::Result<()> {
    let body = serde_json::to_vec(doc).map_err(to_io_err)?;
    let length = HEADER_LEN
        .checked_add(body.len())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "message too large to frame"))?;

    let mut buf = Vec::with_capacity(length as usize);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // response_to: unset on a request
    buf.extend_from_slice(&opcode.to_le_bytes());
    buf.extend_from_slice(&body);

    stream.write_all(&buf).await
}

/// Receives one framed reply, bounded by the peer's `max_message_size`.
pub async fn receive_message(
    stream: &mut BoxedStream,
    expected_opcode: u32,
    expected_request_id: u32,
    max_message_size: u32,
) -> io::Result<Document> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let response_to = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let opcode = u32::from_le_bytes(header[12..16].try_into().unwrap());

    if (length as usize) < HEADER_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "message shorter than header"));
    }
    if length > max_message_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message length {length} exceeds max_message_size {max_message_size}"),
        ));
    }
    if opcode != expected_opcode {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected opcode {opcode} (expected {expected_opcode})"),
        ));
    }
    if response_to != expected_request_id {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response_to {response_to} does not match request {expected_request_id}"),
        ));
    }

    let body_len = length as usize - HEADER_LEN;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(to_io_err)
}

fn to_io_err(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_document() {
        let (a, b) = duplex(4096);
        let mut a: BoxedStream = Box::pin(a);
        let mut b: BoxedStream = Box::pin(b);

        let doc = json!({"ismaster": 1, "client": {"driver": "test"}});
        send_message(&mut a, 7, OP_COMMAND, &doc).await.unwrap();

        // Relay as a reply so the response_to/opcode checks line up.
        let mut header = [0u8; HEADER_LEN];
        tokio::io::AsyncReadExt::read_exact(&mut b, &mut header).await.unwrap();
        let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let mut body = vec![0u8; length as usize - HEADER_LEN];
        tokio::io::AsyncReadExt::read_exact(&mut b, &mut body).await.unwrap();

        let mut reply = Vec::new();
        reply.extend_from_slice(&length.to_le_bytes());
        reply.extend_from_slice(&99u32.to_le_bytes()); // request_id of the reply itself
        reply.extend_from_slice(&7u32.to_le_bytes()); // response_to == original request id
        reply.extend_from_slice(&OP_COMMAND_REPLY.to_le_bytes());
        reply.extend_from_slice(&body);
        tokio::io::AsyncWriteExt::write_all(&mut b, &reply).await.unwrap();

        let received = receive_message(&mut a, OP_COMMAND_REPLY, 7, 48 * 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(received, doc);
    }

    #[tokio::test]
    async fn rejects_messages_over_the_peer_limit() {
        let (a, b) = duplex(4096);
        let mut a: BoxedStream = Box::pin(a);
        let mut b: BoxedStream = Box::pin(b);

        send_message(&mut a, 1, OP_COMMAND, &json!({"k": "v".repeat(100)}))
            .await
            .unwrap();

        let err = receive_message(&mut b, OP_COMMAND, 1, 8).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
