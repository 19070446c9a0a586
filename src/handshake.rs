//! The initial server-identity round-trip and its response parser.

use crate::error::Error;
use crate::stream::BoxedStream;
use crate::wire::{self, Document};

/// Default taken when a peer's handshake omitted `maxMessageSizeBytes`,
/// matching `pymongo.common.MAX_MESSAGE_SIZE`.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 48 * 1024 * 1024;

/// Capabilities learned from the handshake reply. Every field is `None`
/// ("unknown") when `handshake=false` was configured for test scaffolding —
/// callers that depend on a field must treat `None` as "unknown", never as
/// a default value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub max_wire_version: Option<i32>,
    pub max_bson_size: Option<usize>,
    pub max_message_size: Option<u32>,
    pub max_write_batch_size: Option<usize>,
    pub is_writable: Option<bool>,
    pub is_router: Option<bool>,
}

impl Capabilities {
    /// The capability set used when the handshake step was skipped.
    pub fn unknown() -> Self {
        Capabilities::default()
    }

    /// Parses an `ismaster`-shaped reply document.
    pub fn from_reply(doc: &Document) -> Self {
        Capabilities {
            max_wire_version: doc.get("maxWireVersion").and_then(|v| v.as_i64()).map(|v| v as i32),
            max_bson_size: doc.get("maxBsonObjectSize").and_then(|v| v.as_u64()).map(|v| v as usize),
            max_message_size: doc
                .get("maxMessageSizeBytes")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            max_write_batch_size: doc
                .get("maxWriteBatchSize")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize),
            is_writable: doc.get("ismaster").and_then(|v| v.as_bool()),
            is_router: doc.get("msg").and_then(|v| v.as_str()).map(|s| s == "isdbgrid"),
        }
    }

    /// The effective cap on a single message, falling back to the driver
    /// default when the peer didn't report one or the handshake was
    /// skipped.
    pub fn effective_max_message_size(&self) -> u32 {
        self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

/// Issues the server-identity command on the administrative database with
/// a `client` subdocument carrying the fixed metadata, and parses the
/// reply. The freshly-connected stream has no prior traffic, so request
/// id `0` is always safe here.
pub async fn perform(stream: &mut BoxedStream, endpoint: &str, client_metadata: Document) -> Result<Capabilities, Error> {
    let command = serde_json::json!({
        "ismaster": 1,
        "client": client_metadata,
    });

    wire::send_message(stream, 0, wire::OP_COMMAND, &command)
        .await
        .map_err(|e| Error::from_io(endpoint, e))?;

    let reply = wire::receive_message(stream, wire::OP_COMMAND_REPLY, 0, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .map_err(|e| Error::from_io(endpoint, e))?;

    Ok(Capabilities::from_reply(&reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_full_reply() {
        let doc = json!({
            "ismaster": true,
            "maxWireVersion": 9,
            "maxBsonObjectSize": 16_777_216u64,
            "maxMessageSizeBytes": 48_000_000u64,
            "maxWriteBatchSize": 100_000u64,
        });
        let caps = Capabilities::from_reply(&doc);
        assert_eq!(caps.max_wire_version, Some(9));
        assert_eq!(caps.max_bson_size, Some(16_777_216));
        assert_eq!(caps.is_writable, Some(true));
        assert_eq!(caps.is_router, None);
    }

    #[test]
    fn recognizes_a_router_peer() {
        let doc = json!({"ismaster": true, "msg": "isdbgrid", "maxWireVersion": 9});
        let caps = Capabilities::from_reply(&doc);
        assert_eq!(caps.is_router, Some(true));
    }

    #[tokio::test]
    async fn perform_sends_client_metadata_and_parses_the_reply() {
        use crate::stream::BoxedStream;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut server) = tokio::io::duplex(4096);
        let mut client: BoxedStream = Box::pin(client);

        let server_task = tokio::spawn(async move {
            let mut header = [0u8; wire::HEADER_LEN];
            server.read_exact(&mut header).await.unwrap();
            let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let mut body = vec![0u8; length as usize - wire::HEADER_LEN];
            server.read_exact(&mut body).await.unwrap();
            let sent: Document = serde_json::from_slice(&body).unwrap();
            assert_eq!(sent["client"]["driver"]["name"], json!("test-driver"));

            let reply_body =
                serde_json::to_vec(&json!({"ismaster": true, "maxWireVersion": 9})).unwrap();
            let mut reply = Vec::new();
            let total = (wire::HEADER_LEN + reply_body.len()) as u32;
            reply.extend_from_slice(&total.to_le_bytes());
            reply.extend_from_slice(&1u32.to_le_bytes());
            reply.extend_from_slice(&0u32.to_le_bytes());
            reply.extend_from_slice(&wire::OP_COMMAND_REPLY.to_le_bytes());
            reply.extend_from_slice(&reply_body);
            server.write_all(&reply).await.unwrap();
        });

        let metadata = json!({"driver": {"name": "test-driver", "version": "0.1"}});
        let caps = perform(&mut client, "test:27017", metadata).await.unwrap();
        assert_eq!(caps.max_wire_version, Some(9));
        assert_eq!(caps.is_writable, Some(true));

        server_task.await.unwrap();
    }

    #[test]
    fn unknown_capabilities_are_all_none() {
        let caps = Capabilities::unknown();
        assert_eq!(caps.max_wire_version, None);
        assert_eq!(caps.effective_max_message_size(), DEFAULT_MAX_MESSAGE_SIZE);
    }
}
