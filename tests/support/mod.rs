//! A loopback TCP fake server used by the end-to-end scenario tests:
//! accepts connections and replies to the handshake command with a canned
//! capabilities document, so checkout/return/reset/sweep can be exercised
//! over real sockets without a real `mongod`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const HEADER_LEN: usize = 16;
pub const OP_COMMAND_REPLY: u32 = 2011;

/// Starts a background task accepting connections on an ephemeral
/// loopback port and replying to every incoming message with a fixed
/// `ismaster`-shaped document. Returns the bound port.
pub async fn spawn_fake_server() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(serve_one(socket));
        }
    });

    port
}

async fn serve_one(mut socket: TcpStream) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let request_id = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if (length as usize) < HEADER_LEN {
            return;
        }
        let mut body = vec![0u8; length as usize - HEADER_LEN];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }

        let reply_body = serde_json::to_vec(&serde_json::json!({
            "ok": 1.0,
            "ismaster": true,
            "maxWireVersion": 9,
            "maxBsonObjectSize": 16_777_216u64,
            "maxMessageSizeBytes": 48_000_000u64,
        }))
        .unwrap();

        let mut reply = Vec::new();
        let total = (HEADER_LEN + reply_body.len()) as u32;
        reply.extend_from_slice(&total.to_le_bytes());
        reply.extend_from_slice(&(request_id.wrapping_add(1)).to_le_bytes());
        reply.extend_from_slice(&request_id.to_le_bytes());
        reply.extend_from_slice(&OP_COMMAND_REPLY.to_le_bytes());
        reply.extend_from_slice(&reply_body);

        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}
