//! The byte-stream abstraction the pool consumes, type-erased so
//! `SocketRecord` can hold a TCP, UNIX, or TLS stream uniformly.

use std::pin::Pin;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Blanket trait over any async, full-duplex byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Pin<Box<dyn Stream>>;

/// Non-destructive liveness probe.
///
/// Peeks for an unexpected readable-or-closed condition without consuming
/// bytes a legitimate reply would need. Nothing should be pending on an
/// idle connection, so: a pending read (nothing ready) means the socket is
/// alive; EOF, an error, or unexpected data all mean the socket is no
/// longer safely reusable.
pub async fn socket_closed(stream: &mut BoxedStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.read(&mut buf).now_or_never() {
        None => false,
        Some(Ok(0)) => true,
        Some(Ok(_)) => true,
        Some(Err(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn idle_duplex_stream_is_not_closed() {
        let (a, _b) = duplex(64);
        let mut a: BoxedStream = Box::pin(a);
        assert!(!socket_closed(&mut a).await);
    }

    #[tokio::test]
    async fn dropped_peer_is_reported_closed() {
        let (a, b) = duplex(64);
        drop(b);
        let mut a: BoxedStream = Box::pin(a);
        assert!(socket_closed(&mut a).await);
    }

    #[tokio::test]
    async fn unread_bytes_are_treated_as_unusable() {
        let (a, mut b) = duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut b, b"x").await.unwrap();
        let mut a: BoxedStream = Box::pin(a);
        assert!(socket_closed(&mut a).await);
    }
}
