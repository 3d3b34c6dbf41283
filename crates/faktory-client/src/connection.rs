//! Owns the TCP socket and the framed send/receive primitives. Pure
//! transport (command semantics, state gating, and the serialization
//! lock all live one level up in [`crate::client::Client`]).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProtocolError;

const READ_CHUNK: usize = 4096;

/// A connected socket plus the per-operation timeout applied to every
/// read and write.
pub struct Connection {
    stream: TcpStream,
    timeout: Option<Duration>,
}

impl Connection {
    /// Opens a TCP connection to `host:port`. `timeout` bounds every
    /// subsequent `send`/`receive`; `None` leaves them unbounded.
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, ProtocolError> {
        let connect_fut = TcpStream::connect((host, port));
        let stream = match timeout {
            Some(d) => tokio::time::timeout(d, connect_fut)
                .await
                .map_err(|_| ProtocolError::Timeout)??,
            None => connect_fut.await?,
        };
        stream.set_nodelay(true).ok();
        Ok(Self { stream, timeout })
    }

    /// Writes `line` (expected to already end in `\r\n`) to the socket.
    pub async fn send(&mut self, line: &str) -> Result<(), ProtocolError> {
        let fut = self.stream.write_all(line.as_bytes());
        match self.timeout {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| ProtocolError::Timeout)??,
            None => fut.await?,
        }
        Ok(())
    }

    /// Reads chunks until [`faktory_wire::is_message_complete`] holds,
    /// then returns the accumulated reply with its trailing CRLF trimmed.
    pub async fn receive(&mut self) -> Result<String, ProtocolError> {
        let mut acc = String::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read_fut = self.stream.read(&mut chunk);
            let n = match self.timeout {
                Some(d) => tokio::time::timeout(d, read_fut)
                    .await
                    .map_err(|_| ProtocolError::Timeout)??,
                None => read_fut.await?,
            };
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            acc.push_str(&String::from_utf8_lossy(&chunk[..n]));
            if faktory_wire::is_message_complete(&acc) {
                break;
            }
        }
        Ok(acc.strip_suffix(faktory_wire::CRLF).unwrap_or(&acc).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_and_receives_a_simple_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"PING\r\n");
            sock.write_all(b"+PONG\r\n").await.unwrap();
        });

        let mut conn = Connection::connect(
            &addr.ip().to_string(),
            addr.port(),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
        conn.send("PING\r\n").await.unwrap();
        let reply = conn.receive().await.unwrap();
        assert_eq!(reply, "+PONG");
    }

    #[tokio::test]
    async fn receives_a_bulk_string_reply_keeping_inner_crlf() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"$5\r\nhello\r\n").await.unwrap();
        });

        let mut conn = Connection::connect(&addr.ip().to_string(), addr.port(), None)
            .await
            .unwrap();
        conn.send("FETCH default\r\n").await.unwrap();
        let reply = conn.receive().await.unwrap();
        assert_eq!(reply, "$5\r\nhello");
        assert_eq!(faktory_wire::parse_bulk_string(&reply), (5, "hello"));
    }

    #[tokio::test]
    async fn connection_closed_mid_read_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
        });

        let mut conn = Connection::connect(&addr.ip().to_string(), addr.port(), None)
            .await
            .unwrap();
        let err = conn.receive().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
