//! Single-port protocol multiplexing.
//!
//! Accepted connections are classified by peeking at their first bytes and
//! handed to one of two channel-backed listeners, each served by its own
//! `axum::serve` loop.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Client connection preface of HTTP/2 with prior knowledge.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const HTTP1_METHODS: [&[u8]; 9] = [
    b"GET ",
    b"HEAD ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"CONNECT ",
    b"OPTIONS ",
    b"TRACE ",
    b"PATCH ",
];

const PEEK_INTERVAL: Duration = Duration::from_millis(5);

/// Where an accepted connection is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// An HTTP/1 request line; served by the debug mux.
    Http1,
    /// The HTTP/2 preface or anything else; served by the service router.
    Other,
}

/// Classify a connection from its first bytes.
///
/// `None` means the prefix is still ambiguous and more bytes are needed.
pub fn classify(prefix: &[u8]) -> Option<Protocol> {
    if prefix.is_empty() {
        return None;
    }
    if prefix.starts_with(HTTP2_PREFACE) {
        return Some(Protocol::Other);
    }
    if HTTP1_METHODS.iter().any(|method| prefix.starts_with(method)) {
        return Some(Protocol::Http1);
    }
    let ambiguous = HTTP1_METHODS
        .iter()
        .chain(std::iter::once(&HTTP2_PREFACE))
        .any(|candidate| candidate.starts_with(prefix));
    if ambiguous { None } else { Some(Protocol::Other) }
}

/// Peek at `stream` until its protocol is known, without consuming bytes.
///
/// Returns `Ok(None)` if the peer closed the connection or the prefix stayed
/// ambiguous until `timeout`.
pub(crate) async fn sniff(stream: &TcpStream, timeout: Duration) -> io::Result<Option<Protocol>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; HTTP2_PREFACE.len()];
    loop {
        let n = match tokio::time::timeout_at(deadline, stream.peek(&mut buf)).await {
            Ok(peeked) => peeked?,
            Err(_) => return Ok(None),
        };
        if n == 0 {
            return Ok(None);
        }
        if let Some(protocol) = classify(&buf[..n]) {
            return Ok(Some(protocol));
        }
        // peek returns the same bytes until more arrive
        let next = Instant::now() + PEEK_INTERVAL;
        if next >= deadline {
            return Ok(None);
        }
        tokio::time::sleep_until(next).await;
    }
}

pub(crate) type Connection = (TcpStream, SocketAddr);

/// An `axum::serve` listener fed by the multiplexer.
pub(crate) struct ChannelListener {
    connections: mpsc::Receiver<Connection>,
    local_addr: SocketAddr,
}

impl ChannelListener {
    pub(crate) fn new(local_addr: SocketAddr, capacity: usize) -> (mpsc::Sender<Connection>, Self) {
        let (tx, connections) = mpsc::channel(capacity);
        (tx, Self { connections, local_addr })
    }
}

impl axum::serve::Listener for ChannelListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.connections.recv().await {
            Some(connection) => connection,
            // The multiplexer stopped; the serve loop ends through graceful shutdown.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Accept on `listener` and route every connection by protocol until `cancel` fires.
pub(crate) async fn run(
    listener: TcpListener,
    sniff_timeout: Duration,
    http1: mpsc::Sender<Connection>,
    other: mpsc::Sender<Connection>,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            },
        };

        let http1 = http1.clone();
        let other = other.clone();
        tokio::spawn(async move {
            let target = match sniff(&stream, sniff_timeout).await {
                Ok(Some(Protocol::Http1)) => http1,
                Ok(Some(Protocol::Other)) => other,
                Ok(None) => {
                    tracing::debug!(%peer, "Dropping connection with unrecognized protocol");
                    return;
                }
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "Dropping connection");
                    return;
                }
            };
            if target.send((stream, peer)).await.is_err() {
                tracing::debug!(%peer, "Listener closed, dropping connection");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_classify_http1_methods() {
        assert_eq!(classify(b"GET /livez HTTP/1.1\r\n"), Some(Protocol::Http1));
        assert_eq!(classify(b"POST /x HTTP/1.1\r\n"), Some(Protocol::Http1));
        assert_eq!(classify(b"OPTIONS * HTTP/1.1"), Some(Protocol::Http1));
    }

    #[test]
    fn test_classify_http2_and_garbage() {
        assert_eq!(classify(HTTP2_PREFACE), Some(Protocol::Other));
        assert_eq!(classify(b"\x16\x03\x01\x02\x00"), Some(Protocol::Other));
        assert_eq!(classify(b"SSH-2.0-OpenSSH"), Some(Protocol::Other));
    }

    #[test]
    fn test_classify_ambiguous_prefixes() {
        assert_eq!(classify(b""), None);
        assert_eq!(classify(b"P"), None);
        assert_eq!(classify(b"PRI * HTTP/2"), None);
        assert_eq!(classify(b"GET"), None);
        assert_eq!(classify(b"PA"), None);
        assert_eq!(classify(b"PX"), Some(Protocol::Other));
    }

    #[tokio::test]
    async fn test_sniff_waits_for_more_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GE").await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            stream.write_all(b"T / HTTP/1.1\r\n\r\n").await.unwrap();
            stream
        });

        let (server, _) = listener.accept().await.unwrap();
        let protocol = sniff(&server, Duration::from_secs(2)).await.unwrap();
        assert_eq!(protocol, Some(Protocol::Http1));

        // the bytes were peeked, not consumed
        let mut buf = [0u8; 4];
        let n = server.peek(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"GET ");
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_sniff_gives_up_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();

        let (server, _) = listener.accept().await.unwrap();
        let protocol = sniff(&server, Duration::from_millis(50)).await.unwrap();
        assert_eq!(protocol, None);
    }
}
