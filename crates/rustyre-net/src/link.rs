//! Outbound peer link: one framed TCP connection per discovered peer.
//!
//! The link owns its socket on a background writer task. Sends are
//! non-blocking hand-offs into a bounded queue; once the connection has
//! failed or the link is closed, sends simply report the drop. Every message
//! is prefixed with the local node's wire identity so the receiving mailbox
//! knows who sent it. There is no reconnection: a dead link is cleaned up by
//! peer expiry.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::framing::{Frames, encode_message};

/// Timeout for the initial TCP connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound queue depth; messages beyond this are dropped.
const LINK_QUEUE: usize = 64;

/// An outbound connection to one peer's mailbox.
pub struct PeerLink {
    tx: mpsc::Sender<Frames>,
    handle: JoinHandle<()>,
}

impl PeerLink {
    /// Open a link to `endpoint`, tagging every outgoing message with
    /// `wire_identity`.
    ///
    /// The connection is established in the background; messages queued in
    /// the meantime are written once it is up, in order.
    pub fn connect(wire_identity: Vec<u8>, endpoint: String) -> Self {
        let (tx, rx) = mpsc::channel(LINK_QUEUE);

        let handle = tokio::spawn(async move {
            Self::write_loop(wire_identity, endpoint, rx).await;
        });

        Self { tx, handle }
    }

    /// Queue a message for the peer. Returns `false` if the link is closed or
    /// the queue is full; the message is dropped either way.
    pub fn send(&self, frames: Frames) -> bool {
        self.tx.try_send(frames).is_ok()
    }

    /// Whether the writer task has terminated (connect failure, write
    /// failure, or close).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Tear down the connection immediately, dropping any queued messages.
    pub fn close(&self) {
        self.handle.abort();
    }

    async fn write_loop(wire_identity: Vec<u8>, endpoint: String, mut rx: mpsc::Receiver<Frames>) {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&endpoint))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("link connect to {endpoint} failed: {e}");
                return;
            }
            Err(_) => {
                debug!("link connect to {endpoint} timed out");
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        let mut stream = stream;

        while let Some(frames) = rx.recv().await {
            let mut message = Vec::with_capacity(frames.len() + 1);
            message.push(wire_identity.clone());
            message.extend(frames);

            if let Err(e) = stream.write_all(&encode_message(&message)).await {
                debug!("link write to {endpoint} failed: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameAccumulator;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn wait_closed(link: &PeerLink) {
        for _ in 0..100 {
            if link.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("link did not close in time");
    }

    #[tokio::test]
    async fn delivers_identity_prefixed_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let identity = b"\x01example-identity".to_vec();
        let link = PeerLink::connect(identity.clone(), endpoint);

        assert!(link.send(vec![b"first".to_vec()]));
        assert!(link.send(vec![b"second".to_vec(), b"extra".to_vec()]));

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut acc = FrameAccumulator::new();
        let mut buf = [0u8; 1024];
        let mut messages = Vec::new();
        while messages.len() < 2 {
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
                .await
                .expect("timed out reading link output")
                .unwrap();
            messages.extend(acc.feed(&buf[..n]).unwrap());
        }

        assert_eq!(messages[0], vec![identity.clone(), b"first".to_vec()]);
        assert_eq!(
            messages[1],
            vec![identity, b"second".to_vec(), b"extra".to_vec()]
        );

        link.close();
    }

    #[tokio::test]
    async fn connect_failure_closes_link() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let link = PeerLink::connect(b"\x01x".to_vec(), endpoint);
        wait_closed(&link).await;
        assert!(!link.send(vec![b"dropped".to_vec()]));
    }

    #[tokio::test]
    async fn close_drops_subsequent_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let link = PeerLink::connect(b"\x01x".to_vec(), endpoint);
        link.close();
        wait_closed(&link).await;
        assert!(!link.send(vec![b"dropped".to_vec()]));
    }
}
