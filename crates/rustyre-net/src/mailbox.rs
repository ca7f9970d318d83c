//! Inbound mailbox: a router-style framed TCP listener.
//!
//! The mailbox owns the node's inbound socket. It binds a TCP port from the
//! IANA dynamic range, accepts connections from peers, and delivers every
//! complete framed message to a single channel. The first frame of each
//! delivered message is the sender's wire identity, put there by the sending
//! side's [`PeerLink`](crate::link::PeerLink).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use rustyre_core::constants::{DYN_PORT_FROM, DYN_PORT_TO};

use crate::error::TransportError;
use crate::framing::{FrameAccumulator, Frames};
use crate::shutdown::ShutdownToken;

/// Read buffer size per connection.
const MAILBOX_RECV_BUFFER: usize = 4096;

/// Capacity of the delivery channel.
const MAILBOX_QUEUE: usize = 256;

/// What the mailbox delivers to its owner.
#[derive(Debug)]
pub enum MailboxEvent {
    /// A complete message; the first frame is the sender's wire identity.
    Message(Frames),
    /// A connection failed. The loop is expected to log and continue.
    Error(std::io::Error),
}

/// The node's inbound socket.
pub struct Mailbox {
    port: u16,
    shutdown: ShutdownToken,
}

impl Mailbox {
    /// Bind a listener on a dynamic-range port and start accepting.
    ///
    /// Ports are probed deterministically from a random start until one binds
    /// or the whole range is exhausted, which is fatal.
    pub async fn bind() -> Result<(Self, mpsc::Receiver<MailboxEvent>), TransportError> {
        let range = (DYN_PORT_TO - DYN_PORT_FROM) as u32 + 1;
        let start: u32 = rand::thread_rng().gen_range(0..range);

        let mut listener = None;
        for i in 0..range {
            let port = DYN_PORT_FROM + ((start + i) % range) as u16;
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            match TcpListener::bind(addr).await {
                Ok(l) => {
                    listener = Some(l);
                    break;
                }
                Err(e) => {
                    debug!("mailbox port {port} unavailable: {e}");
                }
            }
        }
        let listener = listener.ok_or(TransportError::NoFreePort)?;
        let port = listener.local_addr()?.port();

        let (tx, rx) = mpsc::channel(MAILBOX_QUEUE);
        let shutdown = ShutdownToken::new();
        let stop_rx = shutdown.subscribe();

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, tx, stop_rx).await;
        });
        shutdown.add_task(handle).await;

        Ok((Self { port, shutdown }, rx))
    }

    /// The bound TCP port, advertised in this node's beacon.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and release the port. In-flight connection tasks exit
    /// on the same signal.
    pub async fn close(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
    }

    async fn accept_loop(
        listener: TcpListener,
        tx: mpsc::Sender<MailboxEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            let stream = tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("mailbox: connection from {peer_addr}");
                            stream
                        }
                        Err(e) => {
                            warn!("mailbox accept error: {e}");
                            continue;
                        }
                    }
                }
                _ = stop_rx.changed() => break,
            };

            let tx = tx.clone();
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                Self::read_loop(stream, tx, stop_rx).await;
            });
        }
    }

    /// Read one connection, feeding the accumulator and delivering messages.
    async fn read_loop(
        mut stream: TcpStream,
        tx: mpsc::Sender<MailboxEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let _ = stream.set_nodelay(true);
        let mut acc = FrameAccumulator::new();
        let mut buf = vec![0u8; MAILBOX_RECV_BUFFER];

        loop {
            let n = tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => return, // peer closed
                        Ok(n) => n,
                        Err(e) => {
                            let _ = tx.send(MailboxEvent::Error(e)).await;
                            return;
                        }
                    }
                }
                _ = stop_rx.changed() => return,
            };

            match acc.feed(&buf[..n]) {
                Ok(messages) => {
                    for frames in messages {
                        if tx.send(MailboxEvent::Message(frames)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Framing violation: report and drop the connection.
                    let _ = tx
                        .send(MailboxEvent::Error(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e,
                        )))
                        .await;
                    return;
                }
            }
        }
    }
}

// Dropping without close() must not leave the accept loop holding the port.
impl Drop for Mailbox {
    fn drop(&mut self) {
        self.shutdown.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode_message;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn next_message(rx: &mut mpsc::Receiver<MailboxEvent>) -> Frames {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for mailbox event")
            .expect("mailbox channel closed")
        {
            MailboxEvent::Message(frames) => frames,
            MailboxEvent::Error(e) => panic!("unexpected mailbox error: {e}"),
        }
    }

    #[tokio::test]
    async fn bind_picks_dynamic_range_port() {
        let (mailbox, _rx) = Mailbox::bind().await.unwrap();
        assert!(mailbox.port() >= DYN_PORT_FROM);
        mailbox.close().await;
    }

    #[tokio::test]
    async fn delivers_framed_messages() {
        let (mailbox, mut rx) = Mailbox::bind().await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", mailbox.port()))
            .await
            .unwrap();
        let m1: Frames = vec![b"id".to_vec(), b"payload-1".to_vec()];
        let m2: Frames = vec![b"id".to_vec(), b"payload-2".to_vec()];
        let mut wire = encode_message(&m1);
        wire.extend_from_slice(&encode_message(&m2));
        stream.write_all(&wire).await.unwrap();

        assert_eq!(next_message(&mut rx).await, m1);
        assert_eq!(next_message(&mut rx).await, m2);

        mailbox.close().await;
    }

    #[tokio::test]
    async fn delivers_from_multiple_connections() {
        let (mailbox, mut rx) = Mailbox::bind().await.unwrap();

        let mut s1 = TcpStream::connect(("127.0.0.1", mailbox.port()))
            .await
            .unwrap();
        let mut s2 = TcpStream::connect(("127.0.0.1", mailbox.port()))
            .await
            .unwrap();

        s1.write_all(&encode_message(&[b"a".to_vec()])).await.unwrap();
        s2.write_all(&encode_message(&[b"b".to_vec()])).await.unwrap();

        let mut seen = vec![next_message(&mut rx).await, next_message(&mut rx).await];
        seen.sort();
        assert_eq!(seen, vec![vec![b"a".to_vec()], vec![b"b".to_vec()]]);

        mailbox.close().await;
    }

    #[tokio::test]
    async fn framing_violation_reported_as_error() {
        let (mailbox, mut rx) = Mailbox::bind().await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", mailbox.port()))
            .await
            .unwrap();
        stream.write_all(&[0xFF; 8]).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
        {
            MailboxEvent::Error(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            MailboxEvent::Message(_) => panic!("expected an error event"),
        }

        mailbox.close().await;
    }

    #[tokio::test]
    async fn close_releases_port() {
        let (mailbox, _rx) = Mailbox::bind().await.unwrap();
        let port = mailbox.port();
        mailbox.close().await;

        // Rebinding the same port must succeed immediately.
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let _listener = TcpListener::bind(addr).await.unwrap();
    }
}
