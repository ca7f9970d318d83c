//! UDP beacon driver: periodic broadcast of this node's signature and
//! delivery of signatures received from peers.
//!
//! The driver binds a reusable broadcast socket on the discovery port so that
//! several nodes can coexist on one host. Received datagrams are filtered by a
//! subscribed prefix, and the node's own broadcasts are suppressed by
//! comparing payloads (local echo suppression).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use rustyre_core::constants::DISCOVERY_PORT;

use crate::error::TransportError;
use crate::shutdown::ShutdownToken;

/// Broadcast cadence.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// Size of the receive buffer; beacons are far smaller.
const BEACON_RECV_BUFFER: usize = 256;

/// Configuration for a [`BeaconDriver`].
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// UDP port to bind for sending and receiving beacons.
    pub port: u16,
    /// Destination for outgoing beacons. The default is the limited broadcast
    /// address on the discovery port; tests point this at a unicast address.
    pub broadcast_addr: SocketAddr,
    /// Interval between broadcasts.
    pub interval: Duration,
    /// Override for the local address reported by [`BeaconDriver::addr`].
    /// When unset the address is derived from the default route.
    pub host: Option<IpAddr>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            broadcast_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DISCOVERY_PORT,
            ),
            interval: BEACON_INTERVAL,
            host: None,
        }
    }
}

/// A received beacon: source address and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconSignal {
    pub addr: SocketAddr,
    pub payload: Vec<u8>,
}

/// UDP broadcast beacon driver.
///
/// Usage order: [`subscribe`](Self::subscribe) a payload prefix,
/// [`publish`](Self::publish) this node's signature, then take
/// [`signals`](Self::signals) and feed them to the event loop.
pub struct BeaconDriver {
    config: BeaconConfig,
    socket: Arc<UdpSocket>,
    addr: IpAddr,
    filter: Vec<u8>,
    transmit: Vec<u8>,
    shutdown: ShutdownToken,
}

impl BeaconDriver {
    /// Bind the broadcast socket and resolve the local address.
    pub async fn new(config: BeaconConfig) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        socket.bind(&SockAddr::from(bind_addr))?;

        let socket = UdpSocket::from_std(socket.into())?;
        let addr = config.host.unwrap_or_else(local_ip);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            addr,
            filter: Vec::new(),
            transmit: Vec::new(),
            shutdown: ShutdownToken::new(),
        })
    }

    /// The local IP address to advertise in beacons.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The UDP port the driver is actually bound to.
    pub fn port(&self) -> u16 {
        self.socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.config.port)
    }

    /// Only deliver received beacons whose payload starts with `prefix`.
    pub fn subscribe(&mut self, prefix: Vec<u8>) {
        self.filter = prefix;
    }

    /// Start broadcasting `payload` once per interval.
    pub async fn publish(&mut self, payload: Vec<u8>) {
        self.transmit = payload.clone();

        let socket = Arc::clone(&self.socket);
        let target = self.config.broadcast_addr;
        let interval = self.config.interval;
        let mut stop_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = socket.send_to(&payload, target).await {
                    debug!("beacon send to {target} failed: {e}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        });
        self.shutdown.add_task(handle).await;
    }

    /// Start the receive loop and return the stream of filtered signals.
    ///
    /// Call after [`subscribe`](Self::subscribe) and
    /// [`publish`](Self::publish); the filter and echo payload are snapshotted
    /// here.
    pub async fn signals(&mut self) -> mpsc::Receiver<BeaconSignal> {
        let (tx, rx) = mpsc::channel(64);

        let socket = Arc::clone(&self.socket);
        let filter = self.filter.clone();
        let transmit = self.transmit.clone();
        let stop_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            Self::recv_loop(socket, filter, transmit, tx, stop_rx).await;
        });
        self.shutdown.add_task(handle).await;

        rx
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        filter: Vec<u8>,
        transmit: Vec<u8>,
        tx: mpsc::Sender<BeaconSignal>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut buf = [0u8; BEACON_RECV_BUFFER];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, src)) => {
                            let payload = &buf[..n];
                            if !payload.starts_with(&filter) {
                                continue;
                            }
                            // Our own broadcast looped back.
                            if payload == transmit.as_slice() {
                                continue;
                            }
                            let signal = BeaconSignal {
                                addr: src,
                                payload: payload.to_vec(),
                            };
                            // Beacons are periodic; dropping one under
                            // backlog is harmless and keeps this loop from
                            // ever parking on the channel.
                            match tx.try_send(signal) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    debug!("beacon backlog, dropping signal");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return,
                            }
                        }
                        Err(e) => {
                            warn!("beacon recv error: {e}");
                            if *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    }

    /// Stop broadcasting and receiving.
    pub async fn stop(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
    }
}

impl Drop for BeaconDriver {
    fn drop(&mut self) {
        self.shutdown.signal_stop();
    }
}

/// Discover the local IP address used for the default route.
///
/// Connecting a UDP socket sends no packets; it only makes the OS pick a
/// source address. Falls back to loopback when there is no route.
fn local_ip() -> IpAddr {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").and_then(|s| {
        s.connect("8.8.8.8:53")?;
        s.local_addr()
    });
    match probe {
        Ok(addr) => addr.ip(),
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
