//! The node: a public command/event handle and the single-task runtime that
//! owns all state.
//!
//! Every mutation of peers, groups, headers, and counters happens inside the
//! runtime's event loop, which multiplexes owner commands, inbound mailbox
//! messages, beacon signals, the liveness tick, and the shutdown signal. The
//! owner interacts with the loop only through channels.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use rustyre_core::constants::BEACON_PROTOCOL;
use rustyre_core::{BeaconFrame, Identity, MsgBody, ZreMsg};
use rustyre_net::{BeaconDriver, BeaconSignal, Mailbox, MailboxEvent};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::event::Event;
use crate::groups::PeerGroups;
use crate::peer::{Peer, Timing};

/// Capacity of the owner command channel.
const COMMAND_QUEUE: usize = 64;

/// Commands from the owner, serialized through one channel.
enum Command {
    Whisper {
        peer: String,
        content: Vec<u8>,
    },
    Shout {
        group: String,
        content: Vec<u8>,
    },
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    Set {
        key: String,
        value: String,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<String>>,
    },
    PeerHeaders {
        peer: String,
        reply: oneshot::Sender<Option<HashMap<String, String>>>,
    },
    OwnGroups {
        reply: oneshot::Sender<Vec<String>>,
    },
    PeerGroups {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Handle to a running node.
///
/// Dropping the handle (or calling [`disconnect`](Self::disconnect)) shuts
/// the node down: peers are disconnected and the inbound port is released.
pub struct Node {
    uuid: Identity,
    identity: String,
    addr: IpAddr,
    port: u16,
    beacon_port: u16,
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<Event>,
    shutdown_tx: watch::Sender<bool>,
    runtime: Option<JoinHandle<()>>,
}

impl Node {
    /// Start a node: bind the mailbox, start beaconing, spawn the event loop.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let uuid = Identity::generate();
        let identity = uuid.to_string();

        let (mailbox, inbox) = Mailbox::bind().await?;
        let port = mailbox.port();

        let mut beacon = BeaconDriver::new(config.beacon_config()).await?;
        let addr = beacon.addr();
        let beacon_port = beacon.port();

        beacon.subscribe(BEACON_PROTOCOL.to_vec());
        beacon
            .publish(BeaconFrame::new(uuid, port).encode().to_vec())
            .await;
        let signals = beacon.signals().await;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        // Effectively unbuffered: a slow owner pauses discovery rather than
        // queueing events without bound.
        let (event_tx, event_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runtime = Runtime {
            identity: uuid,
            host: addr,
            port,
            status: 0,
            headers: config.headers.clone(),
            peers: HashMap::new(),
            own_groups: HashSet::new(),
            peer_groups: PeerGroups::new(),
            timing: config.timing(),
            reap_interval: config.reap_interval(),
            beacon,
            mailbox,
            signals,
            inbox,
            commands: command_rx,
            events: event_tx,
            shutdown_rx,
        };

        info!("node {identity} up: mailbox {addr}:{port}, beacon port {beacon_port}");
        let handle = tokio::spawn(runtime.run());

        Ok(Self {
            uuid,
            identity,
            addr,
            port,
            beacon_port,
            commands: command_tx,
            events: event_rx,
            shutdown_tx,
            runtime: Some(handle),
        })
    }

    /// This node's identity as an uppercase hex string.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// This node's raw 16-byte identity.
    pub fn uuid(&self) -> Identity {
        self.uuid
    }

    /// The local address advertised to peers.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The inbound mailbox TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The UDP port the beacon driver is bound to.
    pub fn beacon_port(&self) -> u16 {
        self.beacon_port
    }

    /// Send content to a single peer. Unknown peers are dropped silently:
    /// the peer may simply have expired.
    pub async fn whisper(&self, peer: impl Into<String>, content: Vec<u8>) -> Result<(), NodeError> {
        self.command(Command::Whisper {
            peer: peer.into(),
            content,
        })
        .await
    }

    /// Send content to every member of a group.
    pub async fn shout(&self, group: impl Into<String>, content: Vec<u8>) -> Result<(), NodeError> {
        self.command(Command::Shout {
            group: group.into(),
            content,
        })
        .await
    }

    /// Join a group, announcing it to every known peer.
    pub async fn join(&self, group: impl Into<String>) -> Result<(), NodeError> {
        self.command(Command::Join {
            group: group.into(),
        })
        .await
    }

    /// Leave a group, announcing it to every known peer.
    pub async fn leave(&self, group: impl Into<String>) -> Result<(), NodeError> {
        self.command(Command::Leave {
            group: group.into(),
        })
        .await
    }

    /// Set a header. Only peers that enter after the update observe the new
    /// value, through HELLO; existing peers are not notified.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), NodeError> {
        self.command(Command::Set {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Read back one of this node's own headers.
    pub async fn get(&self, key: &str) -> Result<Option<String>, NodeError> {
        self.query(|reply| Command::Get {
            key: key.to_string(),
            reply,
        })
        .await
    }

    /// Identities of all currently known peers, sorted.
    pub async fn peers(&self) -> Result<Vec<String>, NodeError> {
        self.query(|reply| Command::Peers { reply }).await
    }

    /// The headers a peer reported in its HELLO, if the peer is known.
    pub async fn peer_headers(
        &self,
        peer: &str,
    ) -> Result<Option<HashMap<String, String>>, NodeError> {
        self.query(|reply| Command::PeerHeaders {
            peer: peer.to_string(),
            reply,
        })
        .await
    }

    /// Groups this node has joined, sorted.
    pub async fn own_groups(&self) -> Result<Vec<String>, NodeError> {
        self.query(|reply| Command::OwnGroups { reply }).await
    }

    /// Groups observed on the network, sorted.
    pub async fn peer_groups(&self) -> Result<Vec<String>, NodeError> {
        self.query(|reply| Command::PeerGroups { reply }).await
    }

    /// Receive the next event. Returns `None` once the node has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Shut the node down and wait for the event loop to drain: own groups
    /// are dropped, every peer socket is closed, and the inbound port is
    /// released before this returns. No events are delivered afterwards.
    pub async fn disconnect(mut self) {
        let _ = self.shutdown_tx.send(true);
        // Unblock a loop parked on the events channel.
        self.events.close();
        if let Some(handle) = self.runtime.take() {
            let _ = handle.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), NodeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::Stopped)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

/// The event loop: sole owner of all node state.
struct Runtime {
    identity: Identity,
    host: IpAddr,
    port: u16,
    /// Own change counter, bumped on every join/leave.
    status: u8,
    headers: HashMap<String, String>,
    peers: HashMap<String, Peer>,
    own_groups: HashSet<String>,
    peer_groups: PeerGroups,
    timing: Timing,
    reap_interval: Duration,
    beacon: BeaconDriver,
    mailbox: Mailbox,
    signals: mpsc::Receiver<BeaconSignal>,
    inbox: mpsc::Receiver<MailboxEvent>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    async fn run(mut self) {
        let mut reap = tokio::time::interval(self.reap_interval);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        reap.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break, // owner handle dropped
                    }
                }

                event = self.inbox.recv() => {
                    match event {
                        Some(event) => self.handle_inbox(event).await,
                        None => break,
                    }
                }

                signal = self.signals.recv() => {
                    match signal {
                        Some(signal) => self.handle_beacon(signal).await,
                        None => break,
                    }
                }

                _ = reap.tick() => self.reap().await,
            }
        }

        self.shutdown().await;
    }

    // -- Commands --

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Whisper { peer, content } => {
                // Unknown peer: dropped, it may have been destroyed already.
                if let Some(peer) = self.peers.get_mut(&peer) {
                    peer.send(ZreMsg::new(MsgBody::Whisper { content }));
                }
            }
            Command::Shout { group, content } => self.shout(&group, content),
            Command::Join { group } => self.join(group),
            Command::Leave { group } => self.leave(&group),
            Command::Set { key, value } => {
                self.headers.insert(key, value);
            }
            Command::Get { key, reply } => {
                let _ = reply.send(self.headers.get(&key).cloned());
            }
            Command::Peers { reply } => {
                let mut ids: Vec<String> = self.peers.keys().cloned().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            Command::PeerHeaders { peer, reply } => {
                let _ = reply.send(self.peers.get(&peer).map(|p| p.headers.clone()));
            }
            Command::OwnGroups { reply } => {
                let mut groups: Vec<String> = self.own_groups.iter().cloned().collect();
                groups.sort();
                let _ = reply.send(groups);
            }
            Command::PeerGroups { reply } => {
                let mut groups: Vec<String> = self.peer_groups.names().cloned().collect();
                groups.sort();
                let _ = reply.send(groups);
            }
        }
    }

    fn shout(&mut self, group: &str, content: Vec<u8>) {
        // Unknown group: nobody we know is in it, drop.
        if !self.peer_groups.contains(group) {
            return;
        }
        let members: Vec<String> = self.peer_groups.members(group).cloned().collect();
        let msg = ZreMsg::new(MsgBody::Shout {
            group: group.to_string(),
            content,
        });
        for identity in members {
            if let Some(peer) = self.peers.get_mut(&identity) {
                peer.send(msg.clone());
            }
        }
    }

    fn join(&mut self, group: String) {
        if !self.own_groups.insert(group.clone()) {
            return;
        }
        self.status = self.status.wrapping_add(1);
        let msg = ZreMsg::new(MsgBody::Join {
            group,
            status: self.status,
        });
        // Independent clones: each peer link stamps its own sequence.
        for peer in self.peers.values_mut() {
            peer.send(msg.clone());
        }
    }

    fn leave(&mut self, group: &str) {
        if !self.own_groups.remove(group) {
            return;
        }
        self.status = self.status.wrapping_add(1);
        let msg = ZreMsg::new(MsgBody::Leave {
            group: group.to_string(),
            status: self.status,
        });
        for peer in self.peers.values_mut() {
            peer.send(msg.clone());
        }
    }

    // -- Inbound peer messages --

    async fn handle_inbox(&mut self, event: MailboxEvent) {
        let frames = match event {
            MailboxEvent::Message(frames) => frames,
            MailboxEvent::Error(e) => {
                warn!("inbox transport error: {e}");
                return;
            }
        };

        let Some(wire_identity) = frames.first() else {
            return;
        };
        let uuid = match Identity::from_wire(wire_identity) {
            Ok(uuid) => uuid,
            Err(e) => {
                warn!("dropping message with bad identity frame: {e}");
                return;
            }
        };
        let msg = match ZreMsg::from_frames(&frames[1..]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping unparseable message from {uuid}: {e}");
                return;
            }
        };
        let identity = uuid.to_string();

        // HELLO may introduce the peer; it also covers a HELLO arriving
        // before any beacon. Every other kind requires a ready peer.
        if let MsgBody::Hello {
            ipaddress, mailbox, ..
        } = &msg.body
        {
            self.require_peer(uuid, ipaddress.clone(), *mailbox).await;
            if let Some(peer) = self.peers.get_mut(&identity) {
                peer.ready = true;
            }
        }

        {
            let kind = msg.body.name();
            let Some(peer) = self.peers.get_mut(&identity) else {
                warn!("peer {identity} wasn't ready, dropping a {kind} message");
                return;
            };
            if !peer.ready {
                warn!("peer {identity} wasn't ready, dropping a {kind} message");
                return;
            }
            if !peer.check_message(&msg) {
                warn!("lost messages from {identity}");
                return;
            }
        }

        match msg.body {
            MsgBody::Hello {
                status,
                groups,
                headers,
                ..
            } => {
                if let Some(peer) = self.peers.get_mut(&identity) {
                    peer.headers.extend(headers);
                    peer.status = status;
                }
                for group in groups {
                    self.join_peer_group(&identity, &group).await;
                }
            }
            MsgBody::Whisper { content } => {
                self.emit(Event::Whisper {
                    peer: identity.clone(),
                    content,
                })
                .await;
            }
            MsgBody::Shout { group, content } => {
                self.emit(Event::Shout {
                    peer: identity.clone(),
                    group,
                    content,
                })
                .await;
            }
            MsgBody::Ping => {
                if let Some(peer) = self.peers.get_mut(&identity) {
                    peer.send(ZreMsg::new(MsgBody::PingOk));
                }
            }
            MsgBody::PingOk => {}
            MsgBody::Join { group, status } => {
                self.store_peer_status(&identity, status);
                self.join_peer_group(&identity, &group).await;
            }
            MsgBody::Leave { group, status } => {
                self.store_peer_status(&identity, status);
                self.leave_peer_group(&identity, &group).await;
            }
        }

        // Any activity from the peer resets its liveness deadlines.
        if let Some(peer) = self.peers.get_mut(&identity) {
            peer.refresh(&self.timing);
        }
    }

    fn store_peer_status(&mut self, identity: &str, status: u8) {
        if let Some(peer) = self.peers.get_mut(identity) {
            let expected = peer.status.wrapping_add(1);
            if status != expected {
                warn!(
                    "peer {identity} status jumped from {} to {status}",
                    peer.status
                );
            }
            peer.status = status;
        }
    }

    async fn join_peer_group(&mut self, identity: &str, group: &str) {
        self.peer_groups.join(group, identity);
        self.emit(Event::Join {
            peer: identity.to_string(),
            group: group.to_string(),
        })
        .await;
    }

    async fn leave_peer_group(&mut self, identity: &str, group: &str) {
        self.peer_groups.leave(group, identity);
        self.emit(Event::Leave {
            peer: identity.to_string(),
            group: group.to_string(),
        })
        .await;
    }

    // -- Beacons --

    async fn handle_beacon(&mut self, signal: BeaconSignal) {
        let sig = match BeaconFrame::decode(&signal.payload) {
            Ok(sig) => sig,
            Err(e) => {
                debug!("ignoring malformed beacon from {}: {e}", signal.addr);
                return;
            }
        };

        let identity = sig.uuid.to_string();
        self.require_peer(sig.uuid, signal.addr.ip().to_string(), sig.port)
            .await;
        if let Some(peer) = self.peers.get_mut(&identity) {
            peer.refresh(&self.timing);
        }
    }

    /// Find or create a peer record. Creation opens the outbound link, sends
    /// our HELLO as its first message, and announces ENTER.
    async fn require_peer(&mut self, uuid: Identity, host: String, port: u16) {
        let identity = uuid.to_string();
        if self.peers.contains_key(&identity) {
            return;
        }

        // A rebooted node reuses its endpoint under a fresh UUID; the stale
        // record must be gone before the new one becomes visible.
        let endpoint = format!("{host}:{port}");
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.endpoint() == endpoint)
            .map(|(identity, _)| identity.clone())
            .collect();
        for old in stale {
            info!("peer {old} replaced at {endpoint}");
            if let Some(peer) = self.peers.get(&old) {
                peer.disconnect();
            }
            self.peers.remove(&old);
            self.peer_groups.drop_peer(&old);
            self.emit(Event::Exit { peer: old }).await;
        }

        let mut peer = Peer::connect(&self.identity, uuid, endpoint.clone(), &self.timing);

        // Handshake: HELLO is always the first message on the new link.
        let mut groups: Vec<String> = self.own_groups.iter().cloned().collect();
        groups.sort();
        peer.send(ZreMsg::new(MsgBody::Hello {
            ipaddress: self.host.to_string(),
            mailbox: self.port,
            status: self.status,
            groups,
            headers: self.headers.clone(),
        }));
        self.peers.insert(identity.clone(), peer);

        info!("peer {identity} entered at {endpoint}");
        self.emit(Event::Enter {
            peer: identity,
            endpoint,
        })
        .await;
    }

    // -- Liveness --

    /// Once per reap interval: expire vanished peers, ping evasive ones.
    async fn reap(&mut self) {
        let now = Instant::now();

        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_expired(now))
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in expired {
            // Disconnect before deleting the record, or a reconnect to the
            // same endpoint could race the dying socket.
            if let Some(peer) = self.peers.get(&identity) {
                peer.disconnect();
            }
            self.peers.remove(&identity);
            self.peer_groups.drop_peer(&identity);
            info!("peer {identity} expired");
            self.emit(Event::Exit { peer: identity }).await;
        }

        let quiet: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_evasive(now))
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in quiet {
            if let Some(peer) = self.peers.get_mut(&identity) {
                debug!("peer {identity} is evasive, pinging");
                peer.send(ZreMsg::new(MsgBody::Ping));
            }
        }
    }

    // -- Shutdown --

    async fn shutdown(mut self) {
        info!("node {} shutting down", self.identity);

        // Local-only cleanup: the node is going away, so no LEAVE messages
        // are sent; remaining peers will expire us on their side.
        self.own_groups.clear();
        for (_, peer) in self.peers.drain() {
            peer.disconnect();
        }

        self.mailbox.close().await;
        self.beacon.stop().await;
    }

    async fn emit(&mut self, event: Event) {
        // The owner may already be gone during shutdown; that's fine.
        let _ = self.events.send(event).await;
    }
}
