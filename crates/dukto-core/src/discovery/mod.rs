//! Peer discovery over UDP broadcast.
//!
//! Every node listens on one UDP port (4644 by default) and announces itself
//! with a hello datagram sent to the broadcast address of each local IPv4
//! interface. Nodes answering a broadcast hello reply with a unicast hello,
//! and a goodbye is broadcast on shutdown.
//!
//! ## Loop suppression
//!
//! Some interfaces echo our own broadcasts back to us. Datagrams coming from
//! one of the addresses we just broadcast from are always dropped; once more
//! than [`LOOP_THRESHOLD`] of them arrive, the address is marked bad and the
//! interface is skipped by later hello rounds.
//!
//! ## Non-default ports
//!
//! A node listening on another port announces it with the Port variants of
//! the hello. Hellos and goodbyes are sent to the default port plus every
//! port a known peer listens on.

mod interfaces;

pub use interfaces::{broadcast_address, broadcast_targets, BroadcastTarget};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::platform::Identity;
use crate::protocol::DiscoveryMessage;

/// Own-address datagrams tolerated before an interface is marked bad.
pub const LOOP_THRESHOLD: u32 = 5;

/// Largest datagram read from the socket.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// A remote node known from its hellos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// Address the hello came from
    pub address: IpAddr,
    /// Signature announced by the peer
    pub name: String,
    /// Port the peer accepts transfers on
    pub port: u16,
}

impl Peer {
    /// Where to connect to send this peer something.
    #[must_use]
    pub const fn transfer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Change to the peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer said hello (first time or again)
    Found(Peer),
    /// A known peer said goodbye
    Gone(Peer),
}

/// Result of handling one inbound datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Change to report, if any
    pub event: Option<PeerEvent>,
    /// Datagram to send back, if any
    pub reply: Option<(SocketAddr, DiscoveryMessage)>,
}

/// Peer bookkeeping without any socket attached.
#[derive(Debug, Clone)]
pub struct PeerTable {
    peers: HashMap<IpAddr, Peer>,
    local_addrs: HashMap<IpAddr, u32>,
    bad_addrs: HashSet<IpAddr>,
    signature: String,
    local_port: u16,
    default_port: u16,
}

impl PeerTable {
    /// Create a table for a node announcing `signature` on `local_port`.
    #[must_use]
    pub fn new(signature: impl Into<String>, local_port: u16, default_port: u16) -> Self {
        Self {
            peers: HashMap::new(),
            local_addrs: HashMap::new(),
            bad_addrs: HashSet::new(),
            signature: signature.into(),
            local_port,
            default_port,
        }
    }

    /// Signature announced in hellos.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Replace the announced signature.
    pub fn set_signature(&mut self, signature: impl Into<String>) {
        self.signature = signature.into();
    }

    /// Known peers, ordered by address.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by_key(|p| p.address);
        peers
    }

    /// Look up a peer by address.
    #[must_use]
    pub fn get(&self, address: &IpAddr) -> Option<&Peer> {
        self.peers.get(address)
    }

    /// Whether `address` was marked as a looping interface.
    #[must_use]
    pub fn is_bad(&self, address: &IpAddr) -> bool {
        self.bad_addrs.contains(address)
    }

    /// Start a hello round from `sources`.
    ///
    /// Resets the own-address set to the sources that are not marked bad and
    /// returns those.
    pub fn begin_broadcast_round(&mut self, sources: &[BroadcastTarget]) -> Vec<BroadcastTarget> {
        self.local_addrs.clear();
        let usable: Vec<BroadcastTarget> = sources
            .iter()
            .filter(|t| !self.is_bad(&IpAddr::V4(t.local)))
            .copied()
            .collect();
        for target in &usable {
            self.local_addrs.insert(IpAddr::V4(target.local), 0);
        }
        usable
    }

    /// Ports hellos and goodbyes go to: the default one and every peer's.
    #[must_use]
    pub fn broadcast_ports(&self) -> BTreeSet<u16> {
        std::iter::once(self.default_port)
            .chain(self.peers.values().map(|p| p.port))
            .collect()
    }

    /// Hello announcing this node, Port variant when not on the default port.
    #[must_use]
    pub fn hello(&self, broadcast: bool) -> DiscoveryMessage {
        let port = (self.local_port != self.default_port).then_some(self.local_port);
        DiscoveryMessage::hello(broadcast, port, self.signature.clone())
    }

    /// Apply one inbound datagram from `sender`.
    pub fn handle_datagram(&mut self, data: &[u8], sender: SocketAddr) -> Outcome {
        let address = sender.ip();

        if self.bad_addrs.contains(&address) {
            return Outcome::default();
        }

        if let Some(count) = self.local_addrs.get_mut(&address) {
            *count += 1;
            if *count > LOOP_THRESHOLD && self.bad_addrs.insert(address) {
                tracing::info!("Ignoring looping interface {}", address);
            }
            return Outcome::default();
        }

        let message = DiscoveryMessage::parse(data);
        if !message.is_valid() {
            tracing::debug!("Dropping invalid datagram from {}", sender);
            return Outcome::default();
        }

        if message == DiscoveryMessage::Goodbye {
            let event = self.peers.remove(&address).map(|peer| {
                tracing::info!("Peer left: {} ({})", peer.name, address);
                PeerEvent::Gone(peer)
            });
            return Outcome { event, reply: None };
        }

        let Some(signature) = message.signature() else {
            return Outcome::default();
        };
        if signature == self.signature {
            tracing::debug!("Ignoring our own hello from {}", sender);
            return Outcome::default();
        }

        let peer = Peer {
            address,
            name: signature.to_string(),
            port: message.port().unwrap_or(self.default_port),
        };
        if self.peers.insert(address, peer.clone()).is_none() {
            tracing::info!("Peer found: {} ({}:{})", peer.name, address, peer.port);
        }

        let reply = message
            .is_broadcast()
            .then(|| (SocketAddr::new(address, peer.port), self.hello(false)));
        Outcome {
            event: Some(PeerEvent::Found(peer)),
            reply,
        }
    }
}

/// Owns the discovery socket and the peer table.
#[derive(Debug)]
pub struct PeerDirectory {
    socket: UdpSocket,
    table: PeerTable,
}

impl PeerDirectory {
    /// Bind the discovery socket on `port` (0 picks an ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UdpPortInUse`] when another process holds the port.
    pub fn bind(port: u16, identity: &Identity) -> Result<Self> {
        let (socket, local_port) = open_socket(port)?;
        Ok(Self {
            socket,
            table: PeerTable::new(identity.signature(), local_port, crate::DEFAULT_PORT),
        })
    }

    /// A directory on `port` that keeps this one's peers and signature.
    ///
    /// `self` stays bound until it is dropped, so a failed rebind leaves the
    /// current socket in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UdpPortInUse`] when another process holds the port.
    pub fn rebound(&self, port: u16) -> Result<Self> {
        let (socket, local_port) = open_socket(port)?;
        let mut table = self.table.clone();
        table.local_port = local_port;
        Ok(Self { socket, table })
    }

    /// Port the socket is bound to.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.table.local_port
    }

    /// Known peers, ordered by address.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.table.peers()
    }

    /// Read-only view of the peer table.
    #[must_use]
    pub const fn table(&self) -> &PeerTable {
        &self.table
    }

    /// Announce under a new identity from now on.
    pub fn set_identity(&mut self, identity: &Identity) {
        self.table.set_signature(identity.signature());
    }

    /// Broadcast a hello on every usable interface.
    ///
    /// Returns the number of datagrams sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoNetwork`] when there is no interface to broadcast on.
    pub async fn say_hello(&mut self) -> Result<usize> {
        let sources = self.table.begin_broadcast_round(&broadcast_targets());
        let message = self.table.hello(true);
        self.broadcast(&sources, &message).await
    }

    /// Broadcast a goodbye to every port hellos go to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoNetwork`] when there is no interface to broadcast on.
    pub async fn say_goodbye(&mut self) -> Result<usize> {
        let sources: Vec<BroadcastTarget> = broadcast_targets()
            .into_iter()
            .filter(|t| !self.table.is_bad(&IpAddr::V4(t.local)))
            .collect();
        self.broadcast(&sources, &DiscoveryMessage::Goodbye).await
    }

    async fn broadcast(
        &self,
        sources: &[BroadcastTarget],
        message: &DiscoveryMessage,
    ) -> Result<usize> {
        if sources.is_empty() {
            return Err(Error::NoNetwork);
        }

        let data = message.serialize();
        let mut sent = 0;
        for target in sources {
            for port in self.table.broadcast_ports() {
                let dest = SocketAddrV4::new(target.broadcast, port);
                match self.socket.send_to(&data, dest).await {
                    Ok(_) => sent += 1,
                    Err(e) => tracing::debug!("Broadcast to {} failed: {}", dest, e),
                }
            }
        }

        tracing::debug!("Sent {} discovery datagrams ({:?})", sent, message.message_type());
        Ok(sent)
    }

    /// Wait for the next datagram. Cancel-safe.
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Apply a received datagram and send the reply it calls for.
    pub async fn handle_datagram(&mut self, data: &[u8], sender: SocketAddr) -> Option<PeerEvent> {
        let outcome = self.table.handle_datagram(data, sender);
        if let Some((target, reply)) = outcome.reply {
            if let Err(e) = self.socket.send_to(&reply.serialize(), target).await {
                tracing::debug!("Hello reply to {} failed: {}", target, e);
            }
        }
        outcome.event
    }

    /// Receive datagrams until one changes the peer table.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails.
    pub async fn next_event(&mut self) -> Result<PeerEvent> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, sender) = self.recv_datagram(&mut buf).await?;
            if let Some(event) = self.handle_datagram(&buf[..len], sender).await {
                return Ok(event);
            }
        }
    }
}

fn open_socket(port: u16) -> Result<(UdpSocket, u16)> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&addr.into())
        .map_err(|e| Error::from_bind(e, port, true))?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket)?;
    let local_port = socket.local_addr()?.port();

    tracing::debug!("Discovery socket bound on UDP port {}", local_port);
    Ok((socket, local_port))
}
