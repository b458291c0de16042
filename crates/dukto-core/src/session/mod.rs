//! Session coordinator.
//!
//! The [`SessionCoordinator`] owns the discovery socket and the transfer
//! listener, both bound on the same port. It runs as a single task that
//! multiplexes datagrams, inbound connections, the periodic hello timer,
//! commands from [`CoordinatorHandle`]s and the events of the one transfer
//! that may be active at a time. Everything it observes is reported as a
//! [`ProtocolEvent`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{MAX_HELLO_INTERVAL, MIN_HELLO_INTERVAL};
use crate::connection::resolve_port;
use crate::discovery::{Peer, PeerDirectory, PeerEvent};
use crate::error::{Error, Result};
use crate::file::FileStore;
use crate::platform::{default_dest_dir, Identity};
use crate::transfer::{configure_tcp_keepalive, Outgoing, Receiver, Sender, TransferEvent, TransferOptions};

/// Top-level name given to screenshots.
pub const SCREENSHOT_NAME: &str = "Screenshot.jpg";

const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

/// Runtime options of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Port for discovery and transfers (0 picks an ephemeral one)
    pub port: u16,
    /// Interval between periodic hellos
    pub hello_interval: Duration,
    /// Where received entries are stored
    pub dest_dir: PathBuf,
    /// Transfer tunables
    pub transfer: TransferOptions,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            hello_interval: Duration::from_secs(crate::DEFAULT_HELLO_INTERVAL_SECS),
            dest_dir: default_dest_dir(),
            transfer: TransferOptions::default(),
        }
    }
}

/// Everything the coordinator reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A peer said hello
    PeerAdded(Peer),
    /// A peer said goodbye
    PeerRemoved(Peer),
    /// An outbound transfer wrote its header
    SendStarted {
        /// Payload bytes of the session
        total_bytes: u64,
    },
    /// An inbound connection was accepted
    ReceiveStarted {
        /// Remote address
        address: IpAddr,
    },
    /// Payload progress of the active transfer
    TransferStatus {
        /// Payload bytes of the session
        total_bytes: u64,
        /// Payload bytes moved so far
        done_bytes: u64,
    },
    /// One element of the active transfer was moved
    ElementCompleted {
        /// Element name, with any receive-side rename applied
        name: String,
    },
    /// A top-level file was received
    ReceiveFileCompleted {
        /// Stored name
        name: String,
        /// Absolute location
        path: PathBuf,
        /// Size in bytes
        size: u64,
    },
    /// A top-level directory was received
    ReceiveDirCompleted {
        /// Stored name
        name: String,
        /// Absolute location
        path: PathBuf,
    },
    /// A text was received
    ReceiveTextCompleted(String),
    /// The inbound session completed
    ReceiveCompleted,
    /// The inbound session ended early
    ReceiveAborted(String),
    /// The outbound session completed
    SendCompleted,
    /// The outbound session failed
    SendFailed(String),
    /// The outbound session was aborted locally
    SendAborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Receive,
}

#[derive(Debug)]
struct ActiveTransfer {
    direction: Direction,
    cancel: CancellationToken,
    user_aborted: bool,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    task: JoinHandle<Result<()>>,
}

#[derive(Debug)]
enum Command {
    Send {
        target: SocketAddr,
        outgoing: Outgoing,
        reply: oneshot::Sender<Result<()>>,
    },
    Abort,
    Greeting,
    UpdateBuddy(Identity),
    SetPort {
        port: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    SetDestDir(PathBuf),
    CloseServers,
    Peers(oneshot::Sender<Vec<Peer>>),
    IsBusy(oneshot::Sender<bool>),
}

/// Cloneable handle driving a running [`SessionCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    port: Arc<AtomicU16>,
}

impl CoordinatorHandle {
    /// Port the coordinator is bound to.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// Send files and directories to `address:port` (0 means the default port).
    ///
    /// Resolves once the transfer started. Enumeration errors and
    /// [`Error::Busy`] are returned here; later failures arrive as events.
    pub async fn send_files(&self, address: IpAddr, port: u16, paths: Vec<PathBuf>) -> Result<()> {
        self.send(address, port, Outgoing::files(paths)).await
    }

    /// Send a text.
    pub async fn send_text(&self, address: IpAddr, port: u16, text: impl Into<String>) -> Result<()> {
        self.send(address, port, Outgoing::Text(text.into())).await
    }

    /// Send an image file under the name [`SCREENSHOT_NAME`].
    pub async fn send_screen(&self, address: IpAddr, port: u16, path: PathBuf) -> Result<()> {
        self.send(address, port, Outgoing::file_named(path, SCREENSHOT_NAME))
            .await
    }

    async fn send(&self, address: IpAddr, port: u16, outgoing: Outgoing) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            target: SocketAddr::new(address, resolve_port(port)),
            outgoing,
            reply,
        })?;
        rx.await.map_err(|_| Error::CoordinatorClosed)?
    }

    /// Abort whichever transfer is active. Does nothing when idle.
    pub fn abort_current_transfer(&self) -> Result<()> {
        self.command(Command::Abort)
    }

    /// Broadcast a hello now.
    pub fn greeting(&self) -> Result<()> {
        self.command(Command::Greeting)
    }

    /// Re-announce under a new identity (goodbye, then hello).
    pub fn update_buddy(&self, identity: Identity) -> Result<()> {
        self.command(Command::UpdateBuddy(identity))
    }

    /// Move discovery and the listener to `port` (0 picks an ephemeral one).
    ///
    /// Peers are kept. A goodbye goes out on the old socket and a hello on
    /// the new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UdpPortInUse`] or [`Error::TcpPortInUse`] when the
    /// port is taken; the coordinator then stays on its current port.
    pub async fn set_port(&self, port: u16) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SetPort { port, reply })?;
        rx.await.map_err(|_| Error::CoordinatorClosed)?
    }

    /// Store later incoming sessions under `dir`.
    pub fn set_dest_dir(&self, dir: PathBuf) -> Result<()> {
        self.command(Command::SetDestDir(dir))
    }

    /// Say goodbye and release both sockets.
    pub fn close_servers(&self) -> Result<()> {
        self.command(Command::CloseServers)
    }

    /// Peers currently known.
    pub async fn peers(&self) -> Result<Vec<Peer>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Peers(tx))?;
        rx.await.map_err(|_| Error::CoordinatorClosed)
    }

    /// Whether a transfer is active.
    pub async fn is_busy(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::IsBusy(tx))?;
        rx.await.map_err(|_| Error::CoordinatorClosed)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::CoordinatorClosed)
    }
}

/// Owns the sockets and the single active transfer.
#[derive(Debug)]
pub struct SessionCoordinator {
    directory: PeerDirectory,
    listener: TcpListener,
    port: Arc<AtomicU16>,
    store: Arc<dyn FileStore>,
    options: ProtocolOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ProtocolEvent>,
    active: Option<ActiveTransfer>,
}

impl SessionCoordinator {
    /// Bind the UDP discovery socket and the TCP listener on `options.port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UdpPortInUse`] or [`Error::TcpPortInUse`] when the
    /// port is held by another process.
    pub async fn bind(
        options: ProtocolOptions,
        identity: Identity,
        store: Arc<dyn FileStore>,
    ) -> Result<(Self, CoordinatorHandle, mpsc::UnboundedReceiver<ProtocolEvent>)> {
        let directory = PeerDirectory::bind(options.port, &identity)?;
        let port = directory.local_port();

        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
            .await
            .map_err(|e| Error::from_bind(e, port, false))?;

        tracing::info!("Listening on port {} as \"{}\"", port, identity);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let port = Arc::new(AtomicU16::new(port));

        let coordinator = Self {
            directory,
            listener,
            port: Arc::clone(&port),
            store,
            options,
            commands: command_rx,
            events: event_tx,
            active: None,
        };
        let handle = CoordinatorHandle {
            commands: command_tx,
            port,
        };
        Ok((coordinator, handle, event_rx))
    }

    /// Run until [`CoordinatorHandle::close_servers`] is called or every
    /// handle is dropped. Greets the network on start and says goodbye on exit.
    pub async fn run(mut self) {
        self.say_hello().await;

        let period = self
            .options
            .hello_interval
            .clamp(MIN_HELLO_INTERVAL, MAX_HELLO_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            tokio::select! {
                datagram = self.directory.recv_datagram(&mut buf) => match datagram {
                    Ok((len, sender)) => {
                        if let Some(event) = self.directory.handle_datagram(&buf[..len], sender).await {
                            self.emit(match event {
                                PeerEvent::Found(peer) => ProtocolEvent::PeerAdded(peer),
                                PeerEvent::Gone(peer) => ProtocolEvent::PeerRemoved(peer),
                            });
                        }
                    }
                    Err(e) => tracing::debug!("Discovery receive failed: {}", e),
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
                _ = ticker.tick() => self.say_hello().await,
                command = self.commands.recv() => match command {
                    Some(Command::CloseServers) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_transfer_event(&mut self.active) => self.on_transfer_event(event),
            }
        }

        self.shutdown().await;
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.active.is_some() {
            tracing::info!("Refusing connection from {}: busy", addr);
            drop(stream);
            return;
        }

        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::debug!("Failed to enable keep-alive: {}", e);
        }
        tracing::info!("Incoming transfer from {}", addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut receiver = Receiver::new(
            Arc::clone(&self.store),
            self.options.dest_dir.clone(),
            tx,
            self.options.transfer,
        );
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut stream = stream;
            receiver.receive_from(&mut stream, token).await
        });

        self.active = Some(ActiveTransfer {
            direction: Direction::Receive,
            cancel,
            user_aborted: false,
            events: rx,
            task,
        });
        self.emit(ProtocolEvent::ReceiveStarted { address: addr.ip() });
    }

    fn start_send(&mut self, target: SocketAddr, outgoing: Outgoing) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Busy);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Sender::prepare(Arc::clone(&self.store), outgoing, tx, self.options.transfer)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sender.send_to(target, cancel.clone()));

        self.active = Some(ActiveTransfer {
            direction: Direction::Send,
            cancel,
            user_aborted: false,
            events: rx,
            task,
        });
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                target,
                outgoing,
                reply,
            } => {
                let result = self.start_send(target, outgoing);
                if let Err(e) = &result {
                    tracing::warn!("Cannot send to {}: {}", target, e);
                }
                let _ = reply.send(result);
            }
            Command::Abort => {
                if let Some(active) = self.active.as_mut() {
                    tracing::info!("Aborting current transfer");
                    active.user_aborted = true;
                    active.cancel.cancel();
                }
            }
            Command::Greeting => self.say_hello().await,
            Command::UpdateBuddy(identity) => {
                self.say_goodbye().await;
                self.directory.set_identity(&identity);
                self.say_hello().await;
            }
            Command::SetPort { port, reply } => {
                let result = self.rebind(port).await;
                if let Err(e) = &result {
                    tracing::warn!("Cannot move to port {}: {}", port, e);
                }
                let _ = reply.send(result);
            }
            Command::SetDestDir(dir) => {
                tracing::debug!("Destination directory set to {}", dir.display());
                self.options.dest_dir = dir;
            }
            Command::Peers(reply) => {
                let _ = reply.send(self.directory.peers());
            }
            Command::IsBusy(reply) => {
                let _ = reply.send(self.active.is_some());
            }
            Command::CloseServers => {}
        }
    }

    fn on_transfer_event(&mut self, event: Option<TransferEvent>) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let direction = active.direction;
        let user_aborted = active.user_aborted;

        // A closed channel without a terminal event means the task died.
        let event = event.unwrap_or_else(|| TransferEvent::Aborted {
            error: "transfer task ended unexpectedly".to_string(),
        });
        if event.is_terminal() {
            self.active = None;
        }

        self.emit(translate(direction, user_aborted, event));
    }

    async fn rebind(&mut self, port: u16) -> Result<()> {
        if port != 0 && port == self.directory.local_port() {
            return Ok(());
        }

        let directory = self.directory.rebound(port)?;
        let bound = directory.local_port();
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), bound))
            .await
            .map_err(|e| Error::from_bind(e, bound, false))?;

        self.say_goodbye().await;
        self.directory = directory;
        self.listener = listener;
        self.port.store(bound, Ordering::Relaxed);
        tracing::info!("Now listening on port {}", bound);
        self.say_hello().await;
        Ok(())
    }

    async fn say_hello(&mut self) {
        if let Err(e) = self.directory.say_hello().await {
            tracing::warn!("Hello broadcast failed: {}", e);
        }
    }

    async fn say_goodbye(&mut self) {
        if let Err(e) = self.directory.say_goodbye().await {
            tracing::warn!("Goodbye broadcast failed: {}", e);
        }
    }

    async fn shutdown(mut self) {
        tracing::info!("Closing servers");
        self.say_goodbye().await;

        if let Some(mut active) = self.active.take() {
            active.user_aborted = true;
            active.cancel.cancel();
            if let Err(e) = (&mut active.task).await {
                tracing::warn!("Transfer task failed: {}", e);
            }
            while let Ok(event) = active.events.try_recv() {
                self.emit(translate(active.direction, active.user_aborted, event));
            }
        }
    }

    fn emit(&self, event: ProtocolEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Protocol event dropped, no listener");
        }
    }
}

async fn next_transfer_event(active: &mut Option<ActiveTransfer>) -> Option<TransferEvent> {
    match active {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}

fn translate(direction: Direction, user_aborted: bool, event: TransferEvent) -> ProtocolEvent {
    match (direction, event) {
        (Direction::Send, TransferEvent::Started { total_bytes }) => {
            ProtocolEvent::SendStarted { total_bytes }
        }
        (Direction::Receive, TransferEvent::Started { total_bytes }) => {
            ProtocolEvent::TransferStatus {
                total_bytes,
                done_bytes: 0,
            }
        }
        (
            _,
            TransferEvent::Progress {
                total_bytes,
                done_bytes,
            },
        ) => ProtocolEvent::TransferStatus {
            total_bytes,
            done_bytes,
        },
        (_, TransferEvent::ElementCompleted { name }) => ProtocolEvent::ElementCompleted { name },
        (_, TransferEvent::DirectoryReceived { name, path }) => {
            ProtocolEvent::ReceiveDirCompleted { name, path }
        }
        (_, TransferEvent::FileReceived { name, path, size }) => {
            ProtocolEvent::ReceiveFileCompleted { name, path, size }
        }
        (_, TransferEvent::TextReceived { text }) => ProtocolEvent::ReceiveTextCompleted(text),
        (Direction::Send, TransferEvent::Completed) => ProtocolEvent::SendCompleted,
        (Direction::Receive, TransferEvent::Completed) => ProtocolEvent::ReceiveCompleted,
        (Direction::Send, TransferEvent::Aborted { .. }) if user_aborted => {
            ProtocolEvent::SendAborted
        }
        (Direction::Send, TransferEvent::Aborted { error }) => ProtocolEvent::SendFailed(error),
        (Direction::Receive, TransferEvent::Aborted { error }) => {
            ProtocolEvent::ReceiveAborted(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFileStore;
    use crate::protocol::DiscoveryMessage;
    use tokio::io::AsyncReadExt;
    use tokio::net::UdpSocket;

    fn options() -> ProtocolOptions {
        ProtocolOptions {
            port: 0,
            hello_interval: Duration::from_secs(3600),
            dest_dir: PathBuf::from("/inbox"),
            transfer: TransferOptions::default(),
        }
    }

    fn identity() -> Identity {
        Identity::new("Tester", "testbox", "Linux")
    }

    async fn start() -> (CoordinatorHandle, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (coordinator, handle, events) =
            SessionCoordinator::bind(options(), identity(), Arc::new(MemoryFileStore::new()))
                .await
                .expect("bind coordinator");
        tokio::spawn(coordinator.run());
        (handle, events)
    }

    async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<ProtocolEvent>, mut pred: F) -> ProtocolEvent
    where
        F: FnMut(&ProtocolEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.expect("coordinator alive");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event in time")
    }

    #[tokio::test]
    async fn test_udp_port_in_use() {
        let (first, handle, _events) =
            SessionCoordinator::bind(options(), identity(), Arc::new(MemoryFileStore::new()))
                .await
                .expect("bind");
        let port = handle.local_port();

        let taken = ProtocolOptions { port, ..options() };
        let err = SessionCoordinator::bind(taken, identity(), Arc::new(MemoryFileStore::new()))
            .await
            .expect_err("port is taken");
        assert!(matches!(err, Error::UdpPortInUse(p) if p == port));
        drop(first);
    }

    #[tokio::test]
    async fn test_tcp_port_in_use() {
        let blocker = std::net::TcpListener::bind("0.0.0.0:0").expect("bind blocker");
        let port = blocker.local_addr().expect("addr").port();

        let taken = ProtocolOptions { port, ..options() };
        match SessionCoordinator::bind(taken, identity(), Arc::new(MemoryFileStore::new())).await {
            Err(Error::TcpPortInUse(p)) => assert_eq!(p, port),
            // The UDP side of a random port can be taken too; that is also a distinct error.
            Err(Error::UdpPortInUse(p)) => assert_eq!(p, port),
            other => panic!("expected a port-in-use error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_refusal_and_abort() {
        let (handle, mut events) = start().await;

        // A peer that accepts but never reads keeps the sender blocked.
        let sink = TcpListener::bind("127.0.0.1:0").await.expect("bind sink");
        let sink_port = sink.local_addr().expect("addr").port();
        let accept = tokio::spawn(async move { sink.accept().await });

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        handle
            .send_text(localhost, sink_port, "x".repeat(32 * 1024 * 1024))
            .await
            .expect("first send starts");
        assert!(handle.is_busy().await.expect("query"));

        let err = handle
            .send_text(localhost, sink_port, "second")
            .await
            .expect_err("second send refused");
        assert!(matches!(err, Error::Busy));

        // Inbound connections are closed right away while busy.
        let mut inbound = TcpStream::connect((localhost, handle.local_port()))
            .await
            .expect("connect to coordinator");
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), inbound.read(&mut byte))
            .await
            .expect("closed in time");
        assert!(matches!(read, Ok(0) | Err(_)));

        handle.abort_current_transfer().expect("abort");
        let event = wait_for(&mut events, |e| {
            matches!(
                e,
                ProtocolEvent::SendAborted | ProtocolEvent::SendCompleted | ProtocolEvent::SendFailed(_)
            )
        })
        .await;
        assert_eq!(event, ProtocolEvent::SendAborted);
        assert!(!handle.is_busy().await.expect("query"));

        handle.close_servers().expect("close");
        drop(accept);
    }

    #[tokio::test]
    async fn test_enumeration_error_is_returned_before_connecting() {
        let (handle, _events) = start().await;

        let err = handle
            .send_files(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, vec![PathBuf::from("/missing")])
            .await
            .expect_err("unreadable selection");
        assert!(matches!(err, Error::CannotRead(_)));
        assert!(!handle.is_busy().await.expect("query"));
    }

    #[tokio::test]
    async fn test_closed_coordinator_rejects_commands() {
        let (handle, _events) = start().await;
        handle.close_servers().expect("close");

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if handle.is_busy().await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(matches!(handle.greeting(), Err(Error::CoordinatorClosed)));
    }

    #[test]
    fn test_translate_abort_reasons() {
        let aborted = TransferEvent::Aborted {
            error: "boom".to_string(),
        };
        assert_eq!(
            translate(Direction::Send, true, aborted.clone()),
            ProtocolEvent::SendAborted
        );
        assert_eq!(
            translate(Direction::Send, false, aborted.clone()),
            ProtocolEvent::SendFailed("boom".to_string())
        );
        assert_eq!(
            translate(Direction::Receive, true, aborted),
            ProtocolEvent::ReceiveAborted("boom".to_string())
        );
    }

    /// Greet the coordinator from `peer` and return the signature it answers with.
    async fn exchange_hello(peer: &UdpSocket, coordinator_port: u16) -> String {
        let peer_port = peer.local_addr().expect("addr").port();
        let hello = DiscoveryMessage::hello(true, Some(peer_port), "Peer at lo (Linux)").serialize();
        peer.send_to(&hello, (Ipv4Addr::LOCALHOST, coordinator_port))
            .await
            .expect("send hello");

        let mut buf = [0u8; 1024];
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (len, _) = peer.recv_from(&mut buf).await.expect("recv");
                if let DiscoveryMessage::HelloPortUnicast { signature, .. } =
                    DiscoveryMessage::parse(&buf[..len])
                {
                    return signature;
                }
            }
        })
        .await
        .expect("reply in time")
    }

    #[tokio::test]
    async fn test_update_buddy_changes_announced_name() {
        let (handle, _events) = start().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");

        assert_eq!(
            exchange_hello(&peer, handle.local_port()).await,
            "Tester at testbox (Linux)"
        );

        handle
            .update_buddy(Identity::new("Renamed", "testbox", "Linux"))
            .expect("update");
        // Commands are handled in order, so the update is applied once this returns.
        handle.is_busy().await.expect("query");

        assert_eq!(
            exchange_hello(&peer, handle.local_port()).await,
            "Renamed at testbox (Linux)"
        );
        assert_eq!(handle.peers().await.expect("peers").len(), 1);
        handle.close_servers().expect("close");
    }

    #[tokio::test]
    async fn test_set_port_moves_both_sockets() {
        let (handle, _events) = start().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
        exchange_hello(&peer, handle.local_port()).await;
        let old_port = handle.local_port();

        handle.set_port(0).await.expect("rebind");
        let new_port = handle.local_port();
        assert_ne!(new_port, old_port);

        TcpStream::connect((Ipv4Addr::LOCALHOST, new_port))
            .await
            .expect("listener moved");
        assert_eq!(
            exchange_hello(&peer, new_port).await,
            "Tester at testbox (Linux)"
        );
        assert_eq!(handle.peers().await.expect("peers").len(), 1);

        // The old port is free again.
        drop(PeerDirectory::bind(old_port, &identity()).expect("old port released"));
        handle.close_servers().expect("close");
    }

    #[tokio::test]
    async fn test_set_port_onto_taken_port_keeps_current_one() {
        let (handle, _events) = start().await;
        let old_port = handle.local_port();

        let udp_blocker = PeerDirectory::bind(0, &identity()).expect("bind blocker");
        let err = handle
            .set_port(udp_blocker.local_port())
            .await
            .expect_err("udp port taken");
        assert!(matches!(err, Error::UdpPortInUse(p) if p == udp_blocker.local_port()));

        let tcp_blocker = std::net::TcpListener::bind("0.0.0.0:0").expect("bind blocker");
        let tcp_port = tcp_blocker.local_addr().expect("addr").port();
        match handle.set_port(tcp_port).await {
            Err(Error::TcpPortInUse(p) | Error::UdpPortInUse(p)) => assert_eq!(p, tcp_port),
            other => panic!("expected a port-in-use error, got {other:?}"),
        }

        assert_eq!(handle.local_port(), old_port);
        TcpStream::connect((Ipv4Addr::LOCALHOST, old_port))
            .await
            .expect("old listener still open");
        handle.close_servers().expect("close");
    }

    #[tokio::test]
    async fn test_out_of_range_hello_interval_is_clamped() {
        let options = ProtocolOptions {
            hello_interval: Duration::MAX,
            ..options()
        };
        let (coordinator, handle, _events) =
            SessionCoordinator::bind(options, identity(), Arc::new(MemoryFileStore::new()))
                .await
                .expect("bind coordinator");
        let task = tokio::spawn(coordinator.run());

        assert!(!handle.is_busy().await.expect("coordinator running"));
        handle.close_servers().expect("close");
        task.await.expect("run ends without panicking");
    }
}
