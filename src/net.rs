//! TCP transport for the feed: framed intake from clients into the engine's
//! input queue, and fan-out of every engine message to all connected
//! clients.
//!
//! Thread layout: one accept loop, one reader thread per client (frame
//! reassembly and decode), a single intake thread that is the sole producer
//! of the engine's input queue, and a single broadcast thread that is the
//! sole consumer of the output queue. Encoded frames are shared `Arc`s so a
//! message is serialized once regardless of client count.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::messages::{ClientMessage, NewOrder, ServerMessage, Side};
use crate::server::{FeedReader, OrderGate};
use crate::wire::{self, FrameAssembler, WireError};

const READ_CHUNK: usize = 4096;
/// Frames buffered per client before a slow consumer starts losing them.
const CLIENT_SEND_DEPTH: usize = 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(10);
const READ_POLL: Duration = Duration::from_millis(100);

type Registry = Arc<Mutex<HashMap<u64, Sender<Arc<Vec<u8>>>>>>;

/// Framed TCP server bridging wire clients and the matching engine.
pub struct FeedServer {
    running: Arc<AtomicBool>,
    clients: Registry,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl FeedServer {
    /// Bind and start serving. The engine handles passed in become the
    /// queue endpoints: `gate` is pushed only by the intake thread, `feed`
    /// is drained only by the broadcast thread.
    pub fn bind(
        addr: impl ToSocketAddrs,
        gate: OrderGate,
        feed: FeedReader,
    ) -> io::Result<FeedServer> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let clients: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (intake_tx, intake_rx) = bounded::<ClientMessage>(4096);

        let mut threads = Vec::new();
        {
            let running = Arc::clone(&running);
            let clients = Arc::clone(&clients);
            threads.push(
                std::thread::Builder::new()
                    .name("simex-accept".into())
                    .spawn(move || accept_loop(listener, running, clients, intake_tx))?,
            );
        }
        {
            let running = Arc::clone(&running);
            threads.push(
                std::thread::Builder::new()
                    .name("simex-intake".into())
                    .spawn(move || intake_loop(intake_rx, gate, running))?,
            );
        }
        {
            let running = Arc::clone(&running);
            let clients = Arc::clone(&clients);
            threads.push(
                std::thread::Builder::new()
                    .name("simex-broadcast".into())
                    .spawn(move || broadcast_loop(feed, clients, running))?,
            );
        }

        info!(%local_addr, "feed server listening");
        Ok(FeedServer { running, clients, local_addr, threads })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop all server threads and disconnect clients.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        // Dropping the senders ends every client writer thread.
        self.clients.lock().unwrap().clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    clients: Registry,
    intake_tx: Sender<ClientMessage>,
) {
    let mut next_client_id = 0u64;
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                next_client_id += 1;
                start_client(
                    next_client_id,
                    stream,
                    peer,
                    Arc::clone(&running),
                    Arc::clone(&clients),
                    intake_tx.clone(),
                );
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(READ_POLL);
            }
        }
    }
}

fn start_client(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    running: Arc<AtomicBool>,
    clients: Registry,
    intake_tx: Sender<ClientMessage>,
) {
    if stream.set_nodelay(true).is_err()
        || stream.set_read_timeout(Some(READ_POLL)).is_err()
        || stream.set_write_timeout(Some(Duration::from_secs(5))).is_err()
    {
        warn!(%peer, "failed to configure client socket");
        return;
    }
    let mut write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(%peer, error = %e, "failed to clone client socket");
            return;
        }
    };

    let (frames_tx, frames_rx) = bounded::<Arc<Vec<u8>>>(CLIENT_SEND_DEPTH);
    clients.lock().unwrap().insert(id, frames_tx);
    info!(%peer, client = id, "client connected");

    let writer = std::thread::Builder::new().name(format!("simex-client-{id}-w"));
    let writer_peer = peer;
    let _ = writer.spawn(move || {
        for frame in frames_rx.iter() {
            if let Err(e) = write_half.write_all(&frame) {
                debug!(peer = %writer_peer, error = %e, "client write failed");
                break;
            }
        }
    });

    let reader = std::thread::Builder::new().name(format!("simex-client-{id}-r"));
    let _ = reader.spawn(move || {
        reader_loop(id, stream, peer, running, intake_tx);
        clients.lock().unwrap().remove(&id);
        info!(%peer, client = id, "client disconnected");
    });
}

fn reader_loop(
    id: u64,
    mut stream: TcpStream,
    peer: SocketAddr,
    running: Arc<AtomicBool>,
    intake_tx: Sender<ClientMessage>,
) {
    let mut asm = FrameAssembler::new();
    let mut chunk = [0u8; READ_CHUNK];

    'conn: while running.load(Ordering::Acquire) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                asm.extend(&chunk[..n]);
                loop {
                    match asm.next_payload() {
                        Ok(Some(payload)) => match wire::decode_client_payload(&payload) {
                            Ok(msg) => {
                                if intake_tx.send(msg).is_err() {
                                    break 'conn;
                                }
                            }
                            Err(e) => {
                                warn!(%peer, client = id, error = %e, "malformed client frame");
                                break 'conn;
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            warn!(%peer, client = id, error = %e, "refusing client frame");
                            break 'conn;
                        }
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                debug!(%peer, client = id, error = %e, "client read failed");
                break;
            }
        }
    }
}

fn intake_loop(intake_rx: Receiver<ClientMessage>, mut gate: OrderGate, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match intake_rx.recv_timeout(READ_POLL) {
            Ok(msg) => {
                if !gate.submit(msg) {
                    // Input queue full: the producer's policy is drop and
                    // report. The engine itself never drops.
                    warn!("engine input queue full; dropping client message");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn broadcast_loop(mut feed: FeedReader, clients: Registry, running: Arc<AtomicBool>) {
    let mut dead = Vec::new();
    while running.load(Ordering::Acquire) {
        match feed.next() {
            Some(msg) => {
                let frame = Arc::new(wire::encode_server_message(&msg));
                {
                    let map = clients.lock().unwrap();
                    for (&id, tx) in map.iter() {
                        match tx.try_send(Arc::clone(&frame)) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(client = id, "feed backlog full; dropping frame")
                            }
                            Err(TrySendError::Disconnected(_)) => dead.push(id),
                        }
                    }
                }
                if !dead.is_empty() {
                    let mut map = clients.lock().unwrap();
                    for id in dead.drain(..) {
                        map.remove(&id);
                    }
                }
            }
            None => std::thread::sleep(Duration::from_micros(200)),
        }
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Blocking framed client used by the simulator, the bot, and tests.
pub struct WireClient {
    stream: TcpStream,
    asm: FrameAssembler,
}

impl WireClient {
    /// Connect with the given receive poll timeout. `poll_message` returns
    /// `Ok(None)` after that long with no traffic.
    pub fn connect(addr: impl ToSocketAddrs, read_timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        Ok(Self { stream, asm: FrameAssembler::new() })
    }

    pub fn send(&mut self, msg: &ClientMessage) -> io::Result<()> {
        self.stream.write_all(&wire::encode_client_message(msg))
    }

    pub fn send_new_order(
        &mut self,
        user_id: u64,
        side: Side,
        price: f64,
        quantity: u64,
    ) -> io::Result<()> {
        self.send(&ClientMessage::NewOrder(NewOrder { user_id, side, price, quantity }))
    }

    pub fn send_cancel(&mut self, order_id: u64) -> io::Result<()> {
        self.send(&ClientMessage::Cancel(crate::messages::CancelRequest { order_id }))
    }

    /// Next feed message, or `None` if nothing arrived within the poll
    /// timeout. A closed connection surfaces as `UnexpectedEof`.
    pub fn poll_message(&mut self) -> io::Result<Option<ServerMessage>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(payload) = self.asm.next_payload().map_err(invalid_data)? {
                let msg = wire::decode_server_payload(&payload).map_err(invalid_data)?;
                return Ok(Some(msg));
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "feed connection closed",
                    ))
                }
                Ok(n) => self.asm.extend(&chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard everything currently readable. Send-mostly clients call this
    /// so the broadcast stream cannot back up their socket.
    pub fn drain(&mut self) -> io::Result<()> {
        while self.poll_message()?.is_some() {}
        Ok(())
    }
}

fn invalid_data(e: WireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
