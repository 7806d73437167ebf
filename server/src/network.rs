//! Server network layer: TCP connections, framing and lobby commands
//!
//! Every accepted connection gets a player id, a bounded outbound queue and
//! two tasks. The reader decodes length-prefixed frames and applies them to
//! the registry, the scheduler or the player's session input queue. The
//! writer drains the outbound queue onto the socket. Sessions only see a
//! weak handle to the queue, so they never wait on a socket.

use crate::config::{ConfigError, GameConfig};
use crate::input_queue::{InputQueue, SubmitOutcome};
use crate::registry::{SessionRegistry, SharedSession};
use crate::scheduler::{SessionObserver, TickScheduler};
use crate::session::{ConnectionHandle, Departure, SessionState};
use log::{debug, error, info, warn};
use shared::{
    decode_packet, encode_frame, Packet, PlayerId, ProtocolError, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reads one length-prefixed frame body
///
/// Returns `Ok(None)` on a clean end of stream. An oversized frame is
/// skipped and reported as [`ProtocolError::FrameTooLarge`], leaving the
/// stream positioned at the next frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        let skipped =
            tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Ok(None);
        }
        return Err(ProtocolError::FrameTooLarge(len).into());
    }

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Encodes and writes one packet as a frame.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Main server accepting connections and driving the tick scheduler
pub struct Server {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<TickScheduler>,
    outbound_buffer: usize,
    next_player_id: PlayerId,
}

impl Server {
    pub async fn bind(
        addr: &str,
        config: GameConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let outbound_buffer = config.outbound_buffer;
        let tick_interval = config.tick_interval();
        let registry = Arc::new(SessionRegistry::new(config));
        let scheduler = Arc::new(TickScheduler::new(
            tick_interval,
            Arc::clone(&registry),
            observer,
        ));

        Ok(Server {
            listener,
            registry,
            scheduler,
            outbound_buffer,
            next_player_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn scheduler(&self) -> Arc<TickScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Starts the scheduler and accepts connections until the task is dropped
    pub async fn run(mut self) -> Result<(), ServerError> {
        tokio::spawn(Arc::clone(&self.scheduler).run());
        info!("Server started successfully");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let player_id = self.next_player_id;
            self.next_player_id += 1;
            let connection = Connection::new(
                player_id,
                peer,
                Arc::clone(&self.registry),
                Arc::clone(&self.scheduler),
                self.outbound_buffer,
            );
            tokio::spawn(connection.serve(stream));
        }
    }
}

/// Per-connection state owned by the reader task
struct Connection {
    id: PlayerId,
    peer: SocketAddr,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<TickScheduler>,
    outbound: mpsc::Sender<Arc<Packet>>,
    outbound_rx: Option<mpsc::Receiver<Arc<Packet>>>,
    kick: Arc<Notify>,
    session: Option<SharedSession>,
    inputs: Option<Arc<InputQueue>>,
}

impl Connection {
    fn new(
        id: PlayerId,
        peer: SocketAddr,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<TickScheduler>,
        outbound_buffer: usize,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        Self {
            id,
            peer,
            registry,
            scheduler,
            outbound,
            outbound_rx: Some(outbound_rx),
            kick: Arc::new(Notify::new()),
            session: None,
            inputs: None,
        }
    }

    async fn serve(mut self, stream: TcpStream) {
        info!("[conn {}] Client connected from {}", self.id, self.peer);
        let (mut reader, writer) = stream.into_split();
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        let writer_task = tokio::spawn(Self::write_loop(self.id, writer, outbound_rx));

        self.send(Packet::Welcome {
            player_id: self.id,
            protocol_version: PROTOCOL_VERSION,
        });

        let kick = Arc::clone(&self.kick);
        let mut kicked = false;
        loop {
            tokio::select! {
                frame = read_frame(&mut reader) => match frame {
                    Ok(Some(body)) => match decode_packet(&body) {
                        Ok(packet) => self.handle_packet(packet),
                        Err(e) => warn!("[conn {}] Dropping malformed packet: {}", self.id, e),
                    },
                    Ok(None) => {
                        info!("[conn {}] Connection closed by client", self.id);
                        break;
                    }
                    Err(ServerError::Protocol(e)) => {
                        warn!("[conn {}] Dropping frame: {}", self.id, e);
                    }
                    Err(e) => {
                        warn!("[conn {}] Read failed: {}", self.id, e);
                        break;
                    }
                },
                _ = kick.notified() => {
                    warn!("[conn {}] Client cannot keep up, disconnecting", self.id);
                    kicked = true;
                    break;
                }
            }
        }

        self.leave_session();
        drop(self);
        if kicked {
            writer_task.abort();
        }
    }

    /// Drains the outbound queue onto the socket until every sender is gone
    async fn write_loop(
        id: PlayerId,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::Receiver<Arc<Packet>>,
    ) {
        while let Some(packet) = outbound_rx.recv().await {
            if let Err(e) = write_packet(&mut writer, &packet).await {
                match e {
                    ServerError::Protocol(e) => {
                        error!("[conn {}] Failed to encode packet: {}", id, e);
                        continue;
                    }
                    ServerError::Io(e) => {
                        debug!("[conn {}] Write failed: {}", id, e);
                        break;
                    }
                    ServerError::Config(_) => unreachable!("write_packet never yields config errors"),
                }
            }
        }
        let _ = writer.shutdown().await;
    }

    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(&self.outbound, Arc::clone(&self.kick))
    }

    fn send(&self, packet: Packet) {
        match self.outbound.try_send(Arc::new(packet)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.kick.notify_one(),
            Err(TrySendError::Closed(_)) => {
                debug!("[conn {}] Outbound queue closed", self.id);
            }
        }
    }

    fn reject(&self, reason: impl ToString) {
        let reason = reason.to_string();
        debug!("[conn {}] Rejected: {}", self.id, reason);
        self.send(Packet::Rejected { reason });
    }

    /// Processes one decoded client packet
    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::CreateSession { name } => {
                if self.in_live_session() {
                    self.reject("already in a session");
                    return;
                }
                let session = match self.registry.create() {
                    Ok(session) => session,
                    Err(e) => {
                        self.reject(e);
                        return;
                    }
                };
                let admitted = session.lock().admit(self.id, &name, self.handle());
                match admitted {
                    Ok(()) => self.attach(session),
                    Err(e) => {
                        let id = session.lock().id();
                        self.registry.remove(id);
                        self.reject(e);
                    }
                }
            }

            Packet::JoinSession { code, name } => {
                if self.in_live_session() {
                    self.reject("already in a session");
                    return;
                }
                let Some(session) = self.registry.find_by_code(&code) else {
                    self.reject(format!("no session with code {:?}", code));
                    return;
                };
                let admitted = session.lock().admit(self.id, &name, self.handle());
                match admitted {
                    Ok(()) => self.attach(session),
                    Err(e) => self.reject(e),
                }
            }

            Packet::StartSession => {
                let Some(session) = &self.session else {
                    self.reject("not in a session");
                    return;
                };
                if let Err(e) = self.scheduler.start_session(session, self.id) {
                    self.reject(e);
                }
            }

            Packet::Input {
                heading,
                client_tick,
            } => {
                let Some(inputs) = &self.inputs else {
                    debug!("[conn {}] Input outside a session", self.id);
                    return;
                };
                let outcome = inputs.submit_current(self.id, heading);
                let tick = inputs.next_tick();
                if outcome != SubmitOutcome::Accepted && outcome != SubmitOutcome::Replaced {
                    debug!(
                        "[conn {}] Input {:?} dropped: {:?}",
                        self.id, heading, outcome
                    );
                }
                if let Some(client_tick) = client_tick {
                    if client_tick.saturating_add(2) < tick {
                        debug!(
                            "[conn {}] Client is {} ticks behind",
                            self.id,
                            tick - client_tick
                        );
                    }
                }
            }

            Packet::Leave => self.leave_session(),

            other => {
                warn!("[conn {}] Unexpected packet from client: {:?}", self.id, other);
            }
        }
    }

    /// Forgets a session that has already ended.
    fn in_live_session(&mut self) -> bool {
        let live = self
            .session
            .as_ref()
            .is_some_and(|session| session.lock().state() != SessionState::Ended);
        if !live {
            self.session = None;
            self.inputs = None;
        }
        live
    }

    fn attach(&mut self, session: SharedSession) {
        self.inputs = Some(session.lock().inputs());
        self.session = Some(session);
    }

    /// Reports the player as gone to their session, if any.
    fn leave_session(&mut self) {
        self.inputs = None;
        let Some(session) = self.session.take() else {
            return;
        };
        let (departure, session_id) = {
            let mut guard = session.lock();
            (guard.disconnect(self.id), guard.id())
        };
        if departure == Departure::Emptied {
            self.registry.remove(session_id);
        }
    }
}
