//! # Session
//!
//! Owns at most one live connection and the tasks that drive it:
//!
//! - a **read task** that decodes frames, runs the handshake, expands Multi
//!   containers and broadcasts every packet to the registered handlers;
//! - a **write task** that drains the outgoing queue. Before channel
//!   encryption is active it only accepts handshake frames from the read task;
//! - a **heartbeat task**, started once logon succeeds.
//!
//! Events are reported through a bounded stream obtained once from
//! [`Session::events`]. The stream must be drained or producers block.
//!
//! Each connection carries a generation number. Only the task set belonging to
//! the current generation may tear it down, so `Disconnected` is emitted
//! exactly once per connection no matter how many paths race to close it.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::event::{Event, SessionState};
use crate::client::logon::LogonHandler;
use crate::config::{ClientConfig, CmConfig};
use crate::core::codec::CipherSlot;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{
    expand_multi, Action, Dispatcher, HandlerContext, PacketHandler, SessionIdentity,
};
use crate::protocol::emsg::EMsg;
use crate::protocol::handshake::{Handshake, RealmKeys};
use crate::protocol::header::SteamId;
use crate::protocol::job::{JobId, JobIdGenerator};
use crate::protocol::message::OutgoingMessage;
use crate::protocol::proto::{CMsgClientCmList, CMsgClientHeartBeat};
use crate::transport::connection::{Connection, FrameReader, FrameWriter};
use crate::transport::directory::{endpoints_from_cm_list, Directory, Endpoint};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::DEFAULT_HEARTBEAT_INTERVAL;

/// Frames the read task hands to the write task before encryption is active.
enum Control {
    Frame(Bytes),
    Activate,
}

struct ActiveConnection {
    generation: u64,
    outgoing: mpsc::Sender<OutgoingMessage>,
    cancel: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

/// Per-connection state owned by the read task.
struct ReadState {
    generation: u64,
    handshake: Handshake,
    cipher: CipherSlot,
    control: mpsc::Sender<Control>,
    outgoing: mpsc::Sender<OutgoingMessage>,
}

struct Inner {
    config: ClientConfig,
    directory: Arc<Directory>,
    realm_keys: RealmKeys,
    dispatcher: Dispatcher,
    jobs: JobIdGenerator,
    metrics: Metrics,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    current: RwLock<Option<ActiveConnection>>,
    generation: AtomicU64,
    session_id: AtomicI32,
    steam_id: AtomicU64,
    state: AtomicU8,
}

/// Client session against a connection manager. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("steam_id", &self.steam_id())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session with the built-in realm keys and a fresh directory.
    ///
    /// # Errors
    /// `ConfigError` if the configuration does not validate.
    pub fn new(config: CmConfig) -> Result<Self> {
        config.validate_strict()?;
        let directory = Arc::new(Directory::new(config.directory.clone())?);
        Self::with_parts(config.client, directory, RealmKeys::default())
    }

    /// Build a session around an existing directory and key set.
    pub fn with_parts(config: ClientConfig, directory: Arc<Directory>, realm_keys: RealmKeys) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(LogonHandler))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                directory,
                realm_keys,
                dispatcher,
                jobs: JobIdGenerator::new(),
                metrics: Metrics::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                current: RwLock::new(None),
                generation: AtomicU64::new(0),
                session_id: AtomicI32::new(0),
                steam_id: AtomicU64::new(0),
                state: AtomicU8::new(SessionState::Idle.as_u8()),
            }),
        })
    }

    /// Take the event stream. Returns `None` after the first call.
    pub fn events(&self) -> Option<ReceiverStream<Event>> {
        self.inner
            .events_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .map(ReceiverStream::new)
    }

    /// Add a handler after the built-in ones. Every packet reaches every handler.
    pub fn register_handler(&self, handler: Arc<dyn PacketHandler>) -> Result<()> {
        self.inner.dispatcher.register(handler)
    }

    /// Connect to `endpoint`, or to a directory pick when `None`.
    ///
    /// Tears down any previous connection first. When the directory has not
    /// been initialized and `fetch_on_connect` is set, a fetch is attempted;
    /// its failure only logs a warning and selection uses the fallback list.
    /// Returns once TCP is up; `Event::Connected` follows the handshake.
    #[instrument(skip(self))]
    pub async fn connect(&self, endpoint: Option<Endpoint>) -> Result<Endpoint> {
        self.disconnect().await;
        self.inner.set_state(SessionState::Connecting);

        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None => {
                let directory = &self.inner.directory;
                if directory.config().fetch_on_connect && !directory.is_initialized() {
                    if let Err(e) = directory.initialize().await {
                        warn!(error = %e, "Directory fetch failed, using fallback servers");
                    }
                }
                directory.get_random().await?
            }
        };

        let connection: Connection<TcpStream> = match Connection::connect(
            &endpoint,
            self.inner.config.connection_timeout,
            self.inner.config.max_payload_size,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                self.inner.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.inner.start(connection).await;
        Ok(endpoint)
    }

    /// Run the session over an already-open byte stream.
    pub async fn connect_stream<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.disconnect().await;
        let connection = Connection::new(stream, self.inner.config.max_payload_size);
        self.inner.start(connection).await;
    }

    /// Close the current connection. Emits `Disconnected` once; further calls
    /// do nothing.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.inner.take_current(None).await {
            self.inner.teardown(conn).await;
        }
    }

    /// Queue `msg`, stamping the current session identity. Waits while the
    /// queue is full.
    ///
    /// # Errors
    /// `NotConnected` if there is no live connection.
    pub async fn write(&self, mut msg: OutgoingMessage) -> Result<()> {
        let sender = self
            .inner
            .current
            .read()
            .await
            .as_ref()
            .map(|c| c.outgoing.clone())
            .ok_or(ProtocolError::NotConnected)?;
        self.inner.stamp(&mut msg);
        sender.send(msg).await.map_err(|_| ProtocolError::NotConnected)
    }

    /// Queue `msg` without waiting.
    ///
    /// # Errors
    /// - `QueueFull` if the outgoing queue has no room, or a connect or
    ///   disconnect holds the connection slot at this instant
    /// - `NotConnected` if there is no live connection
    pub fn try_write(&self, mut msg: OutgoingMessage) -> Result<()> {
        let guard = self
            .inner
            .current
            .try_read()
            .map_err(|_| ProtocolError::QueueFull)?;
        let conn = guard.as_ref().ok_or(ProtocolError::NotConnected)?;
        self.inner.stamp(&mut msg);
        conn.outgoing.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::NotConnected,
        })
    }

    pub fn next_job_id(&self) -> JobId {
        self.inner.jobs.next_job_id()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// True once channel encryption is active on the current connection.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), SessionState::LoggedOff | SessionState::LoggedOn)
    }

    pub fn steam_id(&self) -> SteamId {
        SteamId(self.inner.steam_id.load(Ordering::Acquire))
    }

    /// Set the account id stamped on outgoing messages, for the logon request.
    pub fn set_steam_id(&self, steam_id: SteamId) {
        self.inner.steam_id.store(steam_id.0, Ordering::Release);
    }

    pub fn session_id(&self) -> i32 {
        self.inner.session_id.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.inner.directory
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            session_id: self.session_id.load(Ordering::Acquire),
            steam_id: SteamId(self.steam_id.load(Ordering::Acquire)),
        }
    }

    fn stamp(&self, msg: &mut OutgoingMessage) {
        let identity = self.identity();
        msg.set_identity(identity.session_id, identity.steam_id);
    }

    async fn emit(&self, event: Event) {
        if self.events_tx.send(event).await.is_err() {
            debug!("Event stream dropped");
        }
    }

    async fn start<S>(self: &Arc<Self>, connection: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer, cipher) = connection.into_split();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(self.config.write_queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(4);

        self.session_id.store(0, Ordering::Release);
        *self.current.write().await = Some(ActiveConnection {
            generation,
            outgoing: outgoing_tx.clone(),
            cancel: cancel.clone(),
            heartbeat: None,
        });
        self.set_state(SessionState::Handshaking);
        self.metrics.connection_opened();
        debug!(generation, "Connection tasks starting");

        let state = ReadState {
            generation,
            handshake: Handshake::new(self.config.universe),
            cipher,
            control: control_tx,
            outgoing: outgoing_tx,
        };
        tokio::spawn(Arc::clone(self).read_loop(state, reader, cancel.clone()));
        tokio::spawn(Arc::clone(self).write_loop(generation, writer, control_rx, outgoing_rx, cancel));
    }

    /// Detach the current connection if it belongs to `generation` (or any,
    /// when `None`).
    async fn take_current(&self, generation: Option<u64>) -> Option<ActiveConnection> {
        let mut current = self.current.write().await;
        match (current.as_ref(), generation) {
            (Some(conn), Some(generation)) if conn.generation != generation => None,
            _ => current.take(),
        }
    }

    async fn teardown(&self, conn: ActiveConnection) {
        conn.cancel.cancel();
        if let Some(heartbeat) = conn.heartbeat {
            heartbeat.abort();
        }
        self.set_state(SessionState::Disconnected);
        info!(generation = conn.generation, "Disconnected");
        self.metrics.log_metrics();
        self.emit(Event::Disconnected).await;
    }

    /// Fatal path for the connection of `generation`.
    async fn fail(&self, generation: u64, err: ProtocolError) {
        if err.is_clean_disconnect() {
            info!(error = %err, "Connection closed by peer");
        } else {
            error!(error = %err, "Connection failed");
        }

        if let Some(conn) = self.take_current(Some(generation)).await {
            self.metrics.fatal_error();
            self.emit(Event::FatalError(err)).await;
            self.teardown(conn).await;
        }
    }

    async fn read_loop<S>(self: Arc<Self>, mut state: ReadState, mut reader: FrameReader<S>, cancel: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                frame = reader.next() => frame,
            };

            let result = match frame {
                None => Err(ProtocolError::ConnectionClosed),
                Some(Err(e)) => Err(e),
                Some(Ok(payload)) => {
                    self.metrics.frame_received(payload.len());
                    match Packet::from_bytes(payload) {
                        Ok(packet) => self.process_packet(&mut state, packet).await,
                        Err(e) => Err(e),
                    }
                }
            };

            if let Err(e) = result {
                self.fail(state.generation, e).await;
                return;
            }
        }
    }

    fn process_packet<'a>(self: &'a Arc<Self>, state: &'a mut ReadState, packet: Packet) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match packet.emsg() {
                EMsg::CHANNEL_ENCRYPT_REQUEST => {
                    self.metrics.handshake_attempt();
                    let response = state.handshake.handle_encrypt_request(&packet, &self.realm_keys)?;
                    state
                        .control
                        .send(Control::Frame(response.serialize()?))
                        .await
                        .map_err(|_| ProtocolError::ConnectionClosed)?;
                }
                EMsg::CHANNEL_ENCRYPT_RESULT => match state.handshake.handle_encrypt_result(&packet) {
                    Ok(key) => {
                        state.cipher.install(Some(key.as_slice()))?;
                        state
                            .control
                            .send(Control::Activate)
                            .await
                            .map_err(|_| ProtocolError::ConnectionClosed)?;
                        self.metrics.handshake_success();
                        self.set_state(SessionState::LoggedOff);
                        info!("Channel encrypted");
                        self.emit(Event::Connected).await;
                    }
                    Err(e) => {
                        if e.is_handshake_rejection() {
                            self.metrics.handshake_rejected();
                        }
                        return Err(e);
                    }
                },
                EMsg::MULTI => match expand_multi(&packet, self.config.max_payload_size) {
                    Ok(expansion) => {
                        self.metrics.multi_expanded();
                        for record in expansion.records {
                            match record {
                                Ok(child) => self.process_packet(state, child).await?,
                                Err(e) => self.emit(Event::Error(e)).await,
                            }
                        }
                    }
                    // only a bad gzip body is survivable; framing errors are fatal
                    Err(ProtocolError::DecompressionFailure) => {
                        self.metrics.decompression_failure();
                        warn!("Dropping Multi container that failed to decompress");
                        self.emit(Event::Error(ProtocolError::DecompressionFailure)).await;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
                EMsg::CLIENT_CM_LIST => match packet.read_proto::<CMsgClientCmList>() {
                    Ok(list) => {
                        let endpoints = endpoints_from_cm_list(&list);
                        self.directory.replace(endpoints.clone()).await;
                        self.emit(Event::CmList(endpoints)).await;
                    }
                    Err(e) => self.emit(Event::Error(e)).await,
                },
                _ => {}
            }

            let actions = {
                let mut ctx = HandlerContext::new(&self.jobs, self.identity());
                let failures = self.dispatcher.broadcast(&mut ctx, &packet)?;
                self.metrics.handler_failures(failures);
                ctx.into_actions()
            };
            self.apply(state, actions).await
        })
    }

    async fn apply(self: &Arc<Self>, state: &ReadState, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            match action {
                Action::Emit(event) => self.emit(event).await,
                Action::Write(mut msg) => {
                    self.stamp(&mut msg);
                    state
                        .outgoing
                        .send(msg)
                        .await
                        .map_err(|_| ProtocolError::ConnectionClosed)?;
                }
                Action::SetIdentity(identity) => {
                    self.session_id.store(identity.session_id, Ordering::Release);
                    self.steam_id.store(identity.steam_id.0, Ordering::Release);
                }
                Action::SetLoggedOn(true) => self.set_state(SessionState::LoggedOn),
                Action::SetLoggedOn(false) => self.set_state(SessionState::LoggedOff),
                Action::StartHeartbeat(interval) => self.start_heartbeat(state.generation, interval).await,
                Action::Disconnect => {
                    if let Some(conn) = self.take_current(Some(state.generation)).await {
                        self.teardown(conn).await;
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn start_heartbeat(self: &Arc<Self>, generation: u64, interval: Duration) {
        let interval = if interval.is_zero() {
            DEFAULT_HEARTBEAT_INTERVAL
        } else {
            interval
        };

        let mut current = self.current.write().await;
        let Some(conn) = current.as_mut().filter(|c| c.generation == generation) else {
            return;
        };
        if let Some(previous) = conn.heartbeat.take() {
            previous.abort();
        }

        let inner = Arc::clone(self);
        let outgoing = conn.outgoing.clone();
        let cancel = conn.cancel.clone();
        debug!(interval_ms = interval.as_millis() as u64, "Heartbeat started");
        conn.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut msg = OutgoingMessage::protobuf(EMsg::CLIENT_HEART_BEAT, &CMsgClientHeartBeat {});
                        inner.stamp(&mut msg);
                        if outgoing.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    async fn write_loop<S>(
        self: Arc<Self>,
        generation: u64,
        mut writer: FrameWriter<S>,
        mut control: mpsc::Receiver<Control>,
        mut outgoing: mpsc::Receiver<OutgoingMessage>,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let result = self
            .drive_writer(&mut writer, &mut control, &mut outgoing, &cancel)
            .await;
        if let Err(e) = writer.close().await {
            debug!(error = %e, "Writer close failed");
        }
        if let Err(e) = result {
            self.fail(generation, e).await;
        }
    }

    async fn drive_writer<S>(
        &self,
        writer: &mut FrameWriter<S>,
        control: &mut mpsc::Receiver<Control>,
        outgoing: &mut mpsc::Receiver<OutgoingMessage>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        // handshake phase: application messages stay queued
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                msg = control.recv() => match msg {
                    Some(Control::Frame(frame)) => self.send_frame(writer, frame).await?,
                    Some(Control::Activate) => break,
                    None => return Ok(()),
                },
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                msg = outgoing.recv() => match msg {
                    Some(msg) => {
                        let frame = msg.serialize()?;
                        self.send_frame(writer, frame).await?;
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn send_frame<S>(&self, writer: &mut FrameWriter<S>, frame: Bytes) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let len = frame.len();
        writer.send(frame).await?;
        self.metrics.frame_sent(len);
        Ok(())
    }
}
