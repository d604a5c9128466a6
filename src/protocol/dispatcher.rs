use crate::client::event::Event;
use crate::core::binary::BinaryReader;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::emsg::EMsg;
use crate::protocol::header::SteamId;
use crate::protocol::job::{JobId, JobIdGenerator};
use crate::protocol::message::OutgoingMessage;
use crate::protocol::proto::CMsgMulti;
use crate::utils::compression;
use bytes::Bytes;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// A consumer of decoded packets.
///
/// Every registered handler sees every packet, in registration order.
/// Handlers that do not recognise a message type should return `Ok(())`.
pub trait PacketHandler: Send + Sync {
    fn handle_packet(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<()>;
}

impl<F> PacketHandler for F
where
    F: Fn(&mut HandlerContext<'_>, &Packet) -> Result<()> + Send + Sync,
{
    fn handle_packet(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<()> {
        self(ctx, packet)
    }
}

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn PacketHandler>
where
    F: Fn(&mut HandlerContext<'_>, &Packet) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of the logged-on account, as seen by handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: i32,
    pub steam_id: SteamId,
}

/// Side effects requested by a handler, applied after it returns.
#[derive(Debug)]
pub enum Action {
    Emit(Event),
    Write(OutgoingMessage),
    SetIdentity(SessionIdentity),
    /// Move the session between logged on and logged off.
    SetLoggedOn(bool),
    StartHeartbeat(Duration),
    Disconnect,
}

/// Per-packet view of the session handed to each handler.
pub struct HandlerContext<'a> {
    jobs: &'a JobIdGenerator,
    identity: SessionIdentity,
    actions: Vec<Action>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(jobs: &'a JobIdGenerator, identity: SessionIdentity) -> Self {
        Self {
            jobs,
            identity,
            actions: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.actions.push(Action::Emit(event));
    }

    /// Queue an outgoing message. Identity is stamped when it is applied.
    pub fn write(&mut self, msg: OutgoingMessage) {
        self.actions.push(Action::Write(msg));
    }

    pub fn next_job_id(&self) -> JobId {
        self.jobs.next_job_id()
    }

    pub fn identity(&self) -> SessionIdentity {
        self.identity
    }

    /// Record a new identity. Later handlers for the same packet see it.
    pub fn set_identity(&mut self, identity: SessionIdentity) {
        self.identity = identity;
        self.actions.push(Action::SetIdentity(identity));
    }

    /// Reserved for the built-in logon handler so user events never move
    /// session state.
    pub(crate) fn set_logged_on(&mut self, logged_on: bool) {
        self.actions.push(Action::SetLoggedOn(logged_on));
    }

    pub fn start_heartbeat(&mut self, interval: Duration) {
        self.actions.push(Action::StartHeartbeat(interval));
    }

    pub fn disconnect(&mut self) {
        self.actions.push(Action::Disconnect);
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

/// Broadcast dispatcher over an ordered handler list.
pub struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn PacketHandler>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_WRITE_LOCK))?;
        handlers.push(handler);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `packet` to every handler. Returns how many handlers failed.
    ///
    /// A failing handler's buffered actions are discarded and replaced by a
    /// single `Event::Error`; the remaining handlers still run.
    pub fn broadcast(&self, ctx: &mut HandlerContext<'_>, packet: &Packet) -> Result<usize> {
        // snapshot so handlers never run under the lock
        let handlers: Vec<Arc<dyn PacketHandler>> = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_READ_LOCK))?
            .clone();

        let mut failures = 0;
        for (index, handler) in handlers.iter().enumerate() {
            let mark = ctx.actions.len();
            let identity = ctx.identity;
            if let Err(e) = handler.handle_packet(ctx, packet) {
                warn!(handler = index, emsg = %packet.emsg(), error = %e, "Handler failed");
                ctx.actions.truncate(mark);
                ctx.identity = identity;
                ctx.emit(Event::Error(e));
                failures += 1;
            }
        }
        Ok(failures)
    }
}

/// Children of a Multi container, in record order.
///
/// A record that frames correctly but fails to decode stays in place as an
/// `Err` so callers can report it between its neighbours.
#[derive(Debug, Default)]
pub struct MultiExpansion {
    pub records: Vec<Result<Packet>>,
}

impl MultiExpansion {
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.records.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ProtocolError> {
        self.records.iter().filter_map(|r| r.as_ref().err())
    }
}

/// Unpack a Multi container into its child packets, in order.
///
/// # Errors
/// - `DecompressionFailure` if the gzip body is corrupt or exceeds `limit`
/// - `MalformedHeader` if a record length overruns the container
pub fn expand_multi(packet: &Packet, limit: usize) -> Result<MultiExpansion> {
    let multi: CMsgMulti = packet.read_proto()?;
    let size_unzipped = multi.size_unzipped();
    let body = multi.message_body.unwrap_or_default();

    let payload = match size_unzipped {
        0 => body,
        size => compression::decompress_limited(&body, size as usize, limit)?,
    };
    let payload = Bytes::from(payload);

    let mut expansion = MultiExpansion::default();
    let mut reader = BinaryReader::new(&payload);
    while reader.remaining() > 0 {
        let len = reader.read_u32()? as usize;
        let start = reader.position();
        if len > reader.remaining() {
            return Err(ProtocolError::MalformedHeader(
                constants::ERR_MULTI_RECORD_LENGTH.into(),
            ));
        }
        reader.read_slice(len)?;

        let record = Packet::from_bytes(payload.slice(start..start + len));
        if let Err(e) = &record {
            debug!(error = %e, "Undecodable Multi record");
        }
        expansion.records.push(record);
    }
    Ok(expansion)
}

/// Build a Multi container around already-serialized packets.
pub fn multi_message(children: &[Bytes], compress: bool) -> Result<OutgoingMessage> {
    let mut records = Vec::new();
    for child in children {
        let len = u32::try_from(child.len()).map_err(|_| ProtocolError::OversizedPacket(child.len()))?;
        records.extend_from_slice(&len.to_le_bytes());
        records.extend_from_slice(child);
    }

    let multi = if compress && !records.is_empty() {
        CMsgMulti {
            size_unzipped: Some(records.len() as u32),
            message_body: Some(compression::compress(&records)?),
        }
    } else {
        CMsgMulti {
            size_unzipped: Some(0),
            message_body: Some(records),
        }
    };
    Ok(OutgoingMessage::protobuf(EMsg::MULTI, &multi))
}
