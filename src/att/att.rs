//! Attribute Protocol client ([Vol 3] Part F).

use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use structbuf::Unpacker;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace, warn};

pub use {consts::*, handle::*, pdu::*};

use crate::name_of;
use crate::sock::Socket;

mod consts;
mod handle;
mod pdu;

/// Transaction timeout ([Vol 3] Part F, Section 3.3.3). Expiry declares the
/// link failed.
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type returned by the ATT layer.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The server replied with a well-formed `ATT_ERROR_RSP`.
    #[error(transparent)]
    Att(#[from] ErrorRsp),
    /// The server sent a PDU that was malformed or violated a protocol
    /// invariant (mismatched request opcode, non-monotonic handles, bad
    /// queued-write echo).
    #[error("invalid server response to {0}")]
    InvalidResponse(Opcode),
    #[error("timeout while waiting for {0}")]
    Timeout(Opcode),
    #[error("transport failure: {0}")]
    Transport(Arc<std::io::Error>),
    #[error("connection closed")]
    Closed,
}

/// Common ATT result type.
pub type Result<T> = std::result::Result<T, Error>;

/// `ATT_ERROR_RSP` PDU ([Vol 3] Part F, Section 3.4.1.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub struct ErrorRsp {
    req: u8,
    hdl: Option<Handle>,
    err: ErrorCode,
}

impl ErrorRsp {
    /// Creates a new error response.
    #[inline(always)]
    #[must_use]
    pub(crate) const fn new(req: u8, hdl: Option<Handle>, err: ErrorCode) -> Self {
        Self { req, hdl, err }
    }

    /// Returns the error code.
    #[inline(always)]
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.err
    }

    /// Returns the handle in error, if any.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Option<Handle> {
        self.hdl
    }

    /// Returns the raw opcode of the request that failed.
    #[inline(always)]
    #[must_use]
    pub(crate) const fn req(&self) -> u8 {
        self.req
    }

    /// Decodes a full `ATT_ERROR_RSP` PDU, opcode included. An unknown error
    /// code maps to [`ErrorCode::UnlikelyError`].
    pub(crate) fn decode(b: &[u8]) -> Option<Self> {
        if b.len() != 5 {
            return None;
        }
        let mut p = Unpacker::new(b);
        (p.u8() == u8::from(Opcode::ErrorRsp)).then(|| Self {
            req: p.u8(),
            hdl: Handle::new(p.u16()),
            err: ErrorCode::try_from(p.u8()).unwrap_or(ErrorCode::UnlikelyError),
        })
    }
}

impl Display for ErrorRsp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use num_enum::TryFromPrimitive;
        f.write_str("ATT ")?;
        match Opcode::try_from_primitive(self.req) {
            Ok(op) => write!(f, "{op} "),
            Err(_) => write!(f, "request {:#04X} ", self.req),
        }?;
        if let Some(hdl) = self.hdl {
            write!(f, "for handle {:#06X} ", u16::from(hdl))?;
        }
        write!(f, "failed with {}", self.err)
    }
}

/// Sink for server-initiated value pushes, called with the attribute handle
/// and the pushed value.
pub(crate) type ServerSink = Arc<dyn Fn(Handle, &[u8]) + Send + Sync>;

/// Client side of an ATT bearer ([Vol 3] Part F, Section 3.2.11): serializes
/// requests through the single in-flight slot, pairs them with responses,
/// negotiates the MTU, and routes notifications and indications.
pub struct Bearer<T: Socket> {
    sock: T,
    mtu: AtomicU16,
    mtu_exchanged: AtomicBool,
    /// Fair queue of request submitters. Holding the lock is what it means
    /// to own the request slot, so a multi-round procedure keeps it across
    /// rounds and no other submitter can interleave.
    serial: tokio::sync::Mutex<()>,
    slot: parking_lot::Mutex<Slot>,
    drained: Notify,
    sinks: parking_lot::Mutex<Sinks>,
}

/// In-flight request state. `pending` never holds more than one entry.
#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    fatal: Option<Error>,
}

struct Pending {
    req: Opcode,
    rsp: Opcode,
    tx: oneshot::Sender<Result<Bytes>>,
}

#[derive(Default)]
struct Sinks {
    ntf: Option<ServerSink>,
    ind: Option<ServerSink>,
}

impl<T: Socket> Bearer<T> {
    /// Creates a bearer over the ATT fixed channel socket. The caller must
    /// run [`Self::recv_loop`] for responses and server pushes to flow.
    #[must_use]
    pub fn new(sock: T) -> Arc<Self> {
        Arc::new(Self {
            sock,
            mtu: AtomicU16::new(DEFAULT_MTU),
            mtu_exchanged: AtomicBool::new(false),
            serial: tokio::sync::Mutex::new(()),
            slot: parking_lot::Mutex::new(Slot::default()),
            drained: Notify::new(),
            sinks: parking_lot::Mutex::new(Sinks::default()),
        })
    }

    /// Returns the current MTU.
    #[inline]
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    /// Returns the largest PDU the underlying link can carry.
    #[inline]
    #[must_use]
    pub fn local_mtu(&self) -> u16 {
        self.sock.local_mtu()
    }

    /// Registers the sinks that receive notifications and indications.
    pub(crate) fn register_sinks(&self, ntf: ServerSink, ind: ServerSink) {
        let mut sinks = self.sinks.lock();
        sinks.ntf = Some(ntf);
        sinks.ind = Some(ind);
    }

    /// Acquires the request slot. Submitters are served in FIFO order; the
    /// returned transaction owns the slot until dropped.
    pub async fn transaction(&self) -> Result<Transaction<'_, T>> {
        let serial = self.serial.lock().await;
        // An abandoned submitter may have left a response in flight; the
        // peer will still send it, so wait for recv_loop to drain the slot.
        // The transaction timer applies to the stale request as well.
        let drain = async {
            loop {
                let drained = self.drained.notified();
                tokio::pin!(drained);
                drained.as_mut().enable();
                {
                    let slot = self.slot.lock();
                    if let Some(e) = &slot.fatal {
                        return Err(e.clone());
                    }
                    if slot.pending.is_none() {
                        return Ok(());
                    }
                }
                drained.await;
            }
        };
        match tokio::time::timeout(TRANSACTION_TIMEOUT, drain).await {
            Ok(r) => r?,
            Err(_) => {
                let op = (self.slot.lock().pending.as_ref()).map_or(Opcode::ErrorRsp, |p| p.req);
                let e = Error::Timeout(op);
                self.fail(e.clone());
                return Err(e);
            }
        }
        Ok(Transaction { br: self, _serial: serial })
    }

    /// Performs a single request round. Use [`Self::transaction`] when a
    /// procedure spans multiple rounds.
    pub async fn request(&self, req: Req<'_>) -> Result<Rsp> {
        self.transaction().await?.request(req).await
    }

    /// Sends a command or confirmation. Commands bypass the request slot and
    /// never occupy it.
    pub async fn command(&self, cmd: Req<'_>) -> Result<()> {
        let op = cmd.opcode();
        debug_assert!(matches!(op.typ(), PduType::Cmd | PduType::Cfm));
        if let Some(e) = self.fatal() {
            return Err(e);
        }
        let pdu = cmd.encode();
        debug_assert!(pdu.len() <= usize::from(self.mtu()));
        trace!("{op}: {:02X?}", pdu.as_ref());
        self.send_pdu(pdu).await
    }

    /// Performs MTU exchange ([Vol 3] Part F, Section 3.2.8 and 3.4.2.1).
    /// The exchange is a one-shot: once attempted, later calls return
    /// without touching the wire.
    pub async fn exchange_mtu(&self, preferred: u16) -> Result<()> {
        let preferred = preferred.clamp(DEFAULT_MTU, self.local_mtu().max(DEFAULT_MTU));
        if self.mtu_exchanged.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let rsp = self.request(Req::ExchangeMtu { mtu: preferred }).await?;
        let Rsp::ExchangeMtu { mtu: remote } = rsp else {
            return Err(Error::InvalidResponse(Opcode::ExchangeMtuRsp));
        };
        let mtu = preferred.min(remote).max(DEFAULT_MTU);
        debug!("Remote preferred MTU {remote}, using {mtu}");
        self.mtu.store(mtu, Ordering::Release);
        Ok(())
    }

    /// Receives and dispatches inbound PDUs until the link fails or the peer
    /// closes it. The owning client drives this from a dedicated task.
    pub async fn recv_loop(&self) {
        loop {
            let pdu = match self.sock.recv().await {
                Ok(b) if b.is_empty() => return self.fail(Error::Closed),
                Ok(b) => b,
                Err(e) => return self.fail(Error::Transport(Arc::new(e))),
            };
            self.dispatch(pdu).await;
            if self.fatal().is_some() {
                return;
            }
        }
    }

    /// Marks the link failed and drains the request slot. The first fatal
    /// error sticks.
    pub(crate) fn fail(&self, e: Error) {
        let pending = {
            let mut slot = self.slot.lock();
            if slot.fatal.is_none() {
                slot.fatal = Some(e.clone());
            }
            slot.pending.take()
        };
        if let Some(p) = pending {
            let _ = p.tx.send(Err(e));
        }
        self.drained.notify_waiters();
    }

    fn fatal(&self) -> Option<Error> {
        self.slot.lock().fatal.clone()
    }

    async fn send_pdu(&self, pdu: Bytes) -> Result<()> {
        if let Err(e) = self.sock.send(pdu).await {
            let e = Error::Transport(Arc::new(e));
            self.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }

    async fn dispatch(&self, pdu: Bytes) {
        // recv_loop maps an empty read to Closed, so the opcode is present
        let Some(&op) = pdu.first() else { return };
        let Ok(op) = Opcode::try_from(op) else {
            warn!("Ignoring unknown opcode {op:#04X}");
            return;
        };
        trace!("{op}: {:02X?}", pdu.as_ref());
        match op.typ() {
            PduType::Rsp => self.complete(op, pdu),
            PduType::Ntf => self.push_value(op, &pdu, false).await,
            PduType::Ind => self.push_value(op, &pdu, true).await,
            PduType::Cmd | PduType::Req | PduType::Cfm => {
                warn!("Ignoring client-originated {op} from server");
            }
        }
    }

    /// Completes the pending request with a response or error-response PDU.
    /// Anything that does not match the pending entry is a protocol
    /// violation that fails the link.
    fn complete(&self, op: Opcode, pdu: Bytes) {
        let err = if op == Opcode::ErrorRsp {
            match ErrorRsp::decode(&pdu) {
                Some(e) => Some(e),
                None => {
                    warn!("Malformed {op}");
                    return self.fail(Error::InvalidResponse(op));
                }
            }
        } else {
            None
        };
        let pending = {
            let mut slot = self.slot.lock();
            let matched = slot.pending.as_ref().is_some_and(|p| match err {
                Some(e) => e.req() == u8::from(p.req),
                None => op == p.rsp,
            });
            if matched {
                slot.pending.take()
            } else {
                None
            }
        };
        let Some(p) = pending else {
            warn!("Unsolicited or mismatched {op}");
            return self.fail(Error::InvalidResponse(op));
        };
        let r = match err {
            Some(e) => Err(Error::Att(e)),
            None => Ok(pdu),
        };
        let _ = p.tx.send(r);
        self.drained.notify_waiters();
    }

    /// Routes a notification or indication to the registered sink. An
    /// indication is confirmed on the wire first, whether or not a sink is
    /// registered.
    async fn push_value(&self, op: Opcode, pdu: &Bytes, confirm: bool) {
        let hdl = (pdu.get(1..3)).map(|v| u16::from_le_bytes([v[0], v[1]]));
        let Some(hdl) = hdl.and_then(Handle::new) else {
            warn!("Malformed {op}");
            return;
        };
        if confirm && self.command(Req::Cfm).await.is_err() {
            return;
        }
        let sink = {
            let sinks = self.sinks.lock();
            if confirm { sinks.ind.clone() } else { sinks.ntf.clone() }
        };
        match sink {
            Some(sink) => sink(hdl, &pdu[3..]),
            None => trace!("No sink for {op} on {hdl}"),
        }
    }
}

impl<T: Socket> Debug for Bearer<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_struct(name_of!(Bearer<T>)))
            .field("mtu", &self.mtu())
            .finish_non_exhaustive()
    }
}

/// Exclusive ownership of the request slot for one or more rounds.
#[must_use]
pub struct Transaction<'a, T: Socket> {
    br: &'a Bearer<T>,
    _serial: tokio::sync::MutexGuard<'a, ()>,
}

impl<T: Socket> Transaction<'_, T> {
    /// Returns the MTU at this moment. Multi-round procedures sample this
    /// before each round rather than caching it, since an MTU exchange may
    /// complete mid-procedure.
    #[inline]
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.br.mtu()
    }

    /// Sends a request and awaits the matching response.
    ///
    /// If the caller is cancelled while waiting, the slot stays occupied
    /// until the peer's response arrives and is drained by `recv_loop`;
    /// cancellation detaches the caller, not the protocol state machine.
    pub async fn request(&mut self, req: Req<'_>) -> Result<Rsp> {
        let op = req.opcode();
        let rsp = op.rsp().expect("not a request opcode");
        let pdu = req.encode();
        debug_assert!(pdu.len() <= usize::from(self.br.mtu()));
        // Install the completion sink before the bytes reach the wire so an
        // immediate response cannot race it.
        let rx = {
            let mut slot = self.br.slot.lock();
            if let Some(e) = &slot.fatal {
                return Err(e.clone());
            }
            debug_assert!(slot.pending.is_none());
            let (tx, rx) = oneshot::channel();
            slot.pending = Some(Pending { req: op, rsp, tx });
            rx
        };
        trace!("{op}: {:02X?}", pdu.as_ref());
        self.br.send_pdu(pdu).await?;
        let b = match tokio::time::timeout(TRANSACTION_TIMEOUT, rx).await {
            Ok(Ok(r)) => r?,
            Ok(Err(_)) => return Err(self.br.fatal().unwrap_or(Error::Closed)),
            Err(_) => {
                let e = Error::Timeout(op);
                self.br.fail(e.clone());
                return Err(e);
            }
        };
        Rsp::decode(&b).ok_or_else(|| {
            let e = Error::InvalidResponse(rsp);
            self.br.fail(e.clone());
            e
        })
    }
}
