//! L2CAP transport seam.
//!
//! The client does not own platform socket code. It consumes any reliable,
//! ordered pipe that carries the ATT fixed channel, one PDU per datagram,
//! which is how `SOCK_SEQPACKET` L2CAP sockets behave on Linux.

use std::future::Future;

use bytes::Bytes;

/// Reliable, ordered, bidirectional pipe carrying the ATT fixed channel
/// (CID 0x0004).
///
/// Methods take `&self`; implementations provide their own interior
/// synchronization. `send` must hand the whole PDU to the link as one unit
/// and may be called concurrently from multiple tasks.
pub trait Socket: Send + Sync + 'static {
    /// Receives the next inbound ATT PDU. An empty buffer signals an orderly
    /// shutdown by the peer. This method is only called from one task at a
    /// time.
    fn recv(&self) -> impl Future<Output = std::io::Result<Bytes>> + Send;

    /// Sends one outbound ATT PDU.
    fn send(&self, pdu: Bytes) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Returns the largest ATT PDU the link can carry, which caps the
    /// client's preferred MTU during MTU exchange.
    fn local_mtu(&self) -> u16;
}
