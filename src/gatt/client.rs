use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::att::{Bearer, ErrorCode, Opcode, Req, Rsp};
use crate::name_of;
use crate::sock::Socket;

use super::io::SinkMap;
use super::*;

/// GATT client over a dedicated ATT bearer.
///
/// Operations may be submitted concurrently from multiple tasks; the bearer
/// serializes their requests in submission order, and a multi-round
/// procedure (discovery walk, long read, queued write) finishes before the
/// next submitter's first request goes out. Dropping the client tears the
/// connection down.
pub struct Client<T: Socket> {
    br: Arc<Bearer<T>>,
    sinks: Arc<SinkMap>,
    /// Queued-write exclusivity. `try_lock` failure means another long write
    /// owns the server's prepare queue.
    long_write: tokio::sync::Mutex<()>,
    rx: JoinHandle<()>,
}

impl<T: Socket> Client<T> {
    /// Creates a client over an ATT fixed channel socket and starts its
    /// receive task. When `preferred_mtu` exceeds the protocol default, a
    /// one-shot MTU exchange is scheduled; its failure does not prevent
    /// subsequent operations.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(sock: T, preferred_mtu: u16) -> Self {
        let br = Bearer::new(sock);
        let sinks = Arc::new(SinkMap::default());
        let (ntf, ind) = (Arc::clone(&sinks), Arc::clone(&sinks));
        br.register_sinks(
            Arc::new(move |hdl, v| ntf.notify(hdl, v)),
            Arc::new(move |hdl, v| ind.indicate(hdl, v)),
        );
        let rx = tokio::spawn({
            let br = Arc::clone(&br);
            async move { br.recv_loop().await }
        });
        if preferred_mtu > att::DEFAULT_MTU {
            tokio::spawn({
                let br = Arc::clone(&br);
                async move {
                    if let Err(e) = br.exchange_mtu(preferred_mtu).await {
                        debug!("MTU exchange failed: {e}");
                    }
                }
            });
        }
        Self {
            br,
            sinks,
            long_write: tokio::sync::Mutex::new(()),
            rx,
        }
    }

    /// Returns the current MTU: the protocol default until an MTU exchange
    /// completes.
    #[inline]
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.br.mtu()
    }

    /// Discovers all primary services.
    pub async fn discover_primary_services(&self) -> Result<Vec<Service>> {
        let mut txn = self.br.transaction().await?;
        let mut walk = Walk::new(HandleRange::ALL);
        let mut services = Vec::new();
        while let Some(range) = walk.range() {
            let req = Req::ReadByGroupType {
                range,
                typ: Decl::PrimaryService.uuid(),
            };
            let groups = match txn.request(req).await {
                Ok(Rsp::ReadByGroupType(v)) => v,
                Ok(rsp) => return Err(unexpected(&rsp)),
                Err(e) => {
                    walk.finish(e)?;
                    break;
                }
            };
            for &(first, end, uuid) in &groups {
                services.push(Service {
                    uuid,
                    primary: true,
                    handle: first,
                    end,
                });
            }
            walk.advance(Opcode::ReadByGroupTypeRsp, groups.last().map(|g| g.1))?;
        }
        Ok(services)
    }

    /// Discovers primary services with the specified UUID.
    pub async fn discover_primary_services_by_uuid(&self, uuid: Uuid) -> Result<Vec<Service>> {
        let (v16, v128);
        let value: &[u8] = match uuid.as_u16() {
            Some(v) => {
                v16 = v.to_le_bytes();
                &v16
            }
            None => {
                v128 = uuid.to_bytes();
                &v128
            }
        };
        let mut txn = self.br.transaction().await?;
        let mut walk = Walk::new(HandleRange::ALL);
        let mut services = Vec::new();
        while let Some(range) = walk.range() {
            let req = Req::FindByTypeValue {
                range,
                typ: Decl::PrimaryService.uuid16(),
                value,
            };
            let groups = match txn.request(req).await {
                Ok(Rsp::FindByTypeValue(v)) => v,
                Ok(rsp) => return Err(unexpected(&rsp)),
                Err(e) => {
                    walk.finish(e)?;
                    break;
                }
            };
            for &(found, end) in &groups {
                services.push(Service {
                    uuid,
                    primary: true,
                    handle: found,
                    end,
                });
            }
            walk.advance(Opcode::FindByTypeValueRsp, groups.last().map(|g| g.1))?;
        }
        Ok(services)
    }

    /// Discovers all characteristics of a service.
    pub async fn discover_characteristics(&self, service: &Service) -> Result<Vec<Characteristic>> {
        self.characteristic_walk(service, None).await
    }

    /// Discovers the characteristics of a service with the specified UUID.
    /// The walk stops at the first match.
    pub async fn discover_characteristics_by_uuid(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Vec<Characteristic>> {
        self.characteristic_walk(service, Some(uuid)).await
    }

    async fn characteristic_walk(
        &self,
        service: &Service,
        filter: Option<Uuid>,
    ) -> Result<Vec<Characteristic>> {
        let mut txn = self.br.transaction().await?;
        let mut walk = Walk::new(service.range());
        let mut chars = Vec::new();
        'walk: while let Some(range) = walk.range() {
            let req = Req::ReadByType {
                range,
                typ: Decl::Characteristic.uuid(),
            };
            let tuples = match txn.request(req).await {
                Ok(Rsp::ReadByType(v)) => v,
                Ok(rsp) => return Err(unexpected(&rsp)),
                Err(e) => {
                    walk.finish(e)?;
                    break;
                }
            };
            for (hdl, value) in &tuples {
                let Some(chr) = characteristic_declaration(*hdl, value) else {
                    return Err(att::Error::InvalidResponse(Opcode::ReadByTypeRsp).into());
                };
                if filter.map_or(true, |u| u == chr.uuid) {
                    chars.push(chr);
                    if filter.is_some() {
                        break 'walk;
                    }
                }
            }
            walk.advance(Opcode::ReadByTypeRsp, tuples.last().map(|t| t.0))?;
        }
        Ok(chars)
    }

    /// Discovers the descriptors of a characteristic. `characteristics` is
    /// the service's full characteristic list from discovery; it bounds the
    /// descriptor range at the following characteristic declaration, or at
    /// the service end when the characteristic is the last one.
    pub async fn discover_descriptors(
        &self,
        chr: &Characteristic,
        service: &Service,
        characteristics: &[Characteristic],
    ) -> Result<Vec<Descriptor>> {
        let Some(start) = chr.value_handle.next() else {
            return Ok(Vec::new());
        };
        let end = (characteristics.iter())
            .filter(|c| c.handle > chr.handle)
            .map(|c| c.handle)
            .min()
            .and_then(Handle::prev)
            .unwrap_or(service.end);
        if start > end {
            return Ok(Vec::new());
        }
        let mut txn = self.br.transaction().await?;
        let mut walk = Walk::new(HandleRange::new(start, end));
        let mut descriptors = Vec::new();
        while let Some(range) = walk.range() {
            let tuples = match txn.request(Req::FindInformation { range }).await {
                Ok(Rsp::FindInformation(v)) => v,
                Ok(rsp) => return Err(unexpected(&rsp)),
                Err(e) => {
                    walk.finish(e)?;
                    break;
                }
            };
            for &(handle, uuid) in &tuples {
                descriptors.push(Descriptor { uuid, handle });
            }
            walk.advance(Opcode::FindInformationRsp, tuples.last().map(|t| t.0))?;
        }
        Ok(descriptors)
    }

    /// Reads the full value of a characteristic, following up with blob
    /// reads when the value does not fit a single response.
    pub async fn read_characteristic(&self, chr: &Characteristic) -> Result<Bytes> {
        self.read_value(chr.value_handle).await
    }

    /// Reads the full value of a descriptor.
    pub async fn read_descriptor(&self, descriptor: &Descriptor) -> Result<Bytes> {
        self.read_value(descriptor.handle).await
    }

    /// Reads characteristic values by UUID within a handle range using a
    /// single request, keyed by value handle. Values that do not fit the
    /// response are truncated; follow up with [`Self::read_characteristic`]
    /// to fetch a specific value in full.
    pub async fn read_characteristics_by_uuid(
        &self,
        uuid: Uuid,
        range: HandleRange,
    ) -> Result<BTreeMap<Handle, Bytes>> {
        match self.br.request(Req::ReadByType { range, typ: uuid }).await? {
            Rsp::ReadByType(v) => Ok(v.into_iter().collect()),
            rsp => Err(unexpected(&rsp)),
        }
    }

    /// Reads two or more characteristic values with a single request,
    /// returning their concatenation. The response carries no value
    /// boundaries, so avoid this when any value may be `MTU - 1` bytes long;
    /// the boundary would be unrecoverable.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two characteristics are given.
    pub async fn read_characteristics(&self, chars: &[Characteristic]) -> Result<Bytes> {
        assert!(chars.len() >= 2, "read multiple requires at least two characteristics");
        let max = (usize::from(self.br.mtu()) - 1) / 2;
        if chars.len() > max {
            return Err(Error::ValueTooLong { len: chars.len(), max });
        }
        let handles = chars.iter().map(|c| c.value_handle).collect();
        match self.br.request(Req::ReadMultiple { handles }).await? {
            Rsp::ReadMultiple(v) => Ok(v),
            rsp => Err(unexpected(&rsp)),
        }
    }

    /// Writes a characteristic value and awaits the acknowledgement. A value
    /// that does not fit a single request goes through the queued-write
    /// procedure; `reliable` additionally verifies the server's echo of each
    /// queued part.
    pub async fn write_characteristic(
        &self,
        chr: &Characteristic,
        value: &[u8],
        reliable: bool,
    ) -> Result<()> {
        self.write_value(chr.value_handle, value, reliable).await
    }

    /// Writes a descriptor value and awaits the acknowledgement.
    pub async fn write_descriptor(
        &self,
        descriptor: &Descriptor,
        value: &[u8],
        reliable: bool,
    ) -> Result<()> {
        self.write_value(descriptor.handle, value, reliable).await
    }

    /// Writes a characteristic value without acknowledgement. The value must
    /// fit a single command PDU; it is never silently truncated.
    pub async fn write_characteristic_without_response(
        &self,
        chr: &Characteristic,
        value: &[u8],
    ) -> Result<()> {
        let max = usize::from(self.br.mtu()) - 3;
        if value.len() > max {
            return Err(Error::ValueTooLong { len: value.len(), max });
        }
        let cmd = Req::WriteCmd {
            handle: chr.value_handle,
            value,
        };
        Ok(self.br.command(cmd).await?)
    }

    /// Signed write commands need a CSRK shared during bonding, which this
    /// client does not manage, so the operation is refused rather than sent
    /// without its authentication signature.
    pub async fn write_characteristic_signed(
        &self,
        _chr: &Characteristic,
        _value: &[u8],
    ) -> Result<()> {
        Err(Error::SignedWriteNotSupported)
    }

    /// Enables or disables server-initiated value pushes for a
    /// characteristic by writing its Client Characteristic Configuration
    /// descriptor, then updating the sink registry. `descriptors` is the
    /// characteristic's descriptor list from discovery. Passing `None` for
    /// both sinks clears the configuration. The registry changes only after
    /// the server accepts the write.
    pub async fn configure_notifications(
        &self,
        chr: &Characteristic,
        descriptors: &[Descriptor],
        notify: Option<ValueSink>,
        indicate: Option<ValueSink>,
    ) -> Result<()> {
        // The CCCD bits may only be set if the declaration advertises the
        // matching property ([Vol 3] Part G, Section 3.3.3.3)
        if notify.is_some() && !chr.can_notify() {
            return Err(Error::NotConfigurable(*chr));
        }
        if indicate.is_some() && !chr.can_indicate() {
            return Err(Error::NotConfigurable(*chr));
        }
        let cccd = (descriptors.iter())
            .find(|d| d.uuid == Descr::ClientCharacteristicConfiguration)
            .ok_or(Error::NotConfigurable(*chr))?;
        let mut flags = Cccd::empty();
        if notify.is_some() {
            flags |= Cccd::NOTIFY;
        }
        if indicate.is_some() {
            flags |= Cccd::INDICATE;
        }
        self.write_value(cccd.handle, &flags.bits().to_le_bytes(), false).await?;
        self.sinks.configure(chr.value_handle, notify, indicate);
        Ok(())
    }

    async fn read_value(&self, hdl: Handle) -> Result<Bytes> {
        let mut txn = self.br.transaction().await?;
        let full = usize::from(txn.mtu()) - 1;
        let first = match txn.request(Req::Read { handle: hdl }).await? {
            Rsp::Read(v) => v,
            rsp => return Err(unexpected(&rsp)),
        };
        if first.len() < full {
            return Ok(first);
        }
        // A full response may mean a longer value. Read on until a short
        // response, or until the server reports the offset past the end,
        // which is how the end of an exactly-PDU-sized value is found.
        let mut buf = BytesMut::from(first.as_ref());
        loop {
            let full = usize::from(txn.mtu()) - 1;
            if buf.len() > usize::from(u16::MAX) {
                // Offsets are 16-bit; conforming values end long before this
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let req = Req::ReadBlob {
                handle: hdl,
                offset: buf.len() as u16,
            };
            match txn.request(req).await {
                Ok(Rsp::ReadBlob(part)) => {
                    buf.extend_from_slice(&part);
                    if part.len() < full {
                        break;
                    }
                }
                Ok(rsp) => return Err(unexpected(&rsp)),
                Err(att::Error::Att(e))
                    if e.code() == ErrorCode::InvalidOffset && !buf.is_empty() =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf.freeze())
    }

    async fn write_value(&self, hdl: Handle, value: &[u8], reliable: bool) -> Result<()> {
        if value.len() > usize::from(self.br.mtu()) - 3 {
            // The MTU can only grow from here, so the queued-write procedure
            // remains valid even if an exchange lands mid-decision
            return self.write_long(hdl, value, reliable).await;
        }
        let mut txn = self.br.transaction().await?;
        match txn.request(Req::Write { handle: hdl, value }).await? {
            Rsp::Write => Ok(()),
            rsp => Err(unexpected(&rsp)),
        }
    }

    async fn write_long(&self, hdl: Handle, value: &[u8], reliable: bool) -> Result<()> {
        if value.len() > att::MAX_VAL_LEN {
            return Err(Error::ValueTooLong {
                len: value.len(),
                max: att::MAX_VAL_LEN,
            });
        }
        let Ok(_queue) = self.long_write.try_lock() else {
            return Err(Error::InLongWrite);
        };
        let mut txn = self.br.transaction().await?;
        let mut off = 0;
        while off < value.len() {
            let part = &value[off..(off + usize::from(txn.mtu()) - 5).min(value.len())];
            #[allow(clippy::cast_possible_truncation)]
            let req = Req::PrepareWrite {
                handle: hdl,
                offset: off as u16,
                value: part,
            };
            match txn.request(req).await? {
                Rsp::PrepareWrite { handle, offset, value: echo } => {
                    if reliable
                        && (handle != hdl || usize::from(offset) != off || echo.as_ref() != part)
                    {
                        warn!("Queued write echo mismatch for {hdl}");
                        // Best effort: have the server discard the queue
                        let _ = txn.request(Req::ExecuteWrite { commit: false }).await;
                        return Err(att::Error::InvalidResponse(Opcode::PrepareWriteRsp).into());
                    }
                }
                rsp => return Err(unexpected(&rsp)),
            }
            off += part.len();
        }
        match txn.request(Req::ExecuteWrite { commit: true }).await? {
            Rsp::ExecuteWrite => Ok(()),
            rsp => Err(unexpected(&rsp)),
        }
    }
}

impl<T: Socket> Debug for Client<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_struct(name_of!(Client<T>)))
            .field("bearer", &self.br)
            .finish_non_exhaustive()
    }
}

impl<T: Socket> Drop for Client<T> {
    fn drop(&mut self) {
        self.rx.abort();
        self.br.fail(att::Error::Closed);
    }
}

/// Paginated walk cursor over an attribute handle range
/// ([Vol 3] Part G, Section 4.4 through 4.7).
struct Walk {
    next: Option<Handle>,
    end: Handle,
}

impl Walk {
    fn new(range: HandleRange) -> Self {
        Self {
            next: Some(range.start()),
            end: range.end(),
        }
    }

    /// Returns the range for the next round, or `None` once the walk has
    /// covered the whole range.
    fn range(&self) -> Option<HandleRange> {
        self.next.map(|start| HandleRange::new(start, self.end))
    }

    /// Advances past the last handle covered by a response page. An empty
    /// page (`None`) ends the walk. A page that fails to advance the cursor
    /// would loop forever and is rejected.
    fn advance(&mut self, op: Opcode, last: Option<Handle>) -> Result<()> {
        let Some(cur) = self.next else {
            return Ok(());
        };
        match last {
            None => self.next = None,
            Some(last) if last < cur => {
                warn!("Non-monotonic {op} page");
                return Err(att::Error::InvalidResponse(op).into());
            }
            Some(last) => self.next = if last < self.end { last.next() } else { None },
        }
        Ok(())
    }

    /// Consumes a request error: attribute-not-found ends the walk
    /// successfully, anything else propagates.
    fn finish(&mut self, e: att::Error) -> Result<()> {
        match e {
            att::Error::Att(rsp) if rsp.code() == ErrorCode::AttributeNotFound => {
                self.next = None;
                Ok(())
            }
            e => Err(e.into()),
        }
    }
}

/// Parses a characteristic declaration value: properties, value handle, and
/// UUID ([Vol 3] Part G, Section 3.3.1).
fn characteristic_declaration(hdl: Handle, value: &[u8]) -> Option<Characteristic> {
    let (&props, rest) = value.split_first()?;
    let value_handle = Handle::new(u16::from_le_bytes([*rest.first()?, *rest.get(1)?]))?;
    let uuid = Uuid::from_le_bytes(rest.get(2..)?)?;
    Some(Characteristic {
        uuid,
        properties: CharProps::from_bits_truncate(props),
        handle: hdl,
        value_handle,
    })
}

/// A response whose opcode matched the request but whose variant cannot
/// occur for this procedure; kept for exhaustive matching.
#[cold]
fn unexpected(rsp: &Rsp) -> Error {
    att::Error::InvalidResponse(rsp.opcode()).into()
}
