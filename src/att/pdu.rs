use bytes::Bytes;
use structbuf::{Pack, StructBuf};

use crate::{Uuid, Uuid16};

use super::*;

/// Client-originated PDU: a request, a command, or the indication
/// confirmation ([Vol 3] Part F, Section 3.4).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Req<'a> {
    ExchangeMtu { mtu: u16 },
    FindInformation { range: HandleRange },
    FindByTypeValue { range: HandleRange, typ: Uuid16, value: &'a [u8] },
    ReadByType { range: HandleRange, typ: Uuid },
    Read { handle: Handle },
    ReadBlob { handle: Handle, offset: u16 },
    ReadMultiple { handles: Vec<Handle> },
    ReadByGroupType { range: HandleRange, typ: Uuid },
    Write { handle: Handle, value: &'a [u8] },
    WriteCmd { handle: Handle, value: &'a [u8] },
    PrepareWrite { handle: Handle, offset: u16, value: &'a [u8] },
    ExecuteWrite { commit: bool },
    Cfm,
}

impl Req<'_> {
    /// Returns the PDU opcode.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        use Opcode::*;
        match self {
            Self::ExchangeMtu { .. } => ExchangeMtuReq,
            Self::FindInformation { .. } => FindInformationReq,
            Self::FindByTypeValue { .. } => FindByTypeValueReq,
            Self::ReadByType { .. } => ReadByTypeReq,
            Self::Read { .. } => ReadReq,
            Self::ReadBlob { .. } => ReadBlobReq,
            Self::ReadMultiple { .. } => ReadMultipleReq,
            Self::ReadByGroupType { .. } => ReadByGroupTypeReq,
            Self::Write { .. } => WriteReq,
            Self::WriteCmd { .. } => WriteCmd,
            Self::PrepareWrite { .. } => PrepareWriteReq,
            Self::ExecuteWrite { .. } => ExecuteWriteReq,
            Self::Cfm => HandleValueCfm,
        }
    }

    /// Returns the encoded PDU length, including the opcode.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        1 + match self {
            Self::ExchangeMtu { .. } | Self::Read { .. } => 2,
            Self::FindInformation { .. } | Self::ReadBlob { .. } => 4,
            Self::FindByTypeValue { value, .. } => 6 + value.len(),
            Self::ReadByType { typ, .. } | Self::ReadByGroupType { typ, .. } => {
                4 + uuid_len(*typ)
            }
            Self::ReadMultiple { handles } => 2 * handles.len(),
            Self::Write { value, .. } | Self::WriteCmd { value, .. } => 2 + value.len(),
            Self::PrepareWrite { value, .. } => 4 + value.len(),
            Self::ExecuteWrite { .. } => 1,
            Self::Cfm => 0,
        }
    }

    /// Encodes the PDU, opcode first, all multi-byte fields little-endian.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut b = StructBuf::new(self.len());
        let mut p = b.append();
        p.u8(self.opcode());
        match self {
            Self::ExchangeMtu { mtu } => {
                p.u16(*mtu);
            }
            Self::FindInformation { range } => {
                p.u16(range.start()).u16(range.end());
            }
            Self::FindByTypeValue { range, typ, value } => {
                p.u16(range.start()).u16(range.end()).u16(typ.raw()).put(*value);
            }
            Self::ReadByType { range, typ } | Self::ReadByGroupType { range, typ } => {
                p.u16(range.start()).u16(range.end());
                put_uuid(&mut p, *typ);
            }
            Self::Read { handle } => {
                p.u16(*handle);
            }
            Self::ReadBlob { handle, offset } => {
                p.u16(*handle).u16(*offset);
            }
            Self::ReadMultiple { handles } => {
                debug_assert!(handles.len() >= 2);
                for &h in handles {
                    p.u16(h);
                }
            }
            Self::Write { handle, value } | Self::WriteCmd { handle, value } => {
                p.u16(*handle).put(*value);
            }
            Self::PrepareWrite { handle, offset, value } => {
                p.u16(*handle).u16(*offset).put(*value);
            }
            Self::ExecuteWrite { commit } => {
                p.u8(u8::from(*commit));
            }
            Self::Cfm => {}
        }
        Bytes::copy_from_slice(b.as_ref())
    }

}

impl<'a> Req<'a> {
    /// Decodes a client-originated PDU. Returns `None` if the PDU is
    /// truncated or carries out-of-range fields.
    pub fn decode(b: &'a [u8]) -> Option<Req<'a>> {
        let (&op, rest) = b.split_first()?;
        Some(match Opcode::try_from(op).ok()? {
            Opcode::ExchangeMtuReq => {
                if rest.len() != 2 {
                    return None;
                }
                Self::ExchangeMtu { mtu: u16le(rest, 0)? }
            }
            Opcode::FindInformationReq => {
                if rest.len() != 4 {
                    return None;
                }
                Self::FindInformation { range: range(rest)? }
            }
            Opcode::FindByTypeValueReq => Self::FindByTypeValue {
                range: range(rest)?,
                typ: Uuid16::new(u16le(rest, 4)?)?,
                value: rest.get(6..)?,
            },
            Opcode::ReadByTypeReq => Self::ReadByType {
                range: range(rest)?,
                typ: Uuid::from_le_bytes(rest.get(4..)?)?,
            },
            Opcode::ReadReq => {
                if rest.len() != 2 {
                    return None;
                }
                Self::Read { handle: handle(rest, 0)? }
            }
            Opcode::ReadBlobReq => {
                if rest.len() != 4 {
                    return None;
                }
                Self::ReadBlob {
                    handle: handle(rest, 0)?,
                    offset: u16le(rest, 2)?,
                }
            }
            Opcode::ReadMultipleReq => {
                if rest.len() < 4 || rest.len() % 2 != 0 {
                    return None;
                }
                let handles = (rest.chunks_exact(2))
                    .map(|c| Handle::new(u16::from_le_bytes([c[0], c[1]])))
                    .collect::<Option<Vec<_>>>()?;
                Self::ReadMultiple { handles }
            }
            Opcode::ReadByGroupTypeReq => Self::ReadByGroupType {
                range: range(rest)?,
                typ: Uuid::from_le_bytes(rest.get(4..)?)?,
            },
            Opcode::WriteReq => Self::Write {
                handle: handle(rest, 0)?,
                value: rest.get(2..)?,
            },
            Opcode::WriteCmd => Self::WriteCmd {
                handle: handle(rest, 0)?,
                value: rest.get(2..)?,
            },
            Opcode::PrepareWriteReq => Self::PrepareWrite {
                handle: handle(rest, 0)?,
                offset: u16le(rest, 2)?,
                value: rest.get(4..)?,
            },
            Opcode::ExecuteWriteReq => match *rest {
                [0x00] => Self::ExecuteWrite { commit: false },
                [0x01] => Self::ExecuteWrite { commit: true },
                _ => return None,
            },
            Opcode::HandleValueCfm => {
                if !rest.is_empty() {
                    return None;
                }
                Self::Cfm
            }
            _ => return None,
        })
    }
}

/// Server-originated response PDU ([Vol 3] Part F, Section 3.4).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rsp {
    Error(ErrorRsp),
    ExchangeMtu { mtu: u16 },
    FindInformation(Vec<(Handle, Uuid)>),
    FindByTypeValue(Vec<(Handle, Handle)>),
    ReadByType(Vec<(Handle, Bytes)>),
    Read(Bytes),
    ReadBlob(Bytes),
    ReadMultiple(Bytes),
    ReadByGroupType(Vec<(Handle, Handle, Uuid)>),
    Write,
    PrepareWrite { handle: Handle, offset: u16, value: Bytes },
    ExecuteWrite,
}

impl Rsp {
    /// Returns the PDU opcode.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        use Opcode::*;
        match self {
            Self::Error(_) => ErrorRsp,
            Self::ExchangeMtu { .. } => ExchangeMtuRsp,
            Self::FindInformation(_) => FindInformationRsp,
            Self::FindByTypeValue(_) => FindByTypeValueRsp,
            Self::ReadByType(_) => ReadByTypeRsp,
            Self::Read(_) => ReadRsp,
            Self::ReadBlob(_) => ReadBlobRsp,
            Self::ReadMultiple(_) => ReadMultipleRsp,
            Self::ReadByGroupType(_) => ReadByGroupTypeRsp,
            Self::Write => WriteRsp,
            Self::PrepareWrite { .. } => PrepareWriteRsp,
            Self::ExecuteWrite => ExecuteWriteRsp,
        }
    }

    /// Decodes a server-originated response PDU. Returns `None` if the PDU is
    /// truncated, carries out-of-range fields, or mixes tuple formats.
    pub fn decode(b: &[u8]) -> Option<Self> {
        let (&op, rest) = b.split_first()?;
        Some(match Opcode::try_from(op).ok()? {
            Opcode::ErrorRsp => Self::Error(super::ErrorRsp::decode(b)?),
            Opcode::ExchangeMtuRsp => {
                if rest.len() != 2 {
                    return None;
                }
                Self::ExchangeMtu { mtu: u16le(rest, 0)? }
            }
            Opcode::FindInformationRsp => {
                // Format 0x01 is handle + 16-bit UUID, 0x02 is handle +
                // 128-bit UUID; a single response never mixes the two.
                let (&fmt, tuples) = rest.split_first()?;
                let n = match fmt {
                    0x01 => 4,
                    0x02 => 18,
                    _ => return None,
                };
                if tuples.len() % n != 0 {
                    return None;
                }
                let v = (tuples.chunks_exact(n))
                    .map(|t| Some((handle(t, 0)?, Uuid::from_le_bytes(&t[2..])?)))
                    .collect::<Option<Vec<_>>>()?;
                Self::FindInformation(v)
            }
            Opcode::FindByTypeValueRsp => {
                if rest.len() % 4 != 0 {
                    return None;
                }
                let v = (rest.chunks_exact(4))
                    .map(|t| {
                        let (found, end) = (handle(t, 0)?, handle(t, 2)?);
                        (found <= end).then_some((found, end))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Self::FindByTypeValue(v)
            }
            Opcode::ReadByTypeRsp => {
                let (&len, tuples) = rest.split_first()?;
                let n = usize::from(len);
                if n < 2 || tuples.len() % n != 0 {
                    return None;
                }
                let v = (tuples.chunks_exact(n))
                    .map(|t| Some((handle(t, 0)?, Bytes::copy_from_slice(&t[2..]))))
                    .collect::<Option<Vec<_>>>()?;
                Self::ReadByType(v)
            }
            Opcode::ReadRsp => Self::Read(Bytes::copy_from_slice(rest)),
            Opcode::ReadBlobRsp => Self::ReadBlob(Bytes::copy_from_slice(rest)),
            Opcode::ReadMultipleRsp => Self::ReadMultiple(Bytes::copy_from_slice(rest)),
            Opcode::ReadByGroupTypeRsp => {
                let (&len, tuples) = rest.split_first()?;
                let n = usize::from(len);
                if !matches!(n, 6 | 20) || tuples.len() % n != 0 {
                    return None;
                }
                let v = (tuples.chunks_exact(n))
                    .map(|t| {
                        let (first, end) = (handle(t, 0)?, handle(t, 2)?);
                        let uuid = Uuid::from_le_bytes(&t[4..])?;
                        (first <= end).then_some((first, end, uuid))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Self::ReadByGroupType(v)
            }
            Opcode::WriteRsp => {
                if !rest.is_empty() {
                    return None;
                }
                Self::Write
            }
            Opcode::PrepareWriteRsp => Self::PrepareWrite {
                handle: handle(rest, 0)?,
                offset: u16le(rest, 2)?,
                value: Bytes::copy_from_slice(rest.get(4..)?),
            },
            Opcode::ExecuteWriteRsp => {
                if !rest.is_empty() {
                    return None;
                }
                Self::ExecuteWrite
            }
            _ => return None,
        })
    }

    /// Encodes the PDU. Tuple-list responses derive their length/format field
    /// from the first entry; every entry must share its shape.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut b = StructBuf::new(MAX_VAL_LEN + 4);
        let mut p = b.append();
        p.u8(self.opcode());
        match self {
            Self::Error(e) => {
                p.u8(e.req()).u16(e.handle().map_or(0, u16::from)).u8(e.code());
            }
            Self::ExchangeMtu { mtu } => {
                p.u16(*mtu);
            }
            Self::FindInformation(v) => {
                let fmt: u8 = if v[0].1.as_u16().is_some() { 0x01 } else { 0x02 };
                p.u8(fmt);
                for &(h, u) in v {
                    debug_assert_eq!(u.as_u16().is_some(), fmt == 0x01);
                    p.u16(h);
                    put_uuid(&mut p, u);
                }
            }
            Self::FindByTypeValue(v) => {
                for &(found, end) in v {
                    p.u16(found).u16(end);
                }
            }
            Self::ReadByType(v) => {
                #[allow(clippy::cast_possible_truncation)]
                p.u8((2 + v[0].1.len()) as u8);
                for (h, val) in v {
                    debug_assert_eq!(val.len(), v[0].1.len());
                    p.u16(*h).put(val.as_ref());
                }
            }
            Self::Read(v) | Self::ReadBlob(v) | Self::ReadMultiple(v) => {
                p.put(v.as_ref());
            }
            Self::ReadByGroupType(v) => {
                #[allow(clippy::cast_possible_truncation)]
                p.u8((4 + uuid_len(v[0].2)) as u8);
                for &(first, end, u) in v {
                    debug_assert_eq!(uuid_len(u), uuid_len(v[0].2));
                    p.u16(first).u16(end);
                    put_uuid(&mut p, u);
                }
            }
            Self::Write | Self::ExecuteWrite => {}
            Self::PrepareWrite { handle, offset, value } => {
                p.u16(*handle).u16(*offset).put(value.as_ref());
            }
        }
        Bytes::copy_from_slice(b.as_ref())
    }
}

/// Returns the encoded size of a UUID in an ATT PDU: 2 bytes for assigned
/// 16-bit UUIDs, 16 bytes otherwise. 32-bit UUIDs never appear on the wire.
#[inline]
#[must_use]
pub(crate) fn uuid_len(u: Uuid) -> usize {
    if u.as_u16().is_some() {
        2
    } else {
        16
    }
}

#[inline]
fn put_uuid(p: &mut structbuf::Packer, u: Uuid) {
    match u.as_u16() {
        Some(v) => {
            p.u16(v);
        }
        None => {
            p.u128(u128::from(u));
        }
    }
}

#[inline]
fn u16le(b: &[u8], i: usize) -> Option<u16> {
    let v = b.get(i..i + 2)?;
    Some(u16::from_le_bytes([v[0], v[1]]))
}

#[inline]
fn handle(b: &[u8], i: usize) -> Option<Handle> {
    Handle::new(u16le(b, i)?)
}

#[inline]
fn range(b: &[u8]) -> Option<HandleRange> {
    let (start, end) = (handle(b, 0)?, handle(b, 2)?);
    (start <= end).then(|| HandleRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdl(h: u16) -> Handle {
        Handle::new(h).unwrap()
    }

    #[track_caller]
    fn req_vector(req: &Req, wire: &[u8]) {
        assert_eq!(req.encode(), wire);
        assert_eq!(req.len(), wire.len());
        assert_eq!(Req::decode(wire).as_ref(), Some(req));
    }

    #[track_caller]
    fn rsp_vector(rsp: &Rsp, wire: &[u8]) {
        assert_eq!(rsp.encode(), wire);
        assert_eq!(Rsp::decode(wire).as_ref(), Some(rsp));
    }

    #[test]
    fn service_discovery() {
        req_vector(
            &Req::ReadByGroupType {
                range: HandleRange::ALL,
                typ: crate::uuid::uuid16(0x2800).as_uuid(),
            },
            &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28],
        );
        rsp_vector(
            &Rsp::ReadByGroupType(vec![(
                hdl(0x0001),
                hdl(0x0009),
                crate::uuid::uuid16(0x1800).as_uuid(),
            )]),
            &[0x11, 0x06, 0x01, 0x00, 0x09, 0x00, 0x00, 0x18],
        );
    }

    #[test]
    fn find_by_type_value() {
        req_vector(
            &Req::FindByTypeValue {
                range: HandleRange::new(hdl(0x0001), hdl(0xFFFF)),
                typ: crate::uuid::uuid16(0x2800),
                value: &[0x0F, 0x18],
            },
            &[0x06, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x0F, 0x18],
        );
        rsp_vector(
            &Rsp::FindByTypeValue(vec![(hdl(0x0010), hdl(0x0017))]),
            &[0x07, 0x10, 0x00, 0x17, 0x00],
        );
    }

    #[test]
    fn characteristic_discovery() {
        req_vector(
            &Req::ReadByType {
                range: HandleRange::new(hdl(0x0001), hdl(0x0009)),
                typ: crate::uuid::uuid16(0x2803).as_uuid(),
            },
            &[0x08, 0x01, 0x00, 0x09, 0x00, 0x03, 0x28],
        );
        rsp_vector(
            &Rsp::ReadByType(vec![(
                hdl(0x0002),
                Bytes::from_static(&[0x02, 0x03, 0x00, 0x00, 0x2A]),
            )]),
            &[0x09, 0x07, 0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x2A],
        );
    }

    #[test]
    fn descriptor_discovery() {
        req_vector(
            &Req::FindInformation {
                range: HandleRange::new(hdl(0x0018), hdl(0x0019)),
            },
            &[0x04, 0x18, 0x00, 0x19, 0x00],
        );
        rsp_vector(
            &Rsp::FindInformation(vec![(hdl(0x0018), crate::uuid::uuid16(0x2902).as_uuid())]),
            &[0x05, 0x01, 0x18, 0x00, 0x02, 0x29],
        );
        // 128-bit format
        let uuid = Uuid::new(0xF000AA01_0451_4000_B000_000000000000).unwrap();
        let mut wire = vec![0x05, 0x02, 0x20, 0x00];
        wire.extend_from_slice(&uuid.to_bytes());
        rsp_vector(&Rsp::FindInformation(vec![(hdl(0x0020), uuid)]), &wire);
        // Mixed formats are not permitted
        let mut mixed = wire.clone();
        mixed.extend_from_slice(&[0x21, 0x00, 0x02, 0x29]);
        assert_eq!(Rsp::decode(&mixed), None);
    }

    #[test]
    fn reads() {
        req_vector(&Req::Read { handle: hdl(0x0015) }, &[0x0A, 0x15, 0x00]);
        req_vector(
            &Req::ReadBlob { handle: hdl(0x0015), offset: 22 },
            &[0x0C, 0x15, 0x00, 0x16, 0x00],
        );
        req_vector(
            &Req::ReadMultiple { handles: vec![hdl(0x0003), hdl(0x0007)] },
            &[0x0E, 0x03, 0x00, 0x07, 0x00],
        );
        rsp_vector(&Rsp::Read(Bytes::from_static(b"abc")), &[0x0B, b'a', b'b', b'c']);
        rsp_vector(&Rsp::ReadBlob(Bytes::from_static(b"z")), &[0x0D, b'z']);
        rsp_vector(&Rsp::ReadMultiple(Bytes::from_static(b"xy")), &[0x0F, b'x', b'y']);
    }

    #[test]
    fn writes() {
        req_vector(
            &Req::Write { handle: hdl(0x0018), value: &[0x01, 0x00] },
            &[0x12, 0x18, 0x00, 0x01, 0x00],
        );
        req_vector(
            &Req::WriteCmd { handle: hdl(0x0018), value: &[0x02] },
            &[0x52, 0x18, 0x00, 0x02],
        );
        req_vector(
            &Req::PrepareWrite { handle: hdl(0x0021), offset: 18, value: b"ab" },
            &[0x16, 0x21, 0x00, 0x12, 0x00, b'a', b'b'],
        );
        req_vector(&Req::ExecuteWrite { commit: true }, &[0x18, 0x01]);
        req_vector(&Req::ExecuteWrite { commit: false }, &[0x18, 0x00]);
        rsp_vector(&Rsp::Write, &[0x13]);
        rsp_vector(
            &Rsp::PrepareWrite {
                handle: hdl(0x0021),
                offset: 18,
                value: Bytes::from_static(b"ab"),
            },
            &[0x17, 0x21, 0x00, 0x12, 0x00, b'a', b'b'],
        );
        rsp_vector(&Rsp::ExecuteWrite, &[0x19]);
    }

    #[test]
    fn mtu_and_error() {
        req_vector(&Req::ExchangeMtu { mtu: 517 }, &[0x02, 0x05, 0x02]);
        req_vector(&Req::Cfm, &[0x1E]);
        rsp_vector(&Rsp::ExchangeMtu { mtu: 247 }, &[0x03, 0xF7, 0x00]);
        rsp_vector(
            &Rsp::Error(ErrorRsp::new(
                Opcode::ReadByGroupTypeReq as u8,
                Handle::new(0x000A),
                ErrorCode::AttributeNotFound,
            )),
            &[0x01, 0x10, 0x0A, 0x00, 0x0A],
        );
    }

    #[test]
    fn malformed() {
        // Truncated fields
        assert_eq!(Rsp::decode(&[0x03, 0xF7]), None);
        assert_eq!(Rsp::decode(&[0x0B; 0]), None);
        assert_eq!(Req::decode(&[0x0A, 0x15]), None);
        // Zero handles are reserved
        assert_eq!(Req::decode(&[0x0A, 0x00, 0x00]), None);
        assert_eq!(Rsp::decode(&[0x07, 0x00, 0x00, 0x17, 0x00]), None);
        // Inverted range
        assert_eq!(Req::decode(&[0x04, 0x19, 0x00, 0x18, 0x00]), None);
        // Tuple stream not a multiple of the declared length
        assert_eq!(Rsp::decode(&[0x09, 0x07, 0x02, 0x00, 0x02]), None);
        // Unknown find-information format
        assert_eq!(Rsp::decode(&[0x05, 0x03, 0x18, 0x00, 0x02, 0x29]), None);
        // Bodies where none belong
        assert_eq!(Rsp::decode(&[0x13, 0x00]), None);
        assert_eq!(Rsp::decode(&[0x19, 0x01]), None);
        // Execute-write flags are 0x00 or 0x01
        assert_eq!(Req::decode(&[0x18, 0x02]), None);
    }
}
