//! Bluetooth UUIDs ([Vol 3] Part B, Section 2.5.1).

use std::fmt::{Debug, Display, Formatter};
use std::num::{NonZeroU128, NonZeroU16};

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID. Comparisons are semantic: a 16-bit SIG UUID is
/// equal to its 128-bit Bluetooth Base UUID expansion because both are stored
/// in expanded form.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`. Returns `None` for the nil UUID, which
    /// never appears in an attribute database.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Creates a UUID from its little-endian wire representation. ATT carries
    /// either 2-byte SIG UUIDs or 16-byte custom UUIDs; any other length is
    /// malformed.
    #[must_use]
    pub fn from_le_bytes(v: &[u8]) -> Option<Self> {
        match *v {
            [a, b] => Uuid16::new(u16::from_le_bytes([a, b])).map(Uuid16::as_uuid),
            [..] if v.len() == 16 => {
                let mut b = [0; 16];
                b.copy_from_slice(v);
                Self::new(u128::from_le_bytes(b))
            }
            _ => None,
        }
    }

    /// Returns a [`Uuid16`] representation or [`None`] if the UUID is not an
    /// assigned 16-bit UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid16(self) -> Option<Uuid16> {
        self.as_u16().map(uuid16)
    }

    /// Converts an assigned 16-bit Bluetooth SIG UUID to `u16`. This is
    /// mutually exclusive with `as_u32` and `as_u128`.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Converts an assigned 32-bit Bluetooth SIG UUID to `u32`. This is
    /// mutually exclusive with `as_u16` and `as_u128`.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> Option<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u32;
        (self.0.get() & MASK_32 == BASE && v > u32::from(u16::MAX)).then_some(v)
    }

    /// Converts an unassigned UUID to `u128`. This is mutually exclusive with
    /// `as_u16` and `as_u32`.
    #[inline]
    #[must_use]
    pub fn as_u128(self) -> Option<u128> {
        (self.0.get() & MASK_32 != BASE).then_some(self.0.get())
    }

    /// Returns the UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.get().to_le_bytes()
    }
}

impl From<Uuid16> for Uuid {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.as_uuid()
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_possible_truncation)]
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            let v = self.0.get();
            write!(
                f,
                "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                (v & ((1 << 48) - 1)) as u64
            )
        }
    }
}

impl Display for Uuid {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// Creates a 16-bit SIG UUID from a `u16`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        match NonZeroU16::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the 128-bit UUID representation.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        // SAFETY: Always non-zero
        Uuid(unsafe { NonZeroU128::new_unchecked((self.0.get() as u128) << SHIFT | BASE) })
    }

    /// Returns the raw 16-bit UUID value.
    #[inline(always)]
    #[must_use]
    pub(crate) const fn raw(self) -> u16 {
        self.0.get()
    }

    /// Returns the UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.get().to_le_bytes()
    }
}

impl Debug for Uuid16 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

impl Display for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Uuid16> for u16 {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.raw()
    }
}

impl PartialEq<Uuid> for Uuid16 {
    #[inline]
    fn eq(&self, rhs: &Uuid) -> bool {
        self.as_uuid() == *rhs
    }
}

impl PartialEq<Uuid16> for Uuid {
    #[inline]
    fn eq(&self, rhs: &Uuid16) -> bool {
        *self == rhs.as_uuid()
    }
}

/// Creates an assigned 16-bit SIG UUID from a `u16`.
#[inline]
#[must_use]
pub(crate) const fn uuid16(v: u16) -> Uuid16 {
    // SAFETY: All crate uses guarantee that v != 0
    Uuid16(unsafe { NonZeroU16::new_unchecked(v) })
}

/// Provides implementations for converting a `repr(u16)` enum into [`Uuid`]
/// and [`Uuid16`], with semantic equality in both directions.
macro_rules! uuid16_enum {
    ($($t:ty)*) => {$(
        impl $t {
            /// Returns the `Uuid` representation of the variant.
            #[inline]
            #[must_use]
            pub const fn uuid(self) -> $crate::Uuid {
                self.uuid16().as_uuid()
            }

            /// Returns the `Uuid16` representation of the variant.
            #[inline(always)]
            #[must_use]
            pub const fn uuid16(self) -> $crate::Uuid16 {
                $crate::uuid::uuid16(self as _)
            }
        }

        impl ::core::cmp::PartialEq<$crate::Uuid> for $t {
            #[inline(always)]
            fn eq(&self, rhs: &$crate::Uuid) -> bool {
                // Converting to 128-bit avoids branches
                self.uuid() == *rhs
            }
        }

        impl ::core::cmp::PartialEq<$t> for $crate::Uuid {
            #[inline(always)]
            fn eq(&self, rhs: &$t) -> bool {
                *self == rhs.uuid()
            }
        }

        impl ::core::convert::From<$t> for $crate::Uuid {
            #[inline]
            fn from(v: $t) -> Self {
                v.uuid()
            }
        }

        impl ::core::convert::From<$t> for $crate::Uuid16 {
            #[inline]
            fn from(v: $t) -> Self {
                v.uuid16()
            }
        }
    )*}
}
pub(crate) use uuid16_enum;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_expansion() {
        let u = uuid16(0x2902).as_uuid();
        assert_eq!(u.as_u16(), Some(0x2902));
        assert_eq!(u, Uuid::new(0x00002902_0000_1000_8000_00805F9B34FB).unwrap());
        assert_eq!(u.as_u128(), None);
    }

    #[test]
    fn wire_roundtrip() {
        let u = uuid16(0x1800).as_uuid();
        assert_eq!(Uuid::from_le_bytes(&[0x00, 0x18]), Some(u));

        let custom = Uuid::new(0xF000AA00_0451_4000_B000_000000000000).unwrap();
        assert_eq!(Uuid::from_le_bytes(&custom.to_bytes()), Some(custom));
        assert_eq!(custom.as_u16(), None);

        assert_eq!(Uuid::from_le_bytes(&[1, 2, 3]), None);
        assert_eq!(Uuid::from_le_bytes(&[0, 0]), None);
    }
}
