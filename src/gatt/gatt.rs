//! Generic Attribute Profile client ([Vol 3] Part G).

use std::fmt::{Debug, Display, Formatter};

pub use {client::*, consts::*, io::*};

use crate::att::{self, Handle, HandleRange};
use crate::Uuid;

mod client;
mod consts;
mod io;

/// Error type returned by the GATT layer.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Att(#[from] att::Error),
    /// A queued write was attempted while another one was in progress.
    #[error("another queued write is in progress")]
    InLongWrite,
    /// Notifications or indications were requested for a characteristic
    /// without a Client Characteristic Configuration descriptor.
    #[error("{0} has no client characteristic configuration descriptor")]
    NotConfigurable(Characteristic),
    /// The value does not fit the PDU or the attribute protocol limit, and
    /// the operation does not permit splitting it.
    #[error("value length {len} exceeds the limit of {max}")]
    ValueTooLong { len: usize, max: usize },
    /// Signed writes require a CSRK, which this client does not manage.
    /// Refusing is preferable to sending the value unsigned.
    #[error("signed writes are not supported")]
    SignedWriteNotSupported,
}

impl From<att::ErrorRsp> for Error {
    #[inline]
    fn from(e: att::ErrorRsp) -> Self {
        Self::Att(e.into())
    }
}

/// Common GATT result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Discovered service ([Vol 3] Part G, Section 3.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Service {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Handle of the service declaration.
    pub handle: Handle,
    /// Handle of the last attribute within the service definition.
    pub end: Handle,
}

impl Service {
    /// Returns the handle range spanned by the service definition.
    #[inline]
    #[must_use]
    pub fn range(&self) -> HandleRange {
        HandleRange::new(self.handle, self.end)
    }
}

/// Discovered characteristic ([Vol 3] Part G, Section 3.3). The declaration
/// and value handles are both carried on the wire; the client trusts the
/// server's values rather than assuming they are adjacent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Characteristic properties.
    pub properties: CharProps,
    /// Handle of the characteristic declaration.
    pub handle: Handle,
    /// Handle of the characteristic value attribute.
    pub value_handle: Handle,
}

impl Characteristic {
    /// Returns whether the value can be read.
    #[inline]
    #[must_use]
    pub const fn can_read(&self) -> bool {
        self.properties.contains(CharProps::READ)
    }

    /// Returns whether the value can be written with a response.
    #[inline]
    #[must_use]
    pub const fn can_write(&self) -> bool {
        self.properties.contains(CharProps::WRITE)
    }

    /// Returns whether the server accepts notification subscriptions.
    #[inline]
    #[must_use]
    pub const fn can_notify(&self) -> bool {
        self.properties.contains(CharProps::NOTIFY)
    }

    /// Returns whether the server accepts indication subscriptions.
    #[inline]
    #[must_use]
    pub const fn can_indicate(&self) -> bool {
        self.properties.contains(CharProps::INDICATE)
    }
}

impl Display for Characteristic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "characteristic {} at {}", self.uuid, self.handle)
    }
}

/// Discovered characteristic descriptor ([Vol 3] Part G, Section 3.3.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Descriptor {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Descriptor handle.
    pub handle: Handle,
}
