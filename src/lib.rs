//! Bluetooth Low Energy GATT client.
//!
//! The [`gatt::Client`] drives the client half of a BLE link over any
//! [`sock::Socket`] carrying the ATT fixed channel: it discovers the remote
//! attribute database, reads and writes values of any length, and routes
//! server-initiated notifications and indications. The [`att`] module holds
//! the bearer that serializes the protocol's single in-flight request and
//! pairs it with the matching response.

#[path = "att/att.rs"]
pub mod att;
#[path = "gatt/gatt.rs"]
pub mod gatt;
pub mod sock;

mod uuid;
#[path = "util/util.rs"]
mod util;

pub use crate::uuid::{Uuid, Uuid16};

pub(crate) use util::{impl_display_via_debug, name_of};
