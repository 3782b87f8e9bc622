use bitflags::bitflags;

use crate::uuid::uuid16_enum;

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[repr(transparent)]
    pub struct CharProps: u8 {
        /// Permits broadcasts of the Characteristic Value using Server
        /// Characteristic Configuration Descriptor.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permits writes of the Characteristic Value without response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        const INDICATE = 0x20;
        /// Permits signed writes to the Characteristic Value.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// Additional characteristic properties are defined in the
        /// Characteristic Extended Properties Descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags! {
    /// Client Characteristic Configuration descriptor value
    /// ([Vol 3] Part G, Section 3.3.3.3).
    #[repr(transparent)]
    pub struct Cccd: u16 {
        /// The Characteristic Value shall be notified.
        const NOTIFY = 1 << 0;
        /// The Characteristic Value shall be indicated.
        const INDICATE = 1 << 1;
    }
}

/// Declaration attribute types ([Vol 3] Part G, Section 3.1 and 3.3.1).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[non_exhaustive]
#[repr(u16)]
pub(crate) enum Decl {
    PrimaryService = 0x2800,
    SecondaryService = 0x2801,
    Include = 0x2802,
    Characteristic = 0x2803,
}

uuid16_enum! { Decl }

/// Characteristic descriptor types ([Vol 3] Part G, Section 3.3.3).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[non_exhaustive]
#[repr(u16)]
pub enum Descr {
    CharacteristicExtendedProperties = 0x2900,
    CharacteristicUserDescription = 0x2901,
    ClientCharacteristicConfiguration = 0x2902,
    ServerCharacteristicConfiguration = 0x2903,
    CharacteristicPresentationFormat = 0x2904,
    CharacteristicAggregateFormat = 0x2905,
}

uuid16_enum! { Descr }
