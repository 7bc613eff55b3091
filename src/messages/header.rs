use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};

use crate::{messages::vendor_id::VendorId, structure::guid::GuidPrefix};

#[derive(Debug, PartialOrd, PartialEq, Ord, Eq, Clone, Copy)]
pub struct ProtocolId {
  protocol_id: [u8; 4],
}

impl ProtocolId {
  pub const PROTOCOL_RTPS: Self = Self {
    protocol_id: *b"RTPS",
  };
}

impl Default for ProtocolId {
  fn default() -> Self {
    Self::PROTOCOL_RTPS
  }
}

impl<'a, C: Context> Readable<'a, C> for ProtocolId {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut protocol_id = [0u8; 4];
    reader.read_bytes(&mut protocol_id)?;
    Ok(Self { protocol_id })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for ProtocolId {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_bytes(&self.protocol_id)
  }
}

#[derive(
  Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize, Deserialize, Clone, Copy,
)]
pub struct ProtocolVersion {
  pub major: u8,
  pub minor: u8,
}

impl ProtocolVersion {
  pub const PROTOCOLVERSION_2_3: Self = Self { major: 2, minor: 3 };
  pub const THIS_IMPLEMENTATION: Self = Self::PROTOCOLVERSION_2_3;
}

impl Default for ProtocolVersion {
  fn default() -> Self {
    Self::THIS_IMPLEMENTATION
  }
}

/// RTPS message header. Always 20 bytes, byte-order independent.
#[derive(Debug, Readable, Writable, PartialEq, Eq, Clone, Copy)]
pub struct Header {
  pub protocol_id: ProtocolId,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}

impl Header {
  pub const LENGTH: usize = 20;

  pub fn new(guid_prefix: GuidPrefix) -> Self {
    Self {
      protocol_id: ProtocolId::PROTOCOL_RTPS,
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      guid_prefix,
    }
  }

  /// A message from a newer major protocol version or with a wrong magic
  /// must be ignored.
  pub fn valid(&self) -> bool {
    self.protocol_id == ProtocolId::PROTOCOL_RTPS
      && self.protocol_version.major <= ProtocolVersion::THIS_IMPLEMENTATION.major
  }
}
