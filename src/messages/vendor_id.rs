use std::fmt;

use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};

#[derive(PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct VendorId {
  pub vendor_id: [u8; 2],
}

impl VendorId {
  pub const VENDOR_UNKNOWN: Self = Self {
    vendor_id: [0x00, 0x00],
  };

  /// Not in the OMG vendor table. Used in our own GUID prefixes.
  pub const THIS_IMPLEMENTATION: Self = Self {
    vendor_id: [0x01, 0x99],
  };

  pub fn as_bytes(&self) -> [u8; 2] {
    self.vendor_id
  }

  fn known_vendor_name(self) -> Option<&'static str> {
    match self.vendor_id {
      [0x01, 0x01] => Some("RTI Connext DDS"),
      [0x01, 0x02] => Some("OpenSplice DDS"),
      [0x01, 0x03] => Some("OpenDDS"),
      [0x01, 0x0F] => Some("eProsima Fast DDS"),
      [0x01, 0x10] => Some("Eclipse Cyclone DDS"),
      [0x01, 0x12] => Some("RustDDS"),
      [0x01, 0x99] => Some("rtpscore"),
      _ => None,
    }
  }
}

impl Default for VendorId {
  fn default() -> Self {
    Self::VENDOR_UNKNOWN
  }
}

impl fmt::Debug for VendorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::VENDOR_UNKNOWN => write!(f, "VENDOR_UNKNOWN"),
      other => match other.known_vendor_name() {
        Some(name) => write!(f, "{}", name),
        None => write!(f, "{:x?}", other.vendor_id),
      },
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for VendorId {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut vendor_id = Self::default();
    for i in 0..vendor_id.vendor_id.len() {
      vendor_id.vendor_id[i] = reader.read_u8()?;
    }
    Ok(vendor_id)
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    std::mem::size_of::<Self>()
  }
}

impl<C: Context> Writable<C> for VendorId {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for elem in &self.vendor_id {
      writer.write_u8(*elem)?;
    }
    Ok(())
  }
}
