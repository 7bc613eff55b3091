use std::fmt;

use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};

/// Identity of a data instance (the key hash). Keyless topics use `NIL`.
#[derive(Clone, Copy, PartialOrd, PartialEq, Ord, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InstanceHandle([u8; 16]);

impl InstanceHandle {
  pub const NIL: InstanceHandle = InstanceHandle([0x00; 16]);

  pub fn from_bytes(bytes: [u8; 16]) -> InstanceHandle {
    InstanceHandle(bytes)
  }

  /// Key hash from the big-endian CDR serialization of the key fields:
  /// keys up to 16 bytes are zero-padded, longer keys are MD5 hashed.
  pub fn from_serialized_key(cdr_be_key: &[u8]) -> InstanceHandle {
    if cdr_be_key.len() <= 16 {
      let mut bytes = [0u8; 16];
      bytes[..cdr_be_key.len()].copy_from_slice(cdr_be_key);
      InstanceHandle(bytes)
    } else {
      InstanceHandle(md5::compute(cdr_be_key).0)
    }
  }

  pub fn is_nil(&self) -> bool {
    *self == InstanceHandle::NIL
  }

  pub fn as_bytes(&self) -> &[u8; 16] {
    &self.0
  }
}

impl<'a, C: Context> Readable<'a, C> for InstanceHandle {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut bytes = [0u8; 16];
    reader.read_bytes(&mut bytes)?;
    Ok(InstanceHandle(bytes))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    16
  }
}

impl<C: Context> Writable<C> for InstanceHandle {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_bytes(&self.0)
  }
}

impl fmt::Debug for InstanceHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_nil() {
      return f.write_str("InstanceHandle::NIL");
    }
    f.write_str("InstanceHandle(")?;
    for b in self.0.iter() {
      write!(f, "{:02x}", b)?;
    }
    f.write_str(")")
  }
}
