use speedy::{Context, Endianness, Readable, Reader, Writable, Writer};

use super::{submessage_flag::endianness_flag, submessage_kind::SubmessageKind};

/// 4-byte submessage header. The byte order of `content_length` is given by
/// the endianness bit of `flags`, not by the surrounding context.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SubmessageHeader {
  pub kind: SubmessageKind,
  pub flags: u8,
  pub content_length: u16, // octetsToNextHeader
}

impl<'a, C: Context> Readable<'a, C> for SubmessageHeader {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let kind: SubmessageKind = reader.read_value()?;
    let flags = reader.read_u8()?;
    let mut length_bytes = [0u8; 2];
    reader.read_bytes(&mut length_bytes)?;
    let content_length = match endianness_flag(flags) {
      Endianness::LittleEndian => u16::from_le_bytes(length_bytes),
      Endianness::BigEndian => u16::from_be_bytes(length_bytes),
    };
    Ok(Self {
      kind,
      flags,
      content_length,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for SubmessageHeader {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind)?;
    writer.write_u8(self.flags)?;
    let length_bytes = match endianness_flag(self.flags) {
      Endianness::LittleEndian => self.content_length.to_le_bytes(),
      Endianness::BigEndian => self.content_length.to_be_bytes(),
    };
    writer.write_bytes(&length_bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn length_follows_flag_endianness() {
    let le = SubmessageHeader {
      kind: SubmessageKind::ACKNACK,
      flags: 0x01,
      content_length: 42,
    };
    let be = SubmessageHeader {
      kind: SubmessageKind::GAP,
      flags: 0x02,
      content_length: 7,
    };
    // the writer context does not matter
    for ctx in [Endianness::LittleEndian, Endianness::BigEndian].iter() {
      assert_eq!(
        le.write_to_vec_with_ctx(*ctx).unwrap(),
        vec![0x06, 0x01, 0x2A, 0x00]
      );
      assert_eq!(
        be.write_to_vec_with_ctx(*ctx).unwrap(),
        vec![0x08, 0x02, 0x00, 0x07]
      );
    }
    assert_eq!(
      SubmessageHeader::read_from_buffer(&[0x06, 0x01, 0x2A, 0x00]).unwrap(),
      le
    );
    assert_eq!(
      SubmessageHeader::read_from_buffer(&[0x08, 0x02, 0x00, 0x07]).unwrap(),
      be
    );
  }
}
