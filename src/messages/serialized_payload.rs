use std::io;

use bytes::Bytes;
use speedy::{Context, Endianness, Writable, Writer};
use serde::{Deserialize, Serialize};
use byteorder::ReadBytesExt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Used to identify serialization format of payload data over RTPS.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct RepresentationIdentifier {
  bytes: [u8; 2],
}

impl RepresentationIdentifier {
  // Numeric values are from RTPS spec v2.3 Section 10.5 , Table 10.3
  pub const CDR_BE: Self = Self {
    bytes: [0x00, 0x00],
  };
  pub const CDR_LE: Self = Self {
    bytes: [0x00, 0x01],
  };

  pub const PL_CDR_BE: Self = Self {
    bytes: [0x00, 0x02],
  };
  pub const PL_CDR_LE: Self = Self {
    bytes: [0x00, 0x03],
  };

  // Reads two bytes to form a `RepresentationIdentifier`
  pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
    let mut reader = io::Cursor::new(bytes);
    Ok(Self {
      bytes: [reader.read_u8()?, reader.read_u8()?],
    })
  }

  pub fn to_bytes(self) -> [u8; 2] {
    self.bytes
  }

  /// Byte order implied by the encapsulation, for the standard CDR and PL_CDR
  /// identifiers. Others return `None`.
  pub fn endianness(self) -> Option<Endianness> {
    match self {
      Self::CDR_BE | Self::PL_CDR_BE => Some(Endianness::BigEndian),
      Self::CDR_LE | Self::PL_CDR_LE => Some(Endianness::LittleEndian),
      _ => None,
    }
  }
}

/// A SerializedPayload submessage element contains the serialized
/// representation of either value of an application-defined data-object or
/// the value of the key that uniquely identifies the data-object.
///
/// representation_options is not used by protocol version 2.3: send as zero,
/// ignore on receive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerializedPayload {
  pub representation_identifier: RepresentationIdentifier,
  pub representation_options: [u8; 2],
  pub value: Bytes,
}

// header length
// 2 bytes for representation identifier
// + 2 bytes for representation options
const H_LEN: usize = 2 + 2;

impl SerializedPayload {
  pub fn new(rep_id: RepresentationIdentifier, payload: Vec<u8>) -> Self {
    Self::new_from_bytes(rep_id, Bytes::from(payload))
  }

  pub fn new_from_bytes(rep_id: RepresentationIdentifier, payload: Bytes) -> Self {
    Self {
      representation_identifier: rep_id,
      representation_options: [0, 0],
      value: payload,
    }
  }

  /// serialized size in bytes
  pub fn len_serialized(&self) -> usize {
    H_LEN + self.value.len()
  }

  // Implement deserialization here, because Speedy just makes it difficult.
  pub fn from_bytes(bytes: &Bytes) -> io::Result<Self> {
    if bytes.len() < H_LEN {
      warn!(
        "Serialized payload shorter than encapsulation header: {:?}",
        bytes
      );
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "Too short serialized payload.",
      ));
    }
    let mut reader = io::Cursor::new(&bytes[..H_LEN]);
    let representation_identifier = RepresentationIdentifier {
      bytes: [reader.read_u8()?, reader.read_u8()?],
    };
    let representation_options = [reader.read_u8()?, reader.read_u8()?];

    Ok(Self {
      representation_identifier,
      representation_options,
      value: bytes.slice(H_LEN..),
    })
  }
}

impl<C: Context> Writable<C> for SerializedPayload {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_u8(self.representation_identifier.bytes[0])?;
    writer.write_u8(self.representation_identifier.bytes[1])?;
    writer.write_u8(self.representation_options[0])?;
    writer.write_u8(self.representation_options[1])?;
    writer.write_bytes(&self.value)?;
    Ok(())
  }
}
