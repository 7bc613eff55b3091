use std::io;

use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Context, Readable, Writable, Writer};

use crate::{
  messages::{
    parameter_list::ParameterList, serialized_payload::SerializedPayload,
    submessages::submessage_flag::{endianness_flag, DATA_Flags},
  },
  structure::{guid::EntityId, sequence_number::SequenceNumber},
};

/// This Submessage is sent from an RTPS Writer (NO_KEY or WITH_KEY)
/// to an RTPS Reader (NO_KEY or WITH_KEY)
///
/// The Submessage notifies the RTPS Reader of a change to
/// a data-object belonging to the RTPS Writer. The possible changes
/// include both changes in value as well as changes to the lifecycle
/// of the data-object.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Data {
  /// Identifies the RTPS Reader entity that is being informed of the change
  /// to the data-object.
  pub reader_id: EntityId,

  /// Identifies the RTPS Writer entity that made the change to the
  /// data-object.
  pub writer_id: EntityId,

  /// Uniquely identifies the change and the relative order for all changes
  /// made by the RTPS Writer identified by the writerGuid.
  pub writer_sn: SequenceNumber,

  /// Contains QoS that may affect the interpretation of the message.
  /// Present only if the InlineQosFlag is set in the header.
  pub inline_qos: Option<ParameterList>,

  /// If the DataFlag is set, then it contains the encapsulation of
  /// the new value of the data-object after the change.
  /// If the KeyFlag is set, then it contains the encapsulation of
  /// the key of the data-object the message refers to.
  pub serialized_payload: Option<SerializedPayload>,
}

// extraFlags + octetsToInlineQos + readerId + writerId + writerSN
const FIXED_PART_LEN: usize = 2 + 2 + 4 + 4 + 8;
// octetsToInlineQos counts from the octet after itself
const OCTETS_TO_INLINE_QOS: u16 = 16;

fn speedy_err(e: speedy::Error) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, e)
}

impl Data {
  /// DATA submessage cannot be speedy Readable because deserializing this
  /// requires info from submessage header. Required information is expect_qos
  /// and expect_payload whish are told on submessage header flags.
  pub fn deserialize_data(buffer: &Bytes, flags: BitFlags<DATA_Flags>) -> io::Result<Self> {
    if buffer.len() < FIXED_PART_LEN {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("DATA submessage too short: {} bytes", buffer.len()),
      ));
    }
    let endianness = endianness_flag(flags.bits());

    // extraFlags (2 bytes) are ignored.
    let octets_to_inline_qos =
      u16::read_from_buffer_with_ctx(endianness, &buffer[2..4]).map_err(speedy_err)?;
    let reader_id =
      EntityId::read_from_buffer_with_ctx(endianness, &buffer[4..8]).map_err(speedy_err)?;
    let writer_id =
      EntityId::read_from_buffer_with_ctx(endianness, &buffer[8..12]).map_err(speedy_err)?;
    let writer_sn = SequenceNumber::read_from_buffer_with_ctx(endianness, &buffer[12..20])
      .map_err(speedy_err)?;

    // A newer protocol version may put extra fields before the inline QoS.
    let mut pos = 4 + octets_to_inline_qos as usize;
    if pos > buffer.len() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("DATA octetsToInlineQos out of bounds: {}", octets_to_inline_qos),
      ));
    }

    let inline_qos = if flags.contains(DATA_Flags::InlineQos) {
      let (qos, qos_len) =
        ParameterList::read_with_length_from_buffer_with_ctx(endianness, &buffer[pos..]);
      pos += qos_len;
      Some(qos.map_err(speedy_err)?)
    } else {
      None
    };

    let serialized_payload = if flags.contains(DATA_Flags::Data) || flags.contains(DATA_Flags::Key)
    {
      Some(SerializedPayload::from_bytes(&buffer.slice(pos..))?)
    } else {
      None
    };

    Ok(Self {
      reader_id,
      writer_id,
      writer_sn,
      inline_qos,
      serialized_payload,
    })
  }

  pub fn len_serialized(&self) -> usize {
    FIXED_PART_LEN
      + self.inline_qos.as_ref().map_or(0, ParameterList::len_serialized)
      + self
        .serialized_payload
        .as_ref()
        .map_or(0, SerializedPayload::len_serialized)
  }
}

impl<C: Context> Writable<C> for Data {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    // This version of the protocol (2.3) should set all the bits in the
    // extraFlags to zero
    writer.write_u16(0)?;
    writer.write_u16(OCTETS_TO_INLINE_QOS)?;
    writer.write_value(&self.reader_id)?;
    writer.write_value(&self.writer_id)?;
    writer.write_value(&self.writer_sn)?;
    if let Some(inline_qos) = self.inline_qos.as_ref() {
      writer.write_value(inline_qos)?;
    }
    if let Some(serialized_payload) = self.serialized_payload.as_ref() {
      writer.write_value(serialized_payload)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use speedy::Endianness;

  use super::*;
  use crate::messages::{
    parameter_list::ParameterId, serialized_payload::RepresentationIdentifier,
    submessages::submessage_flag::FromEndianness,
  };

  #[test]
  fn deserialize_captured_data() {
    // DATA body (after submessage header) of a ShapesDemo sample, little endian
    let serialized = Bytes::from_static(&[
      0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00,
      0x00, 0x5b, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x52, 0x45,
      0x44, 0x00, 0x69, 0x00, 0x00, 0x00, 0x17, 0x00, 0x00, 0x00, 0x1e, 0x00, 0x00, 0x00,
    ]);
    let flags = BitFlags::<DATA_Flags>::from_bits_truncate(0x05);
    let data = Data::deserialize_data(&serialized, flags).unwrap();
    assert_eq!(data.writer_sn, SequenceNumber::from(91));
    assert_eq!(data.inline_qos, None);
    let payload = data.serialized_payload.clone().unwrap();
    assert_eq!(
      payload.representation_identifier,
      RepresentationIdentifier::CDR_LE
    );
    assert_eq!(payload.value.len(), 20);

    let written = data
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .unwrap();
    assert_eq!(&written[..], &serialized[..]);
    assert_eq!(data.len_serialized(), serialized.len());
  }

  #[test]
  fn inline_qos_and_key_only_payload() {
    let mut qos = ParameterList::new();
    qos.push(ParameterId::PID_STATUS_INFO, vec![0, 0, 0, 1]);
    let data = Data {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      writer_sn: SequenceNumber::from(3),
      inline_qos: Some(qos),
      serialized_payload: Some(SerializedPayload::new(
        RepresentationIdentifier::CDR_BE,
        vec![0, 0, 0, 9],
      )),
    };
    let mut flags = BitFlags::<DATA_Flags>::from_endianness(Endianness::BigEndian);
    flags.insert(DATA_Flags::InlineQos);
    flags.insert(DATA_Flags::Key);
    let bytes = Bytes::from(data.write_to_vec_with_ctx(Endianness::BigEndian).unwrap());
    let back = Data::deserialize_data(&bytes, flags).unwrap();
    assert_eq!(back, data);
  }

  #[test]
  fn truncated_data_is_rejected() {
    let flags = BitFlags::<DATA_Flags>::from_bits_truncate(0x05);
    let short = Bytes::from_static(&[0x00, 0x00, 0x10, 0x00, 0x00]);
    assert!(Data::deserialize_data(&short, flags).is_err());

    let bad_offset = Bytes::from_static(&[
      0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00,
      0x00, 0x5b, 0x00, 0x00, 0x00,
    ]);
    assert!(Data::deserialize_data(&bad_offset, flags).is_err());
  }
}
