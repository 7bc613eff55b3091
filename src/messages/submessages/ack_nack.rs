use speedy::{Readable, Writable};

use crate::structure::{guid::EntityId, sequence_number::SequenceNumberSet};

/// This Submessage is used to communicate the state of a Reader to a
/// Writer.
///
/// The Submessage allows the Reader to inform the Writer about
/// the sequence numbers it has received and which ones it is still
/// missing. This Submessage can be used to do both positive
/// and negative acknowledgments.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct AckNack {
  /// Identifies the Reader entity that acknowledges receipt of certain
  /// sequence numbers and/or requests to receive certain sequence numbers.
  pub reader_id: EntityId,

  /// Identifies the Writer entity that is the target of the AckNack
  /// message. This is the Writer Entity that is being asked to re-send
  /// some sequence numbers or is being informed of the reception of
  /// certain sequence numbers.
  pub writer_id: EntityId,

  /// Communicates the state of the reader to the writer.
  /// All sequence numbers up to the one prior to readerSNState.bitmapBase
  /// are confirmed as received by the reader. The sequence numbers that
  /// appear in the set indicate missing sequence numbers on the reader
  /// side. The ones that do not appear in the set are undetermined (could
  /// be received or not).
  pub reader_sn_state: SequenceNumberSet,

  /// A counter that is incremented each time a new AckNack message is sent.
  /// Provides the means for a Writer to detect duplicate AckNack messages
  /// that can result from the presence of redundant communication paths.
  pub count: i32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::sequence_number::SequenceNumber;

  serialization_test!( type = AckNack,
  {
      acknack,
      AckNack {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(0)),
          count: 1,
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01]
  });

  #[test]
  fn acknack_with_missing_set() {
    use speedy::Endianness;
    let mut set = SequenceNumberSet::new(SequenceNumber::from(5), 3);
    set.insert(SequenceNumber::from(5));
    set.insert(SequenceNumber::from(7));
    let acknack = AckNack {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::UNKNOWN,
      reader_sn_state: set,
      count: 2,
    };
    let bytes = acknack.write_to_vec_with_ctx(Endianness::BigEndian).unwrap();
    // ids 8, base 8, numBits 4, one bitmap word 4, count 4
    assert_eq!(bytes.len(), 28);
    assert_eq!(&bytes[20..24], &[0b1010_0000, 0, 0, 0]);
    let back = AckNack::read_from_buffer_with_ctx(Endianness::BigEndian, &bytes).unwrap();
    let missing: Vec<i64> = back.reader_sn_state.iter().map(i64::from).collect();
    assert_eq!(missing, vec![5, 7]);
  }
}
