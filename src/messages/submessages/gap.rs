use speedy::{Readable, Writable};

use crate::structure::{
  guid::EntityId,
  sequence_number::{SequenceNumber, SequenceNumberRange, SequenceNumberSet},
};

/// This Submessage is sent from an RTPS Writer to an RTPS Reader and
/// indicates to the RTPS Reader that a range of sequence numbers
/// is no longer relevant. The set may be a contiguous range of
/// sequence numbers or a specific set of sequence numbers.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Gap {
  /// Identifies the Reader Entity that is being informed of the
  /// irrelevance of a set of sequence numbers.
  pub reader_id: EntityId,

  /// Identifies the Writer Entity to which the range of sequence
  /// numbers applies.
  pub writer_id: EntityId,

  /// Identifies the first sequence number in the interval of
  /// irrelevant sequence numbers
  pub gap_start: SequenceNumber,

  /// The interval `gap_start .. gap_list.base()` is irrelevant, and so are
  /// the members of the set.
  pub gap_list: SequenceNumberSet,
}

impl Gap {
  /// The contiguous part `gap_start ..= gap_list.base - 1`. May be empty.
  pub fn irrelevant_range(&self) -> SequenceNumberRange {
    SequenceNumber::range_inclusive(self.gap_start, self.gap_list.base().minus_1())
  }

  /// A GAP must start at 1 or above, and its list must not begin before
  /// `gap_start` nor reach `i64::MAX`.
  pub fn is_valid(&self) -> bool {
    let base = self.gap_list.base();
    self.gap_start >= SequenceNumber::new(1)
      && base >= self.gap_start
      && i64::from(base)
        .checked_add(i64::from(self.gap_list.num_bits().max(1)))
        .is_some()
  }

  /// Whether `sn` is declared irrelevant by this GAP.
  pub fn contains(&self, sn: SequenceNumber) -> bool {
    (sn >= self.gap_start && sn < self.gap_list.base()) || self.gap_list.iter().any(|s| s == sn)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  serialization_test!( type = Gap,
  {
      gap,
      Gap {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          gap_start: SequenceNumber::from(42),
          gap_list: SequenceNumberSet::new_empty(SequenceNumber::from(7))
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x07, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x07,
            0x00, 0x00, 0x00, 0x00]
  });

  #[test]
  fn irrelevant_range_and_list() {
    let mut list = SequenceNumberSet::new(SequenceNumber::from(5), 4);
    list.insert(SequenceNumber::from(6));
    list.insert(SequenceNumber::from(8));
    let gap = Gap {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::UNKNOWN,
      gap_start: SequenceNumber::from(2),
      gap_list: list,
    };
    let range: Vec<i64> = gap.irrelevant_range().map(i64::from).collect();
    assert_eq!(range, vec![2, 3, 4]);
    let all: Vec<i64> = (0..10)
      .map(SequenceNumber::from)
      .filter(|sn| gap.contains(*sn))
      .map(i64::from)
      .collect();
    assert_eq!(all, vec![2, 3, 4, 6, 8]);
  }

  #[test]
  fn validity_bounds() {
    let gap = |start: i64, base: i64, num_bits: u32| Gap {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::UNKNOWN,
      gap_start: SequenceNumber::from(start),
      gap_list: SequenceNumberSet::new(SequenceNumber::from(base), num_bits),
    };
    assert!(gap(1, 1, 0).is_valid());
    assert!(gap(3, 10, 32).is_valid());
    assert!(!gap(0, 1, 0).is_valid());
    assert!(!gap(5, 4, 0).is_valid());
    assert!(!gap(1, i64::MAX, 1).is_valid());
    assert!(!gap(1, i64::MAX - 10, 32).is_valid());
    assert!(gap(1, i64::MAX - 40, 32).is_valid());
  }
}
