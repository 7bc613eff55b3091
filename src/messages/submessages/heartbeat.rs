use speedy::{Readable, Writable};

use crate::structure::{guid::EntityId, sequence_number::SequenceNumber};

/// Writer to Reader: sequence numbers `first_sn..=last_sn` are available.
/// `last_sn == first_sn - 1` announces an empty history.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Heartbeat {
  /// ENTITYID_UNKNOWN addresses every matched reader of the writer.
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub first_sn: SequenceNumber,
  pub last_sn: SequenceNumber,
  /// Grows with every HEARTBEAT sent, so that a reader can drop copies
  /// arriving over redundant paths.
  pub count: i32,
}

impl Heartbeat {
  /// RTPS 8.3.7.5.3: first_sn must be positive and the range may be empty
  /// but not negative.
  pub fn is_valid(&self) -> bool {
    self.first_sn >= SequenceNumber::new(1) && self.last_sn >= self.first_sn.minus_1()
  }
}
