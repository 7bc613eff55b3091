use speedy::{Readable, Writable};

use crate::structure::guid::GuidPrefix;

/// Sets the GuidPrefix that reader EntityIds in the following submessages of
/// the same message belong to.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Readable, Writable)]
pub struct InfoDestination {
  pub guid_prefix: GuidPrefix,
}

impl InfoDestination {
  /// Participant the following submessages are for. UNKNOWN means the
  /// receiving participant itself.
  pub fn destination(&self, receiver: GuidPrefix) -> GuidPrefix {
    if self.guid_prefix == GuidPrefix::UNKNOWN {
      receiver
    } else {
      self.guid_prefix
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_means_receiver() {
    let me = GuidPrefix::new(&[7; 12]);
    let other = GuidPrefix::new(&[9; 12]);
    let to_unknown = InfoDestination {
      guid_prefix: GuidPrefix::UNKNOWN,
    };
    assert_eq!(to_unknown.destination(me), me);
    let to_other = InfoDestination { guid_prefix: other };
    assert_eq!(to_other.destination(me), other);
  }

  serialization_test!( type = InfoDestination,
  {
      info_destination,
      InfoDestination {
          guid_prefix: GuidPrefix::new(&[0xAA, 0x01, 0x0F, 0x42, 0x00, 0x00, 0x1C, 0x3D, 0x00, 0x00, 0x00, 0x02]),
      },
      // a GuidPrefix is an octet array, the same in both byte orders
      le = [0xAA, 0x01, 0x0F, 0x42,
            0x00, 0x00, 0x1C, 0x3D,
            0x00, 0x00, 0x00, 0x02],
      be = [0xAA, 0x01, 0x0F, 0x42,
            0x00, 0x00, 0x1C, 0x3D,
            0x00, 0x00, 0x00, 0x02]
  });
}
