use std::fmt;

use speedy::{Readable, Writable};

/// Submessage kind octet, RTPS spec v2.3 Table 9.13.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Readable, Writable, Clone, Copy)]
pub struct SubmessageKind {
  value: u8,
}

impl SubmessageKind {
  pub const PAD: SubmessageKind = SubmessageKind { value: 0x01 };
  pub const ACKNACK: SubmessageKind = SubmessageKind { value: 0x06 };
  pub const HEARTBEAT: SubmessageKind = SubmessageKind { value: 0x07 };
  pub const GAP: SubmessageKind = SubmessageKind { value: 0x08 };
  pub const INFO_TS: SubmessageKind = SubmessageKind { value: 0x09 };
  pub const INFO_SRC: SubmessageKind = SubmessageKind { value: 0x0c };
  pub const INFO_DST: SubmessageKind = SubmessageKind { value: 0x0e };
  pub const DATA: SubmessageKind = SubmessageKind { value: 0x15 };
}

impl From<u8> for SubmessageKind {
  fn from(value: u8) -> Self {
    SubmessageKind { value }
  }
}

impl From<SubmessageKind> for u8 {
  fn from(kind: SubmessageKind) -> u8 {
    kind.value
  }
}

impl fmt::Debug for SubmessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      SubmessageKind::PAD => f.write_str("PAD"),
      SubmessageKind::ACKNACK => f.write_str("ACKNACK"),
      SubmessageKind::HEARTBEAT => f.write_str("HEARTBEAT"),
      SubmessageKind::GAP => f.write_str("GAP"),
      SubmessageKind::INFO_TS => f.write_str("INFO_TS"),
      SubmessageKind::INFO_SRC => f.write_str("INFO_SRC"),
      SubmessageKind::INFO_DST => f.write_str("INFO_DST"),
      SubmessageKind::DATA => f.write_str("DATA"),
      SubmessageKind { value: other } => write!(f, "SubmessageKind {{ value: {:#04x} }}", other),
    }
  }
}
