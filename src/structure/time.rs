use std::{convert::TryFrom, fmt};

use speedy::{Readable, Writable};
use serde::{Deserialize, Serialize};

/// NTP-style time (IETF RFC 1305): seconds + fraction / 2^32.
/// This is the timestamp carried by INFO_TS and stored in cache changes.
#[derive(
  PartialEq, Eq, PartialOrd, Ord, Hash, Readable, Writable, Clone, Copy, Serialize, Deserialize,
)]
pub struct Timestamp {
  seconds: u32,
  fraction: u32,
}

impl Timestamp {
  pub const ZERO: Timestamp = Timestamp {
    seconds: 0,
    fraction: 0,
  };
  pub const INVALID: Timestamp = Timestamp {
    seconds: 0xFFFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };
  pub const INFINITE: Timestamp = Timestamp {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub fn now() -> Timestamp {
    let now = chrono::Utc::now();
    let secs = now.timestamp().max(0) as u64;
    Timestamp::from_nanos(secs * 1_000_000_000 + u64::from(now.timestamp_subsec_nanos()))
  }

  pub fn from_nanos(nanos_since_epoch: u64) -> Timestamp {
    let seconds = u32::try_from(nanos_since_epoch / 1_000_000_000).unwrap_or(u32::MAX);
    let subsec_nanos = nanos_since_epoch % 1_000_000_000;
    Timestamp {
      seconds,
      fraction: ((subsec_nanos << 32) / 1_000_000_000) as u32,
    }
  }

  pub fn to_nanos(&self) -> u64 {
    u64::from(self.seconds) * 1_000_000_000
      + ((u64::from(self.fraction) * 1_000_000_000) >> 32)
  }
}

impl fmt::Debug for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Timestamp::INVALID => f.write_str("Timestamp::INVALID"),
      Timestamp::INFINITE => f.write_str("Timestamp::INFINITE"),
      _ => write!(f, "{}.{:09}", self.seconds, self.to_nanos() % 1_000_000_000),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nanos_survive_conversion() {
    let ts = Timestamp::from_nanos(1_600_000_000_250_000_000);
    let back = ts.to_nanos();
    // fraction has a resolution of ~0.23 ns
    assert!((back as i64 - 1_600_000_000_250_000_000i64).abs() <= 1);
  }

  #[test]
  fn now_is_after_2020() {
    assert!(Timestamp::now() > Timestamp::from_nanos(1_577_836_800_000_000_000));
  }

  serialization_test!( type = Timestamp,
  {
      timestamp_zero,
      Timestamp::ZERO,
      le = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
  },
  {
      timestamp_infinite,
      Timestamp::INFINITE,
      le = [0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF],
      be = [0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
  },
  {
      timestamp_from_wireshark,
      Timestamp { seconds: 1_519_152_760, fraction: 1_328_210_046 },
      le = [0x78, 0x6E, 0x8C, 0x5A, 0x7E, 0xE0, 0x2A, 0x4F],
      be = [0x5A, 0x8C, 0x6E, 0x78, 0x4F, 0x2A, 0xE0, 0x7E]
  });
}
