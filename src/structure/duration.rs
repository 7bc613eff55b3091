use std::{convert::TryFrom, time::Duration as StdDuration};

use speedy::{Readable, Writable};
use serde::{Deserialize, Serialize};

/// RTPS Duration_t: seconds + fraction / 2^32. Used on the wire and in QoS.
/// Application code works with `std::time::Duration` and converts.
#[derive(
  Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Readable, Writable, Serialize, Deserialize, Copy, Clone,
)]
pub struct Duration {
  seconds: i32,
  fraction: u32,
}

impl Duration {
  pub const DURATION_ZERO: Duration = Duration {
    seconds: 0,
    fraction: 0,
  };
  pub const DURATION_INFINITE: Duration = Duration {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub const fn from_secs(secs: i32) -> Duration {
    Duration {
      seconds: secs,
      fraction: 0,
    }
  }

  pub fn from_millis(millis: i64) -> Duration {
    Duration::from(StdDuration::from_millis(millis.max(0) as u64))
  }

  pub fn is_infinite(&self) -> bool {
    *self == Duration::DURATION_INFINITE
  }

  pub fn to_std(self) -> StdDuration {
    StdDuration::from(self)
  }
}

impl From<StdDuration> for Duration {
  fn from(duration: StdDuration) -> Self {
    match i32::try_from(duration.as_secs()) {
      Ok(seconds) if seconds < 0x7FFF_FFFF => Duration {
        seconds,
        fraction: ((u64::from(duration.subsec_nanos()) << 32) / 1_000_000_000) as u32,
      },
      _ => Duration::DURATION_INFINITE,
    }
  }
}

impl From<Duration> for StdDuration {
  fn from(duration: Duration) -> Self {
    if duration.seconds < 0 {
      StdDuration::from_secs(0)
    } else {
      StdDuration::new(
        duration.seconds as u64,
        ((u64::from(duration.fraction) * 1_000_000_000) >> 32) as u32,
      )
    }
  }
}
