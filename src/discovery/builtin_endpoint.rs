use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// Bitmask of the builtin discovery endpoints a participant has,
/// announced in SPDP as PID_BUILTIN_ENDPOINT_SET.
#[derive(
  Debug, PartialEq, Eq, Copy, Clone, Readable, Writable, Serialize, Deserialize, Default,
)]
pub struct BuiltinEndpointSet {
  value: u32,
}

impl BuiltinEndpointSet {
  pub const PARTICIPANT_ANNOUNCER: u32 = 0x00000001;
  pub const PARTICIPANT_DETECTOR: u32 = 0x00000002;
  pub const PUBLICATIONS_ANNOUNCER: u32 = 0x00000004;
  pub const PUBLICATIONS_DETECTOR: u32 = 0x00000008;
  pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 0x00000010;
  pub const SUBSCRIPTIONS_DETECTOR: u32 = 0x00000020;

  /// The set this implementation has: SPDP and SEDP, both directions.
  pub const THIS_IMPLEMENTATION: BuiltinEndpointSet = BuiltinEndpointSet {
    value: Self::PARTICIPANT_ANNOUNCER
      | Self::PARTICIPANT_DETECTOR
      | Self::PUBLICATIONS_ANNOUNCER
      | Self::PUBLICATIONS_DETECTOR
      | Self::SUBSCRIPTIONS_ANNOUNCER
      | Self::SUBSCRIPTIONS_DETECTOR,
  };

  pub fn from_u32(value: u32) -> Self {
    Self { value }
  }

  pub fn as_u32(self) -> u32 {
    self.value
  }

  pub fn contains(&self, other: u32) -> bool {
    (self.value & other) == other
  }
}
