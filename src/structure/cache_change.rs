use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
  messages::serialized_payload::SerializedPayload,
  structure::{
    guid::GUID, instance_handle::InstanceHandle, sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
  NotAliveUnregistered,
}

impl ChangeKind {
  pub fn is_alive(self) -> bool {
    self == ChangeKind::Alive
  }

  /// Bits of PID_STATUS_INFO: bit 0 disposed, bit 1 unregistered.
  pub fn status_info_flags(self) -> u8 {
    match self {
      ChangeKind::Alive => 0x00,
      ChangeKind::NotAliveDisposed => 0x01,
      ChangeKind::NotAliveUnregistered => 0x02,
    }
  }

  /// Inverse of `status_info_flags`. Disposal wins if both bits are set.
  pub fn from_status_info_flags(flags: u8) -> ChangeKind {
    if flags & 0x01 != 0 {
      ChangeKind::NotAliveDisposed
    } else if flags & 0x02 != 0 {
      ChangeKind::NotAliveUnregistered
    } else {
      ChangeKind::Alive
    }
  }
}

/// One change to one instance, as made by one writer. Immutable once
/// created: the reader side copies changes out of the cache rather than
/// editing them in place.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CacheChange {
  pub kind: ChangeKind,
  pub writer_guid: GUID,
  pub sequence_number: SequenceNumber,
  /// `InstanceHandle::NIL` for keyless topics
  pub instance_handle: InstanceHandle,
  /// Sample data for `Alive`, serialized key (if known) otherwise.
  pub data_value: Option<SerializedPayload>,
  pub source_timestamp: Option<Timestamp>,
}

impl CacheChange {
  pub fn new(
    kind: ChangeKind,
    writer_guid: GUID,
    sequence_number: SequenceNumber,
    instance_handle: InstanceHandle,
    data_value: Option<SerializedPayload>,
  ) -> CacheChange {
    CacheChange {
      kind,
      writer_guid,
      sequence_number,
      instance_handle,
      data_value,
      source_timestamp: None,
    }
  }

  pub fn with_source_timestamp(mut self, timestamp: Option<Timestamp>) -> CacheChange {
    self.source_timestamp = timestamp;
    self
  }

  /// Payload bytes without the encapsulation header
  pub fn payload_bytes(&self) -> Option<&Bytes> {
    self.data_value.as_ref().map(|p| &p.value)
  }

  pub fn payload_len(&self) -> usize {
    self
      .data_value
      .as_ref()
      .map_or(0, SerializedPayload::len_serialized)
  }
}
