//
// Communication status changes, delivered two ways:
//
// * as values on a status channel, which the application may poll
//   (`StatusEvented`)
// * as calls to a listener trait object attached at entity creation.
//   Listeners run on protocol threads and must not block.
//
use std::sync::Arc;

use mio::Evented;
use mio_extras::channel as mio_channel;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::qos::QosPolicyId,
  structure::{guid::GUID, instance_handle::InstanceHandle, sequence_number::SequenceNumber},
};

/// Types implementing this trait can be registered to a poll and
/// polled for status events.
pub trait StatusEvented<E> {
  fn as_status_evented(&mut self) -> &dyn Evented;
  fn try_recv_status(&self) -> Option<E>;
}

// Receiving end held by DataWriter / DataReader
pub(crate) struct StatusReceiver<E> {
  channel_receiver: mio_channel::Receiver<E>,
}

impl<E> StatusReceiver<E> {
  pub fn new(channel_receiver: mio_channel::Receiver<E>) -> StatusReceiver<E> {
    StatusReceiver::<E> { channel_receiver }
  }
}

impl<E> StatusEvented<E> for StatusReceiver<E> {
  fn as_status_evented(&mut self) -> &dyn Evented {
    &self.channel_receiver
  }

  fn try_recv_status(&self) -> Option<E> {
    self.channel_receiver.try_recv().ok()
  }
}

/// Status queue depth. When the application does not poll statuses, newer
/// events are dropped rather than blocking the protocol thread.
pub(crate) const STATUS_CHANNEL_CAPACITY: usize = 64;

pub(crate) fn status_channel<E>() -> (mio_channel::SyncSender<E>, StatusReceiver<E>) {
  let (sender, receiver) = mio_channel::sync_channel(STATUS_CHANNEL_CAPACITY);
  (sender, StatusReceiver::new(receiver))
}

pub(crate) fn send_status<E: std::fmt::Debug>(sender: &mio_channel::SyncSender<E>, status: E) {
  match sender.try_send(status) {
    Ok(()) => (),
    Err(mio_channel::TrySendError::Full(s)) => {
      trace!("Status channel full, dropping {:?}", s);
    }
    Err(mio_channel::TrySendError::Disconnected(_)) => {
      // The application side handle is gone. Nobody is interested.
    }
    Err(mio_channel::TrySendError::Io(e)) => {
      warn!("Status channel send failed: {:?}", e);
    }
  }
}

/// Whether a remote endpoint became matched or was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchingStatus {
  Matched,
  Removed,
}

/// Event value produced when a remote endpoint is matched or unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchingInfo {
  pub remote_guid: GUID,
  pub status: MatchingStatus,
}

impl MatchingInfo {
  pub fn matched(remote_guid: GUID) -> MatchingInfo {
    MatchingInfo {
      remote_guid,
      status: MatchingStatus::Matched,
    }
  }

  pub fn removed(remote_guid: GUID) -> MatchingInfo {
    MatchingInfo {
      remote_guid,
      status: MatchingStatus::Removed,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataReaderStatus {
  /// Sample was rejected, because resource limits would have been exeeded.
  SampleRejected {
    count: CountWithChange,
    last_reason: SampleRejectedStatusKind,
    last_instance_handle: InstanceHandle,
  },
  /// This DataReader has requested a QoS policy that is incompatible with
  /// what is offered by `writer`.
  RequestedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    writer: GUID,
  },
  /// Samples announced by `writer` will never be received.
  SampleLost {
    count: CountWithChange,
    writer: GUID,
    sequence_numbers: Vec<SequenceNumber>,
  },
  /// The DataReader has found a DataWriter that matches the Topic and has
  /// compatible QoS, or has ceased to be matched with a DataWriter that was
  /// previously considered to be matched.
  SubscriptionMatched {
    total: CountWithChange,
    current: CountWithChange,
    info: MatchingInfo,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataWriterStatus {
  OfferedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    reader: GUID,
  },
  PublicationMatched {
    total: CountWithChange,
    current: CountWithChange,
    info: MatchingInfo,
  },
}

/// Listener for DataWriter events. All methods default to no-ops.
pub trait DataWriterListener: Send + Sync {
  fn on_publication_matched(&self, _info: MatchingInfo) {}
  fn on_offered_incompatible_qos(&self, _reader: GUID, _policy: QosPolicyId) {}
}

/// Listener for DataReader events. All methods default to no-ops.
pub trait DataReaderListener: Send + Sync {
  fn on_data_available(&self) {}
  fn on_subscription_matched(&self, _info: MatchingInfo) {}
  fn on_requested_incompatible_qos(&self, _writer: GUID, _policy: QosPolicyId) {}
  fn on_sample_lost(&self, _writer: GUID, _sequence_numbers: &[SequenceNumber]) {}
  fn on_sample_rejected(&self, _reason: SampleRejectedStatusKind, _instance: InstanceHandle) {}
}

/// Helper to contain same count actions across statuses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CountWithChange {
  // 2.3. Platform Specific Model defines these as "long", which appears to be 32-bit signed.
  count: i32,
  count_change: i32,
}

impl CountWithChange {
  pub(crate) fn new(count: i32, count_change: i32) -> CountWithChange {
    CountWithChange {
      count,
      count_change,
    }
  }

  pub fn count(&self) -> i32 {
    self.count
  }

  pub fn count_change(&self) -> i32 {
    self.count_change
  }
}

/// Running totals kept by a protocol-side endpoint, from which the
/// `CountWithChange` values of status events are produced.
#[derive(Debug, Default, Clone)]
pub(crate) struct StatusCounters {
  matched_total: i32,
  matched_current: i32,
  incompatible: i32,
  lost: i32,
  rejected: i32,
}

impl StatusCounters {
  pub fn on_match(&mut self) -> (CountWithChange, CountWithChange) {
    self.matched_total += 1;
    self.matched_current += 1;
    (
      CountWithChange::new(self.matched_total, 1),
      CountWithChange::new(self.matched_current, 1),
    )
  }

  pub fn on_unmatch(&mut self) -> (CountWithChange, CountWithChange) {
    self.matched_current -= 1;
    (
      CountWithChange::new(self.matched_total, 0),
      CountWithChange::new(self.matched_current, -1),
    )
  }

  pub fn on_incompatible(&mut self) -> CountWithChange {
    self.incompatible += 1;
    CountWithChange::new(self.incompatible, 1)
  }

  pub fn on_lost(&mut self, n: usize) -> CountWithChange {
    self.lost += n as i32;
    CountWithChange::new(self.lost, n as i32)
  }

  pub fn on_rejected(&mut self) -> CountWithChange {
    self.rejected += 1;
    CountWithChange::new(self.rejected, 1)
  }
}

// sample rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRejectedStatusKind {
  NotRejected,
  ByInstancesLimit,
  BySamplesLimit,
  BySamplesPerInstanceLimit,
}

pub(crate) type WriterListenerRef = Option<Arc<dyn DataWriterListener>>;
pub(crate) type ReaderListenerRef = Option<Arc<dyn DataReaderListener>>;
