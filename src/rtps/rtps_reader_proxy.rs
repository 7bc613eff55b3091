use std::collections::BTreeSet;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::qos::QosPolicies,
  messages::submessages::submessages::AckNack,
  structure::{
    guid::GUID,
    locator::Locator,
    sequence_number::{SequenceNumber, SequenceNumberRange},
  },
};

/// ReaderProxy class represents the information an RTPS StatefulWriter
/// maintains on each matched RTPS Reader
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct RtpsReaderProxy {
  /// Identifies the remote matched RTPS Reader that is represented by the
  /// ReaderProxy
  pub remote_reader_guid: GUID,
  /// List of unicast locators (transport, address, port combinations) that can
  /// be used to send messages to the matched RTPS Reader. The list may be empty
  pub unicast_locator_list: Vec<Locator>,
  /// List of multicast locators that can be used to send messages to the
  /// matched RTPS Reader. The list may be empty
  pub multicast_locator_list: Vec<Locator>,

  /// Specifies whether the remote matched RTPS Reader expects in-line QoS to be
  /// sent along with any data.
  expects_in_line_qos: bool,

  /// Reliable readers acknowledge and get repairs. Best-effort ones get each
  /// DATA once.
  pub reliable: bool,

  // Reader has positively acked all SequenceNumbers _before_ this.
  // This is directly the same as readerSNState.base in ACKNACK submessage.
  pub all_acked_before: SequenceNumber,

  // SequenceNumbers to be sent to Reader. Both unsent and requested by ACKNACK.
  unsent_changes: BTreeSet<SequenceNumber>,

  // Changes we are not going to send to this Reader. They are sent as GAP
  // until acked.
  pending_gap: BTreeSet<SequenceNumber>,

  // true = a repair is scheduled or in progress
  pub repair_mode: bool,

  // Highest ACKNACK count seen, for detecting duplicates
  last_acknack_count: Option<i32>,

  qos: QosPolicies,
}

impl RtpsReaderProxy {
  pub fn new(
    remote_reader_guid: GUID,
    qos: QosPolicies,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
  ) -> Self {
    Self {
      remote_reader_guid,
      unicast_locator_list,
      multicast_locator_list,
      expects_in_line_qos: false,
      reliable: qos.is_reliable(),
      all_acked_before: SequenceNumber::new(1),
      unsent_changes: BTreeSet::new(),
      pending_gap: BTreeSet::new(),
      repair_mode: false,
      last_acknack_count: None,
      qos,
    }
  }

  pub fn with_inline_qos(mut self, expects_in_line_qos: bool) -> Self {
    self.expects_in_line_qos = expects_in_line_qos;
    self
  }

  // We get a (discovery) update on the properties of this remote Reader.
  // Update those properties that Discovery tells us, but keep run-time data.
  pub fn update(&mut self, update: &Self) {
    if self.remote_reader_guid != update.remote_reader_guid {
      error!("Update tried to change ReaderProxy GUID!");
      return;
    }
    if self.unicast_locator_list != update.unicast_locator_list
      || self.multicast_locator_list != update.multicast_locator_list
    {
      info!(
        "Update changes Locators in ReaderProxy {:?}",
        self.remote_reader_guid
      );
      self
        .unicast_locator_list
        .clone_from(&update.unicast_locator_list);
      self
        .multicast_locator_list
        .clone_from(&update.multicast_locator_list);
    }
    self.expects_in_line_qos = update.expects_in_line_qos;
    if self.qos != update.qos {
      debug!("Update changes QoS in ReaderProxy {:?}", self.remote_reader_guid);
      self.qos = update.qos.clone();
      self.reliable = self.qos.is_reliable();
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn expects_inline_qos(&self) -> bool {
    self.expects_in_line_qos
  }

  pub fn has_unsent_changes(&self) -> bool {
    !self.unsent_changes.is_empty()
  }

  pub fn mark_change_sent(&mut self, seq_num: SequenceNumber) {
    self.unsent_changes.remove(&seq_num);
  }

  /// Takes out everything that is to be sent.
  pub fn take_unsent_changes(&mut self) -> BTreeSet<SequenceNumber> {
    std::mem::take(&mut self.unsent_changes)
  }

  // Changes are actually sent (via DATA) or reported missing as GAP
  pub fn remove_from_unsent_set_all_before(&mut self, before_seq_num: SequenceNumber) {
    // split_off returns everything after the given key, including the key.
    self.unsent_changes = self.unsent_changes.split_off(&before_seq_num);
  }

  /// Updates the proxy from an ACKNACK. Returns false if the ACKNACK is a
  /// duplicate (count not increasing) and was ignored.
  pub fn handle_ack_nack(&mut self, acknack: &AckNack, last_available: SequenceNumber) -> bool {
    if let Some(last_count) = self.last_acknack_count {
      if acknack.count <= last_count {
        trace!(
          "Duplicate ACKNACK count={} from {:?}, already have {}",
          acknack.count,
          self.remote_reader_guid,
          last_count
        );
        return false;
      }
    }
    self.last_acknack_count = Some(acknack.count);

    // A reader cannot acknowledge what was never written.
    let new_all_acked_before = acknack
      .reader_sn_state
      .base()
      .min(last_available.plus_1());
    if new_all_acked_before < self.all_acked_before {
      // Reordered or stale ACKNACK. Still look at the requests.
      debug!(
        "all_acked_before would go backwards! old={:?} new={:?}",
        self.all_acked_before, new_all_acked_before
      );
    } else {
      self.all_acked_before = new_all_acked_before;
    }
    self.remove_from_unsent_set_all_before(self.all_acked_before);

    // Insert the requested changes.
    for nack_sn in acknack.reader_sn_state.iter() {
      if nack_sn >= self.all_acked_before {
        self.unsent_changes.insert(nack_sn);
      }
    }
    if let Some(&high) = self.unsent_changes.iter().next_back() {
      if high > last_available {
        warn!(
          "ReaderProxy {:?} asks for {:?} but I have only up to {:?}. Truncating request.",
          self.remote_reader_guid, high, last_available
        );
        // Requesting something which is not yet available is unreasonable.
        self.unsent_changes.split_off(&last_available.plus_1());
      }
    }
    // AckNack also clears pending_gap
    self.pending_gap = self.pending_gap.split_off(&self.all_acked_before);
    true
  }

  pub fn set_pending_gap_range(&mut self, first: SequenceNumber, last: SequenceNumber) {
    self.pending_gap.extend(SequenceNumberRange::new(first, last));
  }

  pub fn pending_gap(&self) -> &BTreeSet<SequenceNumber> {
    &self.pending_gap
  }

  /// this should be called every time a new CacheChange is set to RTPS writer
  /// HistoryCache
  pub fn notify_new_cache_change(&mut self, sequence_number: SequenceNumber) {
    if sequence_number <= SequenceNumber::zero() {
      error!(
        "new cache change with {:?}! bad! reader GUID = {:?}",
        sequence_number, self.remote_reader_guid
      );
      return;
    }
    self.unsent_changes.insert(sequence_number);
  }

  pub fn acked_up_to_before(&self) -> SequenceNumber {
    self.all_acked_before
  }

  pub fn has_acked(&self, sequence_number: SequenceNumber) -> bool {
    sequence_number < self.all_acked_before
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    dds::qos::policy::Reliability,
    structure::{
      duration::Duration,
      guid::{EntityId, GuidPrefix},
      sequence_number::SequenceNumberSet,
    },
  };

  fn proxy() -> RtpsReaderProxy {
    let qos = QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .build();
    RtpsReaderProxy::new(
      GUID::new(GuidPrefix::new(&[1; 12]), EntityId::SEDP_BUILTIN_PUBLICATIONS_READER),
      qos,
      vec![],
      vec![],
    )
  }

  fn acknack(base: i64, missing: &[i64], count: i32) -> AckNack {
    let mut set = SequenceNumberSet::new(SequenceNumber::new(base), 32);
    for m in missing {
      set.insert(SequenceNumber::new(*m));
    }
    AckNack {
      reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      reader_sn_state: set,
      count,
    }
  }

  #[test]
  fn acknack_moves_watermark_and_requests() {
    let mut rp = proxy();
    assert!(rp.reliable);
    for sn in 1..=5 {
      rp.notify_new_cache_change(SequenceNumber::new(sn));
    }
    assert!(rp.handle_ack_nack(&acknack(3, &[3, 5], 1), SequenceNumber::new(5)));
    assert_eq!(rp.acked_up_to_before(), SequenceNumber::new(3));
    assert!(rp.has_acked(SequenceNumber::new(2)));
    // 1 and 2 acked, 3 4 5 still unsent
    assert_eq!(
      rp.take_unsent_changes().into_iter().collect::<Vec<_>>(),
      vec![SequenceNumber::new(3), SequenceNumber::new(4), SequenceNumber::new(5)]
    );
  }

  #[test]
  fn acknack_beyond_last_written_is_clamped() {
    let mut rp = proxy();
    rp.notify_new_cache_change(SequenceNumber::new(1));
    assert!(rp.handle_ack_nack(&acknack(100, &[], 1), SequenceNumber::new(1)));
    assert_eq!(rp.acked_up_to_before(), SequenceNumber::new(2));
    rp.notify_new_cache_change(SequenceNumber::new(2));
    assert!(!rp.has_acked(SequenceNumber::new(2)));
    assert!(rp.has_unsent_changes());
  }

  #[test]
  fn duplicate_acknack_is_ignored() {
    let mut rp = proxy();
    assert!(rp.handle_ack_nack(&acknack(2, &[], 4), SequenceNumber::new(5)));
    assert!(!rp.handle_ack_nack(&acknack(6, &[], 4), SequenceNumber::new(5)));
    assert_eq!(rp.acked_up_to_before(), SequenceNumber::new(2));
  }

  #[test]
  fn requests_beyond_last_written_are_truncated() {
    let mut rp = proxy();
    rp.handle_ack_nack(&acknack(1, &[1, 2, 9], 1), SequenceNumber::new(2));
    assert_eq!(
      rp.take_unsent_changes().into_iter().collect::<Vec<_>>(),
      vec![SequenceNumber::new(1), SequenceNumber::new(2)]
    );
    assert!(!rp.has_unsent_changes());
  }

  #[test]
  fn pending_gap_clears_when_acked() {
    let mut rp = proxy();
    rp.set_pending_gap_range(SequenceNumber::new(1), SequenceNumber::new(3));
    assert_eq!(rp.pending_gap().len(), 3);
    rp.handle_ack_nack(&acknack(3, &[], 1), SequenceNumber::new(4));
    assert_eq!(
      rp.pending_gap().iter().copied().collect::<Vec<_>>(),
      vec![SequenceNumber::new(3)]
    );
  }
}
