use std::{
  collections::BTreeMap,
  time::{Duration as StdDuration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::qos::{policy::Liveliness, QosPolicies},
  structure::{
    cache_change::CacheChange,
    guid::GUID,
    locator::Locator,
    sequence_number::{SequenceNumber, SequenceNumberSet},
  },
};

/// Sample lost reports list at most this many sequence numbers. The count is
/// always exact.
pub(crate) const MAX_LOST_REPORT: usize = 256;

/// What the Writer has told us about availability, for one Heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeartbeatOutcome {
  Duplicate,
  Accepted { lost: LostSamples },
}

/// Sequence numbers we will never get, found from GAP or from Heartbeat
/// `first_sn`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LostSamples {
  pub count: usize,
  /// At most `MAX_LOST_REPORT` of them, lowest first.
  pub sequence_numbers: Vec<SequenceNumber>,
}

impl LostSamples {
  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  fn push(&mut self, sn: SequenceNumber) {
    self.count += 1;
    if self.sequence_numbers.len() < MAX_LOST_REPORT {
      self.sequence_numbers.push(sn);
    }
  }
}

/// WriterProxy represents the information an RTPS StatefulReader maintains on
/// each matched RTPS Writer.
#[derive(Debug, Clone)]
pub(crate) struct RtpsWriterProxy {
  /// Identifies the remote matched Writer
  pub remote_writer_guid: GUID,
  /// List of unicast (address, port) combinations that can be used to send
  /// messages to the matched Writer. The list may be empty.
  pub unicast_locator_list: Vec<Locator>,
  /// List of multicast (address, port) combinations that can be used to send
  /// messages to the matched Writer. The list may be empty.
  pub multicast_locator_list: Vec<Locator>,

  // Everything below this is delivered to the cache or irrelevant.
  delivered_before: SequenceNumber,
  // Received ahead of delivered_before, waiting for the gap to close.
  out_of_order: BTreeMap<SequenceNumber, CacheChange>,
  // Irrelevant ranges above delivered_before: start -> end (inclusive).
  // Disjoint and not adjacent.
  irrelevant: BTreeMap<SequenceNumber, SequenceNumber>,
  // Highest SN the Writer has announced as available.
  announced_last: SequenceNumber,

  last_heartbeat_count: Option<i32>,
  /// An ACKNACK to this writer is scheduled.
  pub ack_pending: bool,
  acknack_count: i32,
  /// Nothing heard from the writer yet, so a preemptive ACKNACK is due.
  pub no_writer_contact: bool,

  // AUTOMATIC liveliness lease offered by the writer. None if infinite.
  liveliness_lease: Option<StdDuration>,
  last_heard: Instant,

  qos: QosPolicies,
}

impl RtpsWriterProxy {
  pub fn new(
    remote_writer_guid: GUID,
    qos: QosPolicies,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
  ) -> Self {
    Self {
      remote_writer_guid,
      unicast_locator_list,
      multicast_locator_list,
      delivered_before: SequenceNumber::new(1),
      out_of_order: BTreeMap::new(),
      irrelevant: BTreeMap::new(),
      announced_last: SequenceNumber::zero(),
      last_heartbeat_count: None,
      ack_pending: false,
      acknack_count: 0,
      no_writer_contact: true,
      liveliness_lease: automatic_lease(&qos),
      last_heard: Instant::now(),
      qos,
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  // Discovery update: take new locators and QoS, keep protocol state.
  pub fn update(&mut self, update: &Self) {
    if self.remote_writer_guid != update.remote_writer_guid {
      error!("Update tried to change WriterProxy GUID!");
      return;
    }
    self
      .unicast_locator_list
      .clone_from(&update.unicast_locator_list);
    self
      .multicast_locator_list
      .clone_from(&update.multicast_locator_list);
    self.qos = update.qos.clone();
    self.liveliness_lease = automatic_lease(&self.qos);
  }

  /// DATA, HEARTBEAT or GAP from the writer asserts its liveliness.
  pub fn heard_from(&mut self) {
    self.last_heard = Instant::now();
    self.no_writer_contact = false;
  }

  /// When the writer is considered not alive unless heard from again. None
  /// if liveliness is not enforced for this writer.
  pub fn liveliness_deadline(&self) -> Option<Instant> {
    self
      .liveliness_lease
      .and_then(|lease| self.last_heard.checked_add(lease))
  }

  /// Everything before this has been delivered or skipped.
  pub fn delivered_before(&self) -> SequenceNumber {
    self.delivered_before
  }

  pub fn next_acknack_count(&mut self) -> i32 {
    self.acknack_count += 1;
    self.acknack_count
  }

  fn is_irrelevant(&self, sn: SequenceNumber) -> bool {
    self
      .irrelevant
      .range(..=sn)
      .next_back()
      .map_or(false, |(_, &end)| sn <= end)
  }

  /// Already delivered, skipped or buffered.
  pub fn is_duplicate(&self, sn: SequenceNumber) -> bool {
    sn < self.delivered_before || self.out_of_order.contains_key(&sn) || self.is_irrelevant(sn)
  }

  /// Buffers a received change. Returns false if it was a duplicate.
  pub fn received(&mut self, change: CacheChange) -> bool {
    let sn = change.sequence_number;
    self.heard_from();
    if self.is_duplicate(sn) {
      trace!(
        "Duplicate {:?} from {:?}, delivered_before={:?}",
        sn,
        self.remote_writer_guid,
        self.delivered_before
      );
      return false;
    }
    if sn > self.announced_last {
      self.announced_last = sn;
    }
    self.out_of_order.insert(sn, change);
    true
  }

  // Skips over irrelevant ranges touching the watermark.
  fn skip_irrelevant(&mut self) {
    while let Some((&start, &end)) = self.irrelevant.iter().next() {
      if start > self.delivered_before {
        break;
      }
      self.irrelevant.remove(&start);
      if end >= self.delivered_before {
        self.delivered_before = end.plus_1();
      }
    }
  }

  /// The change that is next in order, if it has arrived. It stays
  /// buffered until `delivered` or `discard_buffered` is called.
  pub fn next_in_order(&mut self) -> Option<&CacheChange> {
    self.skip_irrelevant();
    self.out_of_order.get(&self.delivered_before)
  }

  pub fn delivered(&mut self, sn: SequenceNumber) {
    self.out_of_order.remove(&sn);
    if sn >= self.delivered_before {
      self.delivered_before = sn.plus_1();
    }
    self.skip_irrelevant();
  }

  /// Forgets a buffered change, so that it is requested again.
  pub fn discard_buffered(&mut self, sn: SequenceNumber) {
    self.out_of_order.remove(&sn);
  }

  /// Best-effort delivery: anything newer than the last delivered one goes,
  /// in arrival order. Returns false if the change is stale.
  pub fn accept_best_effort(&mut self, sn: SequenceNumber) -> bool {
    self.heard_from();
    if sn < self.delivered_before {
      return false;
    }
    self.delivered_before = sn.plus_1();
    true
  }

  /// Marks the members of `first..=last` that were never received as
  /// irrelevant and returns them, i.e. the lost samples. Changes already
  /// buffered in the range stay buffered and are delivered in order.
  pub fn irrelevant_range(&mut self, first: SequenceNumber, last: SequenceNumber) -> LostSamples {
    let mut lost = LostSamples::default();
    let first = first.max(self.delivered_before);
    if first > last {
      return lost;
    }
    // Iterating the whole range could be huge, so walk only the known
    // structure: existing irrelevant ranges and buffered changes.
    let mut known: Vec<(SequenceNumber, SequenceNumber)> = self
      .irrelevant
      .iter()
      .filter(|&(&s, &e)| e >= first && s <= last)
      .map(|(&s, &e)| (s, e))
      .collect();
    known.extend(
      self
        .out_of_order
        .range(first..=last)
        .map(|(&sn, _)| (sn, sn)),
    );
    known.sort();

    let mut runs = Vec::new();
    let mut cursor = first;
    for (s, e) in known {
      let run_end = s.minus_1().min(last);
      if cursor <= run_end {
        runs.push((cursor, run_end));
      }
      if e.plus_1() > cursor {
        cursor = e.plus_1();
      }
    }
    if cursor <= last && !(cursor == last && self.is_known(last)) {
      runs.push((cursor, last));
    }

    for (from, to) in runs {
      self.count_lost_run(&mut lost, from, to);
      self.mark_irrelevant(from, to);
    }
    if last > self.announced_last {
      self.announced_last = last;
    }
    self.skip_irrelevant();
    lost
  }

  fn is_known(&self, sn: SequenceNumber) -> bool {
    self.out_of_order.contains_key(&sn) || self.is_irrelevant(sn)
  }

  // Inserts `start..=end`, merging with overlapping or adjacent ranges.
  fn mark_irrelevant(&mut self, start: SequenceNumber, end: SequenceNumber) {
    let mut new_start = start;
    let mut new_end = end;
    let touching: Vec<(SequenceNumber, SequenceNumber)> = self
      .irrelevant
      .iter()
      .filter(|&(&s, &e)| e.plus_1() >= start && s <= end.plus_1())
      .map(|(&s, &e)| (s, e))
      .collect();
    for (s, e) in touching {
      self.irrelevant.remove(&s);
      new_start = new_start.min(s);
      new_end = new_end.max(e);
    }
    self.irrelevant.insert(new_start, new_end);
  }

  fn count_lost_run(&self, lost: &mut LostSamples, from: SequenceNumber, to: SequenceNumber) {
    if from > to {
      return;
    }
    let len = i64::from(to) - i64::from(from) + 1;
    let listed_room = MAX_LOST_REPORT.saturating_sub(lost.sequence_numbers.len());
    let listed = (len as usize).min(listed_room);
    for i in 0..listed {
      lost.push(from + SequenceNumber::new(i as i64));
    }
    lost.count += len as usize - listed;
  }

  /// Heartbeat from the writer: what is available is `first_sn..=last_sn`.
  pub fn handle_heartbeat(
    &mut self,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: i32,
  ) -> HeartbeatOutcome {
    self.heard_from();
    if let Some(last_count) = self.last_heartbeat_count {
      if count <= last_count {
        trace!(
          "Duplicate HEARTBEAT count={} from {:?}",
          count,
          self.remote_writer_guid
        );
        return HeartbeatOutcome::Duplicate;
      }
    }
    self.last_heartbeat_count = Some(count);
    if last_sn > self.announced_last {
      self.announced_last = last_sn;
    }
    // Everything below first_sn is no longer available from the writer.
    let lost = if first_sn > self.delivered_before {
      self.irrelevant_range(self.delivered_before, first_sn.minus_1())
    } else {
      LostSamples::default()
    };
    HeartbeatOutcome::Accepted { lost }
  }

  /// Missing = announced range minus received minus irrelevant.
  pub fn missing_seqnums(&self) -> Vec<SequenceNumber> {
    let base = self.delivered_before;
    let window_end = SequenceNumber::new(
      i64::from(base).saturating_add(i64::from(SequenceNumberSet::MAX_BITS) - 1),
    );
    let upper = self.announced_last.min(window_end);
    SequenceNumber::range_inclusive(base, upper)
      .filter(|sn| !self.out_of_order.contains_key(sn) && !self.is_irrelevant(*sn))
      .collect()
  }

  /// Reader state as an ACKNACK: everything before the base is acknowledged,
  /// the set lists what is missing.
  pub fn acknack_state(&self) -> SequenceNumberSet {
    let base = self.delivered_before;
    let missing = self.missing_seqnums();
    let num_bits = missing
      .last()
      .map_or(0, |&last| (i64::from(last) - i64::from(base) + 1) as u32);
    let mut set = SequenceNumberSet::new(base, num_bits);
    for sn in missing {
      set.insert(sn);
    }
    set
  }

  pub fn has_missing(&self) -> bool {
    !self.missing_seqnums().is_empty()
  }
}

// Only AUTOMATIC liveliness is enforced here. The manual kinds need explicit
// assertions from the writer application.
fn automatic_lease(qos: &QosPolicies) -> Option<StdDuration> {
  match qos.liveliness() {
    Some(Liveliness::Automatic { lease_duration }) if !lease_duration.is_infinite() => {
      Some(lease_duration.to_std()).filter(|d| *d > StdDuration::from_secs(0))
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::{
    cache_change::ChangeKind,
    guid::{EntityId, GuidPrefix},
    instance_handle::InstanceHandle,
  };

  fn guid() -> GUID {
    GUID::new(GuidPrefix::new(&[3; 12]), EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER)
  }

  fn proxy() -> RtpsWriterProxy {
    RtpsWriterProxy::new(guid(), QosPolicies::qos_none(), vec![], vec![])
  }

  fn change(sn: i64) -> CacheChange {
    CacheChange::new(
      ChangeKind::Alive,
      guid(),
      SequenceNumber::new(sn),
      InstanceHandle::NIL,
      None,
    )
  }

  fn sns(v: &[i64]) -> Vec<SequenceNumber> {
    v.iter().map(|&n| SequenceNumber::new(n)).collect()
  }

  fn drain(wp: &mut RtpsWriterProxy) -> Vec<i64> {
    let mut out = vec![];
    while let Some(sn) = wp.next_in_order().map(|c| c.sequence_number) {
      wp.delivered(sn);
      out.push(i64::from(sn));
    }
    out
  }

  #[test]
  fn out_of_order_is_buffered_until_gap_closes() {
    let mut wp = proxy();
    assert!(wp.received(change(2)));
    assert!(wp.received(change(3)));
    assert!(drain(&mut wp).is_empty());
    assert_eq!(wp.missing_seqnums(), sns(&[1]));
    assert!(wp.received(change(1)));
    assert_eq!(drain(&mut wp), vec![1, 2, 3]);
    assert!(!wp.received(change(2)));
    assert_eq!(wp.delivered_before(), SequenceNumber::new(4));
  }

  #[test]
  fn heartbeat_announces_missing_and_drops_unavailable() {
    let mut wp = proxy();
    wp.received(change(5));
    match wp.handle_heartbeat(SequenceNumber::new(3), SequenceNumber::new(7), 1) {
      HeartbeatOutcome::Accepted { lost } => {
        assert_eq!(lost.count, 2);
        assert_eq!(lost.sequence_numbers, sns(&[1, 2]));
      }
      other => panic!("{:?}", other),
    }
    assert_eq!(wp.missing_seqnums(), sns(&[3, 4, 6, 7]));
    assert_eq!(
      wp.handle_heartbeat(SequenceNumber::new(3), SequenceNumber::new(7), 1),
      HeartbeatOutcome::Duplicate
    );
    let state = wp.acknack_state();
    assert_eq!(state.base(), SequenceNumber::new(3));
    assert_eq!(state.iter().collect::<Vec<_>>(), sns(&[3, 4, 6, 7]));
  }

  #[test]
  fn gap_skips_and_reports_only_unreceived() {
    let mut wp = proxy();
    wp.received(change(3));
    wp.received(change(6));
    let lost = wp.irrelevant_range(SequenceNumber::new(1), SequenceNumber::new(4));
    // 3 was received before the gap, so it is still delivered
    assert_eq!(lost.count, 3);
    assert_eq!(lost.sequence_numbers, sns(&[1, 2, 4]));
    assert_eq!(drain(&mut wp), vec![3]);
    assert_eq!(wp.delivered_before(), SequenceNumber::new(5));
    wp.received(change(5));
    assert_eq!(drain(&mut wp), vec![5, 6]);
    // repeated gap has nothing new
    assert!(wp
      .irrelevant_range(SequenceNumber::new(1), SequenceNumber::new(4))
      .is_empty());
  }

  #[test]
  fn heartbeat_first_sn_keeps_buffered_changes() {
    let mut wp = proxy();
    wp.received(change(3));
    match wp.handle_heartbeat(SequenceNumber::new(4), SequenceNumber::new(4), 1) {
      HeartbeatOutcome::Accepted { lost } => assert_eq!(lost.sequence_numbers, sns(&[1, 2])),
      other => panic!("{:?}", other),
    }
    assert_eq!(drain(&mut wp), vec![3]);
    assert_eq!(wp.missing_seqnums(), sns(&[4]));
  }

  #[test]
  fn gap_reaching_max_sequence_number_saturates() {
    let mut wp = proxy();
    let top = SequenceNumber::new(i64::MAX);
    let lost = wp.irrelevant_range(top, top);
    assert_eq!(lost.sequence_numbers, vec![top]);
    let lost = wp.irrelevant_range(SequenceNumber::new(i64::MAX - 1), top);
    assert_eq!(lost.sequence_numbers, sns(&[i64::MAX - 1]));
    let lost = wp.irrelevant_range(SequenceNumber::new(1), SequenceNumber::new(2));
    assert_eq!(lost.sequence_numbers, sns(&[1, 2]));
    assert_eq!(wp.delivered_before(), SequenceNumber::new(3));
    assert!(wp.is_duplicate(top));

    let mut wp = proxy();
    wp.handle_heartbeat(top, top, 1);
    assert_eq!(wp.delivered_before(), top);
    assert_eq!(wp.missing_seqnums(), vec![top]);
  }

  #[test]
  fn huge_gap_is_counted_without_listing_everything() {
    let mut wp = proxy();
    let lost = wp.irrelevant_range(SequenceNumber::new(1), SequenceNumber::new(1_000_000));
    assert_eq!(lost.count, 1_000_000);
    assert_eq!(lost.sequence_numbers.len(), MAX_LOST_REPORT);
    assert_eq!(wp.delivered_before(), SequenceNumber::new(1_000_001));
  }

  #[test]
  fn gap_ahead_of_watermark_is_remembered() {
    let mut wp = proxy();
    wp.irrelevant_range(SequenceNumber::new(3), SequenceNumber::new(4));
    wp.irrelevant_range(SequenceNumber::new(5), SequenceNumber::new(5));
    assert!(wp.is_duplicate(SequenceNumber::new(4)));
    assert_eq!(wp.missing_seqnums(), sns(&[1, 2]));
    wp.received(change(2));
    wp.received(change(1));
    assert_eq!(drain(&mut wp), vec![1, 2]);
    assert_eq!(wp.delivered_before(), SequenceNumber::new(6));
  }

  #[test]
  fn discarded_change_is_requested_again() {
    let mut wp = proxy();
    wp.handle_heartbeat(SequenceNumber::new(1), SequenceNumber::new(2), 1);
    wp.received(change(1));
    let sn = wp.next_in_order().map(|c| c.sequence_number);
    assert_eq!(sn, Some(SequenceNumber::new(1)));
    wp.discard_buffered(SequenceNumber::new(1));
    assert_eq!(wp.missing_seqnums(), sns(&[1, 2]));
  }

  #[test]
  fn automatic_liveliness_lease_sets_deadline() {
    use crate::{dds::qos::policy::Liveliness, structure::duration::Duration};

    assert!(proxy().liveliness_deadline().is_none());
    let lease = |liveliness: Liveliness| QosPolicies::builder().liveliness(liveliness).build();
    let manual = RtpsWriterProxy::new(
      guid(),
      lease(Liveliness::ManualByTopic {
        lease_duration: Duration::from_secs(1),
      }),
      vec![],
      vec![],
    );
    assert!(manual.liveliness_deadline().is_none());
    let infinite = RtpsWriterProxy::new(
      guid(),
      lease(Liveliness::Automatic {
        lease_duration: Duration::DURATION_INFINITE,
      }),
      vec![],
      vec![],
    );
    assert!(infinite.liveliness_deadline().is_none());

    let mut wp = RtpsWriterProxy::new(
      guid(),
      lease(Liveliness::Automatic {
        lease_duration: Duration::from_secs(2),
      }),
      vec![],
      vec![],
    );
    let first = wp.liveliness_deadline().unwrap();
    std::thread::sleep(StdDuration::from_millis(10));
    wp.handle_heartbeat(SequenceNumber::new(1), SequenceNumber::new(0), 1);
    let refreshed = wp.liveliness_deadline().unwrap();
    assert!(refreshed > first);
    assert!(refreshed <= Instant::now() + StdDuration::from_secs(2));
  }

  #[test]
  fn best_effort_takes_newer_in_arrival_order() {
    let mut wp = proxy();
    assert!(wp.accept_best_effort(SequenceNumber::new(2)));
    assert!(!wp.accept_best_effort(SequenceNumber::new(1)));
    assert!(wp.accept_best_effort(SequenceNumber::new(5)));
    assert!(!wp.accept_best_effort(SequenceNumber::new(5)));
  }
}
