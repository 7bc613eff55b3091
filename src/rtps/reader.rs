use std::{
  collections::BTreeMap,
  rc::Rc,
  sync::Arc,
  time::{Duration as StdDuration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::Token;
use mio_extras::{channel as mio_channel, timer::Timer};
use speedy::{Endianness, Writable};

use crate::{
  dds::{
    qos::{QosPolicies, QosPolicyId},
    statusevents::{
      send_status, DataReaderStatus, MatchingInfo, ReaderListenerRef, StatusCounters,
    },
  },
  discovery::matching::{evaluate, MatchEvent, MatchTracker, TopicDescriptor},
  messages::submessages::submessages::{Data, Gap, Heartbeat},
  network::transport::Transport,
  rtps::{
    constant::PREEMPTIVE_ACKNACK_PERIOD,
    message::{interpret_inline_qos, MessageBuilder},
    message_receiver::MessageReceiverState,
    rtps_writer_proxy::{HeartbeatOutcome, LostSamples, RtpsWriterProxy},
  },
  structure::{
    cache_change::CacheChange,
    guid::{EntityId, GuidPrefix, GUID},
    history_cache::{HistoryCache, Rejected},
    sequence_number::SequenceNumber,
  },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimedEvent {
  SendAckNack { to_writer: GUID },
  PreemptiveAckNack,
  CheckLiveliness { writer: GUID },
}

// This is used to construct an actual Reader.
// Ingredients are sendable between threads, whereas the Reader is not.
pub(crate) struct ReaderIngredients {
  pub guid: GUID,
  pub topic: TopicDescriptor,
  pub cache: Arc<HistoryCache>,
  pub qos_policies: QosPolicies,
  pub status_sender: mio_channel::SyncSender<DataReaderStatus>,
  /// Pinged whenever new changes are stored, so that the DataReader can be
  /// polled.
  pub notification_sender: mio_channel::SyncSender<()>,
  pub listener: ReaderListenerRef,
  pub heartbeat_response_delay: StdDuration,
  /// Accepts DATA from any writer of the topic without matching. Used by the
  /// SPDP reader, which must hear participants it does not know yet.
  pub accept_unmatched_writers: bool,
}

impl ReaderIngredients {
  pub fn alt_entity_token(&self) -> Token {
    self.guid.entity_id.as_alt_token()
  }
}

/// Protocol side of a DataReader: a stateful reader that keeps a WriterProxy
/// for every matched writer and stores changes in order into its cache.
pub(crate) struct Reader {
  my_guid: GUID,
  my_topic: TopicDescriptor,
  qos_policies: QosPolicies,
  reliable: bool,
  accept_unmatched_writers: bool,
  endianness: Endianness,
  heartbeat_response_delay: StdDuration,

  cache: Arc<HistoryCache>,
  matched_writers: BTreeMap<GUID, RtpsWriterProxy>,
  // Matched, but the liveliness lease ran out. Revived when heard from.
  not_alive_writers: BTreeMap<GUID, RtpsWriterProxy>,
  match_tracker: MatchTracker,
  transport: Rc<dyn Transport>,
  pub(crate) timed_event_timer: Timer<TimedEvent>,

  status_sender: mio_channel::SyncSender<DataReaderStatus>,
  notification_sender: mio_channel::SyncSender<()>,
  listener: ReaderListenerRef,
  counters: StatusCounters,
}

impl Reader {
  pub fn new(
    i: ReaderIngredients,
    transport: Rc<dyn Transport>,
    mut timed_event_timer: Timer<TimedEvent>,
  ) -> Self {
    let reliable = i.qos_policies.is_reliable();
    if reliable {
      timed_event_timer.set_timeout(PREEMPTIVE_ACKNACK_PERIOD, TimedEvent::PreemptiveAckNack);
    }
    Self {
      my_guid: i.guid,
      my_topic: i.topic,
      qos_policies: i.qos_policies,
      reliable,
      accept_unmatched_writers: i.accept_unmatched_writers,
      endianness: Endianness::LittleEndian,
      heartbeat_response_delay: i.heartbeat_response_delay,
      cache: i.cache,
      matched_writers: BTreeMap::new(),
      not_alive_writers: BTreeMap::new(),
      match_tracker: MatchTracker::new(),
      transport,
      timed_event_timer,
      status_sender: i.status_sender,
      notification_sender: i.notification_sender,
      listener: i.listener,
      counters: StatusCounters::default(),
    }
  }

  pub fn guid(&self) -> GUID {
    self.my_guid
  }

  pub fn entity_id(&self) -> EntityId {
    self.my_guid.entity_id
  }

  pub fn topic_name(&self) -> &str {
    &self.my_topic.topic_name
  }

  pub fn topic(&self) -> &TopicDescriptor {
    &self.my_topic
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos_policies
  }

  pub fn is_reliable(&self) -> bool {
    self.reliable
  }

  pub fn writer_proxy(&self, guid: GUID) -> Option<&RtpsWriterProxy> {
    self.matched_writers.get(&guid)
  }

  /// Should DATA addressed to ENTITYID_UNKNOWN from `writer` be given to us.
  pub fn contains_writer(&self, writer: GUID) -> bool {
    self.matched_writers.contains_key(&writer)
      || (self.accept_unmatched_writers
        && writer.entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER)
  }

  // --------------------------------------------------------------
  // Writer submessages

  pub fn handle_data_msg(&mut self, data: Data, mr_state: &MessageReceiverState) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, data.writer_id);
    let (kind, instance_handle) = interpret_inline_qos(data.inline_qos.as_ref());
    let change = CacheChange::new(
      kind,
      writer_guid,
      data.writer_sn,
      instance_handle,
      data.serialized_payload,
    )
    .with_source_timestamp(mr_state.source_timestamp);
    self.handle_change(change);
  }

  /// A change from a writer, as received from the network.
  pub fn handle_change(&mut self, change: CacheChange) {
    let writer_guid = change.writer_guid;
    self.revive_writer(writer_guid);
    if !self.matched_writers.contains_key(&writer_guid) {
      if self.accept_unmatched_writers {
        // Stateless: remember the writer only to drop duplicates.
        debug!(
          "Reader {:?} implicitly adds writer {:?}",
          self.my_guid.entity_id, writer_guid
        );
        self.matched_writers.insert(
          writer_guid,
          RtpsWriterProxy::new(writer_guid, QosPolicies::qos_none(), vec![], vec![]),
        );
      } else {
        trace!(
          "DATA from unmatched writer {:?} to {:?}. Ignoring.",
          writer_guid,
          self.my_guid
        );
        return;
      }
    }

    if self.reliable && !self.accept_unmatched_writers {
      let buffered = self
        .matched_writers
        .get_mut(&writer_guid)
        .map_or(false, |wp| wp.received(change));
      if buffered {
        self.deliver_ready(writer_guid);
      }
    } else {
      let sn = change.sequence_number;
      let fresh = self
        .matched_writers
        .get_mut(&writer_guid)
        .map_or(false, |wp| wp.accept_best_effort(sn));
      if fresh && self.store(change).is_ok() {
        self.notify_data_available();
      }
    }
  }

  // Moves in-order changes from the WriterProxy into the cache.
  fn deliver_ready(&mut self, writer_guid: GUID) {
    let mut delivered_any = false;
    loop {
      let next = match self.matched_writers.get_mut(&writer_guid) {
        Some(wp) => wp.next_in_order().cloned(),
        None => return,
      };
      let change = match next {
        Some(c) => c,
        None => break,
      };
      let sn = change.sequence_number;
      match self.store(change) {
        Ok(()) => {
          delivered_any = true;
          if let Some(wp) = self.matched_writers.get_mut(&writer_guid) {
            wp.delivered(sn);
          }
        }
        Err(Rejected::OutOfOrder { last }) => {
          // The cache already has newer data from this writer. Treat as
          // delivered so that we do not ask for it again.
          debug!(
            "Cache has {:?} from {:?} already, skipping {:?}",
            last, writer_guid, sn
          );
          if let Some(wp) = self.matched_writers.get_mut(&writer_guid) {
            wp.delivered(sn);
          }
        }
        Err(Rejected::ResourceLimitsExceeded { .. }) => {
          // Not acknowledged. The writer will send it again.
          if let Some(wp) = self.matched_writers.get_mut(&writer_guid) {
            wp.discard_buffered(sn);
          }
          break;
        }
      }
    }
    if delivered_any {
      self.notify_data_available();
    }
  }

  fn store(&mut self, change: CacheChange) -> Result<(), Rejected> {
    let instance = change.instance_handle;
    let sn = change.sequence_number;
    match self.cache.add_change(change) {
      Ok(()) => Ok(()),
      Err(Rejected::ResourceLimitsExceeded { reason }) => {
        debug!(
          "Reader {:?} cache full, rejected {:?}: {:?}",
          self.my_guid.entity_id, sn, reason
        );
        let count = self.counters.on_rejected();
        send_status(
          &self.status_sender,
          DataReaderStatus::SampleRejected {
            count,
            last_reason: reason,
            last_instance_handle: instance,
          },
        );
        if let Some(l) = &self.listener {
          l.on_sample_rejected(reason, instance);
        }
        Err(Rejected::ResourceLimitsExceeded { reason })
      }
      Err(e) => Err(e),
    }
  }

  fn notify_data_available(&self) {
    // A full channel already has a pending wakeup.
    self
      .notification_sender
      .try_send(())
      .unwrap_or_else(|e| trace!("Reader notification not sent: {:?}", e));
    if let Some(l) = &self.listener {
      l.on_data_available();
    }
  }

  pub fn handle_heartbeat_msg(
    &mut self,
    heartbeat: &Heartbeat,
    final_flag_set: bool,
    mr_state: &MessageReceiverState,
  ) {
    if !self.reliable {
      // Best effort readers never ACKNACK.
      return;
    }
    if !heartbeat.is_valid() {
      warn!("Invalid HEARTBEAT discarded: {:?}", heartbeat);
      return;
    }
    let writer_guid = GUID::new(mr_state.source_guid_prefix, heartbeat.writer_id);
    self.revive_writer(writer_guid);
    let outcome = match self.matched_writers.get_mut(&writer_guid) {
      Some(wp) => wp.handle_heartbeat(heartbeat.first_sn, heartbeat.last_sn, heartbeat.count),
      None => {
        trace!(
          "HEARTBEAT from unmatched writer {:?} to {:?}",
          writer_guid,
          self.my_guid
        );
        return;
      }
    };
    let lost = match outcome {
      HeartbeatOutcome::Duplicate => return,
      HeartbeatOutcome::Accepted { lost } => lost,
    };
    self.report_lost(writer_guid, lost);
    self.deliver_ready(writer_guid);

    let schedule = self
      .matched_writers
      .get_mut(&writer_guid)
      .map_or(false, |wp| {
        if (!final_flag_set || wp.has_missing()) && !wp.ack_pending {
          wp.ack_pending = true;
          true
        } else {
          false
        }
      });
    if schedule {
      self.timed_event_timer.set_timeout(
        self.heartbeat_response_delay,
        TimedEvent::SendAckNack {
          to_writer: writer_guid,
        },
      );
    }
  }

  pub fn handle_gap_msg(&mut self, gap: &Gap, mr_state: &MessageReceiverState) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, gap.writer_id);
    if !self.reliable {
      return;
    }
    if !gap.is_valid() {
      warn!("Invalid GAP discarded: {:?}", gap);
      return;
    }
    self.revive_writer(writer_guid);
    let mut lost = LostSamples::default();
    match self.matched_writers.get_mut(&writer_guid) {
      Some(wp) => {
        wp.heard_from();
        let start = gap.gap_start;
        let run_end = gap.gap_list.base().minus_1();
        let run = wp.irrelevant_range(start, run_end);
        lost.count += run.count;
        lost.sequence_numbers.extend(run.sequence_numbers);
        for sn in gap.gap_list.iter() {
          let one = wp.irrelevant_range(sn, sn);
          lost.count += one.count;
          lost.sequence_numbers.extend(one.sequence_numbers);
        }
        trace!("GAP from {:?} starting at {:?}", writer_guid, start);
      }
      None => {
        trace!("GAP from unmatched writer {:?}", writer_guid);
        return;
      }
    }
    self.report_lost(writer_guid, lost);
    self.deliver_ready(writer_guid);
  }

  fn report_lost(&mut self, writer_guid: GUID, mut lost: LostSamples) {
    if lost.is_empty() {
      return;
    }
    lost
      .sequence_numbers
      .truncate(crate::rtps::rtps_writer_proxy::MAX_LOST_REPORT);
    debug!(
      "Reader {:?} lost {} samples of {:?}",
      self.my_guid.entity_id, lost.count, writer_guid
    );
    let count = self.counters.on_lost(lost.count);
    if let Some(l) = &self.listener {
      l.on_sample_lost(writer_guid, &lost.sequence_numbers);
    }
    send_status(
      &self.status_sender,
      DataReaderStatus::SampleLost {
        count,
        writer: writer_guid,
        sequence_numbers: lost.sequence_numbers,
      },
    );
  }

  // --------------------------------------------------------------
  // Timers and ACKNACK

  pub fn handle_timed_event(&mut self) {
    while let Some(e) = self.timed_event_timer.poll() {
      match e {
        TimedEvent::SendAckNack { to_writer } => {
          if let Some(wp) = self.matched_writers.get_mut(&to_writer) {
            wp.ack_pending = false;
          }
          self.send_acknack(to_writer);
        }
        TimedEvent::PreemptiveAckNack => {
          self.send_preemptive_acknacks();
          self
            .timed_event_timer
            .set_timeout(PREEMPTIVE_ACKNACK_PERIOD, TimedEvent::PreemptiveAckNack);
        }
        TimedEvent::CheckLiveliness { writer } => self.check_writer_liveliness(writer),
      }
    }
  }

  // --------------------------------------------------------------
  // Writer liveliness

  fn schedule_liveliness_check(&mut self, writer: GUID, deadline: Instant) {
    let delay = deadline.saturating_duration_since(Instant::now());
    self
      .timed_event_timer
      .set_timeout(delay, TimedEvent::CheckLiveliness { writer });
  }

  /// Unmatches the writer if its liveliness lease has run out, otherwise
  /// checks again at the new deadline.
  pub fn check_writer_liveliness(&mut self, writer: GUID) {
    let deadline = match self
      .matched_writers
      .get(&writer)
      .and_then(RtpsWriterProxy::liveliness_deadline)
    {
      Some(d) => d,
      None => return,
    };
    if deadline > Instant::now() {
      self.schedule_liveliness_check(writer, deadline);
      return;
    }
    info!(
      "Writer {:?} lost liveliness on topic {:?}",
      writer,
      self.topic_name()
    );
    if let Some(wp) = self.matched_writers.get(&writer).cloned() {
      self.writer_unmatched(writer);
      self.not_alive_writers.insert(writer, wp);
    }
  }

  // A writer that lost liveliness is matched again when heard from.
  fn revive_writer(&mut self, writer: GUID) {
    if let Some(mut wp) = self.not_alive_writers.remove(&writer) {
      info!("Writer {:?} regained liveliness", writer);
      wp.heard_from();
      self.writer_matched(wp);
    }
  }

  /// ACKNACK to writers that have not been heard of since matching, so that
  /// they send their data without waiting for a heartbeat.
  pub fn send_preemptive_acknacks(&mut self) {
    let silent: Vec<GUID> = self
      .matched_writers
      .values()
      .filter(|wp| wp.no_writer_contact)
      .map(|wp| wp.remote_writer_guid)
      .collect();
    for writer in silent {
      self.send_acknack(writer);
    }
  }

  fn send_acknack(&mut self, writer_guid: GUID) {
    if !self.reliable || self.accept_unmatched_writers {
      return;
    }
    let endianness = self.endianness;
    let my_id = self.my_guid.entity_id;
    let wp = match self.matched_writers.get_mut(&writer_guid) {
      Some(wp) => wp,
      None => return,
    };
    let state = wp.acknack_state();
    let count = wp.next_acknack_count();
    let final_flag = state.is_empty();
    trace!(
      "ACKNACK {:?} -> {:?} base={:?} missing={:?}",
      my_id,
      writer_guid,
      state.base(),
      state.iter().collect::<Vec<SequenceNumber>>()
    );
    let message = MessageBuilder::new()
      .dst_submessage(endianness, writer_guid.prefix)
      .acknack_msg(my_id, writer_guid.entity_id, state, count, final_flag, endianness)
      .add_header_and_build(self.my_guid.prefix);
    let locators = if wp.unicast_locator_list.is_empty() {
      wp.multicast_locator_list.clone()
    } else {
      wp.unicast_locator_list.clone()
    };
    if locators.is_empty() {
      warn!("No locators to send ACKNACK to {:?}", writer_guid);
      return;
    }
    match message.write_to_vec_with_ctx(endianness) {
      Ok(buffer) => self.transport.send_to_locator_list(&buffer, &locators),
      Err(e) => error!("Cannot serialize ACKNACK: {:?}", e),
    }
  }

  // --------------------------------------------------------------
  // Matching

  pub fn update_writer_proxy(&mut self, writer_proxy: RtpsWriterProxy, writer_topic: &TopicDescriptor) {
    let remote = writer_proxy.remote_writer_guid;
    let outcome = evaluate(
      writer_topic,
      writer_proxy.qos(),
      &self.my_topic,
      &self.qos_policies,
    );
    let events = self.match_tracker.update(remote, outcome);
    if events.is_empty() {
      if let Some(wp) = self.matched_writers.get_mut(&remote) {
        let had_lease = wp.liveliness_deadline().is_some();
        wp.update(&writer_proxy);
        match wp.liveliness_deadline() {
          Some(deadline) if !had_lease => self.schedule_liveliness_check(remote, deadline),
          _ => (),
        }
      } else if let Some(wp) = self.not_alive_writers.get_mut(&remote) {
        wp.update(&writer_proxy);
      }
      return;
    }
    let mut proxy = Some(writer_proxy);
    for event in events {
      match event {
        MatchEvent::Removed => self.writer_unmatched(remote),
        MatchEvent::Incompatible(policy) => self.report_incompatible(remote, policy),
        MatchEvent::Matched => {
          if let Some(wp) = proxy.take() {
            self.writer_matched(wp);
          }
        }
      }
    }
  }

  fn writer_matched(&mut self, writer_proxy: RtpsWriterProxy) {
    let remote = writer_proxy.remote_writer_guid;
    info!(
      "Matched new remote writer on topic={:?} writer={:?}",
      self.topic_name(),
      remote
    );
    let deadline = writer_proxy.liveliness_deadline();
    self.matched_writers.insert(remote, writer_proxy);
    if let Some(deadline) = deadline {
      self.schedule_liveliness_check(remote, deadline);
    }
    let (total, current) = self.counters.on_match();
    let info = MatchingInfo::matched(remote);
    send_status(
      &self.status_sender,
      DataReaderStatus::SubscriptionMatched {
        total,
        current,
        info,
      },
    );
    if let Some(l) = &self.listener {
      l.on_subscription_matched(info);
    }
    if self.reliable {
      self.send_acknack(remote);
    }
  }

  fn writer_unmatched(&mut self, remote: GUID) {
    self.not_alive_writers.remove(&remote);
    if self.matched_writers.remove(&remote).is_some() {
      info!(
        "Removed writer proxy. topic={:?} writer={:?}",
        self.topic_name(),
        remote
      );
      let (total, current) = self.counters.on_unmatch();
      let info = MatchingInfo::removed(remote);
      send_status(
        &self.status_sender,
        DataReaderStatus::SubscriptionMatched {
          total,
          current,
          info,
        },
      );
      if let Some(l) = &self.listener {
        l.on_subscription_matched(info);
      }
    }
  }

  fn report_incompatible(&mut self, remote: GUID, policy: QosPolicyId) {
    warn!(
      "Writer {:?} offers QoS incompatible with reader {:?} on topic {:?}: {:?}",
      remote,
      self.my_guid,
      self.topic_name(),
      policy
    );
    let count = self.counters.on_incompatible();
    send_status(
      &self.status_sender,
      DataReaderStatus::RequestedIncompatibleQos {
        count,
        last_policy_id: policy,
        writer: remote,
      },
    );
    if let Some(l) = &self.listener {
      l.on_requested_incompatible_qos(remote, policy);
    }
  }

  pub fn writer_lost(&mut self, guid: GUID) {
    if let Some(MatchEvent::Removed) = self.match_tracker.remove(guid) {
      self.writer_unmatched(guid);
    } else {
      // implicit (stateless) writer proxies are not in the tracker
      self.matched_writers.remove(&guid);
    }
  }

  pub fn participant_lost(&mut self, guid_prefix: GuidPrefix) {
    let mut lost = self.match_tracker.remotes_of_participant(guid_prefix);
    lost.extend(
      self
        .matched_writers
        .range(guid_prefix.range())
        .map(|(g, _)| *g),
    );
    lost.sort();
    lost.dedup();
    for writer in lost {
      self.writer_lost(writer);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Mutex, thread};

  use mio_extras::timer;

  use super::*;
  use crate::{
    dds::{
      qos::policy::{History, Liveliness, Reliability, ResourceLimits},
      statusevents::{
        status_channel, DataReaderListener, MatchingStatus, StatusEvented, StatusReceiver,
      },
    },
    messages::serialized_payload::{RepresentationIdentifier, SerializedPayload},
    messages::submessages::submessages::{ReaderSubmessage, AckNack},
    rtps::{message::Message, submessage::SubmessageBody},
    structure::{
      cache_change::ChangeKind,
      duration::Duration,
      guid::EntityKind,
      history_cache::HistoryLimits,
      instance_handle::InstanceHandle,
      locator::Locator,
      sequence_number::SequenceNumberSet,
    },
    test::transport::RecordingTransport,
  };

  #[derive(Default)]
  struct LostRecorder {
    lost: Mutex<Vec<SequenceNumber>>,
  }

  impl DataReaderListener for LostRecorder {
    fn on_sample_lost(&self, _writer: GUID, sequence_numbers: &[SequenceNumber]) {
      self.lost.lock().unwrap().extend_from_slice(sequence_numbers);
    }
  }

  struct Fixture {
    reader: Reader,
    cache: Arc<HistoryCache>,
    transport: Rc<RecordingTransport>,
    status: StatusReceiver<DataReaderStatus>,
    notifications: mio_channel::Receiver<()>,
    listener: Arc<LostRecorder>,
  }

  fn topic() -> TopicDescriptor {
    TopicDescriptor::new("Square", "ShapeType", false)
  }

  fn reliable_qos() -> QosPolicies {
    QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .build()
  }

  fn fixture(qos: QosPolicies) -> Fixture {
    let cache = Arc::new(HistoryCache::new(HistoryLimits::from_qos(&qos, false)));
    let (status_sender, status) = status_channel();
    let (notification_sender, notifications) = mio_channel::sync_channel(4);
    let transport = Rc::new(RecordingTransport::new());
    let listener = Arc::new(LostRecorder::default());
    let reader = Reader::new(
      ReaderIngredients {
        guid: GUID::new(
          GuidPrefix::new(&[2; 12]),
          EntityId::from_key_u32(7, EntityKind::READER_NO_KEY_USER_DEFINED),
        ),
        topic: topic(),
        cache: cache.clone(),
        qos_policies: qos,
        status_sender,
        notification_sender,
        listener: Some(listener.clone()),
        heartbeat_response_delay: StdDuration::from_millis(200),
        accept_unmatched_writers: false,
      },
      transport.clone(),
      timer::Builder::default().build(),
    );
    Fixture {
      reader,
      cache,
      transport,
      status,
      notifications,
      listener,
    }
  }

  fn writer_guid() -> GUID {
    GUID::new(
      GuidPrefix::new(&[5; 12]),
      EntityId::from_key_u32(1, EntityKind::WRITER_NO_KEY_USER_DEFINED),
    )
  }

  fn mr_state() -> MessageReceiverState {
    MessageReceiverState {
      source_guid_prefix: writer_guid().prefix,
      ..MessageReceiverState::default()
    }
  }

  fn change(sn: i64) -> CacheChange {
    CacheChange::new(
      ChangeKind::Alive,
      writer_guid(),
      SequenceNumber::new(sn),
      InstanceHandle::NIL,
      Some(SerializedPayload::new(RepresentationIdentifier::CDR_LE, vec![sn as u8; 4])),
    )
  }

  fn heartbeat(first: i64, last: i64, count: i32) -> Heartbeat {
    Heartbeat {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      first_sn: SequenceNumber::new(first),
      last_sn: SequenceNumber::new(last),
      count,
    }
  }

  impl Fixture {
    fn match_writer(&mut self) {
      let wp = RtpsWriterProxy::new(
        writer_guid(),
        reliable_qos(),
        vec![Locator::shm(5)],
        vec![],
      );
      self.reader.update_writer_proxy(wp, &topic());
    }

    fn taken(&self) -> Vec<i64> {
      std::iter::from_fn(|| self.cache.take_next())
        .map(|c| i64::from(c.sequence_number))
        .collect()
    }

    fn acknacks(&self) -> Vec<AckNack> {
      self
        .transport
        .take_messages()
        .into_iter()
        .flat_map(|(_, m): (Locator, Message)| m.submessages)
        .filter_map(|s| match s.body {
          SubmessageBody::Reader(ReaderSubmessage::AckNack(an, _)) => Some(an),
          _ => None,
        })
        .collect()
    }

    fn fire_acknack_timer(&mut self) {
      self.reader.send_acknack(writer_guid());
      if let Some(wp) = self.reader.matched_writers.get_mut(&writer_guid()) {
        wp.ack_pending = false;
      }
    }
  }

  #[test]
  fn match_sends_preemptive_acknack() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    let acks = f.acknacks();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].reader_sn_state, SequenceNumberSet::new_empty(SequenceNumber::new(1)));
    match f.status.try_recv_status() {
      Some(DataReaderStatus::SubscriptionMatched { info, .. }) => {
        assert_eq!(info.status, MatchingStatus::Matched)
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn out_of_order_data_is_delivered_in_order() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    f.reader.handle_change(change(2));
    f.reader.handle_change(change(3));
    assert!(f.taken().is_empty());
    assert!(f.notifications.try_recv().is_err());
    f.reader.handle_change(change(1));
    f.reader.handle_change(change(2));
    assert!(f.notifications.try_recv().is_ok());
    assert_eq!(f.taken(), vec![1, 2, 3]);
  }

  #[test]
  fn heartbeat_schedules_acknack_with_missing() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    f.transport.clear();
    f.reader.handle_change(change(2));
    f.reader.handle_heartbeat_msg(&heartbeat(1, 3, 1), false, &mr_state());
    // coalesced: the second heartbeat does not schedule again
    f.reader.handle_heartbeat_msg(&heartbeat(1, 3, 2), false, &mr_state());
    assert!(f.reader.writer_proxy(writer_guid()).unwrap().ack_pending);
    f.fire_acknack_timer();
    let acks = f.acknacks();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].reader_sn_state.base(), SequenceNumber::new(1));
    assert_eq!(
      acks[0].reader_sn_state.iter().collect::<Vec<_>>(),
      vec![SequenceNumber::new(1), SequenceNumber::new(3)]
    );
  }

  #[test]
  fn final_heartbeat_without_missing_needs_no_ack() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    f.reader.handle_change(change(1));
    f.reader.handle_heartbeat_msg(&heartbeat(1, 1, 1), true, &mr_state());
    assert!(!f.reader.writer_proxy(writer_guid()).unwrap().ack_pending);
  }

  #[test]
  fn gap_skips_and_reports_lost() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    let _ = f.status.try_recv_status();
    f.reader.handle_change(change(3));
    let gap = Gap {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      gap_start: SequenceNumber::new(1),
      gap_list: SequenceNumberSet::new_empty(SequenceNumber::new(3)),
    };
    f.reader.handle_gap_msg(&gap, &mr_state());
    assert_eq!(f.taken(), vec![3]);
    assert_eq!(
      *f.listener.lost.lock().unwrap(),
      vec![SequenceNumber::new(1), SequenceNumber::new(2)]
    );
    match f.status.try_recv_status() {
      Some(DataReaderStatus::SampleLost {
        count, writer, ..
      }) => {
        assert_eq!(count.count(), 2);
        assert_eq!(writer, writer_guid());
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn buffered_change_below_heartbeat_first_sn_is_delivered() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    f.reader.handle_change(change(3));
    f.reader.handle_heartbeat_msg(&heartbeat(4, 4, 1), false, &mr_state());
    assert_eq!(f.taken(), vec![3]);
    assert_eq!(
      *f.listener.lost.lock().unwrap(),
      vec![SequenceNumber::new(1), SequenceNumber::new(2)]
    );
    f.reader.handle_change(change(4));
    assert_eq!(f.taken(), vec![4]);
  }

  #[test]
  fn gap_overflowing_sequence_numbers_is_discarded() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    let mut gap_list = SequenceNumberSet::new(SequenceNumber::new(i64::MAX), 1);
    gap_list.insert(SequenceNumber::new(i64::MAX));
    let gap = Gap {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      gap_start: SequenceNumber::new(1),
      gap_list,
    };
    f.reader.handle_gap_msg(&gap, &mr_state());
    assert!(f.listener.lost.lock().unwrap().is_empty());
    let wp = f.reader.writer_proxy(writer_guid()).unwrap();
    assert_eq!(wp.delivered_before(), SequenceNumber::new(1));
    f.reader.handle_change(change(1));
    assert_eq!(f.taken(), vec![1]);
  }

  fn match_writer_with_lease(f: &mut Fixture, lease: Duration) {
    let qos = QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .liveliness(Liveliness::Automatic {
        lease_duration: lease,
      })
      .build();
    let wp = RtpsWriterProxy::new(writer_guid(), qos, vec![Locator::shm(5)], vec![]);
    f.reader.update_writer_proxy(wp, &topic());
  }

  fn next_match_status(f: &Fixture) -> Option<MatchingStatus> {
    std::iter::from_fn(|| f.status.try_recv_status()).find_map(|s| match s {
      DataReaderStatus::SubscriptionMatched { info, .. } => Some(info.status),
      _ => None,
    })
  }

  #[test]
  fn writer_without_contact_loses_liveliness_and_is_revived_by_data() {
    let mut f = fixture(reliable_qos());
    match_writer_with_lease(&mut f, Duration::from_millis(50));
    assert_eq!(next_match_status(&f), Some(MatchingStatus::Matched));
    f.reader.handle_change(change(1));

    thread::sleep(StdDuration::from_millis(100));
    f.reader.check_writer_liveliness(writer_guid());
    assert!(f.reader.writer_proxy(writer_guid()).is_none());
    assert_eq!(next_match_status(&f), Some(MatchingStatus::Removed));

    f.reader.handle_change(change(2));
    assert!(f.reader.writer_proxy(writer_guid()).is_some());
    assert_eq!(next_match_status(&f), Some(MatchingStatus::Matched));
    assert_eq!(f.taken(), vec![1, 2]);
  }

  #[test]
  fn heartbeat_keeps_writer_alive() {
    let mut f = fixture(reliable_qos());
    match_writer_with_lease(&mut f, Duration::from_millis(300));
    thread::sleep(StdDuration::from_millis(200));
    f.reader.handle_heartbeat_msg(&heartbeat(1, 0, 1), true, &mr_state());
    thread::sleep(StdDuration::from_millis(200));
    f.reader.check_writer_liveliness(writer_guid());
    assert!(f.reader.writer_proxy(writer_guid()).is_some());
  }

  #[test]
  fn writer_without_lease_is_never_expired() {
    let mut f = fixture(reliable_qos());
    f.match_writer();
    let wp = f.reader.writer_proxy(writer_guid()).unwrap();
    assert!(wp.liveliness_deadline().is_none());
    f.reader.check_writer_liveliness(writer_guid());
    assert!(f.reader.writer_proxy(writer_guid()).is_some());
  }

  #[test]
  fn rejected_change_is_requested_again() {
    let qos = QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .history(History::KeepAll)
      .resource_limits(ResourceLimits {
        max_samples: 1,
        max_instances: 1,
        max_samples_per_instance: 1,
      })
      .build();
    let mut f = fixture(qos);
    f.match_writer();
    f.transport.clear();
    f.reader.handle_change(change(1));
    f.reader.handle_change(change(2));
    f.reader.handle_heartbeat_msg(&heartbeat(1, 2, 1), false, &mr_state());
    f.fire_acknack_timer();
    let acks = f.acknacks();
    assert_eq!(acks[0].reader_sn_state.base(), SequenceNumber::new(2));
    assert_eq!(
      acks[0].reader_sn_state.iter().collect::<Vec<_>>(),
      vec![SequenceNumber::new(2)]
    );
    // room again
    assert_eq!(f.taken(), vec![1]);
    f.reader.handle_change(change(2));
    assert_eq!(f.taken(), vec![2]);
  }

  #[test]
  fn best_effort_reader_never_acknacks() {
    let mut f = fixture(
      QosPolicies::builder()
        .reliability(Reliability::BestEffort)
        .build(),
    );
    f.match_writer();
    f.reader.handle_change(change(3));
    f.reader.handle_change(change(1));
    f.reader.handle_change(change(5));
    f.reader.handle_heartbeat_msg(&heartbeat(1, 5, 1), false, &mr_state());
    assert_eq!(f.taken(), vec![3, 5]);
    assert!(f.acknacks().is_empty());
  }

  #[test]
  fn data_from_unmatched_writer_is_ignored() {
    let mut f = fixture(reliable_qos());
    f.reader.handle_change(change(1));
    assert!(f.cache.is_empty());
    f.match_writer();
    f.reader.participant_lost(writer_guid().prefix);
    assert!(f.reader.writer_proxy(writer_guid()).is_none());
    f.reader.handle_change(change(1));
    assert!(f.cache.is_empty());
  }
}
