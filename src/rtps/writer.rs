use std::{
  collections::{BTreeMap, BTreeSet},
  rc::Rc,
  sync::{mpsc, Arc},
  time::Duration as StdDuration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::Token;
use mio_extras::{channel as mio_channel, timer::Timer};
use speedy::{Endianness, Writable};

use crate::{
  dds::{
    qos::{
      policy::{Durability, Reliability},
      QosPolicies, QosPolicyId,
    },
    statusevents::{
      send_status, DataWriterStatus, MatchingInfo, StatusCounters, WriterListenerRef,
    },
  },
  discovery::matching::{evaluate, MatchEvent, MatchTracker, TopicDescriptor},
  messages::submessages::submessages::AckNack,
  network::transport::Transport,
  rtps::{
    constant::CACHE_CLEANING_PERIOD,
    message::{Message, MessageBuilder},
    rtps_reader_proxy::RtpsReaderProxy,
  },
  structure::{
    cache_change::CacheChange,
    guid::{EntityId, GuidPrefix, GUID},
    history_cache::HistoryCache,
    sequence_number::SequenceNumber,
  },
};

#[derive(PartialEq, Eq, Clone, Copy)]
pub enum DeliveryMode {
  Unicast,
  Multicast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimedEvent {
  Heartbeat,
  CacheCleaning,
  SendRepairData { to_reader: GUID },
}

// A repair batch is split into datagrams of about this size.
const REPAIR_DATAGRAM_BUDGET: usize = 60_000;
// Submessage overhead of one DATA on top of its payload: header, ids, SN and
// inline QoS.
const DATA_OVERHEAD: usize = 64;

// This is used to construct an actual Writer.
// Ingredients are sendable between threads, whereas the Writer is not.
pub(crate) struct WriterIngredients {
  pub guid: GUID,
  pub writer_command_receiver: mio_channel::Receiver<WriterCommand>,
  pub topic: TopicDescriptor,
  pub cache: Arc<HistoryCache>,
  pub qos_policies: QosPolicies,
  pub status_sender: mio_channel::SyncSender<DataWriterStatus>,
  pub listener: WriterListenerRef,
  pub heartbeat_period: StdDuration,
  pub nack_response_delay: StdDuration,
}

impl WriterIngredients {
  /// This token is used for the timer of the Writer
  pub fn alt_entity_token(&self) -> Token {
    self.guid.entity_id.as_alt_token()
  }
}

/// Commands from the DataWriter. The change itself is already in the shared
/// HistoryCache when `NewChange` is sent.
#[derive(Debug)]
pub(crate) enum WriterCommand {
  NewChange { sequence_number: SequenceNumber },
  WaitForAcknowledgments { all_acked: mpsc::SyncSender<()> },
}

struct AckWaiter {
  wait_until: SequenceNumber,
  complete_channel: mpsc::SyncSender<()>,
  readers_pending: BTreeSet<GUID>,
}

impl AckWaiter {
  pub fn notify_wait_complete(&self) {
    // it is normal for the send to fail, because receiver may have timed out
    let _ = self.complete_channel.try_send(());
  }

  // true = waiting complete
  pub fn reader_acked_or_lost(&mut self, guid: GUID, acked_before: Option<SequenceNumber>) -> bool {
    match acked_before {
      None => {
        self.readers_pending.remove(&guid);
      }
      Some(acked_before) if self.wait_until < acked_before => {
        self.readers_pending.remove(&guid);
      }
      Some(_) => (),
    }
    self.readers_pending.is_empty()
  }
}

/// Protocol side of a DataWriter: a stateful writer that keeps a ReaderProxy
/// for every matched reader.
pub(crate) struct Writer {
  pub endianness: Endianness,
  pub heartbeat_message_counter: i32,
  /// Protocol tuning parameter that allows the RTPS Writer to repeatedly
  /// announce the availability of data by sending a Heartbeat Message.
  /// `None` for best-effort writers.
  pub heartbeat_period: Option<StdDuration>,
  /// Protocol tuning parameter that allows the RTPS Writer to delay the
  /// response to a request for data from a negative acknowledgment.
  pub nack_response_delay: StdDuration,
  /// Highest sequence number the writer has processed. Changes are numbered
  /// by the DataWriter.
  last_change_sequence_number: SequenceNumber,

  my_guid: GUID,
  my_topic: TopicDescriptor,
  pub(crate) writer_command_receiver: mio_channel::Receiver<WriterCommand>,
  readers: BTreeMap<GUID, RtpsReaderProxy>,
  match_tracker: MatchTracker,
  transport: Rc<dyn Transport>,
  cache: Arc<HistoryCache>,
  pub(crate) timed_event_timer: Timer<TimedEvent>,
  qos_policies: QosPolicies,
  reliable: bool,

  status_sender: mio_channel::SyncSender<DataWriterStatus>,
  listener: WriterListenerRef,
  counters: StatusCounters,
  ack_waiter: Option<AckWaiter>,
}

impl Writer {
  pub fn new(
    i: WriterIngredients,
    transport: Rc<dyn Transport>,
    mut timed_event_timer: Timer<TimedEvent>,
  ) -> Self {
    // An unset Reliability offers the DDS writer default, which is Reliable.
    let reliable = !matches!(i.qos_policies.reliability(), Some(Reliability::BestEffort));
    let heartbeat_period = if reliable {
      Some(i.heartbeat_period)
    } else {
      None
    };

    if let Some(period) = heartbeat_period {
      timed_event_timer.set_timeout(period, TimedEvent::Heartbeat);
    }
    timed_event_timer.set_timeout(CACHE_CLEANING_PERIOD, TimedEvent::CacheCleaning);

    let last_change_sequence_number = i
      .cache
      .last_sequence_number(i.guid)
      .unwrap_or_else(SequenceNumber::zero);

    Self {
      endianness: Endianness::LittleEndian,
      heartbeat_message_counter: 1,
      heartbeat_period,
      nack_response_delay: i.nack_response_delay,
      last_change_sequence_number,
      my_guid: i.guid,
      my_topic: i.topic,
      writer_command_receiver: i.writer_command_receiver,
      readers: BTreeMap::new(),
      match_tracker: MatchTracker::new(),
      transport,
      cache: i.cache,
      timed_event_timer,
      qos_policies: i.qos_policies,
      reliable,
      status_sender: i.status_sender,
      listener: i.listener,
      counters: StatusCounters::default(),
      ack_waiter: None,
    }
  }

  pub fn guid(&self) -> GUID {
    self.my_guid
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

  /// This token is used for the command channel from the DataWriter.
  pub fn entity_token(&self) -> Token {
    self.my_guid.entity_id.as_token()
  }

  pub fn is_reliable(&self) -> bool {
    self.reliable
  }

  pub fn last_change_sequence_number(&self) -> SequenceNumber {
    self.last_change_sequence_number
  }

  pub fn reader_proxy(&self, guid: GUID) -> Option<&RtpsReaderProxy> {
    self.readers.get(&guid)
  }

  pub fn matched_readers(&self) -> impl Iterator<Item = GUID> + '_ {
    self.readers.keys().copied()
  }

  /// Adds a reader that is not subject to matching, e.g. the static
  /// participant announcement destinations. Replaces any earlier proxy with
  /// the same GUID.
  pub fn add_fixed_reader_proxy(&mut self, reader_proxy: RtpsReaderProxy) {
    debug!(
      "Writer {:?} gets fixed reader proxy {:?}",
      self.my_guid, reader_proxy.remote_reader_guid
    );
    self
      .readers
      .insert(reader_proxy.remote_reader_guid, reader_proxy);
  }

  // Lowest SN still available, or last + 1 when nothing is.
  fn first_available_sequence_number(&self) -> SequenceNumber {
    self
      .cache
      .min_sequence_number(self.my_guid)
      .map_or_else(|| self.last_change_sequence_number.plus_1(), |sn| {
        sn.min(self.last_change_sequence_number.plus_1())
      })
  }

  fn next_heartbeat_count(&mut self) -> i32 {
    self.heartbeat_message_counter += 1;
    self.heartbeat_message_counter
  }

  fn add_heartbeat(
    &self,
    builder: MessageBuilder,
    reader_id: EntityId,
    count: i32,
    liveliness: bool,
  ) -> MessageBuilder {
    // Stateful writers never set the final flag: every heartbeat asks for an
    // acknowledgement.
    builder.heartbeat_msg(
      reader_id,
      self.my_guid.entity_id,
      self.first_available_sequence_number(),
      self.last_change_sequence_number,
      count,
      false,
      liveliness,
      self.endianness,
    )
  }

  // --------------------------------------------------------------

  pub fn handle_timed_event(&mut self) {
    while let Some(e) = self.timed_event_timer.poll() {
      match e {
        TimedEvent::Heartbeat => {
          self.handle_heartbeat_tick(false);
          if let Some(period) = self.heartbeat_period {
            self.timed_event_timer.set_timeout(period, TimedEvent::Heartbeat);
          }
        }
        TimedEvent::CacheCleaning => {
          self.handle_cache_cleaning();
          self
            .timed_event_timer
            .set_timeout(CACHE_CLEANING_PERIOD, TimedEvent::CacheCleaning);
        }
        TimedEvent::SendRepairData { to_reader } => {
          self.handle_repair_data_send(to_reader);
        }
      }
    }
  }

  // Receive new data samples from the DDS DataWriter
  pub fn process_writer_command(&mut self) {
    while let Ok(command) = self.writer_command_receiver.try_recv() {
      match command {
        WriterCommand::NewChange { sequence_number } => self.handle_new_change(sequence_number),
        WriterCommand::WaitForAcknowledgments { all_acked } => {
          self.start_waiting_for_acknowledgments(all_acked);
        }
      }
    }
  }

  fn handle_new_change(&mut self, sequence_number: SequenceNumber) {
    if sequence_number <= self.last_change_sequence_number {
      debug!(
        "Writer {:?} got {:?}, but it is already at {:?}",
        self.my_guid, sequence_number, self.last_change_sequence_number
      );
      return;
    }
    // Commands for earlier changes were dropped if the channel was full.
    let skipped_from = self.last_change_sequence_number.plus_1();
    for sn in SequenceNumber::range_inclusive(skipped_from, sequence_number) {
      self.publish_change(sn);
    }
  }

  // Picks up changes in the history that no command announced.
  fn catch_up_with_cache(&mut self) {
    if let Some(last) = self.cache.last_sequence_number(self.my_guid) {
      if last > self.last_change_sequence_number {
        debug!(
          "Writer {:?} catching up from {:?} to {:?}",
          self.my_guid, self.last_change_sequence_number, last
        );
        self.handle_new_change(last);
      }
    }
  }

  fn publish_change(&mut self, sequence_number: SequenceNumber) {
    self.last_change_sequence_number = sequence_number;
    for reader in self.readers.values_mut() {
      reader.notify_new_cache_change(sequence_number);
    }

    // Push mode: send DATA to everyone right away. Reliable readers also get
    // a HEARTBEAT, so that they can acknowledge.
    match self.cache.get_change(self.my_guid, sequence_number) {
      Some(cc) => {
        let count = self.next_heartbeat_count();
        let mut builder = self.data_builder(MessageBuilder::new(), &cc, EntityId::UNKNOWN);
        if self.reliable {
          builder = self.add_heartbeat(builder, EntityId::UNKNOWN, count, false);
        }
        let message = builder.add_header_and_build(self.my_guid.prefix);
        self.send_message_to_readers(DeliveryMode::Multicast, &message, &mut self.readers.values());
      }
      None => {
        // KEEP_LAST already pushed it out. Reliable readers get a GAP when
        // they ask for it.
        debug!(
          "Change {:?} of {:?} left the cache before it was sent",
          sequence_number, self.my_guid
        );
      }
    }
    for reader in self.readers.values_mut() {
      reader.mark_change_sent(sequence_number);
    }
    self.handle_cache_cleaning();
  }

  fn data_builder(
    &self,
    builder: MessageBuilder,
    cc: &CacheChange,
    reader_id: EntityId,
  ) -> MessageBuilder {
    // Timestamp has to go before Data to have effect on Data.
    let builder = match cc.source_timestamp {
      Some(ts) => builder.ts_msg(self.endianness, Some(ts)),
      None => builder,
    };
    builder.data_msg(cc, reader_id, self.my_guid.entity_id, self.endianness)
  }

  fn start_waiting_for_acknowledgments(&mut self, all_acked: mpsc::SyncSender<()>) {
    let wait_until = self.last_change_sequence_number;
    let readers_pending: BTreeSet<GUID> = self
      .readers
      .iter()
      .filter(|(_, rp)| rp.reliable && rp.all_acked_before <= wait_until)
      .map(|(guid, _)| *guid)
      .collect();
    self.ack_waiter = if readers_pending.is_empty() {
      // all acked already. Nobody may be listening any more, and that is fine.
      let _ = all_acked.try_send(());
      None
    } else {
      Some(AckWaiter {
        wait_until,
        complete_channel: all_acked,
        readers_pending,
      })
    };
  }

  /// This is called periodically.
  pub fn handle_heartbeat_tick(&mut self, is_manual_assertion: bool) {
    self.catch_up_with_cache();
    if !self.reliable {
      return;
    }
    let last = self.last_change_sequence_number;
    if self
      .readers
      .values()
      .filter(|rp| rp.reliable)
      .all(|rp| last < rp.all_acked_before)
    {
      trace!(
        "heartbeat tick: all readers of {:?} have all available data.",
        self.topic_name()
      );
      return;
    }
    let count = self.next_heartbeat_count();
    let message = self
      .add_heartbeat(MessageBuilder::new(), EntityId::UNKNOWN, count, is_manual_assertion)
      .add_header_and_build(self.my_guid.prefix);
    trace!(
      "Writer {:?} topic={:?} HEARTBEAT count={}",
      self.my_guid.entity_id,
      self.topic_name(),
      count
    );
    self.send_message_to_readers(
      DeliveryMode::Multicast,
      &message,
      &mut self.readers.values().filter(|rp| rp.reliable),
    );
  }

  /// When receiving an ACKNACK Message indicating a Reader is missing some data
  /// samples, the Writer must respond by either sending the missing data
  /// samples, sending a GAP message when the sample is not relevant, or
  /// sending a HEARTBEAT message when the sample is no longer available
  pub fn handle_ack_nack(&mut self, reader_guid_prefix: GuidPrefix, an: &AckNack) {
    if !self.reliable {
      warn!(
        "Writer {:?} is best effort! It should not get ACKNACK messages.",
        self.my_guid.entity_id
      );
      return;
    }
    let reader_guid = GUID::new(reader_guid_prefix, an.reader_id);
    self.catch_up_with_cache();
    let last_seq = self.last_change_sequence_number;
    let nack_delay = self.nack_response_delay;

    let reader_proxy = match self.readers.get_mut(&reader_guid) {
      Some(rp) => rp,
      None => {
        debug!(
          "ACKNACK from unmatched reader {:?} to {:?}",
          reader_guid, self.my_guid
        );
        return;
      }
    };
    if an.reader_sn_state.base() > last_seq.plus_1() {
      warn!(
        "ACKNACK from {:?} acks {:?}, but I have only up to {:?}",
        reader_guid,
        an.reader_sn_state.base(),
        last_seq
      );
    }
    if !reader_proxy.handle_ack_nack(an, last_seq) {
      return; // duplicate
    }
    let acked_before = reader_proxy.all_acked_before;

    if reader_proxy.has_unsent_changes() && !reader_proxy.repair_mode {
      reader_proxy.repair_mode = true;
      self.timed_event_timer.set_timeout(
        nack_delay,
        TimedEvent::SendRepairData {
          to_reader: reader_guid,
        },
      );
    }
    let pending_gap: BTreeSet<SequenceNumber> = reader_proxy.pending_gap().clone();
    let needs_heartbeat = an.reader_sn_state.is_empty() && acked_before <= last_seq;

    self.update_ack_waiters(reader_guid, Some(acked_before));

    // GAPs the reader has not acknowledged yet, and a HEARTBEAT if the reader
    // is behind without knowing it.
    if !pending_gap.is_empty() || needs_heartbeat {
      let count = self.next_heartbeat_count();
      let mut builder =
        MessageBuilder::new().dst_submessage(self.endianness, reader_guid.prefix);
      for chunk in gap_chunks(&pending_gap) {
        builder = builder.gap_msg(
          &chunk,
          reader_guid.entity_id,
          self.my_guid.entity_id,
          self.endianness,
        );
      }
      if needs_heartbeat {
        builder = self.add_heartbeat(builder, reader_guid.entity_id, count, false);
      }
      let message = builder.add_header_and_build(self.my_guid.prefix);
      if let Some(rp) = self.readers.get(&reader_guid) {
        self.send_message_to_readers(DeliveryMode::Unicast, &message, &mut std::iter::once(rp));
      }
    }

    self.handle_cache_cleaning();
  }

  fn update_ack_waiters(&mut self, guid: GUID, acked_before: Option<SequenceNumber>) {
    let completed = self
      .ack_waiter
      .as_mut()
      .map_or(false, |aw| aw.reader_acked_or_lost(guid, acked_before));
    if completed {
      if let Some(aw) = self.ack_waiter.take() {
        aw.notify_wait_complete();
      }
    }
  }

  // Send out missing data

  pub fn handle_repair_data_send(&mut self, to_reader: GUID) {
    // Note: here we remove the reader from our reader map temporarily.
    // Then we can mutate both the reader and other fields in self.
    if let Some(mut reader_proxy) = self.readers.remove(&to_reader) {
      self.handle_repair_data_send_worker(&mut reader_proxy);
      if let Some(rp) = self
        .readers
        .insert(reader_proxy.remote_reader_guid, reader_proxy)
      {
        error!("Reader proxy was duplicated somehow??? {:?}", rp);
      }
    }
  }

  fn handle_repair_data_send_worker(&mut self, reader_proxy: &mut RtpsReaderProxy) {
    // Note: The reader_proxy is now removed from readers map
    let reader_guid = reader_proxy.remote_reader_guid;
    reader_proxy.repair_mode = false;
    let requested = reader_proxy.take_unsent_changes();
    if requested.is_empty() {
      return;
    }
    debug!(
      "Repair data send to {:?} due to ACKNACK: {:?}",
      reader_guid, requested
    );

    let mut no_longer_relevant: BTreeSet<SequenceNumber> = BTreeSet::new();
    let mut changes: Vec<CacheChange> = Vec::new();
    for sn in requested {
      if reader_proxy.pending_gap().contains(&sn) {
        no_longer_relevant.insert(sn);
        continue;
      }
      match self.cache.get_change(self.my_guid, sn) {
        Some(cc) => changes.push(cc),
        None => {
          // Evicted by KEEP_LAST or already removed as acknowledged by everyone.
          debug!(
            "Reader {:?} requested {:?}, which is no longer available",
            reader_guid, sn
          );
          no_longer_relevant.insert(sn);
        }
      }
    }

    let mut messages: Vec<Message> = Vec::new();
    let mut builder = MessageBuilder::new().dst_submessage(self.endianness, reader_guid.prefix);
    for chunk in gap_chunks(&no_longer_relevant) {
      builder = builder.gap_msg(
        &chunk,
        reader_guid.entity_id,
        self.my_guid.entity_id,
        self.endianness,
      );
    }
    let mut datagram_size = 0;
    for cc in changes.iter() {
      let size = cc.payload_len() + DATA_OVERHEAD;
      if datagram_size > 0 && datagram_size + size > REPAIR_DATAGRAM_BUDGET {
        messages.push(builder.add_header_and_build(self.my_guid.prefix));
        builder = MessageBuilder::new().dst_submessage(self.endianness, reader_guid.prefix);
        datagram_size = 0;
      }
      builder = self.data_builder(builder, cc, reader_guid.entity_id);
      datagram_size += size;
    }
    let count = self.next_heartbeat_count();
    builder = self.add_heartbeat(builder, reader_guid.entity_id, count, false);
    messages.push(builder.add_header_and_build(self.my_guid.prefix));

    for message in messages.iter() {
      self.send_message_to_readers(
        DeliveryMode::Unicast,
        message,
        &mut std::iter::once(&*reader_proxy),
      );
    }
  }

  /// Removes changes from the HistoryCache once they are no longer needed.
  /// VOLATILE writers drop everything every reliable reader has acknowledged.
  /// TRANSIENT_LOCAL writers keep history for late joiners, bounded by the
  /// KEEP_LAST depth of the cache.
  fn handle_cache_cleaning(&mut self) {
    if self.qos_policies.durability_or_default() != Durability::Volatile {
      return;
    }
    let acked_by_all_readers = self
      .readers
      .values()
      .filter(|rp| rp.reliable)
      .map(RtpsReaderProxy::acked_up_to_before)
      .min()
      .unwrap_or_else(|| self.last_change_sequence_number.plus_1());
    let removed = self
      .cache
      .remove_changes_before(self.my_guid, acked_by_all_readers);
    if removed > 0 {
      trace!(
        "Writer {:?} released {} changes before {:?}",
        self.my_guid.entity_id,
        removed,
        acked_by_all_readers
      );
    }
  }

  fn send_message_to_readers(
    &self,
    preferred_mode: DeliveryMode,
    message: &Message,
    readers: &mut dyn Iterator<Item = &RtpsReaderProxy>,
  ) {
    let buffer = match message.write_to_vec_with_ctx(self.endianness) {
      Ok(b) => b,
      Err(e) => {
        error!("Cannot serialize message of {:?}: {:?}", self.my_guid, e);
        return;
      }
    };
    let mut already_sent_to = BTreeSet::new();

    macro_rules! send_unless_sent_and_mark {
      ($locs:expr) => {
        for loc in $locs.iter() {
          if already_sent_to.contains(loc) {
            trace!("Already sent to {:?}", loc);
          } else {
            self.transport.send_to_locator(&buffer, loc);
            already_sent_to.insert(*loc);
          }
        }
      };
    }

    for reader in readers {
      match (
        preferred_mode,
        reader.unicast_locator_list.is_empty(),
        reader.multicast_locator_list.is_empty(),
      ) {
        (DeliveryMode::Multicast, _, false) => {
          send_unless_sent_and_mark!(reader.multicast_locator_list);
        }
        (DeliveryMode::Unicast, false, _) | (_, false, true) => {
          send_unless_sent_and_mark!(reader.unicast_locator_list);
        }
        (DeliveryMode::Unicast, true, false) => {
          send_unless_sent_and_mark!(reader.multicast_locator_list);
        }
        (_, true, true) => {
          warn!(
            "send_message_to_readers: No locators for {:?}",
            reader.remote_reader_guid
          );
        }
      }
    }
  }

  // --------------------------------------------------------------
  // Matching

  /// Discovery tells us about a remote reader. Decides whether it matches,
  /// and reports what changed.
  pub fn update_reader_proxy(&mut self, reader_proxy: RtpsReaderProxy, reader_topic: &TopicDescriptor) {
    let remote = reader_proxy.remote_reader_guid;
    let outcome = evaluate(
      &self.my_topic,
      &self.qos_policies,
      reader_topic,
      reader_proxy.qos(),
    );
    let events = self.match_tracker.update(remote, outcome);
    if events.is_empty() {
      if let Some(rp) = self.readers.get_mut(&remote) {
        rp.update(&reader_proxy);
      }
      return;
    }
    let mut proxy = Some(reader_proxy);
    for event in events {
      match event {
        MatchEvent::Removed => self.reader_unmatched(remote),
        MatchEvent::Incompatible(policy) => self.report_incompatible(remote, policy),
        MatchEvent::Matched => {
          if let Some(rp) = proxy.take() {
            self.reader_matched(rp);
          }
        }
      }
    }
  }

  fn reader_matched(&mut self, mut reader_proxy: RtpsReaderProxy) {
    let remote = reader_proxy.remote_reader_guid;
    let last = self.last_change_sequence_number;
    let volatile = self.qos_policies.durability_or_default() == Durability::Volatile;

    if self.reliable && reader_proxy.reliable && last >= SequenceNumber::new(1) {
      // A VOLATILE writer does not deliver what was written before the match.
      // Only the changes still in the cache could ever be sent, so only
      // those need to be remembered as pending GAP.
      if volatile {
        let first_in_cache = self.first_available_sequence_number();
        reader_proxy.set_pending_gap_range(first_in_cache, last);
      }
      let count = self.next_heartbeat_count();
      let mut builder = MessageBuilder::new().dst_submessage(self.endianness, remote.prefix);
      if volatile {
        builder = builder.gap_range_msg(
          SequenceNumber::new(1),
          last,
          remote.entity_id,
          self.my_guid.entity_id,
          self.endianness,
        );
      }
      let message = self
        .add_heartbeat(builder, remote.entity_id, count, false)
        .add_header_and_build(self.my_guid.prefix);
      self.send_message_to_readers(
        DeliveryMode::Unicast,
        &message,
        &mut std::iter::once(&reader_proxy),
      );
    }

    info!(
      "Matched new remote reader on topic={:?} reader={:?}",
      self.topic_name(),
      remote
    );
    debug!("Reader details: {:?}", &reader_proxy);
    self.readers.insert(remote, reader_proxy);

    let (total, current) = self.counters.on_match();
    let info = MatchingInfo::matched(remote);
    send_status(
      &self.status_sender,
      DataWriterStatus::PublicationMatched {
        total,
        current,
        info,
      },
    );
    if let Some(l) = &self.listener {
      l.on_publication_matched(info);
    }
  }

  fn reader_unmatched(&mut self, remote: GUID) {
    if let Some(removed) = self.readers.remove(&remote) {
      info!(
        "Removed reader proxy. topic={:?} reader={:?}",
        self.topic_name(),
        removed.remote_reader_guid
      );
      let (total, current) = self.counters.on_unmatch();
      let info = MatchingInfo::removed(remote);
      send_status(
        &self.status_sender,
        DataWriterStatus::PublicationMatched {
          total,
          current,
          info,
        },
      );
      if let Some(l) = &self.listener {
        l.on_publication_matched(info);
      }
    }
    self.update_ack_waiters(remote, None);
    // Cleaning may have been waiting for this reader.
    self.handle_cache_cleaning();
  }

  fn report_incompatible(&mut self, remote: GUID, policy: QosPolicyId) {
    warn!(
      "Reader {:?} requests QoS incompatible with writer {:?} on topic {:?}: {:?}",
      remote,
      self.my_guid,
      self.topic_name(),
      policy
    );
    let count = self.counters.on_incompatible();
    send_status(
      &self.status_sender,
      DataWriterStatus::OfferedIncompatibleQos {
        count,
        last_policy_id: policy,
        reader: remote,
      },
    );
    if let Some(l) = &self.listener {
      l.on_offered_incompatible_qos(remote, policy);
    }
  }

  pub fn reader_lost(&mut self, guid: GUID) {
    if let Some(MatchEvent::Removed) = self.match_tracker.remove(guid) {
      self.reader_unmatched(guid);
    } else {
      self.readers.remove(&guid);
      self.update_ack_waiters(guid, None);
    }
  }

  // Entire remote participant was lost.
  // Remove all remote readers belonging to it.
  pub fn participant_lost(&mut self, guid_prefix: GuidPrefix) {
    for reader in self.match_tracker.remotes_of_participant(guid_prefix) {
      self.reader_lost(reader);
    }
  }
}

// GAP submessages for `sns`: each covers SNs within 256 of its first one,
// so that nothing is left out of the bitmap.
fn gap_chunks(sns: &BTreeSet<SequenceNumber>) -> Vec<BTreeSet<SequenceNumber>> {
  let mut chunks: Vec<BTreeSet<SequenceNumber>> = Vec::new();
  let mut current: BTreeSet<SequenceNumber> = BTreeSet::new();
  let mut window_end = SequenceNumber::zero();
  for &sn in sns {
    if current.is_empty() {
      window_end = sn + SequenceNumber::new(256);
    } else if sn >= window_end {
      chunks.push(std::mem::take(&mut current));
      window_end = sn + SequenceNumber::new(256);
    }
    current.insert(sn);
  }
  if !current.is_empty() {
    chunks.push(current);
  }
  chunks
}

// -------------------------------------------------------------------------------------
