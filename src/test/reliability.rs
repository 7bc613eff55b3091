// A reliable Writer and Reader exchanging datagrams through lossy networks,
// driven in rounds instead of by an event loop.

use std::{rc::Rc, sync::Arc, thread, time::Duration as StdDuration};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio_extras::{channel as mio_channel, timer};

use crate::{
  dds::{
    qos::{
      policy::{Durability, History, Reliability},
      QosPolicies,
    },
    statusevents::{status_channel, DataReaderStatus, DataWriterStatus, StatusReceiver},
  },
  discovery::matching::TopicDescriptor,
  messages::{
    serialized_payload::{RepresentationIdentifier, SerializedPayload},
    submessages::submessages::AckNack,
  },
  rtps::{
    message_receiver::MessageReceiver,
    reader::{Reader, ReaderIngredients},
    rtps_reader_proxy::RtpsReaderProxy,
    rtps_writer_proxy::RtpsWriterProxy,
    writer::{Writer, WriterCommand, WriterIngredients},
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    duration::Duration,
    guid::{EntityId, EntityKind, GuidPrefix, GUID},
    history_cache::{HistoryCache, HistoryLimits},
    instance_handle::InstanceHandle,
    locator::Locator,
    sequence_number::SequenceNumber,
  },
  test::transport::LossyNetwork,
};

pub(crate) struct ReliablePair {
  writer: Writer,
  writer_cache: Arc<HistoryCache>,
  writer_commands: mio_channel::SyncSender<WriterCommand>,
  writer_side: MessageReceiver,
  acknacks: mio_channel::Receiver<(GuidPrefix, AckNack)>,
  to_reader: Rc<LossyNetwork>,

  reader_side: MessageReceiver,
  reader_guid: GUID,
  reader_cache: Arc<HistoryCache>,
  to_writer: Rc<LossyNetwork>,

  next_sn: i64,
  writer_guid: GUID,
  topic: TopicDescriptor,
  qos: QosPolicies,
  _writer_status: StatusReceiver<DataWriterStatus>,
  _reader_status: StatusReceiver<DataReaderStatus>,
  _notifications: mio_channel::Receiver<()>,
  _liveness: Vec<mio_channel::Receiver<GuidPrefix>>,
  _reader_acknacks: mio_channel::Receiver<(GuidPrefix, AckNack)>,
}

fn reliable_keep_all() -> QosPolicies {
  QosPolicies::builder()
    .reliability(Reliability::Reliable {
      max_blocking_time: Duration::from_millis(100),
    })
    .history(History::KeepAll)
    .build()
}

/// Keeps the newest two samples for readers that match later.
pub(crate) fn reliable_keep_last_2() -> QosPolicies {
  QosPolicies::builder()
    .reliability(Reliability::Reliable {
      max_blocking_time: Duration::from_millis(100),
    })
    .durability(Durability::TransientLocal)
    .history(History::KeepLast { depth: 2 })
    .build()
}

fn fast_timer<T>() -> timer::Timer<T> {
  timer::Builder::default()
    .tick_duration(StdDuration::from_millis(1))
    .build()
}

impl ReliablePair {
  /// `to_reader` carries Writer traffic, `to_writer` carries Reader traffic.
  pub fn new(to_reader: LossyNetwork, to_writer: LossyNetwork) -> ReliablePair {
    let mut pair = ReliablePair::unmatched(reliable_keep_all(), to_reader, to_writer);
    pair.match_endpoints();
    pair
  }

  /// Both endpoints use `qos`. They do not know each other until
  /// `match_endpoints`.
  pub fn unmatched(
    qos: QosPolicies,
    to_reader: LossyNetwork,
    to_writer: LossyNetwork,
  ) -> ReliablePair {
    let topic = TopicDescriptor::new("reliability", "Bytes", false);
    let writer_guid = GUID::new(
      GuidPrefix::new(&[0xA; 12]),
      EntityId::from_key_u32(1, EntityKind::WRITER_NO_KEY_USER_DEFINED),
    );
    let reader_guid = GUID::new(
      GuidPrefix::new(&[0xB; 12]),
      EntityId::from_key_u32(2, EntityKind::READER_NO_KEY_USER_DEFINED),
    );
    let to_reader = Rc::new(to_reader);
    let to_writer = Rc::new(to_writer);

    let writer_cache = Arc::new(HistoryCache::new(HistoryLimits::from_qos(&qos, false)));
    let (writer_commands, writer_command_receiver) = mio_channel::sync_channel(1024);
    let (writer_status_sender, writer_status) = status_channel();
    let writer = Writer::new(
      WriterIngredients {
        guid: writer_guid,
        writer_command_receiver,
        topic: topic.clone(),
        cache: writer_cache.clone(),
        qos_policies: qos.clone(),
        status_sender: writer_status_sender,
        listener: None,
        heartbeat_period: StdDuration::from_secs(3600),
        nack_response_delay: StdDuration::from_millis(0),
      },
      to_reader.clone(),
      fast_timer(),
    );

    let reader_cache = Arc::new(HistoryCache::new(HistoryLimits::from_qos(&qos, false)));
    let (reader_status_sender, reader_status) = status_channel();
    let (notification_sender, notifications) = mio_channel::sync_channel(4);
    let reader = Reader::new(
      ReaderIngredients {
        guid: reader_guid,
        topic: topic.clone(),
        cache: reader_cache.clone(),
        qos_policies: qos.clone(),
        status_sender: reader_status_sender,
        notification_sender,
        listener: None,
        heartbeat_response_delay: StdDuration::from_millis(0),
        accept_unmatched_writers: false,
      },
      to_writer.clone(),
      fast_timer(),
    );

    let (acknack_sender, acknacks) = mio_channel::sync_channel(1024);
    let (writer_liveness, writer_liveness_rec) = mio_channel::sync_channel(1024);
    let writer_side = MessageReceiver::new(writer_guid.prefix, acknack_sender, writer_liveness);

    let (reader_acknack_sender, reader_acknacks) = mio_channel::sync_channel(1024);
    let (reader_liveness, reader_liveness_rec) = mio_channel::sync_channel(1024);
    let mut reader_side =
      MessageReceiver::new(reader_guid.prefix, reader_acknack_sender, reader_liveness);
    reader_side.add_reader(reader);

    ReliablePair {
      writer,
      writer_cache,
      writer_commands,
      writer_side,
      acknacks,
      to_reader,
      reader_side,
      reader_guid,
      reader_cache,
      to_writer,
      next_sn: 1,
      writer_guid,
      topic,
      qos,
      _writer_status: writer_status,
      _reader_status: reader_status,
      _notifications: notifications,
      _liveness: vec![writer_liveness_rec, reader_liveness_rec],
      _reader_acknacks: reader_acknacks,
    }
  }

  pub fn match_endpoints(&mut self) {
    self.writer.update_reader_proxy(
      RtpsReaderProxy::new(self.reader_guid, self.qos.clone(), vec![Locator::shm(2)], vec![]),
      &self.topic,
    );
    if let Some(reader) = self.reader_side.reader_mut(self.reader_guid.entity_id) {
      reader.update_writer_proxy(
        RtpsWriterProxy::new(self.writer_guid, self.qos.clone(), vec![Locator::shm(1)], vec![]),
        &self.topic,
      );
    }
    self.pump();
  }

  pub fn write(&mut self, value: u8) -> SequenceNumber {
    let sn = SequenceNumber::new(self.next_sn);
    self.next_sn += 1;
    let change = CacheChange::new(
      ChangeKind::Alive,
      self.writer.guid(),
      sn,
      InstanceHandle::NIL,
      Some(SerializedPayload::new(
        RepresentationIdentifier::CDR_LE,
        vec![value],
      )),
    );
    if let Err(e) = self.writer_cache.add_change(change) {
      panic!("writer cache rejected change: {:?}", e);
    }
    if let Err(e) = self.writer_commands.try_send(WriterCommand::NewChange {
      sequence_number: sn,
    }) {
      panic!("writer command channel: {:?}", e);
    }
    self.writer.process_writer_command();
    sn
  }

  /// One exchange: a heartbeat, then both networks delivered and every due
  /// timer processed.
  pub fn round(&mut self) {
    self.writer.handle_heartbeat_tick(false);
    self.pump();
    // zero delays fire on the next timer tick
    thread::sleep(StdDuration::from_millis(3));
    if let Some(reader) = self.reader_side.reader_mut(self.reader_guid.entity_id) {
      reader.handle_timed_event();
    }
    self.pump();
    thread::sleep(StdDuration::from_millis(3));
    self.writer.handle_timed_event();
    self.pump();
  }

  fn pump(&mut self) {
    for (_loc, datagram) in self.to_reader.deliver() {
      self.reader_side.handle_received_packet(&datagram);
    }
    for (_loc, datagram) in self.to_writer.deliver() {
      self.writer_side.handle_received_packet(&datagram);
    }
    while let Ok((prefix, acknack)) = self.acknacks.try_recv() {
      self.writer.handle_ack_nack(prefix, &acknack);
    }
  }

  /// Payload bytes the reader has made available, in delivery order.
  pub fn take_all(&self) -> Vec<u8> {
    let mut values = Vec::new();
    while let Some(change) = self.reader_cache.take_next() {
      if let Some(payload) = change.data_value {
        values.extend_from_slice(&payload.value);
      }
    }
    values
  }

  pub fn all_acked(&self) -> bool {
    self
      .writer
      .reader_proxy(self.reader_guid)
      .map_or(false, |rp| {
        rp.all_acked_before > self.writer.last_change_sequence_number()
      })
  }
}

#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, Rng, SeedableRng};

  use super::*;

  fn run(seed: u64, loss: f64, samples: u8, max_rounds: usize) -> (Vec<u8>, usize) {
    let mut pair = ReliablePair::new(
      LossyNetwork::new(seed, loss, 0.1, 0.5),
      LossyNetwork::new(seed.wrapping_add(1), loss, 0.1, 0.5),
    );
    let mut received = Vec::new();
    for v in 0..samples {
      pair.write(v);
    }
    let mut rounds = 0;
    while received.len() < samples as usize && rounds < max_rounds {
      pair.round();
      received.extend(pair.take_all());
      rounds += 1;
    }
    (received, rounds)
  }

  #[test]
  fn perfect_network_delivers_without_repairs() {
    let mut pair = ReliablePair::new(LossyNetwork::perfect(), LossyNetwork::perfect());
    for v in 0..5 {
      pair.write(v);
    }
    pair.round();
    assert_eq!(pair.take_all(), vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn lossy_network_delivers_everything_in_order_exactly_once() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..8 {
      let seed: u64 = rng.gen();
      let (received, rounds) = run(seed, 0.3, 20, 200);
      let expected: Vec<u8> = (0..20).collect();
      assert_eq!(
        received, expected,
        "seed {} after {} rounds",
        seed, rounds
      );
    }
  }

  #[test]
  fn late_joiner_gets_newest_history_in_order() {
    let mut pair = ReliablePair::unmatched(
      reliable_keep_last_2(),
      LossyNetwork::perfect(),
      LossyNetwork::perfect(),
    );
    for v in [b'A', b'B', b'C'] {
      pair.write(v);
    }
    pair.match_endpoints();
    let mut received = Vec::new();
    for _ in 0..5 {
      pair.round();
      received.extend(pair.take_all());
    }
    // A was evicted before the match
    assert_eq!(received, vec![b'B', b'C']);
    assert!(pair.all_acked());
  }

  #[test]
  fn reader_acknowledges_everything_eventually() {
    let mut pair = ReliablePair::new(
      LossyNetwork::new(5, 0.2, 0.0, 0.0),
      LossyNetwork::new(6, 0.2, 0.0, 0.0),
    );
    for v in 0..10 {
      pair.write(v);
    }
    let mut rounds = 0;
    while !pair.all_acked() && rounds < 200 {
      pair.round();
      rounds += 1;
    }
    assert!(pair.all_acked(), "not acked after {} rounds", rounds);
    assert_eq!(pair.take_all(), (0..10).collect::<Vec<u8>>());
  }
}
