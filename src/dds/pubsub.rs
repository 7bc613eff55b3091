use std::{fmt, sync::Arc};

use mio_extras::channel as mio_channel;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    adapters::{DeserializerAdapter, Keyed, SerializerAdapter},
    datareader::DataReader,
    datawriter::DataWriter,
    participant::DomainParticipantWeak,
    qos::QosPolicies,
    result::{Error, Result},
    statusevents::{status_channel, DataReaderListener, DataWriterListener},
    topic::Topic,
  },
  discovery::{
    discovery::DiscoveryCommand,
    discovery_db::discovery_db_write,
    sedp_messages::{DiscoveredReaderData, DiscoveredWriterData},
  },
  log_and_err_internal,
  rtps::{
    reader::ReaderIngredients,
    writer::{WriterCommand, WriterIngredients},
  },
  structure::{
    guid::{EntityId, EntityKind, GUID},
    history_cache::{HistoryCache, HistoryLimits},
  },
};

// Commands a DataWriter may queue before the event loop drains them.
const WRITER_COMMAND_CHANNEL_SIZE: usize = 64;
// Pending "data available" pings. More are pointless: the reader drains all.
const READER_NOTIFICATION_CHANNEL_SIZE: usize = 4;

fn send_discovery_command(sender: &mio_channel::SyncSender<DiscoveryCommand>, cmd: DiscoveryCommand) {
  match sender.send(cmd) {
    Ok(()) => (),
    Err(e) => error!("Cannot notify discovery of a new local endpoint: {:?}", e),
  }
}

// -------------------------------------------------------------------

/// DDS Publisher
///
/// Creates DataWriters. QoS given to the Publisher is the default for its
/// DataWriters, and is overridden by the QoS given at DataWriter creation.
#[derive(Clone)]
pub struct Publisher {
  inner: Arc<InnerPublisher>,
}

struct InnerPublisher {
  domain_participant: DomainParticipantWeak,
  my_qos_policies: QosPolicies,
  add_writer_sender: mio_channel::SyncSender<WriterIngredients>,
  remove_writer_sender: mio_channel::SyncSender<GUID>,
  discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
}

impl Publisher {
  pub(crate) fn new(
    dp: DomainParticipantWeak,
    qos: QosPolicies,
    add_writer_sender: mio_channel::SyncSender<WriterIngredients>,
    remove_writer_sender: mio_channel::SyncSender<GUID>,
    discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
  ) -> Publisher {
    Publisher {
      inner: Arc::new(InnerPublisher {
        domain_participant: dp,
        my_qos_policies: qos,
        add_writer_sender,
        remove_writer_sender,
        discovery_command,
      }),
    }
  }

  /// Creates a DataWriter for `topic`.
  ///
  /// The effective QoS is the topic QoS, modified by the Publisher QoS, and
  /// then by `qos`. The writer is announced through discovery.
  pub fn create_datawriter<D, SA>(
    &self,
    topic: &Topic,
    qos: Option<QosPolicies>,
    listener: Option<Arc<dyn DataWriterListener>>,
  ) -> Result<DataWriter<D, SA>>
  where
    D: Keyed,
    SA: SerializerAdapter<D>,
  {
    self.create_datawriter_internal(None, topic, qos, listener)
  }

  pub(crate) fn create_datawriter_with_entity_id<D, SA>(
    &self,
    entity_id: EntityId,
    topic: &Topic,
    qos: Option<QosPolicies>,
  ) -> Result<DataWriter<D, SA>>
  where
    D: Keyed,
    SA: SerializerAdapter<D>,
  {
    self.create_datawriter_internal(Some(entity_id), topic, qos, None)
  }

  fn create_datawriter_internal<D, SA>(
    &self,
    entity_id_opt: Option<EntityId>,
    topic: &Topic,
    optional_qos: Option<QosPolicies>,
    listener: Option<Arc<dyn DataWriterListener>>,
  ) -> Result<DataWriter<D, SA>>
  where
    D: Keyed,
    SA: SerializerAdapter<D>,
  {
    let mut writer_qos = topic.qos().modify_by(&self.inner.my_qos_policies);
    if let Some(qos) = optional_qos {
      writer_qos = writer_qos.modify_by(&qos);
    }

    let dp = self
      .inner
      .domain_participant
      .upgrade()
      .ok_or(Error::AlreadyDeleted)?;

    let entity_id = match entity_id_opt {
      Some(eid) => eid,
      None => dp.new_entity_id(if topic.is_keyed() {
        EntityKind::WRITER_WITH_KEY_USER_DEFINED
      } else {
        EntityKind::WRITER_NO_KEY_USER_DEFINED
      }),
    };
    let guid = GUID::new(dp.guid().prefix, entity_id);

    let cache = Arc::new(HistoryCache::new(HistoryLimits::from_qos(
      &writer_qos,
      topic.is_keyed(),
    )));
    let (cc_upload, writer_command_receiver) =
      mio_channel::sync_channel::<WriterCommand>(WRITER_COMMAND_CHANNEL_SIZE);
    let (status_sender, status_receiver) = status_channel();

    let config = dp.config();
    let new_writer = WriterIngredients {
      guid,
      writer_command_receiver,
      topic: topic.descriptor(),
      cache: cache.clone(),
      qos_policies: writer_qos.clone(),
      status_sender,
      listener,
      heartbeat_period: config.heartbeat_period,
      nack_response_delay: config.nack_response_delay,
    };
    self
      .inner
      .add_writer_sender
      .send(new_writer)
      .or_else(|e| log_and_err_internal!("Adding a new writer failed: {}", e))?;

    if entity_id.kind().is_user_defined() {
      let locators = dp.self_locators();
      discovery_db_write(dp.discovery_db()).update_local_topic_writer(DiscoveredWriterData {
        writer_guid: guid,
        topic: topic.descriptor(),
        qos: writer_qos.clone(),
        unicast_locator_list: locators.default_unicast.clone(),
        multicast_locator_list: locators.default_multicast.clone(),
      });
      send_discovery_command(
        &self.inner.discovery_command,
        DiscoveryCommand::AddLocalWriter { guid },
      );
    }
    debug!("Created DataWriter {:?} on topic {:?}", guid, topic.name());

    Ok(DataWriter::new(
      self.clone(),
      topic.clone(),
      writer_qos,
      guid,
      cache,
      cc_upload,
      self.inner.discovery_command.clone(),
      status_receiver,
    ))
  }

  pub(crate) fn remove_writer(&self, guid: GUID) {
    if let Err(e) = self.inner.remove_writer_sender.try_send(guid) {
      debug!("Failed to send remove writer {:?}: {:?}", guid, e);
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.inner.my_qos_policies
  }

  pub fn participant_guid(&self) -> GUID {
    self.inner.domain_participant.guid()
  }
}

impl fmt::Debug for Publisher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_fmt(format_args!(
      "Publisher {:?} {:?}",
      self.inner.domain_participant, self.inner.my_qos_policies
    ))
  }
}

// -------------------------------------------------------------------

/// DDS Subscriber
///
/// Creates DataReaders. QoS is combined as in [`Publisher`].
#[derive(Clone)]
pub struct Subscriber {
  inner: Arc<InnerSubscriber>,
}

struct InnerSubscriber {
  domain_participant: DomainParticipantWeak,
  qos: QosPolicies,
  add_reader_sender: mio_channel::SyncSender<ReaderIngredients>,
  remove_reader_sender: mio_channel::SyncSender<GUID>,
  discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
}

impl Subscriber {
  pub(crate) fn new(
    domain_participant: DomainParticipantWeak,
    qos: QosPolicies,
    add_reader_sender: mio_channel::SyncSender<ReaderIngredients>,
    remove_reader_sender: mio_channel::SyncSender<GUID>,
    discovery_command: mio_channel::SyncSender<DiscoveryCommand>,
  ) -> Subscriber {
    Subscriber {
      inner: Arc::new(InnerSubscriber {
        domain_participant,
        qos,
        add_reader_sender,
        remove_reader_sender,
        discovery_command,
      }),
    }
  }

  /// Creates a DataReader for `topic`. The reader is announced through
  /// discovery and starts receiving once a compatible writer is matched.
  pub fn create_datareader<D, DA>(
    &self,
    topic: &Topic,
    qos: Option<QosPolicies>,
    listener: Option<Arc<dyn DataReaderListener>>,
  ) -> Result<DataReader<D, DA>>
  where
    DA: DeserializerAdapter<D>,
  {
    self.create_datareader_internal(None, topic, qos, listener)
  }

  pub(crate) fn create_datareader_with_entity_id<D, DA>(
    &self,
    entity_id: EntityId,
    topic: &Topic,
    qos: Option<QosPolicies>,
  ) -> Result<DataReader<D, DA>>
  where
    DA: DeserializerAdapter<D>,
  {
    self.create_datareader_internal(Some(entity_id), topic, qos, None)
  }

  fn create_datareader_internal<D, DA>(
    &self,
    entity_id_opt: Option<EntityId>,
    topic: &Topic,
    optional_qos: Option<QosPolicies>,
    listener: Option<Arc<dyn DataReaderListener>>,
  ) -> Result<DataReader<D, DA>>
  where
    DA: DeserializerAdapter<D>,
  {
    let mut reader_qos = topic.qos().modify_by(&self.inner.qos);
    if let Some(qos) = optional_qos {
      reader_qos = reader_qos.modify_by(&qos);
    }

    let dp = self
      .inner
      .domain_participant
      .upgrade()
      .ok_or(Error::AlreadyDeleted)?;

    let entity_id = match entity_id_opt {
      Some(eid) => eid,
      None => dp.new_entity_id(if topic.is_keyed() {
        EntityKind::READER_WITH_KEY_USER_DEFINED
      } else {
        EntityKind::READER_NO_KEY_USER_DEFINED
      }),
    };
    let guid = GUID::new(dp.guid().prefix, entity_id);

    let cache = Arc::new(HistoryCache::new(HistoryLimits::from_qos(
      &reader_qos,
      topic.is_keyed(),
    )));
    let (notification_sender, notification_receiver) =
      mio_channel::sync_channel::<()>(READER_NOTIFICATION_CHANNEL_SIZE);
    let (status_sender, status_receiver) = status_channel();

    let new_reader = ReaderIngredients {
      guid,
      topic: topic.descriptor(),
      cache: cache.clone(),
      qos_policies: reader_qos.clone(),
      status_sender,
      notification_sender,
      listener,
      heartbeat_response_delay: dp.config().heartbeat_response_delay,
      accept_unmatched_writers: entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
    };
    self
      .inner
      .add_reader_sender
      .send(new_reader)
      .or_else(|e| log_and_err_internal!("Adding a new reader failed: {}", e))?;

    if entity_id.kind().is_user_defined() {
      let locators = dp.self_locators();
      discovery_db_write(dp.discovery_db()).update_local_topic_reader(DiscoveredReaderData {
        reader_guid: guid,
        topic: topic.descriptor(),
        qos: reader_qos.clone(),
        unicast_locator_list: locators.default_unicast.clone(),
        multicast_locator_list: locators.default_multicast.clone(),
        expects_inline_qos: false,
      });
      send_discovery_command(
        &self.inner.discovery_command,
        DiscoveryCommand::AddLocalReader { guid },
      );
    }
    debug!("Created DataReader {:?} on topic {:?}", guid, topic.name());

    Ok(DataReader::new(
      self.clone(),
      topic.clone(),
      reader_qos,
      guid,
      cache,
      notification_receiver,
      status_receiver,
      self.inner.discovery_command.clone(),
    ))
  }

  pub(crate) fn remove_reader(&self, guid: GUID) {
    if let Err(e) = self.inner.remove_reader_sender.try_send(guid) {
      debug!("Failed to send remove reader {:?}: {:?}", guid, e);
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.inner.qos
  }

  pub fn participant_guid(&self) -> GUID {
    self.inner.domain_participant.guid()
  }
}

impl fmt::Debug for Subscriber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_fmt(format_args!(
      "Subscriber {:?} {:?}",
      self.inner.domain_participant, self.inner.qos
    ))
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::{
    dds::{participant::DomainParticipant, qos::policy, topic::TopicKind},
    discovery::discovery_db::discovery_db_read,
    test::test_data::{TestData, TestDataAdapter},
  };

  #[test]
  fn local_endpoints_are_recorded_for_discovery() {
    let dp = DomainParticipant::new(51).unwrap();
    let qos = QosPolicies::builder()
      .reliability(policy::Reliability::BestEffort)
      .build();
    let topic = dp
      .create_topic("pubsub_local", "TestData", &qos, TopicKind::WithKey)
      .unwrap();
    let publisher = dp.create_publisher(&qos).unwrap();
    let subscriber = dp.create_subscriber(&qos).unwrap();
    let writer = publisher
      .create_datawriter::<TestData, TestDataAdapter>(&topic, None, None)
      .unwrap();
    let reader = subscriber
      .create_datareader::<TestData, TestDataAdapter>(&topic, None, None)
      .unwrap();

    assert!(writer.guid().entity_id.kind().is_writer());
    assert!(reader.guid().entity_id.kind().is_reader());
    assert_eq!(writer.guid().prefix, dp.guid().prefix);
    {
      let db = discovery_db_read(dp.discovery_db());
      assert_eq!(
        db.local_topic_writer(writer.guid()).map(|w| w.topic.topic_name.as_str()),
        Some("pubsub_local")
      );
      assert!(db.local_topic_reader(reader.guid()).is_some());
    }

    let writer_guid = writer.guid();
    drop(writer);
    // Removal goes through the discovery thread.
    let mut removed = false;
    for _ in 0..50 {
      if discovery_db_read(dp.discovery_db())
        .local_topic_writer(writer_guid)
        .is_none()
      {
        removed = true;
        break;
      }
      std::thread::sleep(Duration::from_millis(20));
    }
    assert!(removed);
  }

  #[test]
  fn datawriter_qos_overrides_publisher_qos() {
    let dp = DomainParticipant::new(52).unwrap();
    let publisher_qos = QosPolicies::builder()
      .reliability(policy::Reliability::BestEffort)
      .history(policy::History::KeepLast { depth: 3 })
      .build();
    let topic = dp
      .create_topic(
        "pubsub_qos",
        "TestData",
        &QosPolicies::qos_none(),
        TopicKind::WithKey,
      )
      .unwrap();
    let publisher = dp.create_publisher(&publisher_qos).unwrap();
    let writer = publisher
      .create_datawriter::<TestData, TestDataAdapter>(
        &topic,
        Some(
          QosPolicies::builder()
            .history(policy::History::KeepLast { depth: 7 })
            .build(),
        ),
        None,
      )
      .unwrap();
    assert_eq!(
      writer.qos().history,
      Some(policy::History::KeepLast { depth: 7 })
    );
    assert_eq!(
      writer.qos().reliability,
      Some(policy::Reliability::BestEffort)
    );
  }

  #[test]
  fn entities_outlive_participant_handle_gracefully() {
    let dp = DomainParticipant::new(53).unwrap();
    let topic = dp
      .create_topic(
        "pubsub_orphan",
        "TestData",
        &QosPolicies::qos_none(),
        TopicKind::WithKey,
      )
      .unwrap();
    let publisher = dp.create_publisher(&QosPolicies::qos_none()).unwrap();
    drop(dp);
    assert!(matches!(
      publisher.create_datawriter::<TestData, TestDataAdapter>(&topic, None, None),
      Err(Error::AlreadyDeleted)
    ));
  }
}
