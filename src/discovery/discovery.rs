use std::{
  sync::{Arc, RwLock},
  time::Duration as StdDuration,
};

use chrono::Utc;
use mio::{Events, Poll, PollOpt, Ready};
use mio_extras::{channel as mio_channel, timer::Timer};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    datareader::{DataReader, DataSample},
    datawriter::DataWriter,
    participant::{DiscoveryConfig, DomainParticipant},
    qos::{
      policy::{Durability, History, Reliability},
      QosPolicies, QosPolicyBuilder,
    },
    result::Result,
    topic::TopicKind,
  },
  discovery::{
    builtin_endpoint::BuiltinEndpointSet,
    discovery_db::{discovery_db_read, discovery_db_write, DiscoveryDB},
    pl_cdr::PlCdrAdapter,
    sedp_messages::{guid_of_instance, DiscoveredReaderData, DiscoveredWriterData},
    spdp_participant_data::SpdpDiscoveredParticipantData,
  },
  messages::{header::ProtocolVersion, vendor_id::VendorId},
  rtps::constant::*,
  structure::{
    cache_change::ChangeKind,
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
  },
};

/// Requests to the discovery thread.
#[derive(Debug)]
pub(crate) enum DiscoveryCommand {
  StopDiscovery,
  AddLocalWriter { guid: GUID },
  AddLocalReader { guid: GUID },
  RemoveLocalWriter { guid: GUID },
  RemoveLocalReader { guid: GUID },
}

/// What discovery tells the event loop, which owns the RTPS endpoints.
#[derive(Debug)]
pub(crate) enum DiscoveryNotificationType {
  WriterUpdated {
    discovered_writer_data: DiscoveredWriterData,
  },
  WriterLost {
    writer_guid: GUID,
  },
  ReaderUpdated {
    discovered_reader_data: DiscoveredReaderData,
  },
  ReaderLost {
    reader_guid: GUID,
  },
  ParticipantUpdated {
    guid_prefix: GuidPrefix,
  },
  ParticipantLost {
    guid_prefix: GuidPrefix,
  },
}

type ParticipantReader =
  DataReader<SpdpDiscoveredParticipantData, PlCdrAdapter<SpdpDiscoveredParticipantData>>;
type ParticipantWriter =
  DataWriter<SpdpDiscoveredParticipantData, PlCdrAdapter<SpdpDiscoveredParticipantData>>;
type SubscriptionReader = DataReader<DiscoveredReaderData, PlCdrAdapter<DiscoveredReaderData>>;
type SubscriptionWriter = DataWriter<DiscoveredReaderData, PlCdrAdapter<DiscoveredReaderData>>;
type PublicationReader = DataReader<DiscoveredWriterData, PlCdrAdapter<DiscoveredWriterData>>;
type PublicationWriter = DataWriter<DiscoveredWriterData, PlCdrAdapter<DiscoveredWriterData>>;

/// Discovery mode of the thread, resolved from the participant config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Simple,
  Server,
  Client,
}

/// The discovery thread: runs SPDP and SEDP through builtin DataReaders and
/// DataWriters, keeps the DiscoveryDB, and notifies the event loop of
/// changes.
pub(crate) struct Discovery {
  poll: Poll,
  my_guid_prefix: GuidPrefix,
  mode: Mode,
  announcement_period: StdDuration,
  discovery_db: Arc<RwLock<DiscoveryDB>>,
  discovery_updated_sender: mio_channel::SyncSender<DiscoveryNotificationType>,
  discovery_command_receiver: mio_channel::Receiver<DiscoveryCommand>,
  spdp_liveness_receiver: mio_channel::Receiver<GuidPrefix>,

  own_participant_data: SpdpDiscoveredParticipantData,
  announce_timer: Timer<()>,
  participant_cleanup_timer: Timer<()>,

  dcps_participant_reader: ParticipantReader,
  dcps_participant_writer: ParticipantWriter,
  dcps_subscription_reader: SubscriptionReader,
  dcps_subscription_writer: SubscriptionWriter,
  dcps_publication_reader: PublicationReader,
  dcps_publication_writer: PublicationWriter,
}

impl Discovery {
  pub fn create_spdp_participant_qos() -> QosPolicies {
    QosPolicyBuilder::new()
      .reliability(Reliability::BestEffort)
      .history(History::KeepLast { depth: 1 })
      .build()
  }

  pub fn publisher_qos() -> QosPolicies {
    QosPolicyBuilder::new()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .durability(Durability::TransientLocal)
      .history(History::KeepLast { depth: 1 })
      .build()
  }

  pub fn subscriber_qos() -> QosPolicies {
    Self::publisher_qos()
  }

  pub fn new(
    domain_participant: &DomainParticipant,
    discovery_db: Arc<RwLock<DiscoveryDB>>,
    discovery_updated_sender: mio_channel::SyncSender<DiscoveryNotificationType>,
    discovery_command_receiver: mio_channel::Receiver<DiscoveryCommand>,
    spdp_liveness_receiver: mio_channel::Receiver<GuidPrefix>,
  ) -> Result<Discovery> {
    let poll = Poll::new()?;
    let config = domain_participant.config();
    let mode = match config.discovery {
      DiscoveryConfig::Simple { .. } => Mode::Simple,
      DiscoveryConfig::Server => Mode::Server,
      DiscoveryConfig::Client { .. } => Mode::Client,
    };

    let discovery_subscriber =
      domain_participant.create_subscriber(&QosPolicies::qos_none())?;
    let discovery_publisher = domain_participant.create_publisher(&QosPolicies::qos_none())?;

    // Participant
    let dcps_participant_qos = Self::create_spdp_participant_qos();
    let dcps_participant_topic = domain_participant.create_topic(
      "DCPSParticipant",
      "SPDPDiscoveredParticipantData",
      &dcps_participant_qos,
      TopicKind::WithKey,
    )?;
    let dcps_participant_reader: ParticipantReader = discovery_subscriber
      .create_datareader_with_entity_id(
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
        &dcps_participant_topic,
        None,
      )?;
    let dcps_participant_writer: ParticipantWriter = discovery_publisher
      .create_datawriter_with_entity_id(
        EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
        &dcps_participant_topic,
        None,
      )?;

    // Subscriptions
    let dcps_subscription_topic = domain_participant.create_topic(
      "DCPSSubscription",
      "DiscoveredReaderData",
      &Self::subscriber_qos(),
      TopicKind::WithKey,
    )?;
    let dcps_subscription_reader: SubscriptionReader = discovery_subscriber
      .create_datareader_with_entity_id(
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
        &dcps_subscription_topic,
        None,
      )?;
    let dcps_subscription_writer: SubscriptionWriter = discovery_publisher
      .create_datawriter_with_entity_id(
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
        &dcps_subscription_topic,
        None,
      )?;

    // Publications
    let dcps_publication_topic = domain_participant.create_topic(
      "DCPSPublication",
      "DiscoveredWriterData",
      &Self::publisher_qos(),
      TopicKind::WithKey,
    )?;
    let dcps_publication_reader: PublicationReader = discovery_subscriber
      .create_datareader_with_entity_id(
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        &dcps_publication_topic,
        None,
      )?;
    let dcps_publication_writer: PublicationWriter = discovery_publisher
      .create_datawriter_with_entity_id(
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        &dcps_publication_topic,
        None,
      )?;

    let mut announce_timer = Timer::default();
    announce_timer.set_timeout(config.announcement_period, ());
    let mut participant_cleanup_timer = Timer::default();
    participant_cleanup_timer.set_timeout(PARTICIPANT_CLEANUP_PERIOD, ());

    poll.register(
      &discovery_command_receiver,
      DISCOVERY_COMMAND_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &spdp_liveness_receiver,
      SPDP_LIVENESS_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &participant_cleanup_timer,
      PARTICIPANT_CLEANUP_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &announce_timer,
      SPDP_ANNOUNCE_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &dcps_participant_reader,
      DISCOVERY_PARTICIPANT_DATA_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &dcps_subscription_reader,
      DISCOVERY_READER_DATA_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &dcps_publication_reader,
      DISCOVERY_WRITER_DATA_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;

    let own_participant_data = Self::own_participant_data(domain_participant);

    Ok(Discovery {
      poll,
      my_guid_prefix: domain_participant.guid().prefix,
      mode,
      announcement_period: config.announcement_period,
      discovery_db,
      discovery_updated_sender,
      discovery_command_receiver,
      spdp_liveness_receiver,
      own_participant_data,
      announce_timer,
      participant_cleanup_timer,
      dcps_participant_reader,
      dcps_participant_writer,
      dcps_subscription_reader,
      dcps_subscription_writer,
      dcps_publication_reader,
      dcps_publication_writer,
    })
  }

  fn own_participant_data(dp: &DomainParticipant) -> SpdpDiscoveredParticipantData {
    let locators = dp.self_locators();
    let config = dp.config();
    SpdpDiscoveredParticipantData {
      updated_time: Utc::now(),
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      participant_guid: dp.guid(),
      metatraffic_unicast_locators: locators.metatraffic_unicast.clone(),
      metatraffic_multicast_locators: locators.metatraffic_multicast.clone(),
      default_unicast_locators: locators.default_unicast.clone(),
      default_multicast_locators: locators.default_multicast.clone(),
      available_builtin_endpoints: BuiltinEndpointSet::THIS_IMPLEMENTATION,
      lease_duration: Some(Duration::from(config.lease_duration)),
      entity_name: config.participant_name.clone(),
      domain_id: Some(dp.domain_id()),
    }
  }

  pub fn discovery_event_loop(mut self) {
    info!(
      "Discovery started: participant={:?} mode={:?}",
      self.my_guid_prefix, self.mode
    );
    self.write_participant_info();

    let mut events = Events::with_capacity(64);
    loop {
      if let Err(e) = self.poll.poll(&mut events, None) {
        error!("Discovery poll failed: {:?}", e);
        return;
      }

      for event in events.iter() {
        match event.token() {
          DISCOVERY_COMMAND_TOKEN => {
            while let Ok(command) = self.discovery_command_receiver.try_recv() {
              match command {
                DiscoveryCommand::StopDiscovery => {
                  info!("Stopping Discovery {:?}", self.my_guid_prefix);
                  self.dispose_own_participant();
                  return;
                }
                DiscoveryCommand::AddLocalWriter { guid } => self.publish_local_writer(guid),
                DiscoveryCommand::AddLocalReader { guid } => self.publish_local_reader(guid),
                DiscoveryCommand::RemoveLocalWriter { guid } => self.remove_local_writer(guid),
                DiscoveryCommand::RemoveLocalReader { guid } => self.remove_local_reader(guid),
              }
            }
          }
          SPDP_LIVENESS_TOKEN => {
            let mut db = discovery_db_write(&self.discovery_db);
            while let Ok(guid_prefix) = self.spdp_liveness_receiver.try_recv() {
              db.participant_is_alive(guid_prefix);
            }
          }
          PARTICIPANT_CLEANUP_TOKEN => {
            while self.participant_cleanup_timer.poll().is_some() {}
            self.participant_cleanup();
            self
              .participant_cleanup_timer
              .set_timeout(PARTICIPANT_CLEANUP_PERIOD, ());
          }
          SPDP_ANNOUNCE_TOKEN => {
            while self.announce_timer.poll().is_some() {}
            self.write_participant_info();
            self
              .announce_timer
              .set_timeout(self.announcement_period, ());
          }
          DISCOVERY_PARTICIPANT_DATA_TOKEN => self.handle_participant_reader(),
          DISCOVERY_READER_DATA_TOKEN => self.handle_subscription_reader(),
          DISCOVERY_WRITER_DATA_TOKEN => self.handle_publication_reader(),
          other => error!("Discovery: unknown poll token {:?}", other),
        }
      }
    }
  }

  fn notify(&self, notification: DiscoveryNotificationType) {
    if let Err(e) = self.discovery_updated_sender.send(notification) {
      // The event loop stops after us, so this only happens at shutdown.
      debug!("Discovery notification not delivered: {:?}", e);
    }
  }

  // --------------------------------------------------------------
  // SPDP

  /// Announces this participant. A discovery server also relays every
  /// participant it knows, so that its clients learn about each other.
  pub fn write_participant_info(&self) {
    let mut data = self.own_participant_data.clone();
    data.updated_time = Utc::now();
    if let Err(e) = self.dcps_participant_writer.write(data, None) {
      error!("Writing own participant data failed: {}", e);
    }

    if self.mode == Mode::Server {
      let known: Vec<SpdpDiscoveredParticipantData> = discovery_db_read(&self.discovery_db)
        .all_participants()
        .cloned()
        .collect();
      for participant in known {
        trace!("Relaying participant {:?}", participant.participant_guid);
        if let Err(e) = self.dcps_participant_writer.write(participant, None) {
          warn!("Relaying participant data failed: {}", e);
        }
      }
    }
  }

  fn dispose_own_participant(&self) {
    let guid = self.own_participant_data.participant_guid;
    if let Err(e) = self.dcps_participant_writer.dispose(&guid, None) {
      warn!("Disposing own participant failed: {}", e);
    }
  }

  pub fn handle_participant_reader(&mut self) {
    loop {
      let sample = match self.dcps_participant_reader.take_next_sample() {
        Ok(Some(s)) => s,
        Ok(None) => return,
        Err(e) => {
          warn!("Discarding participant data: {}", e);
          continue;
        }
      };
      self.handle_participant_sample(sample);
    }
  }

  fn handle_participant_sample(&mut self, sample: DataSample<SpdpDiscoveredParticipantData>) {
    match sample.value {
      Some(participant_data) => {
        let guid_prefix = participant_data.guid_prefix();
        if guid_prefix == self.my_guid_prefix {
          return;
        }
        let updated = discovery_db_write(&self.discovery_db).update_participant(&participant_data);
        if updated {
          debug!("Participant updated: {:?}", guid_prefix);
          self.notify(DiscoveryNotificationType::ParticipantUpdated { guid_prefix });
          // A server answers new clients right away, instead of letting them
          // wait a full period.
          if self.mode == Mode::Server {
            self.write_participant_info();
          }
        }
      }
      None => {
        let guid_prefix = guid_of_instance(sample.sample_info.instance_handle).prefix;
        if guid_prefix == self.my_guid_prefix {
          return;
        }
        debug!(
          "Participant {:?}: {:?}",
          guid_prefix, sample.sample_info.kind
        );
        self.participant_gone(guid_prefix);
      }
    }
  }

  fn participant_gone(&mut self, guid_prefix: GuidPrefix) {
    let known = discovery_db_read(&self.discovery_db)
      .find_participant_proxy(guid_prefix)
      .is_some();
    if !known {
      return;
    }
    discovery_db_write(&self.discovery_db).remove_participant(guid_prefix);
    self.notify(DiscoveryNotificationType::ParticipantLost { guid_prefix });
    if self.mode == Mode::Server {
      let guid = GUID::new(guid_prefix, EntityId::PARTICIPANT);
      if let Err(e) = self.dcps_participant_writer.dispose(&guid, None) {
        warn!("Relaying participant dispose failed: {}", e);
      }
    }
  }

  pub fn participant_cleanup(&mut self) {
    let expired = discovery_db_write(&self.discovery_db).participant_cleanup();
    for guid_prefix in expired {
      info!("Participant lease expired: {:?}", guid_prefix);
      self.notify(DiscoveryNotificationType::ParticipantLost { guid_prefix });
      if self.mode == Mode::Server {
        let guid = GUID::new(guid_prefix, EntityId::PARTICIPANT);
        if let Err(e) = self.dcps_participant_writer.dispose(&guid, None) {
          warn!("Relaying participant dispose failed: {}", e);
        }
      }
    }
  }

  // --------------------------------------------------------------
  // SEDP

  pub fn handle_subscription_reader(&mut self) {
    loop {
      let sample = match self.dcps_subscription_reader.take_next_sample() {
        Ok(Some(s)) => s,
        Ok(None) => return,
        Err(e) => {
          warn!("Discarding subscription data: {}", e);
          continue;
        }
      };
      match sample.value {
        Some(drd) => {
          let mut db = discovery_db_write(&self.discovery_db);
          db.participant_is_alive(drd.participant_prefix());
          let updated = db.update_subscription(&drd);
          drop(db);
          if let Some(discovered_reader_data) = updated {
            debug!(
              "Remote reader {:?} on {:?}",
              discovered_reader_data.reader_guid, discovered_reader_data.topic.topic_name
            );
            self.notify(DiscoveryNotificationType::ReaderUpdated {
              discovered_reader_data,
            });
          }
        }
        None => {
          let reader_guid = guid_of_instance(sample.sample_info.instance_handle);
          if sample.sample_info.kind != ChangeKind::Alive
            && discovery_db_write(&self.discovery_db).remove_topic_reader(reader_guid)
          {
            debug!("Remote reader gone: {:?}", reader_guid);
            self.notify(DiscoveryNotificationType::ReaderLost { reader_guid });
          }
        }
      }
    }
  }

  pub fn handle_publication_reader(&mut self) {
    loop {
      let sample = match self.dcps_publication_reader.take_next_sample() {
        Ok(Some(s)) => s,
        Ok(None) => return,
        Err(e) => {
          warn!("Discarding publication data: {}", e);
          continue;
        }
      };
      match sample.value {
        Some(dwd) => {
          let mut db = discovery_db_write(&self.discovery_db);
          db.participant_is_alive(dwd.participant_prefix());
          let updated = db.update_publication(&dwd);
          drop(db);
          if let Some(discovered_writer_data) = updated {
            debug!(
              "Remote writer {:?} on {:?}",
              discovered_writer_data.writer_guid, discovered_writer_data.topic.topic_name
            );
            self.notify(DiscoveryNotificationType::WriterUpdated {
              discovered_writer_data,
            });
          }
        }
        None => {
          let writer_guid = guid_of_instance(sample.sample_info.instance_handle);
          if sample.sample_info.kind != ChangeKind::Alive
            && discovery_db_write(&self.discovery_db).remove_topic_writer(writer_guid)
          {
            debug!("Remote writer gone: {:?}", writer_guid);
            self.notify(DiscoveryNotificationType::WriterLost { writer_guid });
          }
        }
      }
    }
  }

  fn publish_local_writer(&self, guid: GUID) {
    let data = discovery_db_read(&self.discovery_db)
      .local_topic_writer(guid)
      .cloned();
    match data {
      Some(dwd) => {
        if let Err(e) = self.dcps_publication_writer.write(dwd.clone(), None) {
          error!("Publishing local writer {:?} failed: {}", guid, e);
        }
        // Our own readers on the topic match it without SEDP.
        self.notify(DiscoveryNotificationType::WriterUpdated {
          discovered_writer_data: dwd,
        });
      }
      None => debug!("Local writer {:?} already removed", guid),
    }
  }

  fn publish_local_reader(&self, guid: GUID) {
    let data = discovery_db_read(&self.discovery_db)
      .local_topic_reader(guid)
      .cloned();
    match data {
      Some(drd) => {
        if let Err(e) = self.dcps_subscription_writer.write(drd.clone(), None) {
          error!("Publishing local reader {:?} failed: {}", guid, e);
        }
        self.notify(DiscoveryNotificationType::ReaderUpdated {
          discovered_reader_data: drd,
        });
      }
      None => debug!("Local reader {:?} already removed", guid),
    }
  }

  fn remove_local_writer(&self, guid: GUID) {
    if discovery_db_write(&self.discovery_db)
      .remove_local_topic_writer(guid)
      .is_some()
    {
      if let Err(e) = self.dcps_publication_writer.dispose(&guid, None) {
        warn!("Disposing local writer {:?} failed: {}", guid, e);
      }
      self.notify(DiscoveryNotificationType::WriterLost { writer_guid: guid });
    }
  }

  fn remove_local_reader(&self, guid: GUID) {
    if discovery_db_write(&self.discovery_db)
      .remove_local_topic_reader(guid)
      .is_some()
    {
      if let Err(e) = self.dcps_subscription_writer.dispose(&guid, None) {
        warn!("Disposing local reader {:?} failed: {}", guid, e);
      }
      self.notify(DiscoveryNotificationType::ReaderLost { reader_guid: guid });
    }
  }
}
