use std::{
  collections::HashMap,
  io,
  rc::Rc,
  sync::{mpsc::TryRecvError, Arc, RwLock},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::{Event, Events, Poll, PollOpt, Ready, Token};
use mio_extras::{channel as mio_channel, timer::Timer};

use crate::{
  dds::participant::TokenReceiverPair,
  discovery::{
    discovery::DiscoveryNotificationType,
    discovery_db::{discovery_db_read, DiscoveryDB},
    sedp_messages::{DiscoveredReaderData, DiscoveredWriterData},
  },
  messages::submessages::submessages::AckNack,
  network::{transport::Transport, udp_listener::UDPListener, udp_sender::UDPSender},
  rtps::{
    constant::*,
    message_receiver::MessageReceiver,
    reader::{Reader, ReaderIngredients},
    rtps_reader_proxy::RtpsReaderProxy,
    writer::{Writer, WriterIngredients},
  },
  structure::{
    guid::{EntityId, GuidPrefix, TokenDecode, GUID},
    locator::LocatorList,
  },
};

pub(crate) struct DomainInfo {
  pub domain_participant_guid: GUID,
  pub domain_id: u16,
  pub participant_id: u16,
  /// Where participant announcements go regardless of discovery: the SPDP
  /// multicast group and initial peers, or the discovery servers.
  pub spdp_fixed_locators: LocatorList,
  /// Discovery server: send participant announcements to every discovered
  /// participant.
  pub spdp_relay: bool,
}

pub(crate) enum EventLoopCommand {
  Stop,
}

/// The protocol thread of a participant. Owns all RTPS Writers and Readers,
/// the sockets and the per-entity timers.
pub(crate) struct DPEventLoop {
  domain_info: DomainInfo,
  poll: Poll,
  discovery_db: Arc<RwLock<DiscoveryDB>>,
  udp_listeners: HashMap<Token, UDPListener>,
  message_receiver: MessageReceiver, // This contains our Readers

  // Adding readers
  add_reader_receiver: TokenReceiverPair<ReaderIngredients>,
  remove_reader_receiver: TokenReceiverPair<GUID>,

  // Writers
  add_writer_receiver: TokenReceiverPair<WriterIngredients>,
  remove_writer_receiver: TokenReceiverPair<GUID>,
  stop_poll_receiver: mio_channel::Receiver<EventLoopCommand>,
  // GuidPrefix sent in this channel needs to be RTPSMessage source_guid_prefix.
  // Writer needs this to locate RtpsReaderProxy if negative acknack.
  ack_nack_receiver: mio_channel::Receiver<(GuidPrefix, AckNack)>,

  writers: HashMap<EntityId, Writer>,
  transport: Rc<dyn Transport>,

  discovery_update_notification_receiver: mio_channel::Receiver<DiscoveryNotificationType>,
}

impl DPEventLoop {
  // This is pub(crate), because it should be constructed only by
  // DomainParticipant.
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    domain_info: DomainInfo,
    udp_listeners: HashMap<Token, UDPListener>,
    discovery_db: Arc<RwLock<DiscoveryDB>>,
    participant_guid_prefix: GuidPrefix,
    add_reader_receiver: TokenReceiverPair<ReaderIngredients>,
    remove_reader_receiver: TokenReceiverPair<GUID>,
    add_writer_receiver: TokenReceiverPair<WriterIngredients>,
    remove_writer_receiver: TokenReceiverPair<GUID>,
    stop_poll_receiver: mio_channel::Receiver<EventLoopCommand>,
    discovery_update_notification_receiver: mio_channel::Receiver<DiscoveryNotificationType>,
    spdp_liveness_sender: mio_channel::SyncSender<GuidPrefix>,
  ) -> io::Result<DPEventLoop> {
    let poll = Poll::new()?;
    let (acknack_sender, acknack_receiver) =
      mio_channel::sync_channel::<(GuidPrefix, AckNack)>(100);
    let mut udp_listeners = udp_listeners;
    for (token, listener) in &mut udp_listeners {
      poll.register(
        listener.mio_socket(),
        *token,
        Ready::readable(),
        PollOpt::edge(),
      )?;
    }

    poll.register(
      &add_reader_receiver.receiver,
      add_reader_receiver.token,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &remove_reader_receiver.receiver,
      remove_reader_receiver.token,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &add_writer_receiver.receiver,
      add_writer_receiver.token,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &remove_writer_receiver.receiver,
      remove_writer_receiver.token,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &stop_poll_receiver,
      STOP_POLL_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &acknack_receiver,
      ACKNACK_MESSAGE_TO_LOCAL_WRITER_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &discovery_update_notification_receiver,
      DISCOVERY_UPDATE_NOTIFICATION_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;

    // port number 0 means OS chooses an available port number.
    let udp_sender = UDPSender::new_with_random_port()?;

    Ok(DPEventLoop {
      domain_info,
      poll,
      discovery_db,
      udp_listeners,
      transport: Rc::new(udp_sender),
      message_receiver: MessageReceiver::new(
        participant_guid_prefix,
        acknack_sender,
        spdp_liveness_sender,
      ),
      add_reader_receiver,
      remove_reader_receiver,
      add_writer_receiver,
      remove_writer_receiver,
      stop_poll_receiver,
      writers: HashMap::new(),
      ack_nack_receiver: acknack_receiver,
      discovery_update_notification_receiver,
    })
  }

  pub fn event_loop(self) {
    let mut events = Events::with_capacity(16); // too small capacity just delays events to next poll
    let mut ev_wrapper = self;

    info!(
      "Event loop started: domain={} participant_id={} guid={:?}",
      ev_wrapper.domain_info.domain_id,
      ev_wrapper.domain_info.participant_id,
      ev_wrapper.domain_info.domain_participant_guid
    );

    loop {
      if let Err(e) = ev_wrapper.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
        error!("Event loop poll failed: {:?}", e);
        return;
      }

      if events.is_empty() {
        trace!("dp_event_loop idling.");
      }

      for event in events.iter() {
        match EntityId::from_token(event.token()) {
          TokenDecode::FixedToken(fixed_token) => match fixed_token {
            STOP_POLL_TOKEN => loop {
              match ev_wrapper.stop_poll_receiver.try_recv() {
                Ok(EventLoopCommand::Stop) => {
                  info!("Stopping dp_event_loop");
                  return;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                  error!("Participant is gone without stopping. Stopping event loop.");
                  return;
                }
              }
            },
            DISCOVERY_LISTENER_TOKEN
            | DISCOVERY_MUL_LISTENER_TOKEN
            | USER_TRAFFIC_LISTENER_TOKEN
            | USER_TRAFFIC_MUL_LISTENER_TOKEN => {
              let udp_messages = ev_wrapper
                .udp_listeners
                .get_mut(&event.token())
                .map_or_else(
                  || {
                    error!("No listener with token {:?}", &event.token());
                    vec![]
                  },
                  UDPListener::messages,
                );
              for packet in udp_messages {
                ev_wrapper.message_receiver.handle_received_packet(&packet);
              }
            }
            ADD_READER_TOKEN | REMOVE_READER_TOKEN => {
              ev_wrapper.handle_reader_action(&event);
            }
            ADD_WRITER_TOKEN | REMOVE_WRITER_TOKEN => {
              ev_wrapper.handle_writer_action(&event);
            }
            ACKNACK_MESSAGE_TO_LOCAL_WRITER_TOKEN => {
              ev_wrapper.handle_writer_acknack_action();
            }
            DISCOVERY_UPDATE_NOTIFICATION_TOKEN => {
              while let Ok(dnt) = ev_wrapper.discovery_update_notification_receiver.try_recv() {
                ev_wrapper.handle_discovery_notification(dnt);
              }
            }
            fixed_unknown => {
              error!(
                "Unknown event.token {:?} = 0x{:x?} , decoded as {:?}",
                event.token(),
                event.token().0,
                fixed_unknown
              );
            }
          },

          // Commands from DataWriters
          TokenDecode::Entity(eid) => {
            if eid.kind().is_writer() {
              match ev_wrapper.writers.get_mut(&eid) {
                Some(writer) => writer.process_writer_command(),
                None => debug!("Event for unknown writer {:?}", eid),
              }
            } else {
              error!("Entity Event for unknown EntityKind {:?}", eid);
            }
          }

          // Timed Actions
          TokenDecode::AltEntity(eid) => {
            if eid.kind().is_reader() {
              ev_wrapper.handle_reader_timed_event(eid);
            } else if eid.kind().is_writer() {
              ev_wrapper.handle_writer_timed_event(eid);
            } else {
              error!("AltEntity Event for unknown EntityKind {:?}", eid);
            }
          }
        }
      } // for
    } // loop
  }

  fn handle_discovery_notification(&mut self, dnt: DiscoveryNotificationType) {
    use DiscoveryNotificationType::*;
    match dnt {
      WriterUpdated {
        discovered_writer_data,
      } => self.remote_writer_discovered(&discovered_writer_data),
      WriterLost { writer_guid } => self.remote_writer_lost(writer_guid),
      ReaderUpdated {
        discovered_reader_data,
      } => self.remote_reader_discovered(&discovered_reader_data),
      ReaderLost { reader_guid } => self.remote_reader_lost(reader_guid),
      ParticipantUpdated { guid_prefix } => self.update_participant(guid_prefix),
      ParticipantLost { guid_prefix } => self.remote_participant_lost(guid_prefix),
    }
  }

  fn handle_reader_action(&mut self, event: &Event) {
    match event.token() {
      ADD_READER_TOKEN => {
        trace!("add reader(s)");
        while let Ok(new_reader_ing) = self.add_reader_receiver.receiver.try_recv() {
          self.add_local_reader(new_reader_ing);
        }
      }
      REMOVE_READER_TOKEN => {
        while let Ok(old_reader_guid) = self.remove_reader_receiver.receiver.try_recv() {
          self.remove_local_reader(old_reader_guid);
        }
      }
      other => error!("Expected reader action token, got {:?}", other),
    }
  }

  fn handle_writer_action(&mut self, event: &Event) {
    match event.token() {
      ADD_WRITER_TOKEN => {
        while let Ok(new_writer_ingredients) = self.add_writer_receiver.receiver.try_recv() {
          self.add_local_writer(new_writer_ingredients);
        }
      }
      REMOVE_WRITER_TOKEN => {
        while let Ok(writer_guid) = self.remove_writer_receiver.receiver.try_recv() {
          self.remove_local_writer(writer_guid);
        }
      }
      other => error!("Expected writer action token, got {:?}", other),
    }
  }

  /// Writer timed events can be heartbeats, repairs or cache cleaning.
  fn handle_writer_timed_event(&mut self, entity_id: EntityId) {
    if let Some(writer) = self.writers.get_mut(&entity_id) {
      writer.handle_timed_event();
    } else {
      debug!("Writer was not found with {:?}", entity_id);
    }
  }

  fn handle_reader_timed_event(&mut self, entity_id: EntityId) {
    if let Some(reader) = self.message_receiver.reader_mut(entity_id) {
      reader.handle_timed_event();
    } else {
      debug!("Reader was not found with {:?}", entity_id);
    }
  }

  fn handle_writer_acknack_action(&mut self) {
    while let Ok((acknack_sender_prefix, acknack)) = self.ack_nack_receiver.try_recv() {
      match self.writers.get_mut(&acknack.writer_id) {
        Some(found_writer) => {
          if found_writer.is_reliable() {
            found_writer.handle_ack_nack(acknack_sender_prefix, &acknack);
          }
        }
        None => {
          // Other implementations send preemptive acknacks to builtin
          // writers we do not have.
          debug!(
            "Couldn't handle acknack! Did not find local RTPS writer with GUID: {:x?}",
            GUID::new(
              self.domain_info.domain_participant_guid.prefix,
              acknack.writer_id
            )
          );
        }
      }
    }
  }

  /// A remote participant is new, or its data changed. Matches our builtin
  /// endpoints with its builtin endpoints.
  fn update_participant(&mut self, participant_guid_prefix: GuidPrefix) {
    debug!("update_participant {:?}", participant_guid_prefix);

    let db = discovery_db_read(&self.discovery_db);
    let discovered_participant = match db.find_participant_proxy(participant_guid_prefix) {
      Some(dpd) => dpd,
      None => {
        debug!("Participant was updated, but is already gone from DB.");
        return;
      }
    };

    // Update local writers
    for (writer_eid, reader_eid, endpoint) in BUILTIN_READERS_INIT_LIST {
      // Participant announcements are sent to fixed locators, except that a
      // discovery server answers every participant it has heard of.
      if *writer_eid == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER && !self.domain_info.spdp_relay {
        continue;
      }
      if let Some(writer) = self.writers.get_mut(writer_eid) {
        if discovered_participant
          .available_builtin_endpoints
          .contains(*endpoint)
        {
          let reader_proxy = discovered_participant.as_reader_proxy(*reader_eid, writer.qos());
          let topic = writer.topic().clone();
          writer.update_reader_proxy(reader_proxy, &topic);
        }
      }
    }

    // update local readers.
    // list to be looped over is the same as above, but now
    // EntityIds are for announcers
    for (writer_eid, reader_eid, endpoint) in BUILTIN_WRITERS_INIT_LIST {
      if *reader_eid == EntityId::SPDP_BUILTIN_PARTICIPANT_READER {
        // accepts any writer
        continue;
      }
      if let Some(reader) = self.message_receiver.reader_mut(*reader_eid) {
        if discovered_participant
          .available_builtin_endpoints
          .contains(*endpoint)
        {
          let writer_proxy = discovered_participant.as_writer_proxy(*writer_eid, reader.qos());
          let topic = reader.topic().clone();
          reader.update_writer_proxy(writer_proxy, &topic);
        }
      }
    }

    debug!(
      "update_participant - finished for {:?}",
      participant_guid_prefix
    );
  }

  fn remote_participant_lost(&mut self, participant_guid_prefix: GuidPrefix) {
    info!(
      "remote_participant_lost guid_prefix={:?}",
      &participant_guid_prefix
    );
    // Discovery has already removed Participant from Discovery DB
    // Now we have to remove any ReaderProxies and WriterProxies belonging
    // to that participant, so that we do not send messages to them anymore.
    for writer in self.writers.values_mut() {
      writer.participant_lost(participant_guid_prefix);
    }
    for reader in self.message_receiver.readers_mut() {
      reader.participant_lost(participant_guid_prefix);
    }
  }

  fn remote_reader_discovered(&mut self, remote_reader: &DiscoveredReaderData) {
    for writer in self.writers.values_mut() {
      if writer.guid().entity_id.kind().is_user_defined()
        && remote_reader.topic.topic_name == writer.topic_name()
      {
        writer.update_reader_proxy(remote_reader.as_reader_proxy(), &remote_reader.topic);
      }
    }
  }

  fn remote_reader_lost(&mut self, reader_guid: GUID) {
    for writer in self.writers.values_mut() {
      writer.reader_lost(reader_guid);
    }
  }

  fn remote_writer_discovered(&mut self, remote_writer: &DiscoveredWriterData) {
    for reader in self.message_receiver.readers_mut() {
      if reader.guid().entity_id.kind().is_user_defined()
        && remote_writer.topic.topic_name == reader.topic_name()
      {
        reader.update_writer_proxy(remote_writer.as_writer_proxy(), &remote_writer.topic);
      }
    }
  }

  fn remote_writer_lost(&mut self, writer_guid: GUID) {
    for reader in self.message_receiver.readers_mut() {
      reader.writer_lost(writer_guid);
    }
  }

  fn add_local_reader(&mut self, reader_ing: ReaderIngredients) {
    let timer = Timer::default();
    if let Err(e) = self.poll.register(
      &timer,
      reader_ing.alt_entity_token(),
      Ready::readable(),
      PollOpt::edge(),
    ) {
      error!("Reader timer registration failed: {:?}", e);
      return;
    }

    let mut new_reader = Reader::new(reader_ing, self.transport.clone(), timer);

    // Writers that discovery already knows, ours included
    if new_reader.guid().entity_id.kind().is_user_defined() {
      let writers = {
        let db = discovery_db_read(&self.discovery_db);
        let mut writers = db.external_writers_on_topic(new_reader.topic_name());
        writers.extend(db.local_writers_on_topic(new_reader.topic_name()));
        writers
      };
      for dwd in writers {
        new_reader.update_writer_proxy(dwd.as_writer_proxy(), &dwd.topic);
      }
    }
    debug!("Add reader: {:?}", new_reader.guid());
    self.message_receiver.add_reader(new_reader);
  }

  fn remove_local_reader(&mut self, reader_guid: GUID) {
    if let Some(old_reader) = self.message_receiver.remove_reader(reader_guid) {
      self
        .poll
        .deregister(&old_reader.timed_event_timer)
        .unwrap_or_else(|e| error!("Cannot deregister Reader timed_event_timer: {:?}", e));
    } else {
      debug!("Tried to remove nonexistent Reader {:?}", reader_guid);
    }
  }

  fn add_local_writer(&mut self, writer_ing: WriterIngredients) {
    let timer = Timer::default();
    if let Err(e) = self.poll.register(
      &timer,
      writer_ing.alt_entity_token(),
      Ready::readable(),
      PollOpt::edge(),
    ) {
      error!("Writer timer registration failed: {:?}", e);
      return;
    }

    let mut new_writer = Writer::new(writer_ing, self.transport.clone(), timer);

    if let Err(e) = self.poll.register(
      &new_writer.writer_command_receiver,
      new_writer.entity_token(),
      Ready::readable(),
      PollOpt::edge(),
    ) {
      error!("Writer command channel registration failed: {:?}", e);
      return;
    }

    let entity_id = new_writer.guid().entity_id;
    if entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER
      && !self.domain_info.spdp_fixed_locators.is_empty()
    {
      // One proxy stands for all fixed announcement destinations.
      new_writer.add_fixed_reader_proxy(RtpsReaderProxy::new(
        GUID::new(GuidPrefix::UNKNOWN, EntityId::SPDP_BUILTIN_PARTICIPANT_READER),
        new_writer.qos().clone(),
        self.domain_info.spdp_fixed_locators.clone(),
        vec![],
      ));
    } else if entity_id.kind().is_user_defined() {
      let readers = {
        let db = discovery_db_read(&self.discovery_db);
        let mut readers = db.external_readers_on_topic(new_writer.topic_name());
        readers.extend(db.local_readers_on_topic(new_writer.topic_name()));
        readers
      };
      for drd in readers {
        new_writer.update_reader_proxy(drd.as_reader_proxy(), &drd.topic);
      }
    }

    debug!("Add writer: {:?}", new_writer.guid());
    self.writers.insert(entity_id, new_writer);
  }

  fn remove_local_writer(&mut self, writer_guid: GUID) {
    if let Some(mut w) = self.writers.remove(&writer_guid.entity_id) {
      // Changes queued before removal, e.g. a final dispose, still go out.
      w.process_writer_command();
      self
        .poll
        .deregister(&w.writer_command_receiver)
        .unwrap_or_else(|e| error!("Deregister fail (writer command rec) {:?}", e));
      self
        .poll
        .deregister(&w.timed_event_timer)
        .unwrap_or_else(|e| error!("Deregister fail (writer timer) {:?}", e));
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Duration as StdDuration};

  use super::*;
  use crate::{
    dds::{qos::QosPolicies, statusevents::status_channel},
    discovery::matching::TopicDescriptor,
    structure::{
      guid::EntityKind,
      history_cache::{HistoryCache, HistoryLimits},
    },
  };

  struct Harness {
    add_reader: mio_channel::SyncSender<ReaderIngredients>,
    remove_reader: mio_channel::SyncSender<GUID>,
    stop: mio_channel::Sender<EventLoopCommand>,
    handle: thread::JoinHandle<()>,
  }

  fn start_event_loop() -> Harness {
    let prefix = GuidPrefix::new(&[7; 12]);
    let (add_reader, add_reader_receiver) = mio_channel::sync_channel(10);
    let (remove_reader, remove_reader_receiver) = mio_channel::sync_channel(10);
    let (_add_writer, add_writer_receiver) = mio_channel::sync_channel(10);
    let (_remove_writer, remove_writer_receiver) = mio_channel::sync_channel(10);
    let (stop, stop_poll_receiver) = mio_channel::channel();
    let (_dnt_sender, dnt_receiver) = mio_channel::sync_channel(10);
    let (liveness_sender, _liveness_receiver) = mio_channel::sync_channel(10);
    let db = Arc::new(RwLock::new(DiscoveryDB::new(GUID::new(
      prefix,
      EntityId::PARTICIPANT,
    ))));

    let handle = thread::spawn(move || {
      let ev = DPEventLoop::new(
        DomainInfo {
          domain_participant_guid: GUID::new(prefix, EntityId::PARTICIPANT),
          domain_id: 0,
          participant_id: 0,
          spdp_fixed_locators: vec![],
          spdp_relay: false,
        },
        HashMap::new(),
        db,
        prefix,
        TokenReceiverPair {
          token: ADD_READER_TOKEN,
          receiver: add_reader_receiver,
        },
        TokenReceiverPair {
          token: REMOVE_READER_TOKEN,
          receiver: remove_reader_receiver,
        },
        TokenReceiverPair {
          token: ADD_WRITER_TOKEN,
          receiver: add_writer_receiver,
        },
        TokenReceiverPair {
          token: REMOVE_WRITER_TOKEN,
          receiver: remove_writer_receiver,
        },
        stop_poll_receiver,
        dnt_receiver,
        liveness_sender,
      )
      .unwrap();
      ev.event_loop();
    });
    Harness {
      add_reader,
      remove_reader,
      stop,
      handle,
    }
  }

  #[test]
  fn event_loop_adds_and_removes_readers_then_stops() {
    let h = start_event_loop();
    let guid = GUID::new(
      GuidPrefix::new(&[7; 12]),
      EntityId::new([0, 1, 2], EntityKind::READER_WITH_KEY_USER_DEFINED),
    );
    let (status_sender, _status_receiver) = status_channel();
    let (notification_sender, _notification_receiver) = mio_channel::sync_channel(4);
    h.add_reader
      .send(ReaderIngredients {
        guid,
        topic: TopicDescriptor::new("ev_loop", "TestData", true),
        cache: Arc::new(HistoryCache::new(HistoryLimits::unlimited(true))),
        qos_policies: QosPolicies::qos_none(),
        status_sender,
        notification_sender,
        listener: None,
        heartbeat_response_delay: HEARTBEAT_RESPONSE_DELAY,
        accept_unmatched_writers: false,
      })
      .unwrap();
    h.remove_reader.send(guid).unwrap();
    thread::sleep(StdDuration::from_millis(50));

    h.stop.send(EventLoopCommand::Stop).unwrap();
    h.handle.join().unwrap();
  }
}
