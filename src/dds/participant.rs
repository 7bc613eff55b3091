use std::{
  collections::HashMap,
  fmt,
  net::{IpAddr, SocketAddr},
  sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc, Arc, Mutex, RwLock, Weak,
  },
  thread::{self, JoinHandle},
  time::Duration as StdDuration,
};

use mio::Token;
use mio_extras::channel as mio_channel;
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    participant_registry,
    pubsub::{Publisher, Subscriber},
    qos::QosPolicies,
    result::{Error, Result},
    topic::{Topic, TopicKind},
  },
  log_and_err_internal,
  discovery::{
    discovery::{Discovery, DiscoveryCommand, DiscoveryNotificationType},
    discovery_db::{discovery_db_read, DiscoveryDB},
    spdp_participant_data::SpdpDiscoveredParticipantData,
  },
  network::{
    constant::*,
    udp_listener::UDPListener,
    util::{get_local_multicast_locators, unicast_locators_for},
  },
  rtps::{
    constant::*,
    dp_event_loop::{DPEventLoop, DomainInfo, EventLoopCommand},
    reader::ReaderIngredients,
    writer::WriterIngredients,
  },
  structure::{
    guid::{EntityId, EntityKind, GuidPrefix, GUID},
    locator::{Locator, LocatorList},
  },
};

/// How participants find each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryConfig {
  /// Announce to the SPDP multicast group, and to the given unicast peers.
  Simple { initial_peers: Vec<SocketAddr> },
  /// Answer clients, and relay every known participant to all clients.
  Server,
  /// Announce only to the given discovery servers.
  Client { servers: Vec<SocketAddr> },
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    DiscoveryConfig::Simple {
      initial_peers: Vec::new(),
    }
  }
}

/// Everything that is configured per participant. Per-entity settings are
/// QoS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
  pub domain_id: u16,
  /// Fixes the participant id, and thus the ports. By default the first id
  /// with free ports is taken.
  pub participant_id: Option<u16>,
  pub participant_name: Option<String>,
  pub discovery: DiscoveryConfig,
  /// How long others should wait for our announcements before they consider
  /// us gone.
  pub lease_duration: StdDuration,
  pub announcement_period: StdDuration,
  pub heartbeat_period: StdDuration,
  pub nack_response_delay: StdDuration,
  pub heartbeat_response_delay: StdDuration,
  /// Address to advertise and listen on. By default every interface is
  /// used, and all non-loopback IPv4 addresses are advertised.
  pub unicast_address: Option<IpAddr>,
}

impl Default for ParticipantConfig {
  fn default() -> Self {
    ParticipantConfig {
      domain_id: 0,
      participant_id: None,
      participant_name: None,
      discovery: DiscoveryConfig::default(),
      lease_duration: PARTICIPANT_LEASE_DURATION.to_std(),
      announcement_period: SPDP_ANNOUNCEMENT_PERIOD,
      heartbeat_period: HEARTBEAT_PERIOD,
      nack_response_delay: NACK_RESPONSE_DELAY,
      heartbeat_response_delay: HEARTBEAT_RESPONSE_DELAY,
      unicast_address: None,
    }
  }
}

impl ParticipantConfig {
  pub fn is_discovery_server(&self) -> bool {
    self.discovery == DiscoveryConfig::Server
  }
}

/// Locators this participant listens on, as announced by SPDP.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelfLocators {
  pub metatraffic_unicast: LocatorList,
  pub metatraffic_multicast: LocatorList,
  pub default_unicast: LocatorList,
  pub default_multicast: LocatorList,
}

/// DDS DomainParticipant
///
/// It is a cheap handle: clones refer to the same participant. The
/// participant stops when the last handle is dropped, or on
/// [`DomainParticipant::stop`].
///
/// # Examples
/// ```no_run
/// use rtpscore::dds::participant::DomainParticipant;
/// let domain_participant = DomainParticipant::new(0).unwrap();
/// ```
#[derive(Clone)]
pub struct DomainParticipant {
  dpi: Arc<DomainParticipantInner>,
}

impl DomainParticipant {
  /// Participant with default configuration in `domain_id`.
  pub fn new(domain_id: u16) -> Result<DomainParticipant> {
    DomainParticipant::with_config(ParticipantConfig {
      domain_id,
      ..ParticipantConfig::default()
    })
  }

  pub fn with_config(config: ParticipantConfig) -> Result<DomainParticipant> {
    let (discovery_update_notification_sender, discovery_update_notification_receiver) =
      mio_channel::sync_channel::<DiscoveryNotificationType>(256);
    let (spdp_liveness_sender, spdp_liveness_receiver) =
      mio_channel::sync_channel::<GuidPrefix>(64);
    let (discovery_command_sender, discovery_command_receiver) =
      mio_channel::sync_channel::<DiscoveryCommand>(64);

    let dpi = DomainParticipantInner::new(
      config,
      discovery_update_notification_receiver,
      spdp_liveness_sender,
      discovery_command_sender,
    )?;
    let dp = DomainParticipant { dpi: Arc::new(dpi) };
    participant_registry::registry().register(dp.guid().prefix, Arc::downgrade(&dp.dpi));

    // Discovery runs in its own thread. It holds only a weak reference, so
    // that dropping the last application handle stops the participant.
    let (discovery_started_sender, discovery_started_receiver) = mpsc::channel::<Result<()>>();
    let dp_weak = dp.weak_clone();
    let discovery_db = dp.dpi.discovery_db.clone();
    let discovery_handle = thread::Builder::new()
      .name(format!("rtpscore discovery {:?}", dp.guid().prefix))
      .spawn(move || {
        let discovery = match dp_weak.upgrade() {
          Some(dp) => Discovery::new(
            &dp,
            discovery_db,
            discovery_update_notification_sender,
            discovery_command_receiver,
            spdp_liveness_receiver,
          ),
          None => Err(Error::AlreadyDeleted),
        };
        match discovery {
          Ok(discovery) => {
            let _ = discovery_started_sender.send(Ok(()));
            discovery.discovery_event_loop();
          }
          Err(e) => {
            error!("Discovery failed to start: {}", e);
            let _ = discovery_started_sender.send(Err(e));
          }
        }
      })?;
    dp.dpi.set_discovery_join_handle(discovery_handle);

    match discovery_started_receiver.recv_timeout(StdDuration::from_secs(10)) {
      Ok(Ok(())) => {
        info!(
          "New DomainParticipant: domain_id={} participant_id={} guid={:?}",
          dp.domain_id(),
          dp.participant_id(),
          dp.guid()
        );
        Ok(dp)
      }
      Ok(Err(e)) => Err(e),
      Err(mpsc::RecvTimeoutError::Timeout) => {
        error!("Discovery did not start in time.");
        Err(Error::Timeout)
      }
      Err(mpsc::RecvTimeoutError::Disconnected) => {
        log_and_err_internal!("Discovery thread exited before starting.")
      }
    }
  }

  pub(crate) fn weak_clone(&self) -> DomainParticipantWeak {
    DomainParticipantWeak::new(self)
  }

  pub(crate) fn from_inner(dpi: Arc<DomainParticipantInner>) -> DomainParticipant {
    DomainParticipant { dpi }
  }

  pub(crate) fn inner(&self) -> &Arc<DomainParticipantInner> {
    &self.dpi
  }

  /// Creates DDS Publisher
  pub fn create_publisher(&self, qos: &QosPolicies) -> Result<Publisher> {
    self.dpi.check_running()?;
    Ok(Publisher::new(
      self.weak_clone(),
      qos.clone(),
      self.dpi.add_writer_sender.clone(),
      self.dpi.remove_writer_sender.clone(),
      self.dpi.discovery_command_sender.clone(),
    ))
  }

  /// Creates DDS Subscriber
  pub fn create_subscriber(&self, qos: &QosPolicies) -> Result<Subscriber> {
    self.dpi.check_running()?;
    Ok(Subscriber::new(
      self.weak_clone(),
      qos.clone(),
      self.dpi.add_reader_sender.clone(),
      self.dpi.remove_reader_sender.clone(),
      self.dpi.discovery_command_sender.clone(),
    ))
  }

  /// Creates a DDS Topic. Topics are not announced on their own. Endpoints
  /// on the topic are.
  pub fn create_topic(
    &self,
    name: &str,
    type_name: &str,
    qos: &QosPolicies,
    topic_kind: TopicKind,
  ) -> Result<Topic> {
    self.dpi.check_running()?;
    if name.is_empty() {
      return Error::bad_parameter("Topic name must not be empty");
    }
    if name.len() > 256 {
      return Error::bad_parameter("Topic name is longer than 256 characters");
    }
    Ok(Topic::new(name, type_name, qos, topic_kind))
  }

  /// Remote participants that discovery currently knows.
  pub fn discovered_participants(&self) -> Vec<SpdpDiscoveredParticipantData> {
    let db = discovery_db_read(&self.dpi.discovery_db);
    db.all_participants().cloned().collect()
  }

  /// Stops discovery and the event loop. Entities of this participant stop
  /// communicating, and creating new ones fails.
  pub fn stop(&self) {
    self.dpi.stop();
  }

  pub fn domain_id(&self) -> u16 {
    self.dpi.domain_id
  }

  pub fn participant_id(&self) -> u16 {
    self.dpi.participant_id
  }

  pub fn guid(&self) -> GUID {
    self.dpi.my_guid
  }

  pub fn config(&self) -> &ParticipantConfig {
    &self.dpi.config
  }

  pub(crate) fn self_locators(&self) -> &SelfLocators {
    &self.dpi.self_locators
  }

  pub(crate) fn new_entity_id(&self, entity_kind: EntityKind) -> EntityId {
    self.dpi.new_entity_id(entity_kind)
  }

  pub(crate) fn discovery_db(&self) -> &Arc<RwLock<DiscoveryDB>> {
    &self.dpi.discovery_db
  }
}

impl PartialEq for DomainParticipant {
  fn eq(&self, other: &Self) -> bool {
    self.guid() == other.guid()
  }
}

impl fmt::Debug for DomainParticipant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DomainParticipant")
      .field("guid", &self.guid())
      .field("domain_id", &self.domain_id())
      .field("participant_id", &self.participant_id())
      .finish()
  }
}

/// Reference that does not keep the participant alive. Held by Publishers,
/// Subscribers and the discovery thread.
#[derive(Clone)]
pub struct DomainParticipantWeak {
  dpi: Weak<DomainParticipantInner>,
  guid: GUID,
}

impl DomainParticipantWeak {
  pub fn new(dp: &DomainParticipant) -> DomainParticipantWeak {
    DomainParticipantWeak {
      dpi: Arc::downgrade(&dp.dpi),
      guid: dp.guid(),
    }
  }

  pub fn upgrade(&self) -> Option<DomainParticipant> {
    self.dpi.upgrade().map(|dpi| DomainParticipant { dpi })
  }

  pub fn guid(&self) -> GUID {
    self.guid
  }
}

impl fmt::Debug for DomainParticipantWeak {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "DomainParticipantWeak {{ {:?} }}", self.guid)
  }
}

pub(crate) struct DomainParticipantInner {
  domain_id: u16,
  participant_id: u16,
  my_guid: GUID,
  config: ParticipantConfig,
  self_locators: SelfLocators,

  // Adding Readers
  add_reader_sender: mio_channel::SyncSender<ReaderIngredients>,
  remove_reader_sender: mio_channel::SyncSender<GUID>,

  // Writers
  add_writer_sender: mio_channel::SyncSender<WriterIngredients>,
  remove_writer_sender: mio_channel::SyncSender<GUID>,

  stop_poll_sender: mio_channel::Sender<EventLoopCommand>,
  ev_loop_handle: Mutex<Option<JoinHandle<()>>>,

  discovery_command_sender: mio_channel::SyncSender<DiscoveryCommand>,
  discovery_join_handle: Mutex<Option<JoinHandle<()>>>,

  discovery_db: Arc<RwLock<DiscoveryDB>>,
  entity_id_generator: AtomicU32,
  stopped: AtomicBool,
}

// Probes participant ids until both unicast ports are free.
fn bind_unicast_listeners(
  config: &ParticipantConfig,
) -> Result<(u16, UDPListener, UDPListener)> {
  let host = match config.unicast_address {
    Some(ip) => ip.to_string(),
    None => "0.0.0.0".to_string(),
  };
  let domain_id = config.domain_id;
  let candidates: Vec<u16> = match config.participant_id {
    Some(id) => vec![id],
    None => (0..MAX_PARTICIPANT_ID).collect(),
  };
  for participant_id in candidates {
    let discovery_port = spdp_well_known_unicast_port(domain_id, participant_id);
    let discovery_listener =
      match UDPListener::new_unicast(DISCOVERY_LISTENER_TOKEN, &host, discovery_port) {
        Ok(l) => l,
        Err(e) => {
          debug!("Port {} taken: {:?}", discovery_port, e);
          continue;
        }
      };
    let user_port = user_traffic_unicast_port(domain_id, participant_id);
    match UDPListener::new_unicast(USER_TRAFFIC_LISTENER_TOKEN, &host, user_port) {
      Ok(user_listener) => return Ok((participant_id, discovery_listener, user_listener)),
      Err(e) => debug!("Port {} taken: {:?}", user_port, e),
    }
  }
  Err(Error::OutOfResources {
    reason: format!(
      "No free participant id in domain {} (tried {:?})",
      domain_id, config.participant_id
    ),
  })
}

impl DomainParticipantInner {
  fn new(
    config: ParticipantConfig,
    discovery_update_notification_receiver: mio_channel::Receiver<DiscoveryNotificationType>,
    spdp_liveness_sender: mio_channel::SyncSender<GuidPrefix>,
    discovery_command_sender: mio_channel::SyncSender<DiscoveryCommand>,
  ) -> Result<DomainParticipantInner> {
    let domain_id = config.domain_id;
    let (participant_id, discovery_listener, user_traffic_listener) =
      bind_unicast_listeners(&config)?;

    let mut listeners = HashMap::new();
    let mut self_locators = SelfLocators {
      metatraffic_unicast: unicast_locators_for(config.unicast_address, discovery_listener.port()),
      default_unicast: unicast_locators_for(config.unicast_address, user_traffic_listener.port()),
      ..SelfLocators::default()
    };
    listeners.insert(DISCOVERY_LISTENER_TOKEN, discovery_listener);
    listeners.insert(USER_TRAFFIC_LISTENER_TOKEN, user_traffic_listener);

    // Only simple discovery uses multicast. Missing multicast support is not
    // fatal: unicast peers still work.
    if let DiscoveryConfig::Simple { .. } = config.discovery {
      let spdp_port = spdp_well_known_multicast_port(domain_id);
      match UDPListener::new_multicast(DISCOVERY_MUL_LISTENER_TOKEN, spdp_port, SPDP_MULTICAST_IPV4)
      {
        Ok(l) => {
          listeners.insert(DISCOVERY_MUL_LISTENER_TOKEN, l);
          self_locators.metatraffic_multicast = get_local_multicast_locators(spdp_port);
        }
        Err(e) => warn!("Cannot listen to discovery multicast: {:?}", e),
      }
      let user_port = user_traffic_multicast_port(domain_id);
      match UDPListener::new_multicast(
        USER_TRAFFIC_MUL_LISTENER_TOKEN,
        user_port,
        SPDP_MULTICAST_IPV4,
      ) {
        Ok(l) => {
          listeners.insert(USER_TRAFFIC_MUL_LISTENER_TOKEN, l);
          self_locators.default_multicast = get_local_multicast_locators(user_port);
        }
        Err(e) => warn!("Cannot listen to user traffic multicast: {:?}", e),
      }
    }

    // Where our participant announcements go, besides matched SPDP readers.
    let spdp_fixed_locators: LocatorList = match &config.discovery {
      DiscoveryConfig::Simple { initial_peers } => {
        get_local_multicast_locators(spdp_well_known_multicast_port(domain_id))
          .into_iter()
          .chain(initial_peers.iter().map(|sa| Locator::from(*sa)))
          .collect()
      }
      DiscoveryConfig::Server => Vec::new(),
      DiscoveryConfig::Client { servers } => servers.iter().map(|sa| Locator::from(*sa)).collect(),
    };

    let my_guid = GUID::new_participant_guid();
    let discovery_db = Arc::new(RwLock::new(DiscoveryDB::new(my_guid)));

    // Adding readers
    let (add_reader_sender, add_reader_receiver) =
      mio_channel::sync_channel::<ReaderIngredients>(100);
    let (remove_reader_sender, remove_reader_receiver) = mio_channel::sync_channel::<GUID>(10);

    // Writers
    let (add_writer_sender, add_writer_receiver) =
      mio_channel::sync_channel::<WriterIngredients>(10);
    let (remove_writer_sender, remove_writer_receiver) = mio_channel::sync_channel::<GUID>(10);

    let (stop_poll_sender, stop_poll_receiver) = mio_channel::channel::<EventLoopCommand>();

    let domain_info = DomainInfo {
      domain_participant_guid: my_guid,
      domain_id,
      participant_id,
      spdp_fixed_locators,
      spdp_relay: config.is_discovery_server(),
    };
    let ev_loop_discovery_db = discovery_db.clone();

    // The event loop owns Rc transports and timers, so it is built on its
    // own thread.
    let (ev_loop_started_sender, ev_loop_started_receiver) = mpsc::channel::<Result<()>>();
    let ev_loop_handle = thread::Builder::new()
      .name(format!("rtpscore event loop {:?}", my_guid.prefix))
      .spawn(move || {
        let event_loop = DPEventLoop::new(
          domain_info,
          listeners,
          ev_loop_discovery_db,
          my_guid.prefix,
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
          discovery_update_notification_receiver,
          spdp_liveness_sender,
        );
        match event_loop {
          Ok(ev) => {
            let _ = ev_loop_started_sender.send(Ok(()));
            ev.event_loop();
          }
          Err(e) => {
            error!("Event loop failed to start: {:?}", e);
            let _ = ev_loop_started_sender.send(Err(Error::from(e)));
          }
        }
      })?;

    match ev_loop_started_receiver.recv() {
      Ok(Ok(())) => (),
      Ok(Err(e)) => return Err(e),
      Err(_) => return log_and_err_internal!("Event loop thread exited before starting."),
    }

    Ok(DomainParticipantInner {
      domain_id,
      participant_id,
      my_guid,
      config,
      self_locators,
      add_reader_sender,
      remove_reader_sender,
      add_writer_sender,
      remove_writer_sender,
      stop_poll_sender,
      ev_loop_handle: Mutex::new(Some(ev_loop_handle)),
      discovery_command_sender,
      discovery_join_handle: Mutex::new(None),
      discovery_db,
      // Keys below this are left for builtin entities.
      entity_id_generator: AtomicU32::new(0x100),
      stopped: AtomicBool::new(false),
    })
  }

  fn set_discovery_join_handle(&self, handle: JoinHandle<()>) {
    match self.discovery_join_handle.lock() {
      Ok(mut h) => *h = Some(handle),
      Err(e) => error!("Discovery join handle lock poisoned: {:?}", e),
    }
  }

  pub fn guid(&self) -> GUID {
    self.my_guid
  }

  fn check_running(&self) -> Result<()> {
    if self.stopped.load(Ordering::Acquire) {
      Err(Error::AlreadyDeleted)
    } else {
      Ok(())
    }
  }

  fn new_entity_id(&self, entity_kind: EntityKind) -> EntityId {
    let key = self.entity_id_generator.fetch_add(1, Ordering::Relaxed);
    EntityId::from_key_u32(key, entity_kind)
  }

  /// Stops discovery first, so that it can still announce that we leave,
  /// then the event loop. Safe to call more than once, and from any thread.
  pub fn stop(&self) {
    if self.stopped.swap(true, Ordering::AcqRel) {
      return;
    }
    info!("Stopping DomainParticipant {:?}", self.my_guid);

    match self
      .discovery_command_sender
      .send(DiscoveryCommand::StopDiscovery)
    {
      Ok(()) => (),
      Err(e) => debug!("Discovery already stopped: {:?}", e),
    }
    join_unless_current(&self.discovery_join_handle, "discovery");

    match self.stop_poll_sender.send(EventLoopCommand::Stop) {
      Ok(()) => (),
      Err(e) => debug!("Event loop already stopped: {:?}", e),
    }
    join_unless_current(&self.ev_loop_handle, "event loop");

    participant_registry::registry().unregister(self.my_guid.prefix);
  }
}

// A thread must not join itself. That happens when the discovery thread
// holds the last strong reference for a moment.
fn join_unless_current(handle: &Mutex<Option<JoinHandle<()>>>, what: &str) {
  let handle = match handle.lock() {
    Ok(mut h) => h.take(),
    Err(e) => {
      error!("{} join handle lock poisoned: {:?}", what, e);
      None
    }
  };
  if let Some(h) = handle {
    if h.thread().id() == thread::current().id() {
      debug!("Not joining {} thread from itself.", what);
    } else if h.join().is_err() {
      error!("{} thread panicked", what);
    }
  }
}

impl Drop for DomainParticipantInner {
  fn drop(&mut self) {
    self.stop();
  }
}

/// A mio channel receiver and the token it is registered with.
pub(crate) struct TokenReceiverPair<T> {
  pub token: Token,
  pub receiver: mio_channel::Receiver<T>,
}
