use std::{
  collections::BTreeMap,
  sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
  time::Instant,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  discovery::{
    sedp_messages::{DiscoveredReaderData, DiscoveredWriterData},
    spdp_participant_data::SpdpDiscoveredParticipantData,
  },
  structure::{
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
  },
};

// If remote participant does not specifiy lease duration, how long silence
// until we pronounce it dead.
const DEFAULT_PARTICIPANT_LEASE_DURATION: Duration = Duration::from_secs(20);

/// What discovery knows: remote participants with their last life signs,
/// remote endpoints announced over SEDP, and our own endpoints that SEDP
/// announces.
///
/// Shared as `Arc<RwLock<DiscoveryDB>>` between the discovery thread, the
/// event loop and the application.
pub(crate) struct DiscoveryDB {
  my_guid: GUID,
  participant_proxies: BTreeMap<GuidPrefix, SpdpDiscoveredParticipantData>,
  participant_last_life_signs: BTreeMap<GuidPrefix, Instant>,

  local_topic_writers: BTreeMap<GUID, DiscoveredWriterData>,
  local_topic_readers: BTreeMap<GUID, DiscoveredReaderData>,

  // as received, before default locators are filled in
  external_topic_readers: BTreeMap<GUID, DiscoveredReaderData>,
  external_topic_writers: BTreeMap<GUID, DiscoveredWriterData>,
}

pub(crate) fn discovery_db_read(
  discovery_db: &Arc<RwLock<DiscoveryDB>>,
) -> RwLockReadGuard<DiscoveryDB> {
  match discovery_db.read() {
    Ok(db) => db,
    Err(e) => {
      error!("DiscoveryDB is poisoned. {:?}", e);
      e.into_inner()
    }
  }
}

pub(crate) fn discovery_db_write(
  discovery_db: &Arc<RwLock<DiscoveryDB>>,
) -> RwLockWriteGuard<DiscoveryDB> {
  match discovery_db.write() {
    Ok(db) => db,
    Err(e) => {
      error!("DiscoveryDB is poisoned. {:?}", e);
      e.into_inner()
    }
  }
}

impl DiscoveryDB {
  pub fn new(my_guid: GUID) -> Self {
    Self {
      my_guid,
      participant_proxies: BTreeMap::new(),
      participant_last_life_signs: BTreeMap::new(),
      local_topic_writers: BTreeMap::new(),
      local_topic_readers: BTreeMap::new(),
      external_topic_readers: BTreeMap::new(),
      external_topic_writers: BTreeMap::new(),
    }
  }

  /// Stores participant data and refreshes its lease. Returns `true` if the
  /// participant was previously unknown, or announced something different
  /// from before.
  pub fn update_participant(&mut self, data: &SpdpDiscoveredParticipantData) -> bool {
    let guid = data.participant_guid;
    if guid.entity_id != EntityId::PARTICIPANT {
      error!(
        "Discovered participant GUID entity_id is not for participant: {:?}",
        guid
      );
      return false;
    }
    if guid.prefix == self.my_guid.prefix {
      trace!("DiscoveryDB discovered self. Skipping.");
      return false;
    }

    let changed = match self.participant_proxies.get(&guid.prefix) {
      None => {
        info!("New remote participant: {:?}", guid.prefix);
        true
      }
      Some(old) => !same_announcement(old, data),
    };
    self.participant_proxies.insert(guid.prefix, data.clone());
    self
      .participant_last_life_signs
      .insert(guid.prefix, Instant::now());
    changed
  }

  /// Any message from a participant counts as a life sign.
  pub fn participant_is_alive(&mut self, guid_prefix: GuidPrefix) {
    if let Some(ts) = self.participant_last_life_signs.get_mut(&guid_prefix) {
      *ts = Instant::now();
    } else {
      trace!("Life sign from unknown participant {:?}", guid_prefix);
    }
  }

  pub fn remove_participant(&mut self, guid_prefix: GuidPrefix) {
    info!("removing participant {:?}", guid_prefix);
    self.participant_proxies.remove(&guid_prefix);
    self.participant_last_life_signs.remove(&guid_prefix);

    self.remove_topic_readers_with_prefix(guid_prefix);
    self.remove_topic_writers_with_prefix(guid_prefix);
  }

  pub fn find_participant_proxy(
    &self,
    guid_prefix: GuidPrefix,
  ) -> Option<&SpdpDiscoveredParticipantData> {
    self.participant_proxies.get(&guid_prefix)
  }

  pub fn all_participants(&self) -> impl Iterator<Item = &SpdpDiscoveredParticipantData> {
    self.participant_proxies.values()
  }

  // Delete participant proxies, if we have not heard of them within
  // lease_duration
  pub fn participant_cleanup(&mut self) -> Vec<GuidPrefix> {
    let inow = Instant::now();

    let mut to_remove = Vec::new();
    for (&prefix, sp) in &self.participant_proxies {
      let lease_duration = sp
        .lease_duration
        .unwrap_or(DEFAULT_PARTICIPANT_LEASE_DURATION)
        .to_std();
      match self.participant_last_life_signs.get(&prefix) {
        Some(&last_life) => {
          let elapsed = inow.duration_since(last_life);
          if elapsed > lease_duration {
            info!(
              "participant cleanup - deleting participant proxy {:?}. lease_duration = {:?} \
               elapsed = {:?}",
              prefix, lease_duration, elapsed
            );
            to_remove.push(prefix);
          }
        }
        None => {
          error!("Participant {:?} not in last_life_signs table?", prefix);
          to_remove.push(prefix);
        }
      }
    }
    for prefix in &to_remove {
      self.remove_participant(*prefix);
    }
    to_remove
  }

  fn remove_topic_readers_with_prefix(&mut self, guid_prefix: GuidPrefix) {
    let to_remove: Vec<GUID> = self
      .external_topic_readers
      .range(guid_prefix.range())
      .map(|(g, _)| *g)
      .collect();
    for guid in to_remove {
      self.external_topic_readers.remove(&guid);
    }
  }

  fn remove_topic_writers_with_prefix(&mut self, guid_prefix: GuidPrefix) {
    let to_remove: Vec<GUID> = self
      .external_topic_writers
      .range(guid_prefix.range())
      .map(|(g, _)| *g)
      .collect();
    for guid in to_remove {
      self.external_topic_writers.remove(&guid);
    }
  }

  /// Returns true if the reader was known.
  pub fn remove_topic_reader(&mut self, guid: GUID) -> bool {
    self.external_topic_readers.remove(&guid).is_some()
  }

  pub fn remove_topic_writer(&mut self, guid: GUID) -> bool {
    self.external_topic_writers.remove(&guid).is_some()
  }

  /// Stores a remote reader. Returns `None` if we already had exactly this
  /// data, otherwise the data with empty locator lists replaced by the
  /// participant defaults.
  pub fn update_subscription(
    &mut self,
    data: &DiscoveredReaderData,
  ) -> Option<DiscoveredReaderData> {
    let guid = data.reader_guid;
    match self.external_topic_readers.get(&guid) {
      Some(drd) if drd == data => None,
      _ => {
        self.external_topic_readers.insert(guid, data.clone());
        debug!("External reader: {:?}", data);
        Some(self.reader_with_default_locators(data))
      }
    }
  }

  pub fn update_publication(
    &mut self,
    data: &DiscoveredWriterData,
  ) -> Option<DiscoveredWriterData> {
    let guid = data.writer_guid;
    match self.external_topic_writers.get(&guid) {
      Some(dwd) if dwd == data => None,
      _ => {
        self.external_topic_writers.insert(guid, data.clone());
        debug!("External writer: {:?}", data);
        Some(self.writer_with_default_locators(data))
      }
    }
  }

  fn reader_with_default_locators(&self, data: &DiscoveredReaderData) -> DiscoveredReaderData {
    let mut filled = data.clone();
    if filled.unicast_locator_list.is_empty() && filled.multicast_locator_list.is_empty() {
      match self.find_participant_proxy(data.reader_guid.prefix) {
        Some(pp) => {
          filled.unicast_locator_list = pp.default_unicast_locators.clone();
          filled.multicast_locator_list = pp.default_multicast_locators.clone();
        }
        None => debug!(
          "No remote participant known for reader {:?}",
          data.reader_guid
        ),
      }
    }
    filled
  }

  fn writer_with_default_locators(&self, data: &DiscoveredWriterData) -> DiscoveredWriterData {
    let mut filled = data.clone();
    if filled.unicast_locator_list.is_empty() && filled.multicast_locator_list.is_empty() {
      match self.find_participant_proxy(data.writer_guid.prefix) {
        Some(pp) => {
          filled.unicast_locator_list = pp.default_unicast_locators.clone();
          filled.multicast_locator_list = pp.default_multicast_locators.clone();
        }
        None => debug!(
          "No remote participant known for writer {:?}",
          data.writer_guid
        ),
      }
    }
    filled
  }

  /// Remote readers on a topic, with locators filled in.
  pub fn external_readers_on_topic(&self, topic_name: &str) -> Vec<DiscoveredReaderData> {
    self
      .external_topic_readers
      .values()
      .filter(|d| d.topic.topic_name == topic_name)
      .map(|d| self.reader_with_default_locators(d))
      .collect()
  }

  pub fn external_writers_on_topic(&self, topic_name: &str) -> Vec<DiscoveredWriterData> {
    self
      .external_topic_writers
      .values()
      .filter(|d| d.topic.topic_name == topic_name)
      .map(|d| self.writer_with_default_locators(d))
      .collect()
  }

  /// Our own writers on a topic. They match our own readers like remote ones.
  pub fn local_writers_on_topic(&self, topic_name: &str) -> Vec<DiscoveredWriterData> {
    self
      .local_topic_writers
      .values()
      .filter(|d| d.topic.topic_name == topic_name)
      .cloned()
      .collect()
  }

  pub fn local_readers_on_topic(&self, topic_name: &str) -> Vec<DiscoveredReaderData> {
    self
      .local_topic_readers
      .values()
      .filter(|d| d.topic.topic_name == topic_name)
      .cloned()
      .collect()
  }

  pub fn update_local_topic_writer(&mut self, writer: DiscoveredWriterData) {
    self.local_topic_writers.insert(writer.writer_guid, writer);
  }

  pub fn remove_local_topic_writer(&mut self, guid: GUID) -> Option<DiscoveredWriterData> {
    self.local_topic_writers.remove(&guid)
  }

  pub fn update_local_topic_reader(&mut self, reader: DiscoveredReaderData) {
    self.local_topic_readers.insert(reader.reader_guid, reader);
  }

  pub fn remove_local_topic_reader(&mut self, guid: GUID) -> Option<DiscoveredReaderData> {
    self.local_topic_readers.remove(&guid)
  }

  pub fn local_topic_writer(&self, guid: GUID) -> Option<&DiscoveredWriterData> {
    self.local_topic_writers.get(&guid)
  }

  pub fn local_topic_reader(&self, guid: GUID) -> Option<&DiscoveredReaderData> {
    self.local_topic_readers.get(&guid)
  }
}

// Reception time changes on every announcement and does not count.
fn same_announcement(a: &SpdpDiscoveredParticipantData, b: &SpdpDiscoveredParticipantData) -> bool {
  SpdpDiscoveredParticipantData {
    updated_time: b.updated_time,
    ..a.clone()
  } == *b
}
