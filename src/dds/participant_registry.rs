// Process-wide index of running participants, by GUID prefix.
//
// The registry holds only weak references. A participant removes itself
// when it stops, so lookups never revive a stopped participant.

use std::{
  collections::BTreeMap,
  sync::{Mutex, MutexGuard, OnceLock, Weak},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::participant::{DomainParticipant, DomainParticipantInner},
  structure::guid::GuidPrefix,
};

pub(crate) struct ParticipantRegistry {
  participants: Mutex<BTreeMap<GuidPrefix, Weak<DomainParticipantInner>>>,
}

static REGISTRY: OnceLock<ParticipantRegistry> = OnceLock::new();

pub(crate) fn registry() -> &'static ParticipantRegistry {
  REGISTRY.get_or_init(|| ParticipantRegistry {
    participants: Mutex::new(BTreeMap::new()),
  })
}

impl ParticipantRegistry {
  fn lock(&self) -> MutexGuard<'_, BTreeMap<GuidPrefix, Weak<DomainParticipantInner>>> {
    // A panic elsewhere must not disable shutdown.
    self
      .participants
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn register(&self, prefix: GuidPrefix, participant: Weak<DomainParticipantInner>) {
    debug!("Registering participant {:?}", prefix);
    self.lock().insert(prefix, participant);
  }

  pub fn unregister(&self, prefix: GuidPrefix) {
    if self.lock().remove(&prefix).is_some() {
      debug!("Unregistered participant {:?}", prefix);
    }
  }

  pub fn lookup(&self, prefix: GuidPrefix) -> Option<DomainParticipant> {
    self
      .lock()
      .get(&prefix)
      .and_then(Weak::upgrade)
      .map(DomainParticipant::from_inner)
  }

  fn running(&self) -> Vec<DomainParticipant> {
    self
      .lock()
      .values()
      .filter_map(Weak::upgrade)
      .map(DomainParticipant::from_inner)
      .collect()
  }
}

/// Participant of this process with the given GUID prefix, if it is running.
pub fn lookup_participant(prefix: GuidPrefix) -> Option<DomainParticipant> {
  registry().lookup(prefix)
}

/// Stops every participant in this process. Meant for process shutdown,
/// e.g. from a signal handler thread.
pub fn stop_all() {
  // Stopping unregisters, so the registry lock is not held meanwhile.
  let participants = registry().running();
  info!("Stopping {} participants", participants.len());
  for dp in participants {
    dp.stop();
  }
}
