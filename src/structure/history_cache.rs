use std::{
  collections::{BTreeMap, HashMap},
  ops::{Bound::Included, RangeInclusive},
  sync::{Condvar, Mutex, MutexGuard, PoisonError},
  time::{Duration as StdDuration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    qos::{
      policy::{History, ResourceLimits},
      QosPolicies,
    },
    statusevents::SampleRejectedStatusKind,
  },
  structure::{
    cache_change::CacheChange, guid::GUID, instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
  },
};

/// Why `HistoryCache::add_change` refused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
  ResourceLimitsExceeded { reason: SampleRejectedStatusKind },
  /// Sequence number not above the last one accepted from the same writer.
  OutOfOrder { last: SequenceNumber },
}

/// Retention rules of one cache, resolved from History and ResourceLimits
/// QoS. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
  pub keep_last: Option<usize>,
  pub max_samples: Option<usize>,
  pub max_instances: Option<usize>,
  pub max_samples_per_instance: Option<usize>,
  pub keyed: bool,
}

impl HistoryLimits {
  pub fn from_qos(qos: &QosPolicies, keyed: bool) -> HistoryLimits {
    let keep_last = match qos.history_or_default() {
      History::KeepLast { depth } => Some(depth.max(1) as usize),
      History::KeepAll => None,
    };
    let limits = qos.resource_limits_or_default();
    HistoryLimits {
      keep_last,
      max_samples: ResourceLimits::limit(limits.max_samples),
      max_instances: ResourceLimits::limit(limits.max_instances),
      max_samples_per_instance: ResourceLimits::limit(limits.max_samples_per_instance),
      keyed,
    }
  }

  pub fn unlimited(keyed: bool) -> HistoryLimits {
    HistoryLimits {
      keep_last: None,
      max_samples: None,
      max_instances: None,
      max_samples_per_instance: None,
      keyed,
    }
  }

  // Changes of one instance that may coexist
  fn per_instance(&self) -> Option<usize> {
    let spi = if self.keyed {
      self.max_samples_per_instance
    } else {
      None
    };
    match (self.keep_last, spi) {
      (Some(d), Some(s)) => Some(d.min(s)),
      (d, s) => d.or(s),
    }
  }
}

type ChangeKey = (GUID, SequenceNumber);

fn writer_range(writer: GUID) -> RangeInclusive<ChangeKey> {
  (writer, SequenceNumber::new(i64::MIN))..=(writer, SequenceNumber::new(i64::MAX))
}

#[derive(Debug)]
struct CacheEntry {
  change: CacheChange,
  arrival: u64,
  read: bool,
}

#[derive(Debug, Default)]
struct CacheInner {
  changes: BTreeMap<ChangeKey, CacheEntry>,
  // arrival order, i.e. delivery order for readers
  arrivals: BTreeMap<u64, ChangeKey>,
  instances: HashMap<InstanceHandle, BTreeMap<u64, ChangeKey>>,
  // survives removal of the changes themselves
  last_sn: HashMap<GUID, SequenceNumber>,
  next_arrival: u64,
  unread: usize,
}

impl CacheInner {
  fn insert(&mut self, change: CacheChange) {
    let key = (change.writer_guid, change.sequence_number);
    let arrival = self.next_arrival;
    self.next_arrival += 1;
    self.last_sn.insert(change.writer_guid, change.sequence_number);
    self
      .instances
      .entry(change.instance_handle)
      .or_default()
      .insert(arrival, key);
    self.arrivals.insert(arrival, key);
    self.unread += 1;
    self.changes.insert(
      key,
      CacheEntry {
        change,
        arrival,
        read: false,
      },
    );
  }

  fn remove(&mut self, key: &ChangeKey) -> Option<CacheChange> {
    let entry = self.changes.remove(key)?;
    self.arrivals.remove(&entry.arrival);
    let instance = entry.change.instance_handle;
    let now_empty = match self.instances.get_mut(&instance) {
      Some(arrivals) => {
        arrivals.remove(&entry.arrival);
        arrivals.is_empty()
      }
      None => false,
    };
    if now_empty {
      self.instances.remove(&instance);
    }
    if !entry.read {
      self.unread -= 1;
    }
    Some(entry.change)
  }

  fn oldest_of_instance(&self, instance: &InstanceHandle) -> Option<ChangeKey> {
    self
      .instances
      .get(instance)
      .and_then(|a| a.values().next().copied())
  }

  fn instance_len(&self, instance: &InstanceHandle) -> usize {
    self.instances.get(instance).map_or(0, BTreeMap::len)
  }

  fn oldest_unread(&self) -> Option<ChangeKey> {
    self
      .arrivals
      .values()
      .find(|k| self.changes.get(*k).map_or(false, |e| !e.read))
      .copied()
  }
}

/// Changes of one endpoint, ordered by (writer GUID, sequence number) and
/// indexed by arrival and by instance.
///
/// Every operation holds the internal lock only for its own duration, so
/// the cache can be shared between the protocol thread and application
/// threads. Readers blocked in `wait_for_unread` are woken on every insert.
#[derive(Debug)]
pub struct HistoryCache {
  limits: HistoryLimits,
  inner: Mutex<CacheInner>,
  unread_available: Condvar,
}

impl HistoryCache {
  pub fn new(limits: HistoryLimits) -> HistoryCache {
    HistoryCache {
      limits,
      inner: Mutex::new(CacheInner::default()),
      unread_available: Condvar::new(),
    }
  }

  pub fn limits(&self) -> HistoryLimits {
    self.limits
  }

  // A panic while holding the lock leaves the maps consistent, since every
  // mutation completes before the guard is dropped.
  fn lock(&self) -> MutexGuard<'_, CacheInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Inserts `change`, evicting under KEEP_LAST as needed. On `Err` the
  /// cache is unchanged.
  pub fn add_change(&self, change: CacheChange) -> Result<(), Rejected> {
    let mut inner = self.lock();
    let limits = &self.limits;

    if let Some(&last) = inner.last_sn.get(&change.writer_guid) {
      if change.sequence_number <= last {
        return Err(Rejected::OutOfOrder { last });
      }
    }

    let instance = change.instance_handle;
    let new_instance = inner.instance_len(&instance) == 0;
    if limits.keyed && new_instance {
      if let Some(max) = limits.max_instances {
        if inner.instances.len() >= max {
          return Err(Rejected::ResourceLimitsExceeded {
            reason: SampleRejectedStatusKind::ByInstancesLimit,
          });
        }
      }
    }

    // Decide everything before mutating, so that a rejection leaves the
    // cache as it was.
    let keep_last = limits.keep_last.is_some();
    if !keep_last {
      if let Some(max) = limits.per_instance() {
        if inner.instance_len(&instance) >= max {
          return Err(Rejected::ResourceLimitsExceeded {
            reason: SampleRejectedStatusKind::BySamplesPerInstanceLimit,
          });
        }
      }
      if let Some(max) = limits.max_samples {
        if inner.changes.len() >= max {
          return Err(Rejected::ResourceLimitsExceeded {
            reason: SampleRejectedStatusKind::BySamplesLimit,
          });
        }
      }
    } else {
      if let Some(max) = limits.per_instance() {
        while inner.instance_len(&instance) >= max {
          match inner.oldest_of_instance(&instance) {
            Some(key) => {
              trace!("KEEP_LAST evicts {:?} of {:?}", key.1, instance);
              inner.remove(&key);
            }
            None => break,
          }
        }
      }
      if let Some(max) = limits.max_samples {
        while inner.changes.len() >= max {
          match inner.arrivals.values().next().copied() {
            Some(key) => {
              trace!("max_samples evicts {:?}", key);
              inner.remove(&key);
            }
            None => break,
          }
        }
      }
    }

    inner.insert(change);
    drop(inner);
    self.unread_available.notify_all();
    Ok(())
  }

  pub fn remove_change(
    &self,
    writer: GUID,
    sequence_number: SequenceNumber,
  ) -> Option<CacheChange> {
    self.lock().remove(&(writer, sequence_number))
  }

  /// Removes all changes of `writer` below `sequence_number`. Returns how
  /// many were removed.
  pub fn remove_changes_before(&self, writer: GUID, sequence_number: SequenceNumber) -> usize {
    let mut inner = self.lock();
    let keys: Vec<ChangeKey> = inner
      .changes
      .range((writer, SequenceNumber::new(i64::MIN))..(writer, sequence_number))
      .map(|(k, _)| *k)
      .collect();
    for k in keys.iter() {
      inner.remove(k);
    }
    keys.len()
  }

  /// Removes every change of `writer`, e.g. when the writer is lost.
  pub fn remove_writer(&self, writer: GUID) -> usize {
    let mut inner = self.lock();
    let keys: Vec<ChangeKey> = inner.changes.range(writer_range(writer)).map(|(k, _)| *k).collect();
    for k in keys.iter() {
      inner.remove(k);
    }
    keys.len()
  }

  pub fn get_change(&self, writer: GUID, sequence_number: SequenceNumber) -> Option<CacheChange> {
    self
      .lock()
      .changes
      .get(&(writer, sequence_number))
      .map(|e| e.change.clone())
  }

  pub fn contains(&self, writer: GUID, sequence_number: SequenceNumber) -> bool {
    self.lock().changes.contains_key(&(writer, sequence_number))
  }

  /// Changes of `writer` with `low <= sn <= high`, ascending.
  pub fn changes_in_range(
    &self,
    writer: GUID,
    low: SequenceNumber,
    high: SequenceNumber,
  ) -> impl Iterator<Item = CacheChange> {
    let found: Vec<CacheChange> = if low > high {
      Vec::new()
    } else {
      self
        .lock()
        .changes
        .range((Included((writer, low)), Included((writer, high))))
        .map(|(_, e)| e.change.clone())
        .collect()
    };
    found.into_iter()
  }

  pub fn min_sequence_number(&self, writer: GUID) -> Option<SequenceNumber> {
    self
      .lock()
      .changes
      .range(writer_range(writer))
      .next()
      .map(|((_, sn), _)| *sn)
  }

  pub fn max_sequence_number(&self, writer: GUID) -> Option<SequenceNumber> {
    self
      .lock()
      .changes
      .range(writer_range(writer))
      .next_back()
      .map(|((_, sn), _)| *sn)
  }

  /// Highest sequence number ever accepted from `writer`, even if the change
  /// has since been removed.
  pub fn last_sequence_number(&self, writer: GUID) -> Option<SequenceNumber> {
    self.lock().last_sn.get(&writer).copied()
  }

  pub fn len(&self) -> usize {
    self.lock().changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn instance_count(&self) -> usize {
    self.lock().instances.len()
  }

  pub fn unread_count(&self) -> usize {
    self.lock().unread
  }

  /// Oldest unread change in delivery order. It is marked read and stays in
  /// the cache.
  pub fn read_next(&self) -> Option<CacheChange> {
    let mut inner = self.lock();
    let key = inner.oldest_unread()?;
    let change = match inner.changes.get_mut(&key) {
      Some(entry) => {
        entry.read = true;
        entry.change.clone()
      }
      None => return None,
    };
    inner.unread -= 1;
    Some(change)
  }

  /// Oldest unread change in delivery order, removed from the cache.
  pub fn take_next(&self) -> Option<CacheChange> {
    let mut inner = self.lock();
    let key = inner.oldest_unread()?;
    inner.remove(&key)
  }

  /// Blocks until at least one unread change is present or `timeout`
  /// passes. Returns whether there is something to read. A timeout too large
  /// to represent waits without limit.
  pub fn wait_for_unread(&self, timeout: StdDuration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let mut inner = self.lock();
    while inner.unread == 0 {
      inner = match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return false;
          }
          match self.unread_available.wait_timeout(inner, deadline - now) {
            Ok((guard, _timeout_result)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
          }
        }
        None => match self.unread_available.wait(inner) {
          Ok(guard) => guard,
          Err(poisoned) => poisoned.into_inner(),
        },
      };
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use super::*;
  use crate::{
    dds::qos::QosPolicyBuilder,
    messages::serialized_payload::{RepresentationIdentifier, SerializedPayload},
    structure::{
      cache_change::ChangeKind,
      guid::{EntityId, EntityKind, GuidPrefix},
    },
  };

  fn writer(n: u8) -> GUID {
    GUID::new(
      GuidPrefix::new(&[n; 12]),
      EntityId::new([0, 0, n], EntityKind::WRITER_WITH_KEY_USER_DEFINED),
    )
  }

  fn change(w: GUID, sn: i64, instance: u8) -> CacheChange {
    let handle = if instance == 0 {
      InstanceHandle::NIL
    } else {
      InstanceHandle::from_bytes([instance; 16])
    };
    CacheChange::new(
      ChangeKind::Alive,
      w,
      SequenceNumber::new(sn),
      handle,
      Some(SerializedPayload::new(
        RepresentationIdentifier::CDR_LE,
        vec![sn as u8],
      )),
    )
  }

  fn keep_all(max_samples: i32, max_instances: i32, per_instance: i32) -> HistoryLimits {
    let qos = QosPolicyBuilder::new()
      .history(History::KeepAll)
      .resource_limits(ResourceLimits {
        max_samples,
        max_instances,
        max_samples_per_instance: per_instance,
      })
      .build();
    HistoryLimits::from_qos(&qos, true)
  }

  fn keep_last(depth: i32, keyed: bool) -> HistoryLimits {
    let qos = QosPolicyBuilder::new()
      .history(History::KeepLast { depth })
      .build();
    HistoryLimits::from_qos(&qos, keyed)
  }

  #[test]
  fn keep_all_rejects_when_max_samples_reached() {
    let hc = HistoryCache::new(keep_all(3, -1, -1));
    let w = writer(1);
    for sn in 1..=3 {
      hc.add_change(change(w, sn, 1)).unwrap();
    }
    assert_eq!(
      hc.add_change(change(w, 4, 1)),
      Err(Rejected::ResourceLimitsExceeded {
        reason: SampleRejectedStatusKind::BySamplesLimit
      })
    );
    assert_eq!(hc.len(), 3);
    // a rejected change may be offered again once room is made
    hc.remove_change(w, SequenceNumber::new(1));
    hc.add_change(change(w, 4, 1)).unwrap();
    assert_eq!(hc.min_sequence_number(w), Some(SequenceNumber::new(2)));
    assert_eq!(hc.max_sequence_number(w), Some(SequenceNumber::new(4)));
  }

  #[test]
  fn keep_all_per_instance_and_instance_limits() {
    let hc = HistoryCache::new(keep_all(-1, 2, 2));
    let w = writer(1);
    hc.add_change(change(w, 1, 1)).unwrap();
    hc.add_change(change(w, 2, 1)).unwrap();
    assert_eq!(
      hc.add_change(change(w, 3, 1)),
      Err(Rejected::ResourceLimitsExceeded {
        reason: SampleRejectedStatusKind::BySamplesPerInstanceLimit
      })
    );
    hc.add_change(change(w, 3, 2)).unwrap();
    assert_eq!(
      hc.add_change(change(w, 4, 3)),
      Err(Rejected::ResourceLimitsExceeded {
        reason: SampleRejectedStatusKind::ByInstancesLimit
      })
    );
    assert_eq!(hc.instance_count(), 2);
  }

  #[test]
  fn keep_last_evicts_oldest_of_same_instance() {
    let hc = HistoryCache::new(keep_last(2, true));
    let w = writer(1);
    hc.add_change(change(w, 1, 1)).unwrap();
    hc.add_change(change(w, 2, 2)).unwrap();
    hc.add_change(change(w, 3, 1)).unwrap();
    hc.add_change(change(w, 4, 1)).unwrap();
    let left: Vec<i64> = hc
      .changes_in_range(w, SequenceNumber::new(1), SequenceNumber::new(10))
      .map(|c| i64::from(c.sequence_number))
      .collect();
    assert_eq!(left, vec![2, 3, 4]);
  }

  #[test]
  fn keep_last_keyless_keeps_newest_depth() {
    let hc = HistoryCache::new(keep_last(2, false));
    let w = writer(1);
    for sn in 1..=5 {
      hc.add_change(change(w, sn, 0)).unwrap();
    }
    assert_eq!(hc.len(), 2);
    assert!(hc.get_change(w, SequenceNumber::new(3)).is_none());
    assert!(hc.get_change(w, SequenceNumber::new(4)).is_some());
  }

  #[test]
  fn keep_last_with_global_limit_evicts_globally_oldest() {
    let qos = QosPolicyBuilder::new()
      .history(History::KeepLast { depth: 10 })
      .resource_limits(ResourceLimits {
        max_samples: 2,
        max_instances: -1,
        max_samples_per_instance: -1,
      })
      .build();
    let hc = HistoryCache::new(HistoryLimits::from_qos(&qos, true));
    let w = writer(1);
    hc.add_change(change(w, 1, 1)).unwrap();
    hc.add_change(change(w, 2, 2)).unwrap();
    hc.add_change(change(w, 3, 3)).unwrap();
    assert_eq!(hc.len(), 2);
    assert_eq!(hc.min_sequence_number(w), Some(SequenceNumber::new(2)));
  }

  #[test]
  fn out_of_order_and_duplicate_rejected() {
    let hc = HistoryCache::new(HistoryLimits::unlimited(false));
    let w = writer(1);
    hc.add_change(change(w, 5, 0)).unwrap();
    assert_eq!(
      hc.add_change(change(w, 5, 0)),
      Err(Rejected::OutOfOrder {
        last: SequenceNumber::new(5)
      })
    );
    assert!(hc.add_change(change(w, 3, 0)).is_err());
    // removal does not reset the ordering check
    hc.remove_change(w, SequenceNumber::new(5));
    assert!(hc.add_change(change(w, 5, 0)).is_err());
    assert_eq!(hc.last_sequence_number(w), Some(SequenceNumber::new(5)));
    // another writer has its own numbering
    hc.add_change(change(writer(2), 1, 0)).unwrap();
  }

  #[test]
  fn range_is_per_writer() {
    let hc = HistoryCache::new(HistoryLimits::unlimited(false));
    let (a, b) = (writer(1), writer(2));
    for sn in 1..=4 {
      hc.add_change(change(a, sn, 0)).unwrap();
      hc.add_change(change(b, sn, 0)).unwrap();
    }
    let got: Vec<GUID> = hc
      .changes_in_range(a, SequenceNumber::new(2), SequenceNumber::new(3))
      .map(|c| c.writer_guid)
      .collect();
    assert_eq!(got, vec![a, a]);
    assert_eq!(
      hc.changes_in_range(a, SequenceNumber::new(3), SequenceNumber::new(2))
        .count(),
      0
    );
    assert_eq!(hc.remove_changes_before(b, SequenceNumber::new(3)), 2);
    assert_eq!(hc.min_sequence_number(b), Some(SequenceNumber::new(3)));
    assert_eq!(hc.remove_writer(a), 4);
    assert_eq!(hc.len(), 2);
  }

  #[test]
  fn read_and_take_follow_arrival_order() {
    let hc = HistoryCache::new(HistoryLimits::unlimited(false));
    let (a, b) = (writer(1), writer(2));
    hc.add_change(change(b, 1, 0)).unwrap();
    hc.add_change(change(a, 1, 0)).unwrap();
    hc.add_change(change(b, 2, 0)).unwrap();
    assert_eq!(hc.unread_count(), 3);

    assert_eq!(hc.read_next().map(|c| c.writer_guid), Some(b));
    assert_eq!(hc.unread_count(), 2);
    assert_eq!(hc.len(), 3);

    let taken = hc.take_next().unwrap();
    assert_eq!((taken.writer_guid, taken.sequence_number), (a, SequenceNumber::new(1)));
    assert_eq!(hc.len(), 2);
    assert_eq!(hc.take_next().map(|c| c.sequence_number), Some(SequenceNumber::new(2)));
    assert!(hc.take_next().is_none());
    assert_eq!(hc.unread_count(), 0);
  }

  #[test]
  fn wait_for_unread_wakes_on_insert() {
    let hc = Arc::new(HistoryCache::new(HistoryLimits::unlimited(false)));
    assert!(!hc.wait_for_unread(StdDuration::from_millis(10)));

    let hc2 = hc.clone();
    let waiter = thread::spawn(move || hc2.wait_for_unread(StdDuration::from_secs(10)));
    thread::sleep(StdDuration::from_millis(50));
    hc.add_change(change(writer(1), 1, 0)).unwrap();
    assert!(waiter.join().unwrap());
  }

  #[test]
  fn wait_for_unread_accepts_unbounded_timeout() {
    let hc = Arc::new(HistoryCache::new(HistoryLimits::unlimited(false)));
    hc.add_change(change(writer(1), 1, 0)).unwrap();
    assert!(hc.wait_for_unread(StdDuration::MAX));

    let empty = Arc::new(HistoryCache::new(HistoryLimits::unlimited(false)));
    let hc2 = empty.clone();
    let waiter = thread::spawn(move || hc2.wait_for_unread(StdDuration::MAX));
    thread::sleep(StdDuration::from_millis(50));
    empty.add_change(change(writer(2), 1, 0)).unwrap();
    assert!(waiter.join().unwrap());
  }
}
