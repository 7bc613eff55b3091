//! Deciding whether a writer and a reader are matched, and tracking the
//! state of each (local endpoint, remote endpoint) pair so that repeated
//! discovery data produces each event only once.

use std::collections::{BTreeMap, BTreeSet};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
  dds::qos::{policy::Partition, QosPolicies, QosPolicyId},
  structure::guid::{GuidPrefix, GUID},
};

/// What an endpoint publishes or subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicDescriptor {
  pub topic_name: String,
  pub type_name: String,
  /// WITH_KEY topic, as opposed to NO_KEY
  pub keyed: bool,
}

impl TopicDescriptor {
  pub fn new(topic_name: &str, type_name: &str, keyed: bool) -> TopicDescriptor {
    TopicDescriptor {
      topic_name: topic_name.to_string(),
      type_name: type_name.to_string(),
      keyed,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
  /// Different topic, type, topic kind or disjoint partitions. The
  /// endpoints do not see each other at all.
  Unrelated,
  Incompatible(QosPolicyId),
  Compatible,
}

/// Match writer `w` against reader `r`.
pub fn evaluate(
  w_topic: &TopicDescriptor,
  w_qos: &QosPolicies,
  r_topic: &TopicDescriptor,
  r_qos: &QosPolicies,
) -> MatchOutcome {
  if w_topic.topic_name != r_topic.topic_name {
    return MatchOutcome::Unrelated;
  }
  if w_topic.type_name != r_topic.type_name || w_topic.keyed != r_topic.keyed {
    debug!(
      "Topic {:?}: type or kind differs. writer={:?} reader={:?}",
      w_topic.topic_name, w_topic, r_topic
    );
    return MatchOutcome::Unrelated;
  }
  let default_partition = Partition::default();
  let w_partition = w_qos.partition().unwrap_or(&default_partition);
  let r_partition = r_qos.partition().unwrap_or(&default_partition);
  if !w_partition.matches(r_partition) {
    return MatchOutcome::Unrelated;
  }
  match w_qos.compliance_failure_wrt(r_qos) {
    Some(policy) => MatchOutcome::Incompatible(policy),
    None => MatchOutcome::Compatible,
  }
}

/// State of one (local, remote) endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
  Discovered,
  QosChecked,
  Matched,
  Incompatible(QosPolicyId),
  Removed,
}

/// Event to report on the local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
  Matched,
  Incompatible(QosPolicyId),
  Removed,
}

/// Per local endpoint: the state of every remote endpoint it has been
/// evaluated against.
#[derive(Debug, Default)]
pub(crate) struct MatchTracker {
  pairs: BTreeMap<GUID, MatchState>,
  reported_incompatible: BTreeSet<(GUID, QosPolicyId)>,
}

impl MatchTracker {
  pub fn new() -> MatchTracker {
    MatchTracker::default()
  }

  pub fn state(&self, remote: GUID) -> MatchState {
    self
      .pairs
      .get(&remote)
      .copied()
      .unwrap_or(MatchState::Removed)
  }

  pub fn is_matched(&self, remote: GUID) -> bool {
    self.state(remote) == MatchState::Matched
  }

  /// Feeds new discovery data about `remote` through the pair state machine
  /// and returns the events it produces, in order.
  pub fn update(&mut self, remote: GUID, outcome: MatchOutcome) -> Vec<MatchEvent> {
    let previous = self.state(remote);
    let mut events = Vec::new();
    if previous == MatchState::Removed {
      self.pairs.insert(remote, MatchState::Discovered);
    }
    match outcome {
      MatchOutcome::Unrelated => {
        if previous == MatchState::Matched {
          events.push(MatchEvent::Removed);
        }
        self.pairs.remove(&remote);
      }
      MatchOutcome::Compatible => {
        self.pairs.insert(remote, MatchState::QosChecked);
        if previous != MatchState::Matched {
          events.push(MatchEvent::Matched);
        }
        self.pairs.insert(remote, MatchState::Matched);
      }
      MatchOutcome::Incompatible(policy) => {
        self.pairs.insert(remote, MatchState::QosChecked);
        if previous == MatchState::Matched {
          events.push(MatchEvent::Removed);
        }
        if self.reported_incompatible.insert((remote, policy)) {
          events.push(MatchEvent::Incompatible(policy));
        }
        self.pairs.insert(remote, MatchState::Incompatible(policy));
      }
    }
    events
  }

  /// Remote endpoint is gone. A later rediscovery starts from scratch.
  pub fn remove(&mut self, remote: GUID) -> Option<MatchEvent> {
    self.reported_incompatible.retain(|(g, _)| *g != remote);
    match self.pairs.remove(&remote) {
      Some(MatchState::Matched) => Some(MatchEvent::Removed),
      _ => None,
    }
  }

  pub fn matched(&self) -> impl Iterator<Item = GUID> + '_ {
    self
      .pairs
      .iter()
      .filter(|(_, s)| **s == MatchState::Matched)
      .map(|(g, _)| *g)
  }

  /// Every remote endpoint of one participant we have a pair with.
  pub fn remotes_of_participant(&self, prefix: GuidPrefix) -> Vec<GUID> {
    let mut remotes: BTreeSet<GUID> = self.pairs.range(prefix.range()).map(|(g, _)| *g).collect();
    remotes.extend(
      self
        .reported_incompatible
        .iter()
        .map(|(g, _)| *g)
        .filter(|g| g.prefix == prefix),
    );
    remotes.into_iter().collect()
  }
}
