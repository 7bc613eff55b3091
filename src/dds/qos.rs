#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Identifies the policy that caused a QoS compatibility failure.
///
/// Only the policies that take part in offered/requested matching are listed.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum QosPolicyId {
  Durability,   // 2
  Presentation, // 3
  Deadline,
  LatencyBudget, // 5
  Ownership,
  Liveliness, // 8
  TimeBasedFilter,
  Partition, // 10
  Reliability,
  DestinationOrder, // 12
  History,
  ResourceLimits, // 14
  Lifespan,
}

/// Utility for building [QosPolicies]
#[derive(Default)]
pub struct QosPolicyBuilder {
  durability: Option<policy::Durability>,
  presentation: Option<policy::Presentation>,
  deadline: Option<policy::Deadline>,
  latency_budget: Option<policy::LatencyBudget>,
  ownership: Option<policy::Ownership>,
  liveliness: Option<policy::Liveliness>,
  time_based_filter: Option<policy::TimeBasedFilter>,
  partition: Option<policy::Partition>,
  reliability: Option<policy::Reliability>,
  destination_order: Option<policy::DestinationOrder>,
  history: Option<policy::History>,
  resource_limits: Option<policy::ResourceLimits>,
  lifespan: Option<policy::Lifespan>,
}

impl QosPolicyBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn durability(mut self, durability: policy::Durability) -> Self {
    self.durability = Some(durability);
    self
  }

  #[must_use]
  pub fn presentation(mut self, presentation: policy::Presentation) -> Self {
    self.presentation = Some(presentation);
    self
  }

  #[must_use]
  pub fn deadline(mut self, deadline: policy::Deadline) -> Self {
    self.deadline = Some(deadline);
    self
  }

  #[must_use]
  pub fn latency_budget(mut self, latency_budget: policy::LatencyBudget) -> Self {
    self.latency_budget = Some(latency_budget);
    self
  }

  #[must_use]
  pub fn ownership(mut self, ownership: policy::Ownership) -> Self {
    self.ownership = Some(ownership);
    self
  }

  #[must_use]
  pub fn liveliness(mut self, liveliness: policy::Liveliness) -> Self {
    self.liveliness = Some(liveliness);
    self
  }

  #[must_use]
  pub fn time_based_filter(mut self, time_based_filter: policy::TimeBasedFilter) -> Self {
    self.time_based_filter = Some(time_based_filter);
    self
  }

  #[must_use]
  pub fn partition(mut self, partition: policy::Partition) -> Self {
    self.partition = Some(partition);
    self
  }

  #[must_use]
  pub fn reliability(mut self, reliability: policy::Reliability) -> Self {
    self.reliability = Some(reliability);
    self
  }

  #[must_use]
  pub fn destination_order(mut self, destination_order: policy::DestinationOrder) -> Self {
    self.destination_order = Some(destination_order);
    self
  }

  #[must_use]
  pub fn history(mut self, history: policy::History) -> Self {
    self.history = Some(history);
    self
  }

  #[must_use]
  pub fn resource_limits(mut self, resource_limits: policy::ResourceLimits) -> Self {
    self.resource_limits = Some(resource_limits);
    self
  }

  #[must_use]
  pub fn lifespan(mut self, lifespan: policy::Lifespan) -> Self {
    self.lifespan = Some(lifespan);
    self
  }

  pub fn build(self) -> QosPolicies {
    QosPolicies {
      durability: self.durability,
      presentation: self.presentation,
      deadline: self.deadline,
      latency_budget: self.latency_budget,
      ownership: self.ownership,
      liveliness: self.liveliness,
      time_based_filter: self.time_based_filter,
      partition: self.partition,
      reliability: self.reliability,
      destination_order: self.destination_order,
      history: self.history,
      resource_limits: self.resource_limits,
      lifespan: self.lifespan,
    }
  }
}

/// Describes a set of RTPS/DDS QoS policies
///
/// QosPolicies are constructed using a [`QosPolicyBuilder`]. A policy left
/// as `None` takes the DDS default when it is needed.
#[derive(Clone, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct QosPolicies {
  pub(crate) durability: Option<policy::Durability>,
  pub(crate) presentation: Option<policy::Presentation>,
  pub(crate) deadline: Option<policy::Deadline>,
  pub(crate) latency_budget: Option<policy::LatencyBudget>,
  pub(crate) ownership: Option<policy::Ownership>,
  pub(crate) liveliness: Option<policy::Liveliness>,
  pub(crate) time_based_filter: Option<policy::TimeBasedFilter>,
  pub(crate) partition: Option<policy::Partition>,
  pub(crate) reliability: Option<policy::Reliability>,
  pub(crate) destination_order: Option<policy::DestinationOrder>,
  pub(crate) history: Option<policy::History>,
  pub(crate) resource_limits: Option<policy::ResourceLimits>,
  pub(crate) lifespan: Option<policy::Lifespan>,
}

impl QosPolicies {
  pub fn qos_none() -> Self {
    Self::default()
  }

  pub fn builder() -> QosPolicyBuilder {
    QosPolicyBuilder::new()
  }

  pub const fn durability(&self) -> Option<policy::Durability> {
    self.durability
  }

  pub const fn presentation(&self) -> Option<policy::Presentation> {
    self.presentation
  }

  pub const fn deadline(&self) -> Option<policy::Deadline> {
    self.deadline
  }

  pub const fn latency_budget(&self) -> Option<policy::LatencyBudget> {
    self.latency_budget
  }

  pub const fn ownership(&self) -> Option<policy::Ownership> {
    self.ownership
  }

  pub const fn liveliness(&self) -> Option<policy::Liveliness> {
    self.liveliness
  }

  pub const fn time_based_filter(&self) -> Option<policy::TimeBasedFilter> {
    self.time_based_filter
  }

  pub fn partition(&self) -> Option<&policy::Partition> {
    self.partition.as_ref()
  }

  pub const fn reliability(&self) -> Option<policy::Reliability> {
    self.reliability
  }

  pub const fn destination_order(&self) -> Option<policy::DestinationOrder> {
    self.destination_order
  }

  pub const fn history(&self) -> Option<policy::History> {
    self.history
  }

  pub const fn resource_limits(&self) -> Option<policy::ResourceLimits> {
    self.resource_limits
  }

  pub const fn lifespan(&self) -> Option<policy::Lifespan> {
    self.lifespan
  }

  pub fn is_reliable(&self) -> bool {
    matches!(self.reliability, Some(policy::Reliability::Reliable { .. }))
  }

  pub fn durability_or_default(&self) -> policy::Durability {
    self.durability.unwrap_or(policy::Durability::Volatile)
  }

  /// DDS default for History is KEEP_LAST(1).
  pub fn history_or_default(&self) -> policy::History {
    self.history.unwrap_or(policy::History::KeepLast { depth: 1 })
  }

  pub fn resource_limits_or_default(&self) -> policy::ResourceLimits {
    self.resource_limits.unwrap_or(policy::ResourceLimits {
      max_samples: LENGTH_UNLIMITED,
      max_instances: LENGTH_UNLIMITED,
      max_samples_per_instance: LENGTH_UNLIMITED,
    })
  }

  /// Merge two QosPolicies
  ///
  /// Constructs a QosPolicy, where each policy is taken from `self`,
  /// and overwritten with those policies from `other` that are defined.
  #[must_use]
  pub fn modify_by(&self, other: &Self) -> Self {
    Self {
      durability: other.durability.or(self.durability),
      presentation: other.presentation.or(self.presentation),
      deadline: other.deadline.or(self.deadline),
      latency_budget: other.latency_budget.or(self.latency_budget),
      ownership: other.ownership.or(self.ownership),
      liveliness: other.liveliness.or(self.liveliness),
      time_based_filter: other.time_based_filter.or(self.time_based_filter),
      partition: other.partition.clone().or_else(|| self.partition.clone()),
      reliability: other.reliability.or(self.reliability),
      destination_order: other.destination_order.or(self.destination_order),
      history: other.history.or(self.history),
      resource_limits: other.resource_limits.or(self.resource_limits),
      lifespan: other.lifespan.or(self.lifespan),
    }
  }

  /// Check if policy complies to another policy.
  ///
  /// `self` is the "offered" (publisher) QoS
  /// `other` is the "requested" (subscriber) QoS
  ///
  /// * None => Policies are compatible
  /// * Some(policyId) => Failure, where policyId is (any) one of the policies
  /// causing incompliance
  ///
  /// Partitions are not checked here: a partition mismatch means the endpoints
  /// do not see each other at all, see [`policy::Partition::matches`].
  ///
  /// This is not symmetric.
  pub fn compliance_failure_wrt(&self, other: &Self) -> Option<QosPolicyId> {
    trace!(
      "QoS compatibility check - offered: {:?} - requested {:?}",
      self,
      other
    );
    let result = self.compliance_failure_wrt_impl(other);
    trace!("Result: {:?}", result);
    result
  }

  fn compliance_failure_wrt_impl(&self, other: &Self) -> Option<QosPolicyId> {
    // Reliability: BEST_EFFORT < RELIABLE. Unset means the entity default,
    // which is RELIABLE for an offer and BEST_EFFORT for a request.
    let off_reliable = self.reliability.map_or(true, |r| r > policy::Reliability::BestEffort);
    let req_reliable = other.reliability.map_or(false, |r| r > policy::Reliability::BestEffort);
    if req_reliable && !off_reliable {
      return Some(QosPolicyId::Reliability);
    }

    // Durability: offered must be better than or equal to requested.
    if self.durability_or_default() < other.durability_or_default() {
      return Some(QosPolicyId::Durability);
    }

    // Presentation:
    // * coherent and ordered access must be offered if requested
    // * offered access scope must be at least as broad as requested
    if let (Some(off), Some(req)) = (self.presentation, other.presentation) {
      if (req.coherent_access && !off.coherent_access)
        || (req.ordered_access && !off.ordered_access)
        || (req.access_scope > off.access_scope)
      {
        return Some(QosPolicyId::Presentation);
      }
    }

    // Deadline: offered period <= requested period
    if let (Some(off), Some(req)) = (self.deadline, other.deadline) {
      if off.0 > req.0 {
        return Some(QosPolicyId::Deadline);
      }
    }

    // Latency Budget: offered duration <= requested duration
    if let (Some(off), Some(req)) = (self.latency_budget, other.latency_budget) {
      if off.duration > req.duration {
        return Some(QosPolicyId::LatencyBudget);
      }
    }

    // Ownership: kinds must be equal. Strength is not part of the match.
    let off_ownership = self.ownership.unwrap_or(policy::Ownership::Shared);
    let req_ownership = other.ownership.unwrap_or(policy::Ownership::Shared);
    if off_ownership.is_exclusive() != req_ownership.is_exclusive() {
      return Some(QosPolicyId::Ownership);
    }

    // Liveliness: offered kind >= requested kind
    // AUTOMATIC < MANUAL_BY_PARTICIPANT < MANUAL_BY_TOPIC
    // and offered lease_duration <= requested lease_duration
    if let (Some(off), Some(req)) = (self.liveliness, other.liveliness) {
      if off.kind_num() < req.kind_num() || off.duration() > req.duration() {
        return Some(QosPolicyId::Liveliness);
      }
    }

    // Destination Order: BY_RECEPTION_TIMESTAMP < BY_SOURCE_TIMESTAMP
    if let (Some(off), Some(req)) = (self.destination_order, other.destination_order) {
      if off < req {
        return Some(QosPolicyId::DestinationOrder);
      }
    }

    None
  }
}

/// Limit value meaning "no limit" in [`policy::ResourceLimits`].
/// Any value <= 0 is treated the same way.
pub const LENGTH_UNLIMITED: i32 = -1;

/// Contains all available QoSPolicies
pub mod policy {
  use std::cmp::Ordering;

  use itertools::Itertools;
  use serde::{Deserialize, Serialize};

  use crate::structure::duration::Duration;

  /// DDS 2.2.3.16 LIFESPAN
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct Lifespan {
    pub duration: Duration,
  }

  /// DDS 2.2.3.4 DURABILITY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
  pub enum Durability {
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
  }

  /// DDS 2.2.3.6 PRESENTATION
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
  }

  /// Access scope that is part of DDS 2.2.3.6 PRESENTATION
  #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
  pub enum PresentationAccessScope {
    Instance,
    Topic,
    Group,
  }

  /// DDS 2.2.3.7 DEADLINE
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
  pub struct Deadline(pub Duration);

  /// DDS 2.2.3.8 LATENCY_BUDGET
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct LatencyBudget {
    pub duration: Duration,
  }

  /// DDS 2.2.3.9 OWNERSHIP
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Ownership {
    Shared,
    Exclusive { strength: i32 }, // This also implements OwnershipStrength
  }

  impl Ownership {
    pub fn is_exclusive(&self) -> bool {
      matches!(self, Self::Exclusive { .. })
    }
  }

  /// DDS 2.2.3.11 LIVELINESS
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Liveliness {
    Automatic { lease_duration: Duration },
    ManualByParticipant { lease_duration: Duration },
    ManualByTopic { lease_duration: Duration },
  }

  impl Liveliness {
    pub(crate) fn kind_num(&self) -> i32 {
      match self {
        Self::Automatic { .. } => 0,
        Self::ManualByParticipant { .. } => 1,
        Self::ManualByTopic { .. } => 2,
      }
    }

    pub fn duration(&self) -> Duration {
      match self {
        Self::Automatic { lease_duration }
        | Self::ManualByParticipant { lease_duration }
        | Self::ManualByTopic { lease_duration } => *lease_duration,
      }
    }
  }

  /// DDS 2.2.3.12 TIME_BASED_FILTER
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct TimeBasedFilter {
    pub minimum_separation: Duration,
  }

  /// DDS 2.2.3.13 PARTITION
  ///
  /// An empty name list means the default partition `""`. Names may contain
  /// the wildcards `*` (any run of characters) and `?` (one character).
  #[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
  pub struct Partition {
    pub names: Vec<String>,
  }

  impl Partition {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
      Self {
        names: names.into_iter().map(Into::into).collect(),
      }
    }

    fn effective_names(&self) -> Vec<&str> {
      if self.names.is_empty() {
        vec![""]
      } else {
        self.names.iter().map(String::as_str).collect()
      }
    }

    /// Two partition sets match if any name of one matches any name of the
    /// other. Either side may hold the pattern.
    pub fn matches(&self, other: &Partition) -> bool {
      let ours = self.effective_names();
      let theirs = other.effective_names();
      ours
        .iter()
        .cartesian_product(theirs.iter())
        .any(|(a, b)| wildcard_match(a, b) || wildcard_match(b, a))
    }
  }

  /// Match `name` against `pattern`, where the pattern may contain
  /// `*` and `?`.
  pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    // position of last '*' in pattern and the name index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
      if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
        pi += 1;
        ni += 1;
      } else if pi < p.len() && p[pi] == '*' {
        backtrack = Some((pi, ni));
        pi += 1;
      } else if let Some((star_pi, star_ni)) = backtrack {
        pi = star_pi + 1;
        ni = star_ni + 1;
        backtrack = Some((star_pi, star_ni + 1));
      } else {
        return false;
      }
    }
    p[pi..].iter().all(|c| *c == '*')
  }

  /// DDS 2.2.3.14 RELIABILITY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Reliability {
    BestEffort,
    Reliable { max_blocking_time: Duration },
  }

  impl Ord for Reliability {
    // max_blocking_time is not compared.
    fn cmp(&self, other: &Self) -> Ordering {
      match (self, other) {
        (Self::BestEffort, Self::BestEffort) | (Self::Reliable { .. }, Self::Reliable { .. }) => {
          Ordering::Equal
        }
        (Self::BestEffort, Self::Reliable { .. }) => Ordering::Less,
        (Self::Reliable { .. }, Self::BestEffort) => Ordering::Greater,
      }
    }
  }

  impl PartialOrd for Reliability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
      Some(self.cmp(other))
    }
  }

  /// DDS 2.2.3.17 DESTINATION_ORDER
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
  pub enum DestinationOrder {
    ByReceptionTimestamp,
    BySourceTimeStamp,
  }

  /// DDS 2.2.3.18 HISTORY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
  pub enum History {
    // Variants must be in this order ot derive Ord correctly.
    KeepLast { depth: i32 },
    KeepAll,
  }

  /// DDS 2.2.3.19 RESOURCE_LIMITS
  ///
  /// The fields are "long" in the DDS IDL. A value <= 0 (normally
  /// [`LENGTH_UNLIMITED`](super::LENGTH_UNLIMITED)) means no limit.
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
  pub struct ResourceLimits {
    pub max_samples: i32,
    pub max_instances: i32,
    pub max_samples_per_instance: i32,
  }

  impl ResourceLimits {
    pub(crate) fn limit(value: i32) -> Option<usize> {
      if value <= 0 {
        None
      } else {
        Some(value as usize)
      }
    }
  }
}
