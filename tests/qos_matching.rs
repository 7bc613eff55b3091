use rtpscore::{
  dds::qos::QosPolicyId,
  discovery::matching::{evaluate, MatchOutcome, TopicDescriptor},
  policy::{Deadline, Durability, Ownership, Partition, Reliability},
  Duration, QosPolicies, QosPolicyBuilder,
};

fn topic() -> TopicDescriptor {
  TopicDescriptor::new("Square", "ShapeType", true)
}

fn reliable() -> Reliability {
  Reliability::Reliable {
    max_blocking_time: Duration::from_millis(100),
  }
}

fn reliabilities() -> Vec<Option<Reliability>> {
  vec![None, Some(Reliability::BestEffort), Some(reliable())]
}

fn durabilities() -> Vec<Option<Durability>> {
  vec![
    None,
    Some(Durability::Volatile),
    Some(Durability::TransientLocal),
    Some(Durability::Transient),
    Some(Durability::Persistent),
  ]
}

fn qos(reliability: Option<Reliability>, durability: Option<Durability>) -> QosPolicies {
  let mut b = QosPolicyBuilder::new();
  if let Some(r) = reliability {
    b = b.reliability(r);
  }
  if let Some(d) = durability {
    b = b.durability(d);
  }
  b.build()
}

fn all_combinations() -> Vec<QosPolicies> {
  let mut v = Vec::new();
  for r in reliabilities() {
    for d in durabilities() {
      v.push(qos(r, d));
    }
  }
  v
}

fn compatible(w: &QosPolicies, r: &QosPolicies) -> bool {
  evaluate(&topic(), w, &topic(), r) == MatchOutcome::Compatible
}

#[test]
fn reliable_reader_never_matches_best_effort_writer() {
  for wd in durabilities() {
    for rd in durabilities() {
      let w = qos(Some(Reliability::BestEffort), wd);
      let r = qos(Some(reliable()), rd);
      assert_eq!(
        evaluate(&topic(), &w, &topic(), &r),
        MatchOutcome::Incompatible(QosPolicyId::Reliability)
      );
    }
  }
}

#[test]
fn stronger_offer_keeps_matching() {
  // If W matches R, a writer offering at least as much as W matches R too.
  let rank_r = |q: &QosPolicies| match q.reliability() {
    None | Some(Reliability::Reliable { .. }) => 1,
    Some(Reliability::BestEffort) => 0,
  };
  let rank_d = |q: &QosPolicies| q.durability().unwrap_or(Durability::Volatile);
  let all = all_combinations();
  for w in &all {
    for stronger in &all {
      if rank_r(stronger) < rank_r(w) || rank_d(stronger) < rank_d(w) {
        continue;
      }
      for r in &all {
        if compatible(w, r) {
          assert!(
            compatible(stronger, r),
            "{:?} matched {:?} but {:?} did not",
            w,
            r,
            stronger
          );
        }
      }
    }
  }
}

#[test]
fn weaker_request_keeps_matching() {
  // An unset reliability is requested as best effort.
  let rank_r = |q: &QosPolicies| match q.reliability() {
    Some(Reliability::Reliable { .. }) => 1,
    None | Some(Reliability::BestEffort) => 0,
  };
  let rank_d = |q: &QosPolicies| q.durability().unwrap_or(Durability::Volatile);
  let all = all_combinations();
  for r in &all {
    for weaker in &all {
      if rank_r(weaker) > rank_r(r) || rank_d(weaker) > rank_d(r) {
        continue;
      }
      for w in &all {
        if compatible(w, r) {
          assert!(compatible(w, weaker), "{:?} matched {:?} but not {:?}", w, r, weaker);
        }
      }
    }
  }
}

#[test]
fn durability_orders_offers() {
  let w = qos(Some(reliable()), Some(Durability::TransientLocal));
  let r = qos(Some(reliable()), Some(Durability::Transient));
  assert_eq!(
    evaluate(&topic(), &w, &topic(), &r),
    MatchOutcome::Incompatible(QosPolicyId::Durability)
  );
  assert!(compatible(&r, &w));
}

#[test]
fn topic_type_and_kind_must_agree() {
  let q = QosPolicies::qos_none();
  let other_type = TopicDescriptor::new("Square", "Circle", true);
  let keyless = TopicDescriptor::new("Square", "ShapeType", false);
  let other_topic = TopicDescriptor::new("Triangle", "ShapeType", true);
  assert_eq!(evaluate(&topic(), &q, &other_type, &q), MatchOutcome::Unrelated);
  assert_eq!(evaluate(&topic(), &q, &keyless, &q), MatchOutcome::Unrelated);
  assert_eq!(evaluate(&topic(), &q, &other_topic, &q), MatchOutcome::Unrelated);
  assert_eq!(evaluate(&topic(), &q, &topic(), &q), MatchOutcome::Compatible);
}

#[test]
fn partitions_must_intersect() {
  let part = |names: &[&str]| {
    QosPolicyBuilder::new()
      .partition(Partition::new(names.iter().copied()))
      .build()
  };
  let none = QosPolicies::qos_none();
  assert!(compatible(&none, &part(&[""])));
  assert!(!compatible(&none, &part(&["sensors"])));
  assert!(compatible(&part(&["sensors/temp"]), &part(&["sensors/*"])));
  assert!(compatible(&part(&["sensors/?emp"]), &part(&["sensors/temp"])));
  assert!(compatible(&part(&["a", "b"]), &part(&["c", "b"])));
  assert!(!compatible(&part(&["a", "b"]), &part(&["c", "d"])));
}

#[test]
fn ownership_kinds_must_be_equal() {
  let exclusive = QosPolicyBuilder::new()
    .ownership(Ownership::Exclusive { strength: 5 })
    .build();
  let other_strength = QosPolicyBuilder::new()
    .ownership(Ownership::Exclusive { strength: 1 })
    .build();
  let shared = QosPolicyBuilder::new().ownership(Ownership::Shared).build();
  assert_eq!(
    evaluate(&topic(), &exclusive, &topic(), &shared),
    MatchOutcome::Incompatible(QosPolicyId::Ownership)
  );
  assert_eq!(
    evaluate(&topic(), &shared, &topic(), &exclusive),
    MatchOutcome::Incompatible(QosPolicyId::Ownership)
  );
  assert!(compatible(&exclusive, &other_strength));
}

#[test]
fn deadline_offer_must_be_at_least_as_frequent() {
  let every = |ms| {
    QosPolicyBuilder::new()
      .deadline(Deadline(Duration::from_millis(ms)))
      .build()
  };
  assert!(compatible(&every(100), &every(200)));
  assert_eq!(
    evaluate(&topic(), &every(300), &topic(), &every(200)),
    MatchOutcome::Incompatible(QosPolicyId::Deadline)
  );
}
