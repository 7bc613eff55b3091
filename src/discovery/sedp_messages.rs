// Endpoint discovery data: what SEDP publishes about each DataWriter and
// DataReader. Also the QoS part of the parameter list, shared by both.

use speedy::{Endianness, Readable, Writable};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{
    adapters::Keyed,
    qos::{
      policy::{
        Deadline, DestinationOrder, Durability, History, LatencyBudget, Lifespan, Liveliness,
        Ownership, Partition, Presentation, PresentationAccessScope, Reliability,
        ResourceLimits, TimeBasedFilter,
      },
      QosPolicies,
    },
  },
  discovery::{
    matching::TopicDescriptor,
    pl_cdr::{
      read_cdr_string, write_cdr_string, ParameterListReader, ParameterListWriter, PlCdrDeserialize,
      PlCdrError, PlCdrSerialize,
    },
  },
  messages::parameter_list::ParameterId,
  rtps::{rtps_reader_proxy::RtpsReaderProxy, rtps_writer_proxy::RtpsWriterProxy},
  structure::{
    duration::Duration,
    guid::{GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    locator::LocatorList,
  },
};

/// Builtin topic instances are keyed by the GUID of the entity they
/// describe. A dispose only carries the key hash, which is the GUID itself.
pub fn guid_of_instance(instance: InstanceHandle) -> GUID {
  GUID::from_bytes(*instance.as_bytes())
}

// ---------------------------------------------------------------------------
// QoS on the wire

#[derive(Readable, Writable)]
struct ReliabilityData {
  kind: u32,
  max_blocking_time: Duration,
}

#[derive(Readable, Writable)]
struct LivelinessData {
  kind: u32,
  lease_duration: Duration,
}

#[derive(Readable, Writable)]
struct HistoryData {
  kind: u32,
  depth: i32,
}

#[derive(Readable, Writable)]
struct ResourceLimitsData {
  max_samples: i32,
  max_instances: i32,
  max_samples_per_instance: i32,
}

#[derive(Readable, Writable)]
struct PresentationData {
  access_scope: u32,
  coherent_access: u8,
  ordered_access: u8,
}

const RELIABILITY_BEST_EFFORT: u32 = 1;
const RELIABILITY_RELIABLE: u32 = 2;

pub(crate) fn write_qos(qos: &QosPolicies, w: &mut ParameterListWriter) -> Result<(), PlCdrError> {
  if let Some(durability) = qos.durability {
    let kind: u32 = match durability {
      Durability::Volatile => 0,
      Durability::TransientLocal => 1,
      Durability::Transient => 2,
      Durability::Persistent => 3,
    };
    w.value(ParameterId::PID_DURABILITY, &kind)?;
  }
  if let Some(p) = qos.presentation {
    let access_scope: u32 = match p.access_scope {
      PresentationAccessScope::Instance => 0,
      PresentationAccessScope::Topic => 1,
      PresentationAccessScope::Group => 2,
    };
    w.value(
      ParameterId::PID_PRESENTATION,
      &PresentationData {
        access_scope,
        coherent_access: u8::from(p.coherent_access),
        ordered_access: u8::from(p.ordered_access),
      },
    )?;
  }
  if let Some(Deadline(period)) = qos.deadline {
    w.value(ParameterId::PID_DEADLINE, &period)?;
  }
  if let Some(lb) = qos.latency_budget {
    w.value(ParameterId::PID_LATENCY_BUDGET, &lb.duration)?;
  }
  if let Some(ownership) = qos.ownership {
    match ownership {
      Ownership::Shared => w.value(ParameterId::PID_OWNERSHIP, &0u32)?,
      Ownership::Exclusive { strength } => {
        w.value(ParameterId::PID_OWNERSHIP, &1u32)?;
        w.value(ParameterId::PID_OWNERSHIP_STRENGTH, &strength)?;
      }
    }
  }
  if let Some(liveliness) = qos.liveliness {
    w.value(
      ParameterId::PID_LIVELINESS,
      &LivelinessData {
        kind: liveliness.kind_num() as u32,
        lease_duration: liveliness.duration(),
      },
    )?;
  }
  if let Some(tbf) = qos.time_based_filter {
    w.value(ParameterId::PID_TIME_BASED_FILTER, &tbf.minimum_separation)?;
  }
  if let Some(partition) = &qos.partition {
    let e = w.endianness();
    let mut bytes = (partition.names.len() as u32).write_to_vec_with_ctx(e)?;
    for name in &partition.names {
      // each string starts 4-aligned
      while bytes.len() % 4 != 0 {
        bytes.push(0);
      }
      write_cdr_string(&mut bytes, name, e)?;
    }
    w.raw(ParameterId::PID_PARTITION, bytes);
  }
  if let Some(reliability) = qos.reliability {
    let data = match reliability {
      Reliability::BestEffort => ReliabilityData {
        kind: RELIABILITY_BEST_EFFORT,
        max_blocking_time: Duration::DURATION_ZERO,
      },
      Reliability::Reliable { max_blocking_time } => ReliabilityData {
        kind: RELIABILITY_RELIABLE,
        max_blocking_time,
      },
    };
    w.value(ParameterId::PID_RELIABILITY, &data)?;
  }
  if let Some(order) = qos.destination_order {
    let kind: u32 = match order {
      DestinationOrder::ByReceptionTimestamp => 0,
      DestinationOrder::BySourceTimeStamp => 1,
    };
    w.value(ParameterId::PID_DESTINATION_ORDER, &kind)?;
  }
  if let Some(history) = qos.history {
    let data = match history {
      History::KeepLast { depth } => HistoryData { kind: 0, depth },
      History::KeepAll => HistoryData { kind: 1, depth: 0 },
    };
    w.value(ParameterId::PID_HISTORY, &data)?;
  }
  if let Some(rl) = qos.resource_limits {
    w.value(
      ParameterId::PID_RESOURCE_LIMITS,
      &ResourceLimitsData {
        max_samples: rl.max_samples,
        max_instances: rl.max_instances,
        max_samples_per_instance: rl.max_samples_per_instance,
      },
    )?;
  }
  if let Some(lifespan) = qos.lifespan {
    w.value(ParameterId::PID_LIFESPAN, &lifespan.duration)?;
  }
  Ok(())
}

fn read_partition(bytes: &[u8], e: Endianness) -> Result<Partition, PlCdrError> {
  if bytes.len() < 4 {
    return Err(PlCdrError::Malformed("partition count".to_string()));
  }
  let count = u32::read_from_buffer_with_ctx(e, &bytes[..4])? as usize;
  let mut pos = 4;
  let mut names = Vec::with_capacity(count.min(64));
  for _ in 0..count {
    pos = (pos + 3) & !3;
    if pos >= bytes.len() {
      return Err(PlCdrError::Malformed("partition name".to_string()));
    }
    let (name, used) = read_cdr_string(&bytes[pos..], e)?;
    names.push(name);
    pos += used;
  }
  Ok(Partition { names })
}

pub(crate) fn read_qos(r: &ParameterListReader) -> Result<QosPolicies, PlCdrError> {
  let durability = r
    .value::<u32>(ParameterId::PID_DURABILITY)?
    .map(|kind| match kind {
      1 => Durability::TransientLocal,
      2 => Durability::Transient,
      3 => Durability::Persistent,
      _ => Durability::Volatile,
    });
  let presentation = r
    .value::<PresentationData>(ParameterId::PID_PRESENTATION)?
    .map(|p| Presentation {
      access_scope: match p.access_scope {
        1 => PresentationAccessScope::Topic,
        2 => PresentationAccessScope::Group,
        _ => PresentationAccessScope::Instance,
      },
      coherent_access: p.coherent_access != 0,
      ordered_access: p.ordered_access != 0,
    });
  let ownership = match r.value::<u32>(ParameterId::PID_OWNERSHIP)? {
    None => None,
    Some(0) => Some(Ownership::Shared),
    Some(_) => Some(Ownership::Exclusive {
      strength: r
        .value::<i32>(ParameterId::PID_OWNERSHIP_STRENGTH)?
        .unwrap_or(0),
    }),
  };
  let liveliness = r
    .value::<LivelinessData>(ParameterId::PID_LIVELINESS)?
    .map(|l| match l.kind {
      1 => Liveliness::ManualByParticipant {
        lease_duration: l.lease_duration,
      },
      2 => Liveliness::ManualByTopic {
        lease_duration: l.lease_duration,
      },
      _ => Liveliness::Automatic {
        lease_duration: l.lease_duration,
      },
    });
  let partition = match r.raw(ParameterId::PID_PARTITION) {
    Some(bytes) => Some(read_partition(bytes, r.endianness())?),
    None => None,
  };
  let reliability = r
    .value::<ReliabilityData>(ParameterId::PID_RELIABILITY)?
    .map(|rd| {
      if rd.kind == RELIABILITY_RELIABLE {
        Reliability::Reliable {
          max_blocking_time: rd.max_blocking_time,
        }
      } else {
        Reliability::BestEffort
      }
    });
  let destination_order = r
    .value::<u32>(ParameterId::PID_DESTINATION_ORDER)?
    .map(|kind| {
      if kind == 1 {
        DestinationOrder::BySourceTimeStamp
      } else {
        DestinationOrder::ByReceptionTimestamp
      }
    });
  let history = r
    .value::<HistoryData>(ParameterId::PID_HISTORY)?
    .map(|h| {
      if h.kind == 1 {
        History::KeepAll
      } else {
        History::KeepLast { depth: h.depth }
      }
    });
  let resource_limits = r
    .value::<ResourceLimitsData>(ParameterId::PID_RESOURCE_LIMITS)?
    .map(|rl| ResourceLimits {
      max_samples: rl.max_samples,
      max_instances: rl.max_instances,
      max_samples_per_instance: rl.max_samples_per_instance,
    });

  Ok(QosPolicies {
    durability,
    presentation,
    deadline: r.value::<Duration>(ParameterId::PID_DEADLINE)?.map(Deadline),
    latency_budget: r
      .value::<Duration>(ParameterId::PID_LATENCY_BUDGET)?
      .map(|duration| LatencyBudget { duration }),
    ownership,
    liveliness,
    time_based_filter: r
      .value::<Duration>(ParameterId::PID_TIME_BASED_FILTER)?
      .map(|minimum_separation| TimeBasedFilter { minimum_separation }),
    partition,
    reliability,
    destination_order,
    history,
    resource_limits,
    lifespan: r
      .value::<Duration>(ParameterId::PID_LIFESPAN)?
      .map(|duration| Lifespan { duration }),
  })
}

// ---------------------------------------------------------------------------
// DiscoveredWriterData / DiscoveredReaderData

/// A DataWriter as announced by SEDP.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredWriterData {
  pub writer_guid: GUID,
  pub topic: TopicDescriptor,
  pub qos: QosPolicies,
  /// Empty lists mean the participant default locators.
  pub unicast_locator_list: LocatorList,
  pub multicast_locator_list: LocatorList,
}

impl DiscoveredWriterData {
  pub fn participant_prefix(&self) -> GuidPrefix {
    self.writer_guid.prefix
  }

  pub(crate) fn as_writer_proxy(&self) -> RtpsWriterProxy {
    RtpsWriterProxy::new(
      self.writer_guid,
      self.qos.clone(),
      self.unicast_locator_list.clone(),
      self.multicast_locator_list.clone(),
    )
  }
}

impl Keyed for DiscoveredWriterData {
  type K = GUID;

  fn key(&self) -> GUID {
    self.writer_guid
  }
}

/// A DataReader as announced by SEDP.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredReaderData {
  pub reader_guid: GUID,
  pub topic: TopicDescriptor,
  pub qos: QosPolicies,
  /// Empty lists mean the participant default locators.
  pub unicast_locator_list: LocatorList,
  pub multicast_locator_list: LocatorList,
  pub expects_inline_qos: bool,
}

impl DiscoveredReaderData {
  pub fn participant_prefix(&self) -> GuidPrefix {
    self.reader_guid.prefix
  }

  pub(crate) fn as_reader_proxy(&self) -> RtpsReaderProxy {
    RtpsReaderProxy::new(
      self.reader_guid,
      self.qos.clone(),
      self.unicast_locator_list.clone(),
      self.multicast_locator_list.clone(),
    )
    .with_inline_qos(self.expects_inline_qos)
  }
}

impl Keyed for DiscoveredReaderData {
  type K = GUID;

  fn key(&self) -> GUID {
    self.reader_guid
  }
}

const PID_EXPECTS_INLINE_QOS: ParameterId = ParameterId::PID_EXPECTS_INLINE_QOS;

fn write_endpoint(
  w: &mut ParameterListWriter,
  guid: GUID,
  topic: &TopicDescriptor,
  qos: &QosPolicies,
  unicast: &LocatorList,
  multicast: &LocatorList,
) -> Result<(), PlCdrError> {
  w.value(ParameterId::PID_ENDPOINT_GUID, &guid)?;
  w.value(ParameterId::PID_PARTICIPANT_GUID, &guid.participant_guid())?;
  w.string(ParameterId::PID_TOPIC_NAME, &topic.topic_name)?;
  w.string(ParameterId::PID_TYPE_NAME, &topic.type_name)?;
  write_qos(qos, w)?;
  for loc in unicast {
    w.value(ParameterId::PID_UNICAST_LOCATOR, loc)?;
  }
  for loc in multicast {
    w.value(ParameterId::PID_MULTICAST_LOCATOR, loc)?;
  }
  Ok(())
}

// The topic kind is not a parameter of its own. It is the entity kind of
// the endpoint GUID.
fn read_topic(r: &ParameterListReader, guid: GUID) -> Result<TopicDescriptor, PlCdrError> {
  let topic_name = r.required_string(ParameterId::PID_TOPIC_NAME, "topic name")?;
  let type_name = r.required_string(ParameterId::PID_TYPE_NAME, "type name")?;
  Ok(TopicDescriptor::new(
    &topic_name,
    &type_name,
    guid.entity_id.entity_kind.is_with_key(),
  ))
}

impl PlCdrSerialize for DiscoveredWriterData {
  fn to_parameter_list(&self, w: &mut ParameterListWriter) -> Result<(), PlCdrError> {
    write_endpoint(
      w,
      self.writer_guid,
      &self.topic,
      &self.qos,
      &self.unicast_locator_list,
      &self.multicast_locator_list,
    )
  }
}

impl PlCdrDeserialize for DiscoveredWriterData {
  fn from_parameter_list(r: &ParameterListReader) -> Result<Self, PlCdrError> {
    let writer_guid: GUID = r.required(ParameterId::PID_ENDPOINT_GUID, "endpoint GUID")?;
    if !writer_guid.entity_id.entity_kind.is_writer() {
      return Err(PlCdrError::Malformed(format!(
        "{:?} is not a writer",
        writer_guid
      )));
    }
    Ok(DiscoveredWriterData {
      writer_guid,
      topic: read_topic(r, writer_guid)?,
      qos: read_qos(r)?,
      unicast_locator_list: r.all(ParameterId::PID_UNICAST_LOCATOR)?,
      multicast_locator_list: r.all(ParameterId::PID_MULTICAST_LOCATOR)?,
    })
  }
}

impl PlCdrSerialize for DiscoveredReaderData {
  fn to_parameter_list(&self, w: &mut ParameterListWriter) -> Result<(), PlCdrError> {
    write_endpoint(
      w,
      self.reader_guid,
      &self.topic,
      &self.qos,
      &self.unicast_locator_list,
      &self.multicast_locator_list,
    )?;
    if self.expects_inline_qos {
      w.value(PID_EXPECTS_INLINE_QOS, &1u32)?;
    }
    Ok(())
  }
}

impl PlCdrDeserialize for DiscoveredReaderData {
  fn from_parameter_list(r: &ParameterListReader) -> Result<Self, PlCdrError> {
    let reader_guid: GUID = r.required(ParameterId::PID_ENDPOINT_GUID, "endpoint GUID")?;
    if !reader_guid.entity_id.entity_kind.is_reader() {
      return Err(PlCdrError::Malformed(format!(
        "{:?} is not a reader",
        reader_guid
      )));
    }
    let expects_inline_qos = r
      .raw(PID_EXPECTS_INLINE_QOS)
      .map_or(false, |b| b.first().map_or(false, |x| *x != 0));
    Ok(DiscoveredReaderData {
      reader_guid,
      topic: read_topic(r, reader_guid)?,
      qos: read_qos(r)?,
      unicast_locator_list: r.all(ParameterId::PID_UNICAST_LOCATOR)?,
      multicast_locator_list: r.all(ParameterId::PID_MULTICAST_LOCATOR)?,
      expects_inline_qos,
    })
  }
}
