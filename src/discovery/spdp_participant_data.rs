use chrono::{DateTime, Utc};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::{adapters::Keyed, qos::QosPolicies},
  discovery::{
    builtin_endpoint::BuiltinEndpointSet,
    pl_cdr::{ParameterListReader, ParameterListWriter, PlCdrDeserialize, PlCdrError, PlCdrSerialize},
  },
  messages::{header::ProtocolVersion, parameter_list::ParameterId, vendor_id::VendorId},
  rtps::{rtps_reader_proxy::RtpsReaderProxy, rtps_writer_proxy::RtpsWriterProxy},
  structure::{
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
    locator::LocatorList,
  },
};

/// What SPDP announces about a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct SpdpDiscoveredParticipantData {
  /// Reception time. Not on the wire.
  pub updated_time: DateTime<Utc>,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub participant_guid: GUID,
  pub metatraffic_unicast_locators: LocatorList,
  pub metatraffic_multicast_locators: LocatorList,
  pub default_unicast_locators: LocatorList,
  pub default_multicast_locators: LocatorList,
  pub available_builtin_endpoints: BuiltinEndpointSet,
  pub lease_duration: Option<Duration>,
  pub entity_name: Option<String>,
  pub domain_id: Option<u16>,
}

impl SpdpDiscoveredParticipantData {
  pub fn guid_prefix(&self) -> GuidPrefix {
    self.participant_guid.prefix
  }

  // Builtin endpoints talk over the metatraffic locators.
  pub(crate) fn as_reader_proxy(&self, reader_id: EntityId, qos: &QosPolicies) -> RtpsReaderProxy {
    RtpsReaderProxy::new(
      GUID::new(self.participant_guid.prefix, reader_id),
      qos.clone(),
      self.metatraffic_unicast_locators.clone(),
      self.metatraffic_multicast_locators.clone(),
    )
  }

  pub(crate) fn as_writer_proxy(&self, writer_id: EntityId, qos: &QosPolicies) -> RtpsWriterProxy {
    RtpsWriterProxy::new(
      GUID::new(self.participant_guid.prefix, writer_id),
      qos.clone(),
      self.metatraffic_unicast_locators.clone(),
      self.metatraffic_multicast_locators.clone(),
    )
  }
}

impl Keyed for SpdpDiscoveredParticipantData {
  type K = GUID;

  fn key(&self) -> GUID {
    self.participant_guid
  }
}

impl PlCdrSerialize for SpdpDiscoveredParticipantData {
  fn to_parameter_list(&self, w: &mut ParameterListWriter) -> Result<(), PlCdrError> {
    w.value(ParameterId::PID_PARTICIPANT_GUID, &self.participant_guid)?;
    w.value(ParameterId::PID_PROTOCOL_VERSION, &self.protocol_version)?;
    w.value(ParameterId::PID_VENDOR_ID, &self.vendor_id)?;
    for loc in &self.default_unicast_locators {
      w.value(ParameterId::PID_DEFAULT_UNICAST_LOCATOR, loc)?;
    }
    for loc in &self.default_multicast_locators {
      w.value(ParameterId::PID_DEFAULT_MULTICAST_LOCATOR, loc)?;
    }
    for loc in &self.metatraffic_unicast_locators {
      w.value(ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR, loc)?;
    }
    for loc in &self.metatraffic_multicast_locators {
      w.value(ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR, loc)?;
    }
    if let Some(lease) = self.lease_duration {
      w.value(ParameterId::PID_PARTICIPANT_LEASE_DURATION, &lease)?;
    }
    w.value(
      ParameterId::PID_BUILTIN_ENDPOINT_SET,
      &self.available_builtin_endpoints,
    )?;
    if let Some(name) = &self.entity_name {
      w.string(ParameterId::PID_ENTITY_NAME, name)?;
    }
    if let Some(domain_id) = self.domain_id {
      w.value(ParameterId::PID_DOMAIN_ID, &u32::from(domain_id))?;
    }
    Ok(())
  }
}

impl PlCdrDeserialize for SpdpDiscoveredParticipantData {
  fn from_parameter_list(r: &ParameterListReader) -> Result<Self, PlCdrError> {
    let participant_guid: GUID =
      r.required(ParameterId::PID_PARTICIPANT_GUID, "participant GUID")?;
    if participant_guid.entity_id != EntityId::PARTICIPANT {
      return Err(PlCdrError::Malformed(format!(
        "participant GUID {:?} does not name a participant",
        participant_guid
      )));
    }
    let domain_id = match r.value::<u32>(ParameterId::PID_DOMAIN_ID)? {
      None => None,
      Some(d) => Some(
        u16::try_from(d).map_err(|_| PlCdrError::Malformed(format!("domain id {}", d)))?,
      ),
    };
    Ok(SpdpDiscoveredParticipantData {
      updated_time: Utc::now(),
      protocol_version: r
        .value(ParameterId::PID_PROTOCOL_VERSION)?
        .unwrap_or_default(),
      vendor_id: r.value(ParameterId::PID_VENDOR_ID)?.unwrap_or_default(),
      participant_guid,
      metatraffic_unicast_locators: r.all(ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR)?,
      metatraffic_multicast_locators: r.all(ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR)?,
      default_unicast_locators: r.all(ParameterId::PID_DEFAULT_UNICAST_LOCATOR)?,
      default_multicast_locators: r.all(ParameterId::PID_DEFAULT_MULTICAST_LOCATOR)?,
      available_builtin_endpoints: r
        .value(ParameterId::PID_BUILTIN_ENDPOINT_SET)?
        .unwrap_or_default(),
      lease_duration: r.value(ParameterId::PID_PARTICIPANT_LEASE_DURATION)?,
      entity_name: r.string(ParameterId::PID_ENTITY_NAME)?,
      domain_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use super::*;
  use crate::{
    dds::adapters::{DeserializerAdapter, SerializerAdapter},
    discovery::pl_cdr::PlCdrAdapter,
    messages::serialized_payload::RepresentationIdentifier,
    structure::locator::Locator,
  };

  fn participant_data() -> SpdpDiscoveredParticipantData {
    SpdpDiscoveredParticipantData {
      updated_time: Utc::now(),
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      participant_guid: GUID::new(
        GuidPrefix::new(&[0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0, 0, 1, 0, 0, 0]),
        EntityId::PARTICIPANT,
      ),
      metatraffic_unicast_locators: vec![Locator::udp_v4(Ipv4Addr::new(10, 80, 142, 104), 7412)],
      metatraffic_multicast_locators: vec![Locator::udp_v4(Ipv4Addr::new(239, 255, 0, 1), 7400)],
      default_unicast_locators: vec![Locator::udp_v4(Ipv4Addr::new(10, 80, 142, 104), 7413)],
      default_multicast_locators: vec![],
      available_builtin_endpoints: BuiltinEndpointSet::THIS_IMPLEMENTATION,
      lease_duration: Some(Duration::from_secs(20)),
      entity_name: Some("shapes".to_string()),
      domain_id: Some(0),
    }
  }

  #[test]
  fn participant_data_survives_the_wire() {
    let data = participant_data();
    let bytes = PlCdrAdapter::<SpdpDiscoveredParticipantData>::to_bytes(&data).unwrap();
    let mut back = PlCdrAdapter::<SpdpDiscoveredParticipantData>::from_bytes(
      &bytes,
      RepresentationIdentifier::PL_CDR_LE,
    )
    .unwrap();
    back.updated_time = data.updated_time;
    assert_eq!(back, data);
  }

  #[test]
  fn decodes_foreign_announcement() {
    // Parameter list part of a Fast DDS participant announcement. The guid,
    // version, vendor and locators are kept, the rest trimmed.
    let bytes: [u8; 96] = [
      0x15, 0x00, 0x04, 0x00, 0x02, 0x03, 0x00, 0x00, // protocol version 2.3
      0x16, 0x00, 0x04, 0x00, 0x01, 0x0f, 0x00, 0x00, // vendor 1.15
      0x50, 0x00, 0x10, 0x00, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00, 0x00, 0x01, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x01, 0xc1, // participant guid
      0x32, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0xf4, 0x1c, 0x00, 0x00, 0x00, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x50, 0x8e,
      0x68, // metatraffic unicast 10.80.142.104:7412
      0x02, 0x00, 0x08, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // lease 20 s
      0x58, 0x00, 0x04, 0x00, 0x3f, 0x0c, 0x00, 0x00, // builtin endpoints
      0x0f, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, // domain 0
      0x01, 0x00, 0x00, 0x00, // sentinel
    ];
    let data = PlCdrAdapter::<SpdpDiscoveredParticipantData>::from_bytes(
      &bytes,
      RepresentationIdentifier::PL_CDR_LE,
    )
    .unwrap();
    assert_eq!(data.participant_guid, participant_data().participant_guid);
    assert_eq!(data.protocol_version, ProtocolVersion::PROTOCOLVERSION_2_3);
    assert_eq!(
      data.metatraffic_unicast_locators,
      vec![Locator::udp_v4(Ipv4Addr::new(10, 80, 142, 104), 7412)]
    );
    assert_eq!(data.lease_duration, Some(Duration::from_secs(20)));
    assert!(data
      .available_builtin_endpoints
      .contains(BuiltinEndpointSet::PUBLICATIONS_DETECTOR));
    assert_eq!(data.domain_id, Some(0));
    assert_eq!(data.entity_name, None);
  }

  #[test]
  fn guid_must_name_a_participant() {
    let mut data = participant_data();
    data.participant_guid.entity_id = EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER;
    let bytes = PlCdrAdapter::<SpdpDiscoveredParticipantData>::to_bytes(&data).unwrap();
    assert!(PlCdrAdapter::<SpdpDiscoveredParticipantData>::from_bytes(
      &bytes,
      RepresentationIdentifier::PL_CDR_LE
    )
    .is_err());
  }

  #[test]
  fn builtin_proxies_use_metatraffic_locators() {
    let data = participant_data();
    let rp = data.as_reader_proxy(
      EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      &QosPolicies::qos_none(),
    );
    assert_eq!(rp.remote_reader_guid.prefix, data.guid_prefix());
    assert_eq!(rp.unicast_locator_list, data.metatraffic_unicast_locators);
  }
}
