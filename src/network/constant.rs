use std::net::Ipv4Addr;

// RTPS spec 9.6.1.1 "Default port numbers"
pub const PB: u16 = 7400;
pub const DG: u16 = 250;
pub const PG: u16 = 2;

pub const D0: u16 = 0;
pub const D1: u16 = 10;
pub const D2: u16 = 1;
pub const D3: u16 = 11;

/// Participant ids are probed from zero up to this, looking for free ports.
pub const MAX_PARTICIPANT_ID: u16 = 120;

pub const SPDP_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

pub fn spdp_well_known_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D0
}

pub fn spdp_well_known_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D1 + PG * participant_id
}

pub fn user_traffic_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D2
}

pub fn user_traffic_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D3 + PG * participant_id
}
