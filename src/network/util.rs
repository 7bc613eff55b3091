use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  network::constant::SPDP_MULTICAST_IPV4,
  structure::locator::{Locator, LocatorList},
};

pub fn get_local_multicast_locators(port: u16) -> LocatorList {
  vec![Locator::udp_v4(SPDP_MULTICAST_IPV4, port)]
}

/// Unicast locators for every non-loopback IPv4 interface. Falls back to
/// loopback if there are no other interfaces, so that a participant on an
/// isolated host can still talk to itself.
pub fn get_local_unicast_locators(port: u16) -> LocatorList {
  match get_if_addrs::get_if_addrs() {
    Ok(ifaces) => {
      let locators: LocatorList = ifaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .filter(|iface| iface.ip().is_ipv4())
        .map(|iface| Locator::from(SocketAddr::new(iface.ip(), port)))
        .collect();
      if locators.is_empty() {
        debug!("No non-loopback interfaces. Using loopback.");
        vec![Locator::udp_v4(Ipv4Addr::LOCALHOST, port)]
      } else {
        locators
      }
    }
    Err(e) => {
      error!("Cannot get local network interfaces: get_if_addrs() : {:?}", e);
      vec![Locator::udp_v4(Ipv4Addr::LOCALHOST, port)]
    }
  }
}

/// Unicast locators for a configured address, or for all interfaces.
pub fn unicast_locators_for(address: Option<IpAddr>, port: u16) -> LocatorList {
  match address {
    Some(ip) => vec![Locator::from(SocketAddr::new(ip, port))],
    None => get_local_unicast_locators(port),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unicast_locators_carry_the_port() {
    let locators = get_local_unicast_locators(7411);
    assert!(!locators.is_empty());
    assert!(locators
      .iter()
      .all(|l| l.to_socket_address().map(|sa| sa.port()) == Some(7411)));
    let fixed = unicast_locators_for(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 7000);
    assert_eq!(fixed, vec![Locator::udp_v4(Ipv4Addr::LOCALHOST, 7000)]);
  }
}
