use std::fmt;
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};

#[derive(
  Copy,
  Clone,
  Debug,
  Eq,
  PartialEq,
  PartialOrd,
  Ord,
  Hash,
  Readable,
  Writable,
  Serialize,
  Deserialize,
)]
pub struct LocatorKind {
  value: i32,
}

impl LocatorKind {
  pub const LOCATOR_KIND_INVALID: LocatorKind = LocatorKind { value: -1 };
  pub const LOCATOR_KIND_RESERVED: LocatorKind = LocatorKind { value: 0 };
  pub const LOCATOR_KIND_UDP_V4: LocatorKind = LocatorKind { value: 1 };
  pub const LOCATOR_KIND_UDP_V6: LocatorKind = LocatorKind { value: 2 };
  pub const LOCATOR_KIND_TCP_V4: LocatorKind = LocatorKind { value: 4 };
  pub const LOCATOR_KIND_TCP_V6: LocatorKind = LocatorKind { value: 8 };
  pub const LOCATOR_KIND_SHM: LocatorKind = LocatorKind { value: 16 };
}

/// Transport address of an endpoint. For TCP kinds the upper 16 bits of
/// `port` carry the logical port and the lower 16 bits the physical port.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Locator {
  pub kind: LocatorKind,
  pub port: u32,
  pub address: [u8; 16],
}

pub type LocatorList = Vec<Locator>;

impl Locator {
  pub const LOCATOR_ADDRESS_INVALID: [u8; 16] = [0x00; 16];
  pub const LOCATOR_PORT_INVALID: u32 = 0;

  pub const LOCATOR_INVALID: Locator = Locator {
    kind: LocatorKind::LOCATOR_KIND_INVALID,
    port: Locator::LOCATOR_PORT_INVALID,
    address: Locator::LOCATOR_ADDRESS_INVALID,
  };

  pub fn new(kind: LocatorKind, port: u32, address: [u8; 16]) -> Locator {
    Locator {
      kind,
      port,
      address,
    }
  }

  pub fn udp_v4(ip: Ipv4Addr, port: u16) -> Locator {
    Locator::from(SocketAddr::new(IpAddr::V4(ip), port))
  }

  pub fn tcp_v4(ip: Ipv4Addr, physical_port: u16, logical_port: u16) -> Locator {
    let mut address = [0u8; 16];
    address[12..16].copy_from_slice(&ip.octets());
    Locator {
      kind: LocatorKind::LOCATOR_KIND_TCP_V4,
      port: (u32::from(logical_port) << 16) | u32::from(physical_port),
      address,
    }
  }

  /// Shared memory locator. The port names the segment.
  pub fn shm(port: u32) -> Locator {
    Locator {
      kind: LocatorKind::LOCATOR_KIND_SHM,
      port,
      address: Locator::LOCATOR_ADDRESS_INVALID,
    }
  }

  pub fn is_udp(&self) -> bool {
    self.kind == LocatorKind::LOCATOR_KIND_UDP_V4 || self.kind == LocatorKind::LOCATOR_KIND_UDP_V6
  }

  pub fn is_tcp(&self) -> bool {
    self.kind == LocatorKind::LOCATOR_KIND_TCP_V4 || self.kind == LocatorKind::LOCATOR_KIND_TCP_V6
  }

  pub fn is_valid(&self) -> bool {
    self.kind != LocatorKind::LOCATOR_KIND_INVALID
  }

  pub fn physical_port(&self) -> u16 {
    if self.is_tcp() {
      (self.port & 0xFFFF) as u16
    } else {
      self.port as u16
    }
  }

  /// Logical port of a TCP locator. Zero for other kinds.
  pub fn logical_port(&self) -> u16 {
    if self.is_tcp() {
      (self.port >> 16) as u16
    } else {
      0
    }
  }

  pub fn set_logical_port(&mut self, logical_port: u16) {
    if self.is_tcp() {
      self.port = (u32::from(logical_port) << 16) | (self.port & 0xFFFF);
    }
  }

  /// The IP address, if this is an IP-based locator.
  pub fn ip_address(&self) -> Option<IpAddr> {
    match self.kind {
      LocatorKind::LOCATOR_KIND_UDP_V4 | LocatorKind::LOCATOR_KIND_TCP_V4 => {
        Some(IpAddr::V4(Ipv4Addr::new(
          self.address[12],
          self.address[13],
          self.address[14],
          self.address[15],
        )))
      }
      LocatorKind::LOCATOR_KIND_UDP_V6 | LocatorKind::LOCATOR_KIND_TCP_V6 => {
        Some(IpAddr::V6(Ipv6Addr::from(self.address)))
      }
      _ => None,
    }
  }

  /// Socket address to send to, if this is a UDP locator.
  pub fn to_socket_address(self) -> Option<SocketAddr> {
    if self.is_udp() {
      self
        .ip_address()
        .map(|ip| SocketAddr::new(ip, self.physical_port()))
    } else {
      None
    }
  }

  pub fn is_multicast(&self) -> bool {
    self.ip_address().map_or(false, |ip| ip.is_multicast())
  }

  pub fn is_loopback(&self) -> bool {
    self.ip_address().map_or(false, |ip| ip.is_loopback())
  }
}

impl Default for Locator {
  fn default() -> Self {
    Locator::LOCATOR_INVALID
  }
}

impl fmt::Debug for Locator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      LocatorKind::LOCATOR_KIND_UDP_V4 | LocatorKind::LOCATOR_KIND_UDP_V6 => {
        match self.to_socket_address() {
          Some(sa) => write!(f, "udp://{}", sa),
          None => write!(f, "udp://?"),
        }
      }
      LocatorKind::LOCATOR_KIND_TCP_V4 | LocatorKind::LOCATOR_KIND_TCP_V6 => match self.ip_address()
      {
        Some(ip) => write!(
          f,
          "tcp://{}:{}@{}",
          ip,
          self.physical_port(),
          self.logical_port()
        ),
        None => write!(f, "tcp://?"),
      },
      LocatorKind::LOCATOR_KIND_SHM => write!(f, "shm://{}", self.port),
      other => write!(f, "Locator {{ {:?} port={} }}", other, self.port),
    }
  }
}

impl From<SocketAddr> for Locator {
  fn from(socket_address: SocketAddr) -> Self {
    Locator {
      kind: if socket_address.ip().is_unspecified() {
        LocatorKind::LOCATOR_KIND_INVALID
      } else if socket_address.ip().is_ipv4() {
        LocatorKind::LOCATOR_KIND_UDP_V4
      } else {
        LocatorKind::LOCATOR_KIND_UDP_V6
      },
      port: u32::from(socket_address.port()),
      address: match socket_address.ip() {
        IpAddr::V4(ip4) => ip4.to_ipv6_compatible().octets(),
        IpAddr::V6(ip6) => ip6.octets(),
      },
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for Locator {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut locator = Locator {
      kind: reader.read_value()?,
      port: reader.read_value()?,
      ..Locator::default()
    };
    for i in 0..locator.address.len() {
      locator.address[i] = reader.read_u8()?;
    }
    Ok(locator)
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    24
  }
}

impl<C: Context> Writable<C> for Locator {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind)?;
    writer.write_value(&self.port)?;
    for elem in &self.address {
      writer.write_u8(*elem)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn locator_invalid_is_a_concatenation_of_invalid_members() {
    assert_eq!(
      Locator {
        kind: LocatorKind::LOCATOR_KIND_INVALID,
        port: Locator::LOCATOR_PORT_INVALID,
        address: Locator::LOCATOR_ADDRESS_INVALID
      },
      Locator::LOCATOR_INVALID
    );
  }

  #[test]
  fn socket_address_conversion() {
    let sa: SocketAddr = "192.168.1.17:7411".parse().unwrap();
    let loc = Locator::from(sa);
    assert_eq!(loc.kind, LocatorKind::LOCATOR_KIND_UDP_V4);
    assert_eq!(loc.to_socket_address(), Some(sa));

    let sa6: SocketAddr = "[fe80::1]:7412".parse().unwrap();
    let loc6 = Locator::from(sa6);
    assert_eq!(loc6.kind, LocatorKind::LOCATOR_KIND_UDP_V6);
    assert_eq!(loc6.to_socket_address(), Some(sa6));
  }

  #[test]
  fn tcp_logical_port_lives_in_upper_half() {
    let mut loc = Locator::tcp_v4(Ipv4Addr::new(10, 0, 0, 1), 5100, 7410);
    assert_eq!(loc.physical_port(), 5100);
    assert_eq!(loc.logical_port(), 7410);
    assert_eq!(loc.port, (7410 << 16) | 5100);
    loc.set_logical_port(7411);
    assert_eq!(loc.logical_port(), 7411);
    assert_eq!(loc.physical_port(), 5100);
    assert_eq!(loc.to_socket_address(), None);
  }

  #[test]
  fn multicast_detection() {
    assert!(Locator::udp_v4(Ipv4Addr::new(239, 255, 0, 1), 7400).is_multicast());
    assert!(!Locator::udp_v4(Ipv4Addr::new(127, 0, 0, 1), 7400).is_multicast());
    assert!(Locator::udp_v4(Ipv4Addr::new(127, 0, 0, 1), 7400).is_loopback());
    assert!(!Locator::shm(3).is_multicast());
  }

  serialization_test!( type = LocatorKind,
    {
        locator_kind_invalid,
        LocatorKind::LOCATOR_KIND_INVALID,
        le = [0xFF, 0xFF, 0xFF, 0xFF],
        be = [0xFF, 0xFF, 0xFF, 0xFF]
    },
    {
        locator_kind_udpv4,
        LocatorKind::LOCATOR_KIND_UDP_V4,
        le = [0x01, 0x00, 0x00, 0x00],
        be = [0x00, 0x00, 0x00, 0x01]
    },
    {
        locator_kind_shm,
        LocatorKind::LOCATOR_KIND_SHM,
        le = [0x10, 0x00, 0x00, 0x00],
        be = [0x00, 0x00, 0x00, 0x10]
    }
  );

  serialization_test!( type = Locator,
    {
        locator_localhost_ipv4,
        Locator::udp_v4(Ipv4Addr::new(127, 0, 0, 1), 8080),
        le = [0x01, 0x00, 0x00, 0x00, 0x90, 0x1F, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x7F, 0x00, 0x00, 0x01],
        be = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x1F, 0x90,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x7F, 0x00, 0x00, 0x01]
    },
    {
        locator_invalid,
        Locator::LOCATOR_INVALID,
        le = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        be = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    }
  );
}
