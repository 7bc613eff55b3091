use std::{
  io,
  net::{Ipv4Addr, SocketAddr},
};

use mio::net::UdpSocket;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{network::transport::Transport, structure::locator::Locator};

/// Sends RTPS messages over UDP. One socket serves all destinations.
#[derive(Debug)]
pub struct UDPSender {
  socket: UdpSocket,
}

impl UDPSender {
  pub fn new(sender_port: u16) -> io::Result<UDPSender> {
    let raw_socket = Socket::new(Domain::ipv4(), Type::dgram(), Some(Protocol::udp()))?;
    // Multicast loopback is needed so that participants on the same host
    // can discover each other.
    raw_socket.set_multicast_loop_v4(true)?;
    let address = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), sender_port);
    raw_socket.bind(&SockAddr::from(address))?;
    let std_socket = raw_socket.into_udp_socket();
    std_socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_socket(std_socket)?;
    Ok(UDPSender { socket })
  }

  pub fn new_with_random_port() -> io::Result<UDPSender> {
    Self::new(0)
  }

  pub fn send_to_all(&self, buffer: &[u8], addresses: &[SocketAddr]) {
    for address in addresses.iter() {
      if let Err(e) = self.socket.send_to(buffer, address) {
        warn!("send_to_all - send_to {} : {:?}", address, e);
      }
    }
  }
}

impl Transport for UDPSender {
  fn send_to_locator_list(&self, buffer: &[u8], locators: &[Locator]) {
    for locator in locators {
      if !locator.is_udp() {
        debug!("UDPSender cannot send to {:?}. Skipping.", locator);
        continue;
      }
      match locator.to_socket_address() {
        Some(address) => match self.socket.send_to(buffer, &address) {
          Ok(bytes_sent) if bytes_sent == buffer.len() => (),
          Ok(bytes_sent) => error!(
            "send_to_locator - send_to tried {} bytes, sent only {}",
            buffer.len(),
            bytes_sent
          ),
          Err(e) => warn!("send_to_locator - send_to {} : {:?}", address, e),
        },
        None => warn!("Locator {:?} has no socket address", locator),
      }
    }
  }
}
