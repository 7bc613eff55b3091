use std::{
  io,
  net::{IpAddr, Ipv4Addr, SocketAddr},
};

use bytes::Bytes;
use mio::{net::UdpSocket, Token};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

const MAX_MESSAGE_SIZE: usize = 64 * 1024; // This is max we can get from UDP.

/// Listens to messages coming to specified host port combination.
#[derive(Debug)]
pub struct UDPListener {
  socket: UdpSocket,
  token: Token,
  receive_buffer: Vec<u8>,
}

impl UDPListener {
  fn new_listening_socket(host: IpAddr, port: u16, reuse_addr: bool) -> io::Result<UdpSocket> {
    let raw_socket = Socket::new(Domain::ipv4(), Type::dgram(), Some(Protocol::udp()))?;

    // We set ReuseAddr so that other DomainParticipants on this host can
    // bind to the same multicast address and port.
    // To have an effect on bind, this must be done before bind call, so must be
    // done below Rust std::net::UdpSocket level.
    if reuse_addr {
      raw_socket.set_reuse_address(true)?;
    }

    let address = SocketAddr::new(host, port);
    raw_socket.bind(&SockAddr::from(address))?;

    let std_socket = raw_socket.into_udp_socket();
    std_socket.set_nonblocking(true)?;
    UdpSocket::from_socket(std_socket)
  }

  fn from_socket(token: Token, socket: UdpSocket) -> UDPListener {
    debug!("UDPListener with address {:?}", socket.local_addr());
    UDPListener {
      socket,
      token,
      receive_buffer: vec![0; MAX_MESSAGE_SIZE],
    }
  }

  /// Fails if the port is taken, which is how free participant ids are found.
  pub fn new_unicast(token: Token, host: &str, port: u16) -> io::Result<UDPListener> {
    let host: IpAddr = host
      .parse()
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let socket = Self::new_listening_socket(host, port, false)?;
    Ok(Self::from_socket(token, socket))
  }

  /// Shared with every other participant of the domain on this host.
  pub fn new_multicast(
    token: Token,
    port: u16,
    multicast_group: Ipv4Addr,
  ) -> io::Result<UDPListener> {
    if !multicast_group.is_multicast() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Not a multicast address",
      ));
    }
    let socket = Self::new_listening_socket(Ipv4Addr::UNSPECIFIED.into(), port, true)?;
    socket.join_multicast_v4(&multicast_group, &Ipv4Addr::UNSPECIFIED)?;
    Ok(Self::from_socket(token, socket))
  }

  pub fn token(&self) -> Token {
    self.token
  }

  pub fn mio_socket(&mut self) -> &mut UdpSocket {
    &mut self.socket
  }

  pub fn port(&self) -> u16 {
    match self.socket.local_addr() {
      Ok(add) => add.port(),
      _ => 0,
    }
  }

  /// Get all messages waiting in the socket. The poll is edge-triggered, so
  /// the socket must be drained.
  pub fn messages(&mut self) -> Vec<Bytes> {
    let mut messages = Vec::with_capacity(4); // just a guess, should cover most cases
    loop {
      match self.socket.recv(&mut self.receive_buffer) {
        Ok(nbytes) => messages.push(Bytes::copy_from_slice(&self.receive_buffer[..nbytes])),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) => {
          warn!("UDPListener::messages - recv failed: {:?}", e);
          break;
        }
      }
    }
    messages
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::network::{transport::Transport, udp_sender::UDPSender};
  use crate::structure::locator::Locator;

  #[test]
  fn udpl_single_address() {
    let mut listener = UDPListener::new_unicast(Token(0), "127.0.0.1", 10001).unwrap();
    let sender = UDPSender::new_with_random_port().unwrap();

    let data: Vec<u8> = vec![0, 1, 2, 3, 4];
    sender.send_to_locator(&data, &Locator::udp_v4(Ipv4Addr::LOCALHOST, 10001));
    std::thread::sleep(std::time::Duration::from_millis(100));

    let received = listener.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].as_ref(), &data[..]);
    // drained
    assert!(listener.messages().is_empty());
  }

  #[test]
  fn unicast_port_cannot_be_bound_twice() {
    let _first = UDPListener::new_unicast(Token(0), "127.0.0.1", 10003).unwrap();
    assert!(UDPListener::new_unicast(Token(1), "127.0.0.1", 10003).is_err());
  }

  #[test]
  fn multicast_requires_multicast_group() {
    assert!(UDPListener::new_multicast(Token(0), 10004, Ipv4Addr::LOCALHOST).is_err());
  }
}
