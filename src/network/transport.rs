use crate::structure::locator::Locator;

/// Outbound half of a transport. Inbound bytes are pushed to
/// `MessageReceiver::handle_received_packet` by whoever owns the sockets.
///
/// Sending is fire-and-forget: reliability is the business of the RTPS
/// protocol above, so failures are only logged.
pub trait Transport {
  fn send_to_locator_list(&self, buffer: &[u8], locators: &[Locator]);

  fn send_to_locator(&self, buffer: &[u8], locator: &Locator) {
    self.send_to_locator_list(buffer, std::slice::from_ref(locator));
  }
}
