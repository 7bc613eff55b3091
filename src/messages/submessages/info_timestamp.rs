use speedy::{Context, Writable, Writer};

use crate::structure::time::Timestamp;

/// This Submessage is used to send a timestamp which applies to the
/// Submessages that follow within the same message.
///
/// `None` means the Invalidate flag is set and the message carries no
/// timestamp. The timestamp is then not available to the Submessages that
/// follow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InfoTimestamp {
  pub timestamp: Option<Timestamp>,
}

// Reading depends on the Invalidate flag, so it is done by the submessage
// parser.
impl<C: Context> Writable<C> for InfoTimestamp {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match &self.timestamp {
      None => Ok(()),
      Some(ts) => writer.write_value(ts),
    }
  }
}
