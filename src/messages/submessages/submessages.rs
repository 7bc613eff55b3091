use enumflags2::BitFlags;
use speedy::{Context, Writable, Writer};

use crate::structure::guid::EntityId;

pub use super::{
  ack_nack::AckNack, data::Data, gap::Gap, heartbeat::Heartbeat,
  info_destination::InfoDestination, info_timestamp::InfoTimestamp, submessage_flag::*,
  submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
};

/// Submessages sent by a Writer to Readers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum WriterSubmessage {
  Data(Data, BitFlags<DATA_Flags>),
  Gap(Gap, BitFlags<GAP_Flags>),
  Heartbeat(Heartbeat, BitFlags<HEARTBEAT_Flags>),
}

impl WriterSubmessage {
  /// The reader this submessage is addressed to. `EntityId::UNKNOWN` means
  /// every reader matched to the sender.
  pub fn receiver_entity_id(&self) -> EntityId {
    match self {
      WriterSubmessage::Data(d, _) => d.reader_id,
      WriterSubmessage::Gap(g, _) => g.reader_id,
      WriterSubmessage::Heartbeat(h, _) => h.reader_id,
    }
  }

  pub fn sender_entity_id(&self) -> EntityId {
    match self {
      WriterSubmessage::Data(d, _) => d.writer_id,
      WriterSubmessage::Gap(g, _) => g.writer_id,
      WriterSubmessage::Heartbeat(h, _) => h.writer_id,
    }
  }
}

/// Submessages sent by a Reader to Writers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ReaderSubmessage {
  AckNack(AckNack, BitFlags<ACKNACK_Flags>),
}

/// Submessages that modify how the receiver interprets the ones that follow.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum InterpreterSubmessage {
  InfoTimestamp(InfoTimestamp, BitFlags<INFOTIMESTAMP_Flags>),
  InfoDestination(InfoDestination, BitFlags<INFODESTINATION_Flags>),
}

impl<C: Context> Writable<C> for WriterSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      WriterSubmessage::Data(s, _) => writer.write_value(s),
      WriterSubmessage::Gap(s, _) => writer.write_value(s),
      WriterSubmessage::Heartbeat(s, _) => writer.write_value(s),
    }
  }
}

impl<C: Context> Writable<C> for ReaderSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      ReaderSubmessage::AckNack(s, _) => writer.write_value(s),
    }
  }
}

impl<C: Context> Writable<C> for InterpreterSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      InterpreterSubmessage::InfoTimestamp(s, _) => writer.write_value(s),
      InterpreterSubmessage::InfoDestination(s, _) => writer.write_value(s),
    }
  }
}
