use std::io;

use bytes::Bytes;
use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::{Context, Readable, Writable, Writer};

use crate::{
  messages::submessages::submessages::{
    endianness_flag, AckNack, Data, Gap, Heartbeat, InfoDestination, InfoTimestamp,
    InterpreterSubmessage, ReaderSubmessage, SubmessageHeader, SubmessageKind, WriterSubmessage,
    ACKNACK_Flags, DATA_Flags, GAP_Flags, HEARTBEAT_Flags, INFODESTINATION_Flags,
    INFOTIMESTAMP_Flags,
  },
  structure::time::Timestamp,
};

const SUBMESSAGE_HEADER_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Submessage {
  pub header: SubmessageHeader,
  pub body: SubmessageBody,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SubmessageBody {
  Writer(WriterSubmessage),
  Reader(ReaderSubmessage),
  Interpreter(InterpreterSubmessage),
}

fn invalid_data<E>(e: E) -> io::Error
where
  E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
  io::Error::new(io::ErrorKind::InvalidData, e)
}

// Not a speedy Readable: the byte order of the body is decided by the flags
// in the submessage header, so it is only known after the header is parsed.
impl Submessage {
  /// Splits one submessage off the front of `buffer`.
  ///
  /// Returns `Ok(None)` for submessages that are skipped (PAD, unknown and
  /// vendor-specific kinds). An `Err` means the rest of the message cannot be
  /// interpreted.
  pub fn read_from_buffer(buffer: &mut Bytes) -> io::Result<Option<Self>> {
    if buffer.len() < SUBMESSAGE_HEADER_LEN {
      return Err(invalid_data(format!(
        "Submessage header truncated: {} bytes left",
        buffer.len()
      )));
    }
    let header = SubmessageHeader::read_from_buffer(&buffer[..SUBMESSAGE_HEADER_LEN])
      .map_err(invalid_data)?;

    // octetsToNextHeader == 0 means "up to the end of the message", except
    // for PAD and INFO_TS, which then simply have no body.
    let content_length = if header.content_length == 0 {
      match header.kind {
        SubmessageKind::PAD | SubmessageKind::INFO_TS => 0,
        _ => buffer.len() - SUBMESSAGE_HEADER_LEN,
      }
    } else {
      header.content_length as usize
    };

    if SUBMESSAGE_HEADER_LEN + content_length > buffer.len() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
          "Submessage {:?} declares length {} but only {} bytes remain",
          header.kind,
          content_length,
          buffer.len() - SUBMESSAGE_HEADER_LEN
        ),
      ));
    }

    let mut sub_buffer = buffer.split_to(SUBMESSAGE_HEADER_LEN + content_length);
    let content = sub_buffer.split_off(SUBMESSAGE_HEADER_LEN);
    let e = endianness_flag(header.flags);

    let body = match header.kind {
      SubmessageKind::DATA => {
        let f = BitFlags::<DATA_Flags>::from_bits_truncate(header.flags);
        SubmessageBody::Writer(WriterSubmessage::Data(Data::deserialize_data(&content, f)?, f))
      }
      SubmessageKind::GAP => {
        let f = BitFlags::<GAP_Flags>::from_bits_truncate(header.flags);
        let gap = Gap::read_from_buffer_with_ctx(e, &content).map_err(invalid_data)?;
        SubmessageBody::Writer(WriterSubmessage::Gap(gap, f))
      }
      SubmessageKind::HEARTBEAT => {
        let f = BitFlags::<HEARTBEAT_Flags>::from_bits_truncate(header.flags);
        let hb = Heartbeat::read_from_buffer_with_ctx(e, &content).map_err(invalid_data)?;
        SubmessageBody::Writer(WriterSubmessage::Heartbeat(hb, f))
      }
      SubmessageKind::ACKNACK => {
        let f = BitFlags::<ACKNACK_Flags>::from_bits_truncate(header.flags);
        let an = AckNack::read_from_buffer_with_ctx(e, &content).map_err(invalid_data)?;
        SubmessageBody::Reader(ReaderSubmessage::AckNack(an, f))
      }
      SubmessageKind::INFO_DST => {
        let f = BitFlags::<INFODESTINATION_Flags>::from_bits_truncate(header.flags);
        let dst = InfoDestination::read_from_buffer_with_ctx(e, &content).map_err(invalid_data)?;
        SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(dst, f))
      }
      SubmessageKind::INFO_TS => {
        let f = BitFlags::<INFOTIMESTAMP_Flags>::from_bits_truncate(header.flags);
        let timestamp = if f.contains(INFOTIMESTAMP_Flags::Invalidate) {
          None
        } else {
          Some(Timestamp::read_from_buffer_with_ctx(e, &content).map_err(invalid_data)?)
        };
        SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(
          InfoTimestamp { timestamp },
          f,
        ))
      }
      SubmessageKind::PAD => return Ok(None),
      unknown_kind => {
        if u8::from(unknown_kind) >= 0x80 {
          // 0x80..=0xFF are vendor-specific
          trace!("Skipping vendor-specific submessage {:?}", unknown_kind);
        } else {
          debug!(
            "Skipping unsupported submessage {:?}, {} bytes",
            unknown_kind, content_length
          );
        }
        return Ok(None);
      }
    };

    Ok(Some(Submessage { header, body }))
  }

  pub fn endianness(&self) -> speedy::Endianness {
    endianness_flag(self.header.flags)
  }
}

impl<C: Context> Writable<C> for Submessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    // The body goes out in the byte order announced by the header flags,
    // whatever the context of the enclosing message.
    let e = self.endianness();
    let body = match &self.body {
      SubmessageBody::Writer(m) => m.write_to_vec_with_ctx(e),
      SubmessageBody::Reader(m) => m.write_to_vec_with_ctx(e),
      SubmessageBody::Interpreter(m) => m.write_to_vec_with_ctx(e),
    }?;
    writer.write_bytes(&body)
  }
}
