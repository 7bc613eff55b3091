use std::{collections::BTreeSet, io};

use bytes::Bytes;
use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::{
    header::Header,
    parameter_list::{ParameterId, ParameterList},
    submessages::submessages::*,
  },
  rtps::submessage::{Submessage, SubmessageBody},
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::{EntityId, GuidPrefix},
    instance_handle::InstanceHandle,
    sequence_number::{SequenceNumber, SequenceNumberSet},
    time::Timestamp,
  },
};

/// A complete RTPS message: header plus submessages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub header: Header,
  pub submessages: Vec<Submessage>,
}

impl Message {
  pub fn new(header: Header) -> Self {
    Self {
      header,
      submessages: vec![],
    }
  }

  pub fn add_submessage(&mut self, submessage: Submessage) {
    self.submessages.push(submessage);
  }

  /// Parses a datagram. Submessages of unknown kinds are dropped. An error
  /// in one submessage discards the rest of the message, because the next
  /// submessage boundary can no longer be trusted.
  pub fn read_from_buffer(buffer: &Bytes) -> io::Result<Self> {
    if buffer.len() < Header::LENGTH {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("RTPS message too short: {} bytes", buffer.len()),
      ));
    }
    let header = Header::read_from_buffer(&buffer[..Header::LENGTH])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if !header.valid() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
          "Not an RTPS message we understand: {:?} {:?}",
          header.protocol_id, header.protocol_version
        ),
      ));
    }
    let mut message = Self::new(header);
    let mut submessages_left: Bytes = buffer.slice(Header::LENGTH..);
    while !submessages_left.is_empty() {
      if let Some(submessage) = Submessage::read_from_buffer(&mut submessages_left)? {
        message.submessages.push(submessage);
      }
    }
    Ok(message)
  }
}

impl Default for Message {
  fn default() -> Self {
    Self::new(Header::new(GuidPrefix::UNKNOWN))
  }
}

impl<C: Context> Writable<C> for Message {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    for x in &self.submessages {
      writer.write_value(x)?;
    }
    Ok(())
  }
}

// octetsToNextHeader is 16 bits. Zero means "to the end of the message",
// which is only right for the last submessage, so oversized submessages
// must be sent alone.
fn content_length(len: usize) -> u16 {
  if len > usize::from(u16::MAX) {
    warn!("Submessage of {} bytes does not fit octetsToNextHeader", len);
    0
  } else {
    len as u16
  }
}

/// Inline QoS carried by a DATA submessage for `change`.
pub(crate) fn inline_qos_for(change: &CacheChange) -> ParameterList {
  let mut params = ParameterList::new();
  if !change.instance_handle.is_nil() {
    params.push(
      ParameterId::PID_KEY_HASH,
      change.instance_handle.as_bytes().to_vec(),
    );
  }
  if !change.kind.is_alive() {
    params.push(
      ParameterId::PID_STATUS_INFO,
      vec![0, 0, 0, change.kind.status_info_flags()],
    );
  }
  params
}

/// Reads back what `inline_qos_for` wrote: the change kind and instance.
pub(crate) fn interpret_inline_qos(
  inline_qos: Option<&ParameterList>,
) -> (ChangeKind, InstanceHandle) {
  let mut kind = ChangeKind::Alive;
  let mut instance = InstanceHandle::NIL;
  if let Some(params) = inline_qos {
    if let Some(p) = params.get(ParameterId::PID_STATUS_INFO) {
      if p.value.len() >= 4 {
        kind = ChangeKind::from_status_info_flags(p.value[3]);
      } else {
        warn!("Short PID_STATUS_INFO {:?}", p.value);
      }
    }
    if let Some(p) = params.get(ParameterId::PID_KEY_HASH) {
      if p.value.len() >= 16 {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&p.value[..16]);
        instance = InstanceHandle::from_bytes(bytes);
      } else {
        warn!("Short PID_KEY_HASH {:?}", p.value);
      }
    }
  }
  (kind, instance)
}

#[derive(Default, Clone)]
pub(crate) struct MessageBuilder {
  submessages: Vec<Submessage>,
}

impl MessageBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.submessages.is_empty()
  }

  pub fn dst_submessage(mut self, endianness: Endianness, guid_prefix: GuidPrefix) -> Self {
    let flags = BitFlags::<INFODESTINATION_Flags>::from_endianness(endianness);
    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_DST,
        flags: flags.bits(),
        content_length: 12, // GuidPrefix only
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(
        InfoDestination { guid_prefix },
        flags,
      )),
    });
    self
  }

  /// INFO_TS. `None` sends the Invalidate flag, so that following DATA have
  /// no source timestamp.
  pub fn ts_msg(mut self, endianness: Endianness, timestamp: Option<Timestamp>) -> Self {
    let mut flags = BitFlags::<INFOTIMESTAMP_Flags>::from_endianness(endianness);
    if timestamp.is_none() {
      flags.insert(INFOTIMESTAMP_Flags::Invalidate);
    }
    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_TS,
        flags: flags.bits(),
        content_length: if timestamp.is_some() { 8 } else { 0 },
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(
        InfoTimestamp { timestamp },
        flags,
      )),
    });
    self
  }

  pub fn data_msg(
    mut self,
    cache_change: &CacheChange,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    endianness: Endianness,
  ) -> Self {
    let param_list = inline_qos_for(cache_change);
    let have_inline_qos = !param_list.is_empty();

    let data_message = Data {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      writer_sn: cache_change.sequence_number,
      inline_qos: if have_inline_qos {
        Some(param_list)
      } else {
        None
      },
      serialized_payload: cache_change.data_value.clone(),
    };

    let mut flags = BitFlags::<DATA_Flags>::from_endianness(endianness);
    if have_inline_qos {
      flags.insert(DATA_Flags::InlineQos);
    }
    if data_message.serialized_payload.is_some() {
      // a not-alive change can only carry the key
      flags.insert(if cache_change.kind.is_alive() {
        DATA_Flags::Data
      } else {
        DATA_Flags::Key
      });
    }

    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA,
        flags: flags.bits(),
        content_length: content_length(data_message.len_serialized()),
      },
      body: SubmessageBody::Writer(WriterSubmessage::Data(data_message, flags)),
    });
    self
  }

  /// GAP marking every member of `irrelevant_sns` as irrelevant. The first
  /// contiguous run goes to `gap_start`..`gap_list.base`, the rest into the
  /// bitmap. Members beyond the 256-bit bitmap are left for another GAP.
  pub fn gap_msg(
    mut self,
    irrelevant_sns: &BTreeSet<SequenceNumber>,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    endianness: Endianness,
  ) -> Self {
    let gap_start = match irrelevant_sns.iter().next() {
      Some(&first) => first,
      None => {
        error!("gap_msg called with empty SN set. Skipping GAP submessage");
        return self;
      }
    };
    let mut run_end = gap_start;
    for &sn in irrelevant_sns.range(gap_start.plus_1()..) {
      if sn == run_end.plus_1() {
        run_end = sn;
      } else {
        break;
      }
    }
    let gap_list = SequenceNumberSet::from_base_and_set(run_end.plus_1(), irrelevant_sns);
    self.push_gap(
      Gap {
        reader_id: reader_entity_id,
        writer_id: writer_entity_id,
        gap_start,
        gap_list,
      },
      endianness,
    );
    self
  }

  /// GAP for the contiguous range `first..=last`.
  pub fn gap_range_msg(
    mut self,
    first: SequenceNumber,
    last: SequenceNumber,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    endianness: Endianness,
  ) -> Self {
    if first > last {
      return self;
    }
    self.push_gap(
      Gap {
        reader_id: reader_entity_id,
        writer_id: writer_entity_id,
        gap_start: first,
        gap_list: SequenceNumberSet::new_empty(last.plus_1()),
      },
      endianness,
    );
    self
  }

  fn push_gap(&mut self, gap: Gap, endianness: Endianness) {
    let flags = BitFlags::<GAP_Flags>::from_endianness(endianness);
    match gap.write_to_vec_with_ctx(endianness) {
      Ok(bytes) => self.submessages.push(Submessage {
        header: SubmessageHeader {
          kind: SubmessageKind::GAP,
          flags: flags.bits(),
          content_length: content_length(bytes.len()),
        },
        body: SubmessageBody::Writer(WriterSubmessage::Gap(gap, flags)),
      }),
      Err(e) => error!("Cannot serialize GAP: {:?}", e),
    }
  }

  #[allow(clippy::too_many_arguments)]
  pub fn heartbeat_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: i32,
    set_final_flag: bool,
    set_liveliness_flag: bool,
    endianness: Endianness,
  ) -> Self {
    let heartbeat = Heartbeat {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      first_sn,
      last_sn,
      count,
    };
    let mut flags = BitFlags::<HEARTBEAT_Flags>::from_endianness(endianness);
    if set_final_flag {
      flags.insert(HEARTBEAT_Flags::Final);
    }
    if set_liveliness_flag {
      flags.insert(HEARTBEAT_Flags::Liveliness);
    }
    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::HEARTBEAT,
        flags: flags.bits(),
        content_length: 28, // 2 ids + 2 SNs + count
      },
      body: SubmessageBody::Writer(WriterSubmessage::Heartbeat(heartbeat, flags)),
    });
    self
  }

  pub fn acknack_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    reader_sn_state: SequenceNumberSet,
    count: i32,
    set_final_flag: bool,
    endianness: Endianness,
  ) -> Self {
    let acknack = AckNack {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      reader_sn_state,
      count,
    };
    let mut flags = BitFlags::<ACKNACK_Flags>::from_endianness(endianness);
    if set_final_flag {
      flags.insert(ACKNACK_Flags::Final);
    }
    match acknack.write_to_vec_with_ctx(endianness) {
      Ok(bytes) => self.submessages.push(Submessage {
        header: SubmessageHeader {
          kind: SubmessageKind::ACKNACK,
          flags: flags.bits(),
          content_length: content_length(bytes.len()),
        },
        body: SubmessageBody::Reader(ReaderSubmessage::AckNack(acknack, flags)),
      }),
      Err(e) => error!("Cannot serialize ACKNACK: {:?}", e),
    }
    self
  }

  pub fn add_header_and_build(self, guid_prefix: GuidPrefix) -> Message {
    Message {
      header: Header::new(guid_prefix),
      submessages: self.submessages,
    }
  }
}
