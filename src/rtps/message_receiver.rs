use std::collections::{btree_map::Entry, BTreeMap};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio_extras::{channel as mio_channel, channel::TrySendError};

use crate::{
  messages::{
    header::{Header, ProtocolVersion},
    submessages::submessages::*,
    vendor_id::VendorId,
  },
  rtps::{message::Message, reader::Reader, submessage::SubmessageBody},
  structure::{
    guid::{EntityId, GuidPrefix, GUID},
    time::Timestamp,
  },
};

const RTPS_MESSAGE_HEADER_SIZE: usize = Header::LENGTH;

// This is partial receiver state to be sent to Reader or Writer
#[derive(Debug, Clone, Default)]
pub struct MessageReceiverState {
  pub source_guid_prefix: GuidPrefix,
  pub source_timestamp: Option<Timestamp>,
}

/// [`MessageReceiver`] is the submessage sequence interpreter described in
/// RTPS spec v2.3 Section 8.3.4 "The RTPS Message Receiver".
/// It parses the message, applies the Interpreter Submessages to its state
/// and forwards Entity Submessages to the local Readers, or to the Writers
/// through the ACKNACK channel.
pub(crate) struct MessageReceiver {
  pub available_readers: BTreeMap<EntityId, Reader>,
  // GuidPrefix sent in this channel is the RTPS message source_guid_prefix.
  // Writer needs it to locate the ReaderProxy.
  acknack_sender: mio_channel::SyncSender<(GuidPrefix, AckNack)>,
  // Any traffic from a remote participant proves it is alive. Discovery
  // refreshes its lease from these.
  liveness_sender: mio_channel::SyncSender<GuidPrefix>,

  own_guid_prefix: GuidPrefix,
  pub source_version: ProtocolVersion,
  pub source_vendor_id: VendorId,
  pub source_guid_prefix: GuidPrefix,
  pub dest_guid_prefix: GuidPrefix,
  pub source_timestamp: Option<Timestamp>,

  submessage_count: usize,
}

impl MessageReceiver {
  pub fn new(
    participant_guid_prefix: GuidPrefix,
    acknack_sender: mio_channel::SyncSender<(GuidPrefix, AckNack)>,
    liveness_sender: mio_channel::SyncSender<GuidPrefix>,
  ) -> Self {
    Self {
      available_readers: BTreeMap::new(),
      acknack_sender,
      liveness_sender,
      own_guid_prefix: participant_guid_prefix,
      source_version: ProtocolVersion::THIS_IMPLEMENTATION,
      source_vendor_id: VendorId::VENDOR_UNKNOWN,
      source_guid_prefix: GuidPrefix::UNKNOWN,
      dest_guid_prefix: GuidPrefix::UNKNOWN,
      source_timestamp: None,
      submessage_count: 0,
    }
  }

  pub fn reset(&mut self) {
    self.source_version = ProtocolVersion::THIS_IMPLEMENTATION;
    self.source_vendor_id = VendorId::VENDOR_UNKNOWN;
    self.source_guid_prefix = GuidPrefix::UNKNOWN;
    self.dest_guid_prefix = GuidPrefix::UNKNOWN;
    self.source_timestamp = None;
    self.submessage_count = 0;
  }

  fn partial_state(&self) -> MessageReceiverState {
    MessageReceiverState {
      source_guid_prefix: self.source_guid_prefix,
      source_timestamp: self.source_timestamp,
    }
  }

  pub fn add_reader(&mut self, new_reader: Reader) {
    let eid = new_reader.guid().entity_id;
    match self.available_readers.entry(eid) {
      Entry::Occupied(_) => warn!("Already have Reader {:?} - not adding.", eid),
      Entry::Vacant(e) => {
        e.insert(new_reader);
      }
    }
  }

  pub fn remove_reader(&mut self, old_reader_guid: GUID) -> Option<Reader> {
    self.available_readers.remove(&old_reader_guid.entity_id)
  }

  pub fn reader_mut(&mut self, reader_id: EntityId) -> Option<&mut Reader> {
    self.available_readers.get_mut(&reader_id)
  }

  pub fn readers_mut(&mut self) -> impl Iterator<Item = &mut Reader> {
    self.available_readers.values_mut()
  }

  pub fn handle_received_packet(&mut self, msg_bytes: &Bytes) {
    if msg_bytes.len() < RTPS_MESSAGE_HEADER_SIZE {
      warn!("Message is shorter than RTPS header. Cannot deserialize.");
      debug!("Data was {:?}", &msg_bytes);
      return;
    }

    let rtps_message = match Message::read_from_buffer(msg_bytes) {
      Ok(m) => m,
      Err(e) => {
        warn!("RTPS deserialize error {:?}", e);
        debug!("Data was {:?}", msg_bytes);
        return;
      }
    };

    self.handle_parsed_message(rtps_message);
  }

  pub fn handle_parsed_message(&mut self, rtps_message: Message) {
    self.reset();
    self.dest_guid_prefix = self.own_guid_prefix;
    self.source_guid_prefix = rtps_message.header.guid_prefix;
    self.source_version = rtps_message.header.protocol_version;
    self.source_vendor_id = rtps_message.header.vendor_id;

    if self.source_guid_prefix != self.own_guid_prefix {
      self
        .liveness_sender
        .try_send(self.source_guid_prefix)
        .unwrap_or_else(|e| {
          trace!("liveness_sender.try_send(): {:?}. Is Discovery alive?", e);
        });
    }

    for submessage in rtps_message.submessages {
      match submessage.body {
        SubmessageBody::Interpreter(i) => self.handle_interpreter_submessage(i),
        SubmessageBody::Writer(w) => self.route_writer_submessage(w),
        SubmessageBody::Reader(r) => self.handle_reader_submessage(r),
      }
      self.submessage_count += 1;
    }
  }

  fn route_writer_submessage(&mut self, submessage: WriterSubmessage) {
    let targets: Vec<EntityId> = match submessage.receiver_entity_id() {
      EntityId::UNKNOWN => {
        let writer_guid = GUID::new(self.source_guid_prefix, submessage.sender_entity_id());
        self
          .available_readers
          .values()
          .filter(|r| r.contains_writer(writer_guid))
          .map(Reader::entity_id)
          .collect()
      }
      other => vec![other],
    };
    match targets.as_slice() {
      [only] => self.handle_writer_submessage(*only, submessage),
      _ => {
        for reader_id in targets {
          self.handle_writer_submessage(reader_id, submessage.clone());
        }
      }
    }
  }

  fn handle_writer_submessage(&mut self, target_reader_entity_id: EntityId, submessage: WriterSubmessage) {
    if self.dest_guid_prefix != self.own_guid_prefix && self.dest_guid_prefix != GuidPrefix::UNKNOWN
    {
      debug!(
        "Message is not for this participant. Dropping. dest_guid_prefix={:?} participant \
         guid={:?}",
        self.dest_guid_prefix, self.own_guid_prefix
      );
      return;
    }

    let mr_state = self.partial_state();
    let target_reader = match self.reader_mut(target_reader_entity_id) {
      Some(r) => r,
      None => {
        trace!(
          "No local reader {:?} for {:?}",
          target_reader_entity_id,
          submessage.sender_entity_id()
        );
        return;
      }
    };

    match submessage {
      WriterSubmessage::Data(data, _flags) => {
        target_reader.handle_data_msg(data, &mr_state);
      }
      WriterSubmessage::Heartbeat(heartbeat, flags) => {
        target_reader.handle_heartbeat_msg(
          &heartbeat,
          flags.contains(HEARTBEAT_Flags::Final),
          &mr_state,
        );
      }
      WriterSubmessage::Gap(gap, _flags) => {
        target_reader.handle_gap_msg(&gap, &mr_state);
      }
    }
  }

  fn handle_reader_submessage(&self, submessage: ReaderSubmessage) {
    if self.dest_guid_prefix != self.own_guid_prefix && self.dest_guid_prefix != GuidPrefix::UNKNOWN
    {
      debug!(
        "Message is not for this participant. Dropping. dest_guid_prefix={:?} participant \
         guid={:?}",
        self.dest_guid_prefix, self.own_guid_prefix
      );
      return;
    }

    match submessage {
      ReaderSubmessage::AckNack(acknack, _) => {
        // Note: This must not block, because the receiving end is the same thread,
        // i.e. blocking here is an instant deadlock.
        match self
          .acknack_sender
          .try_send((self.source_guid_prefix, acknack))
        {
          Ok(_) => (),
          Err(TrySendError::Full(_)) => {
            info!("AckNack pipe full. Looks like I am very busy. Discarding submessage.");
          }
          Err(e) => warn!("AckNack pipe fail: {:?}", e),
        }
      }
    }
  }

  fn handle_interpreter_submessage(&mut self, interpreter_submessage: InterpreterSubmessage) {
    match interpreter_submessage {
      InterpreterSubmessage::InfoTimestamp(ts_struct, _flags) => {
        // flags value was used already when parsing timestamp into an Option
        self.source_timestamp = ts_struct.timestamp;
      }
      InterpreterSubmessage::InfoDestination(info_dest, _flags) => {
        self.dest_guid_prefix = info_dest.destination(self.own_guid_prefix);
      }
    }
  }
}
