// Hand-assembled RTPS 2.3 datagrams.

use bytes::Bytes;
use rtpscore::{
  messages::{
    serialized_payload::RepresentationIdentifier,
    submessages::submessages::{
      InterpreterSubmessage, ReaderSubmessage, WriterSubmessage, ACKNACK_Flags, DATA_Flags,
      HEARTBEAT_Flags,
    },
  },
  rtps::{message::Message, submessage::SubmessageBody},
  structure::guid::{EntityId, EntityKind, GuidPrefix},
  SequenceNumber, Timestamp,
};
use speedy::{Endianness, Writable};

const HEADER: [u8; 20] = [
  b'R', b'T', b'P', b'S', 0x02, 0x03, 0x01, 0x0f, // protocol, version 2.3, vendor
  0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, // guid prefix
];

fn message(submessages: &[&[u8]]) -> Vec<u8> {
  let mut v = HEADER.to_vec();
  for s in submessages {
    v.extend_from_slice(s);
  }
  v
}

fn writer_id() -> EntityId {
  EntityId::new([0, 0, 1], EntityKind::WRITER_NO_KEY_USER_DEFINED)
}

fn reader_id() -> EntityId {
  EntityId::new([0, 0, 1], EntityKind::READER_NO_KEY_USER_DEFINED)
}

const INFO_DST_LE: [u8; 16] = [
  0x0e, 0x01, 0x0c, 0x00, //
  0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
];

const INFO_TS_LE: [u8; 12] = [
  0x09, 0x01, 0x08, 0x00, //
  0x10, 0x00, 0x00, 0x00, // 16 s
  0x00, 0x00, 0x00, 0x80, // + 1/2 s
];

const DATA_LE: [u8; 32] = [
  0x15, 0x05, 0x1c, 0x00, // DATA, E|D
  0x00, 0x00, 0x10, 0x00, // extraFlags, octetsToInlineQos 16
  0x00, 0x00, 0x00, 0x00, // reader UNKNOWN
  0x00, 0x00, 0x01, 0x03, // writer
  0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, // sn 7
  0x00, 0x01, 0x00, 0x00, // CDR_LE
  0x2a, 0x00, 0x00, 0x00,
];

const HEARTBEAT_BE: [u8; 32] = [
  0x07, 0x02, 0x00, 0x1c, // HEARTBEAT, F
  0x00, 0x00, 0x00, 0x00, //
  0x00, 0x00, 0x01, 0x03, //
  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // first 1
  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, // last 7
  0x00, 0x00, 0x00, 0x03, // count
];

const ACKNACK_BE: [u8; 32] = [
  0x06, 0x02, 0x00, 0x1c, // ACKNACK, F
  0x00, 0x00, 0x01, 0x04, //
  0x00, 0x00, 0x01, 0x03, //
  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, // base 5
  0x00, 0x00, 0x00, 0x08, // 8 bits
  0xa0, 0x00, 0x00, 0x00, // 5 and 7 missing
  0x00, 0x00, 0x00, 0x09, // count
];

const GAP_LE: [u8; 36] = [
  0x08, 0x01, 0x20, 0x00, // GAP, E
  0x00, 0x00, 0x01, 0x04, //
  0x00, 0x00, 0x01, 0x03, //
  0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, // gapStart 2
  0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, // gapList base 4
  0x01, 0x00, 0x00, 0x00, // 1 bit
  0x00, 0x00, 0x00, 0x80, // 4
];

fn parse(bytes: &[u8]) -> Message {
  Message::read_from_buffer(&Bytes::copy_from_slice(bytes)).unwrap()
}

#[test]
fn writer_traffic_with_interpreter_submessages() {
  let bytes = message(&[&INFO_DST_LE, &INFO_TS_LE, &DATA_LE, &HEARTBEAT_BE]);
  let msg = parse(&bytes);
  assert_eq!(msg.header.guid_prefix, GuidPrefix::new(&HEADER[8..20]));
  assert_eq!(msg.submessages.len(), 4);

  match &msg.submessages[0].body {
    SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(dst, _)) => {
      assert_eq!(dst.guid_prefix, GuidPrefix::new(&[0xaa; 12]));
    }
    other => panic!("expected INFO_DST, got {:?}", other),
  }
  match &msg.submessages[1].body {
    SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(ts, _)) => {
      assert_eq!(ts.timestamp, Some(Timestamp::from_nanos(16_500_000_000)));
    }
    other => panic!("expected INFO_TS, got {:?}", other),
  }
  match &msg.submessages[2].body {
    SubmessageBody::Writer(WriterSubmessage::Data(data, flags)) => {
      assert!(flags.contains(DATA_Flags::Data));
      assert!(!flags.contains(DATA_Flags::InlineQos));
      assert_eq!(data.reader_id, EntityId::UNKNOWN);
      assert_eq!(data.writer_id, writer_id());
      assert_eq!(data.writer_sn, SequenceNumber::new(7));
      let payload = data.serialized_payload.as_ref().unwrap();
      assert_eq!(
        payload.representation_identifier,
        RepresentationIdentifier::CDR_LE
      );
      assert_eq!(&payload.value[..], &[0x2a, 0, 0, 0]);
    }
    other => panic!("expected DATA, got {:?}", other),
  }
  match &msg.submessages[3].body {
    SubmessageBody::Writer(WriterSubmessage::Heartbeat(hb, flags)) => {
      assert!(flags.contains(HEARTBEAT_Flags::Final));
      assert_eq!(msg.submessages[3].endianness(), Endianness::BigEndian);
      assert_eq!(hb.writer_id, writer_id());
      assert_eq!(hb.first_sn, SequenceNumber::new(1));
      assert_eq!(hb.last_sn, SequenceNumber::new(7));
      assert_eq!(hb.count, 3);
    }
    other => panic!("expected HEARTBEAT, got {:?}", other),
  }

  // Each submessage keeps its own byte order when written out again.
  assert_eq!(msg.write_to_vec().unwrap(), bytes);
}

#[test]
fn acknack_big_endian() {
  let bytes = message(&[&ACKNACK_BE]);
  let msg = parse(&bytes);
  match &msg.submessages[0].body {
    SubmessageBody::Reader(ReaderSubmessage::AckNack(an, flags)) => {
      assert!(flags.contains(ACKNACK_Flags::Final));
      assert_eq!(an.reader_id, reader_id());
      assert_eq!(an.writer_id, writer_id());
      assert_eq!(an.reader_sn_state.base(), SequenceNumber::new(5));
      let missing: Vec<SequenceNumber> = an.reader_sn_state.iter().collect();
      assert_eq!(missing, vec![SequenceNumber::new(5), SequenceNumber::new(7)]);
      assert_eq!(an.count, 9);
    }
    other => panic!("expected ACKNACK, got {:?}", other),
  }
  assert_eq!(msg.write_to_vec().unwrap(), bytes);
}

#[test]
fn gap_little_endian() {
  let msg = parse(&message(&[&GAP_LE]));
  match &msg.submessages[0].body {
    SubmessageBody::Writer(WriterSubmessage::Gap(gap, _)) => {
      assert_eq!(gap.gap_start, SequenceNumber::new(2));
      let irrelevant: Vec<i64> = (1..=6)
        .filter(|&n| gap.contains(SequenceNumber::new(n)))
        .collect();
      assert_eq!(irrelevant, vec![2, 3, 4]);
    }
    other => panic!("expected GAP, got {:?}", other),
  }
}

#[test]
fn unknown_submessages_are_skipped() {
  let vendor_specific: [u8; 8] = [0x80, 0x01, 0x04, 0x00, 1, 2, 3, 4];
  let msg = parse(&message(&[&vendor_specific, &GAP_LE]));
  assert_eq!(msg.submessages.len(), 1);
}

#[test]
fn malformed_datagrams_are_errors() {
  // too short for a header
  assert!(Message::read_from_buffer(&Bytes::from_static(b"RTPS")).is_err());

  // submessage claims more than is there
  let mut truncated = message(&[&HEARTBEAT_BE]);
  truncated.truncate(truncated.len() - 4);
  assert!(Message::read_from_buffer(&Bytes::from(truncated)).is_err());

  // SequenceNumberSet with too many bits
  let mut too_many_bits = ACKNACK_BE;
  too_many_bits[20..24].copy_from_slice(&[0x00, 0x00, 0x01, 0x01]);
  assert!(Message::read_from_buffer(&Bytes::from(message(&[&too_many_bits]))).is_err());
}
