#![allow(non_camel_case_types)]

use enumflags2::{bitflags, BitFlags};
use speedy::Endianness;

/// The first flag bit of every submessage selects its byte order.
pub fn endianness_flag(flags: u8) -> Endianness {
  if (flags & 0x01) != 0 {
    Endianness::LittleEndian
  } else {
    Endianness::BigEndian
  }
}

/// Construct a flag set with only the endianness bit decided.
pub trait FromEndianness {
  fn from_endianness(end: Endianness) -> Self;
}

macro_rules! submessage_flags {
  ($flag_type:ident) => {
    impl FromEndianness for BitFlags<$flag_type> {
      fn from_endianness(end: Endianness) -> Self {
        if end == Endianness::LittleEndian {
          $flag_type::Endianness.into()
        } else {
          BitFlags::<$flag_type>::empty()
        }
      }
    }
  };
}

// 8.3.7.1 AckNack
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ACKNACK_Flags {
  Endianness = 0b01,
  Final = 0b10,
}
submessage_flags!(ACKNACK_Flags);

// 8.3.7.2 Data
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DATA_Flags {
  Endianness = 0b00001,
  InlineQos = 0b00010,
  Data = 0b00100,
  Key = 0b01000,
  NonStandardPayload = 0b10000,
}
submessage_flags!(DATA_Flags);

// 8.3.7.4 Gap
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum GAP_Flags {
  Endianness = 0b1,
}
submessage_flags!(GAP_Flags);

// 8.3.7.5 Heartbeat
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum HEARTBEAT_Flags {
  Endianness = 0b001,
  Final = 0b010,
  Liveliness = 0b100,
}
submessage_flags!(HEARTBEAT_Flags);

// 8.3.7.7 InfoDestination
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum INFODESTINATION_Flags {
  Endianness = 0b1,
}
submessage_flags!(INFODESTINATION_Flags);

// 8.3.7.9 InfoTimestamp
#[bitflags]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum INFOTIMESTAMP_Flags {
  Endianness = 0b01,
  Invalidate = 0b10,
}
submessage_flags!(INFOTIMESTAMP_Flags);
