//! SerializerAdapter and DeserializerAdapter connect application data types
//! to DataWriters and DataReaders.
//!
//! A DataWriter or DataReader cannot assume a specific serialization format,
//! so the format is given as a type parameter when the endpoint is created.
//! Keyed topics also need the key of each sample. It comes from [`Keyed`],
//! and [`Key::hash_key`] turns it into the `InstanceHandle` used on the wire.
//!
//! # How to implement an adapter
//!
//! We call the imaginary example format `MyDataFormat`.
//!
//! 0. Define a type `MyDataFormatAdapter<D>`. It links this crate and the
//!    encoder routines, which may live in another crate. The adapter type is
//!    needed because the orphan rule prevents implementing our traits on
//!    types of the other crate.
//! 1. Implement `SerializerAdapter<D>`: `output_encoding` and `to_bytes`.
//!    Override `serialized_size` if the size is known without encoding.
//! 2. Implement `DeserializerAdapter<D>`: `supported_encodings` and
//!    `from_bytes`. `create_sample` gives a fresh value to decode into.
use bytes::Bytes;

use crate::{
  messages::serialized_payload::RepresentationIdentifier,
  structure::{guid::GUID, instance_handle::InstanceHandle},
};

/// Encodes samples of type `D` for a DataWriter.
pub trait SerializerAdapter<D> {
  /// The error type returned when encoding fails.
  type Error: std::error::Error;

  /// The representation written into the SerializedPayload header.
  fn output_encoding() -> RepresentationIdentifier;

  fn to_bytes(value: &D) -> Result<Bytes, Self::Error>;

  /// Size of the encoded sample in bytes.
  fn serialized_size(value: &D) -> Result<usize, Self::Error> {
    Self::to_bytes(value).map(|b| b.len())
  }
}

/// Decodes samples of type `D` for a DataReader.
pub trait DeserializerAdapter<D> {
  /// The error type returned when decoding fails.
  type Error: std::error::Error;

  /// Which data representations can the adapter read?
  /// See RTPS specification Section 10 and Table 10.3
  fn supported_encodings() -> &'static [RepresentationIdentifier];

  fn from_bytes(input_bytes: &[u8], encoding: RepresentationIdentifier) -> Result<D, Self::Error>;

  /// A fresh sample, e.g. to decode into.
  fn create_sample() -> D
  where
    D: Default,
  {
    D::default()
  }
}

/// A sample data type may be `Keyed`: it allows a Key to be extracted from
/// the sample. The key distinguishes Instances of the data in a Topic.
///
/// Types of keyless topics use `()` as their key.
pub trait Keyed {
  type K: Key;

  fn key(&self) -> Self::K;
}

/// Key of a keyed topic.
///
/// The key hash is computed from the big-endian CDR encoding of the key, as
/// in RTPS spec v2.3 Section 9.6.3.8 KeyHash: keys up to 16 bytes are
/// zero-padded, longer ones are MD5 hashed.
pub trait Key: Eq + Ord + Clone + std::fmt::Debug {
  /// Big-endian CDR encoding of the key fields.
  fn serialize_key(&self) -> Vec<u8>;

  fn hash_key(&self) -> InstanceHandle {
    InstanceHandle::from_serialized_key(&self.serialize_key())
  }
}

impl Key for () {
  fn serialize_key(&self) -> Vec<u8> {
    Vec::new()
  }

  fn hash_key(&self) -> InstanceHandle {
    InstanceHandle::NIL
  }
}

macro_rules! impl_key_for_primitive {
  ($($t:ty),*) => {
    $(
      impl Key for $t {
        fn serialize_key(&self) -> Vec<u8> {
          self.to_be_bytes().to_vec()
        }
      }
    )*
  };
}

impl_key_for_primitive!(i8, i16, i32, i64, u8, u16, u32, u64);

impl Key for bool {
  fn serialize_key(&self) -> Vec<u8> {
    vec![u8::from(*self)]
  }
}

impl Key for String {
  // CDR string: length including the terminating NUL, then the bytes.
  fn serialize_key(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(self.len() + 5);
    bytes.extend_from_slice(&(self.len() as u32 + 1).to_be_bytes());
    bytes.extend_from_slice(self.as_bytes());
    bytes.push(0);
    bytes
  }
}

// Builtin topics are keyed by the GUID of the entity they describe.
impl Key for GUID {
  fn serialize_key(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&self.prefix.bytes);
    bytes.extend_from_slice(&self.entity_id.entity_key);
    bytes.push(u8::from(self.entity_id.entity_kind));
    bytes
  }
}
