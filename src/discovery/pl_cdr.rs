//! PL_CDR: discovery data as a ParameterList.
//!
//! Discovery messages are encoded one parameter per field, so that a reader
//! can skip what it does not understand. Each parameter value is CDR in the
//! endianness named by the payload representation identifier.
use std::{fmt, marker::PhantomData};

use bytes::Bytes;
use speedy::{Endianness, Readable, Writable};

use crate::{
  dds::adapters::{DeserializerAdapter, SerializerAdapter},
  messages::{
    parameter_list::{ParameterId, ParameterList},
    serialized_payload::RepresentationIdentifier,
  },
};

#[derive(Debug)]
pub enum PlCdrError {
  /// Representation is not PL_CDR_LE or PL_CDR_BE.
  UnsupportedEncoding(RepresentationIdentifier),
  /// A parameter every message of this type must have is absent.
  MissingParameter(&'static str),
  /// A parameter value does not parse.
  Malformed(String),
  Speedy(speedy::Error),
}

impl fmt::Display for PlCdrError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PlCdrError::UnsupportedEncoding(e) => write!(f, "unsupported encoding {:?}", e),
      PlCdrError::MissingParameter(name) => write!(f, "missing parameter {}", name),
      PlCdrError::Malformed(what) => write!(f, "malformed parameter: {}", what),
      PlCdrError::Speedy(e) => write!(f, "speedy: {}", e),
    }
  }
}

impl std::error::Error for PlCdrError {}

impl From<speedy::Error> for PlCdrError {
  fn from(e: speedy::Error) -> PlCdrError {
    PlCdrError::Speedy(e)
  }
}

fn endianness_of(encoding: RepresentationIdentifier) -> Result<Endianness, PlCdrError> {
  match encoding {
    RepresentationIdentifier::PL_CDR_LE => Ok(Endianness::LittleEndian),
    RepresentationIdentifier::PL_CDR_BE => Ok(Endianness::BigEndian),
    other => Err(PlCdrError::UnsupportedEncoding(other)),
  }
}

// This is to be implemented by all Discovery message types.
pub trait PlCdrSerialize {
  fn to_parameter_list(&self, w: &mut ParameterListWriter) -> Result<(), PlCdrError>;
}

pub trait PlCdrDeserialize: Sized {
  fn from_parameter_list(r: &ParameterListReader) -> Result<Self, PlCdrError>;
}

/// Builds a ParameterList, encoding each value in one endianness.
pub struct ParameterListWriter {
  list: ParameterList,
  endianness: Endianness,
}

impl ParameterListWriter {
  pub fn new(endianness: Endianness) -> ParameterListWriter {
    ParameterListWriter {
      list: ParameterList::new(),
      endianness,
    }
  }

  pub fn value<T: Writable<Endianness>>(
    &mut self,
    pid: ParameterId,
    value: &T,
  ) -> Result<(), PlCdrError> {
    let bytes = value.write_to_vec_with_ctx(self.endianness)?;
    self.list.push(pid, bytes);
    Ok(())
  }

  pub fn raw(&mut self, pid: ParameterId, bytes: Vec<u8>) {
    self.list.push(pid, bytes);
  }

  pub fn string(&mut self, pid: ParameterId, s: &str) -> Result<(), PlCdrError> {
    let mut bytes = Vec::with_capacity(s.len() + 5);
    write_cdr_string(&mut bytes, s, self.endianness)?;
    self.list.push(pid, bytes);
    Ok(())
  }

  pub fn endianness(&self) -> Endianness {
    self.endianness
  }

  pub fn into_list(self) -> ParameterList {
    self.list
  }
}

/// CDR string: u32 length counting the terminating NUL, bytes, NUL.
pub(crate) fn write_cdr_string(
  buffer: &mut Vec<u8>,
  s: &str,
  endianness: Endianness,
) -> Result<(), PlCdrError> {
  let len = (s.len() + 1) as u32;
  buffer.extend(len.write_to_vec_with_ctx(endianness)?);
  buffer.extend_from_slice(s.as_bytes());
  buffer.push(0);
  Ok(())
}

/// Parses a CDR string at the start of `bytes`. Returns the string and the
/// number of bytes consumed.
pub(crate) fn read_cdr_string(
  bytes: &[u8],
  endianness: Endianness,
) -> Result<(String, usize), PlCdrError> {
  if bytes.len() < 4 {
    return Err(PlCdrError::Malformed("string length".to_string()));
  }
  let len = u32::read_from_buffer_with_ctx(endianness, &bytes[..4])? as usize;
  let end = 4 + len;
  if len == 0 || end > bytes.len() {
    return Err(PlCdrError::Malformed(format!("string of length {}", len)));
  }
  // drop the NUL
  let text = &bytes[4..end - 1];
  let s = String::from_utf8(text.to_vec()).map_err(|e| PlCdrError::Malformed(e.to_string()))?;
  Ok((s, end))
}

/// Field access to a received ParameterList.
pub struct ParameterListReader {
  list: ParameterList,
  endianness: Endianness,
}

impl ParameterListReader {
  pub fn new(list: ParameterList, endianness: Endianness) -> ParameterListReader {
    ParameterListReader { list, endianness }
  }

  pub fn endianness(&self) -> Endianness {
    self.endianness
  }

  pub fn value<T>(&self, pid: ParameterId) -> Result<Option<T>, PlCdrError>
  where
    T: for<'b> Readable<'b, Endianness>,
  {
    match self.list.get(pid) {
      None => Ok(None),
      Some(p) => Ok(Some(T::read_from_buffer_with_ctx(self.endianness, &p.value)?)),
    }
  }

  pub fn required<T>(&self, pid: ParameterId, name: &'static str) -> Result<T, PlCdrError>
  where
    T: for<'b> Readable<'b, Endianness>,
  {
    self
      .value(pid)?
      .ok_or(PlCdrError::MissingParameter(name))
  }

  pub fn all<T>(&self, pid: ParameterId) -> Result<Vec<T>, PlCdrError>
  where
    T: for<'b> Readable<'b, Endianness>,
  {
    self
      .list
      .get_all(pid)
      .map(|p| T::read_from_buffer_with_ctx(self.endianness, &p.value).map_err(PlCdrError::from))
      .collect()
  }

  pub fn raw(&self, pid: ParameterId) -> Option<&[u8]> {
    self.list.get(pid).map(|p| p.value.as_slice())
  }

  pub fn string(&self, pid: ParameterId) -> Result<Option<String>, PlCdrError> {
    match self.list.get(pid) {
      None => Ok(None),
      Some(p) => read_cdr_string(&p.value, self.endianness).map(|(s, _)| Some(s)),
    }
  }

  pub fn required_string(&self, pid: ParameterId, name: &'static str) -> Result<String, PlCdrError> {
    self
      .string(pid)?
      .ok_or(PlCdrError::MissingParameter(name))
  }
}

/// Serializer and deserializer adapter for discovery data types.
/// Writes PL_CDR_LE and reads both endiannesses.
pub struct PlCdrAdapter<D> {
  phantom: PhantomData<D>,
}

impl<D: PlCdrSerialize> SerializerAdapter<D> for PlCdrAdapter<D> {
  type Error = PlCdrError;

  fn output_encoding() -> RepresentationIdentifier {
    RepresentationIdentifier::PL_CDR_LE
  }

  fn to_bytes(value: &D) -> Result<Bytes, PlCdrError> {
    let mut writer = ParameterListWriter::new(Endianness::LittleEndian);
    value.to_parameter_list(&mut writer)?;
    let bytes = writer
      .into_list()
      .write_to_vec_with_ctx(Endianness::LittleEndian)?;
    Ok(Bytes::from(bytes))
  }
}

impl<D: PlCdrDeserialize> DeserializerAdapter<D> for PlCdrAdapter<D> {
  type Error = PlCdrError;

  fn supported_encodings() -> &'static [RepresentationIdentifier] {
    &[
      RepresentationIdentifier::PL_CDR_LE,
      RepresentationIdentifier::PL_CDR_BE,
    ]
  }

  fn from_bytes(input_bytes: &[u8], encoding: RepresentationIdentifier) -> Result<D, PlCdrError> {
    let endianness = endianness_of(encoding)?;
    let list = ParameterList::read_from_buffer_with_ctx(endianness, input_bytes)?;
    D::from_parameter_list(&ParameterListReader::new(list, endianness))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cdr_string_counts_the_nul() {
    let mut buf = Vec::new();
    write_cdr_string(&mut buf, "abc", Endianness::LittleEndian).unwrap();
    assert_eq!(buf, vec![4, 0, 0, 0, b'a', b'b', b'c', 0]);
    let (s, used) = read_cdr_string(&buf, Endianness::LittleEndian).unwrap();
    assert_eq!(s, "abc");
    assert_eq!(used, 8);
  }

  #[test]
  fn truncated_string_is_malformed() {
    let buf = [9, 0, 0, 0, b'a'];
    assert!(matches!(
      read_cdr_string(&buf, Endianness::LittleEndian),
      Err(PlCdrError::Malformed(_))
    ));
  }

  #[test]
  fn plain_cdr_is_not_accepted() {
    struct Nothing;
    impl PlCdrDeserialize for Nothing {
      fn from_parameter_list(_r: &ParameterListReader) -> Result<Self, PlCdrError> {
        Ok(Nothing)
      }
    }
    let r = PlCdrAdapter::<Nothing>::from_bytes(&[1, 0, 0, 0], RepresentationIdentifier::CDR_LE);
    assert!(matches!(r, Err(PlCdrError::UnsupportedEncoding(_))));
  }
}
