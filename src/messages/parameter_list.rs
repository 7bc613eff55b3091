use speedy::{Context, Readable, Reader, Writable, Writer};

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Readable, Writable)]
pub struct ParameterId {
  value: u16,
}

impl ParameterId {
  pub const PID_PAD: ParameterId = ParameterId { value: 0x0000 };
  pub const PID_SENTINEL: ParameterId = ParameterId { value: 0x0001 };
  pub const PID_PARTICIPANT_LEASE_DURATION: ParameterId = ParameterId { value: 0x0002 };
  pub const PID_TIME_BASED_FILTER: ParameterId = ParameterId { value: 0x0004 };
  pub const PID_TOPIC_NAME: ParameterId = ParameterId { value: 0x0005 };
  pub const PID_OWNERSHIP_STRENGTH: ParameterId = ParameterId { value: 0x0006 };
  pub const PID_TYPE_NAME: ParameterId = ParameterId { value: 0x0007 };
  pub const PID_DOMAIN_ID: ParameterId = ParameterId { value: 0x000f };
  pub const PID_PROTOCOL_VERSION: ParameterId = ParameterId { value: 0x0015 };
  pub const PID_VENDOR_ID: ParameterId = ParameterId { value: 0x0016 };
  pub const PID_RELIABILITY: ParameterId = ParameterId { value: 0x001a };
  pub const PID_LIVELINESS: ParameterId = ParameterId { value: 0x001b };
  pub const PID_DURABILITY: ParameterId = ParameterId { value: 0x001d };
  pub const PID_OWNERSHIP: ParameterId = ParameterId { value: 0x001f };
  pub const PID_PRESENTATION: ParameterId = ParameterId { value: 0x0021 };
  pub const PID_DEADLINE: ParameterId = ParameterId { value: 0x0023 };
  pub const PID_DESTINATION_ORDER: ParameterId = ParameterId { value: 0x0025 };
  pub const PID_LATENCY_BUDGET: ParameterId = ParameterId { value: 0x0027 };
  pub const PID_PARTITION: ParameterId = ParameterId { value: 0x0029 };
  pub const PID_LIFESPAN: ParameterId = ParameterId { value: 0x002b };
  pub const PID_UNICAST_LOCATOR: ParameterId = ParameterId { value: 0x002f };
  pub const PID_MULTICAST_LOCATOR: ParameterId = ParameterId { value: 0x0030 };
  pub const PID_DEFAULT_UNICAST_LOCATOR: ParameterId = ParameterId { value: 0x0031 };
  pub const PID_METATRAFFIC_UNICAST_LOCATOR: ParameterId = ParameterId { value: 0x0032 };
  pub const PID_METATRAFFIC_MULTICAST_LOCATOR: ParameterId = ParameterId { value: 0x0033 };
  pub const PID_HISTORY: ParameterId = ParameterId { value: 0x0040 };
  pub const PID_EXPECTS_INLINE_QOS: ParameterId = ParameterId { value: 0x0043 };
  pub const PID_RESOURCE_LIMITS: ParameterId = ParameterId { value: 0x0041 };
  pub const PID_DEFAULT_MULTICAST_LOCATOR: ParameterId = ParameterId { value: 0x0048 };
  pub const PID_PARTICIPANT_GUID: ParameterId = ParameterId { value: 0x0050 };
  pub const PID_BUILTIN_ENDPOINT_SET: ParameterId = ParameterId { value: 0x0058 };
  pub const PID_ENDPOINT_GUID: ParameterId = ParameterId { value: 0x005a };
  pub const PID_ENTITY_NAME: ParameterId = ParameterId { value: 0x0062 };
  pub const PID_KEY_HASH: ParameterId = ParameterId { value: 0x0070 };
  pub const PID_STATUS_INFO: ParameterId = ParameterId { value: 0x0071 };
}

/// One element of a ParameterList. `value` holds the CDR encapsulation of
/// the parameter; on write it is zero-padded to a multiple of 4 bytes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Parameter {
  pub parameter_id: ParameterId,
  pub value: Vec<u8>,
}

impl Parameter {
  pub fn new(parameter_id: ParameterId, value: Vec<u8>) -> Self {
    Self {
      parameter_id,
      value,
    }
  }

  fn padded_len(&self) -> usize {
    (self.value.len() + 3) & !3
  }

  pub fn len_serialized(&self) -> usize {
    4 + self.padded_len()
  }
}

impl<'a, C: Context> Readable<'a, C> for Parameter {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let parameter_id: ParameterId = reader.read_value()?;
    let length = reader.read_u16()? as usize;
    let mut value = vec![0u8; length];
    reader.read_bytes(&mut value)?;
    Ok(Self {
      parameter_id,
      value,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for Parameter {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.parameter_id)?;
    let padded = self.padded_len();
    writer.write_u16(padded as u16)?;
    writer.write_bytes(&self.value)?;
    for _ in self.value.len()..padded {
      writer.write_u8(0x00)?;
    }
    Ok(())
  }
}

/// ParameterList is used as part of several messages to encapsulate
/// QoS parameters that may affect the interpretation of the message.
/// It is terminated on the wire by PID_SENTINEL.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ParameterList {
  pub parameters: Vec<Parameter>,
}

impl ParameterList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.parameters.is_empty()
  }

  pub fn push(&mut self, parameter_id: ParameterId, value: Vec<u8>) {
    self.parameters.push(Parameter::new(parameter_id, value));
  }

  /// First parameter with the given id
  pub fn get(&self, parameter_id: ParameterId) -> Option<&Parameter> {
    self
      .parameters
      .iter()
      .find(|p| p.parameter_id == parameter_id)
  }

  pub fn get_all(&self, parameter_id: ParameterId) -> impl Iterator<Item = &Parameter> {
    self
      .parameters
      .iter()
      .filter(move |p| p.parameter_id == parameter_id)
  }

  /// Bytes on the wire, including the sentinel.
  pub fn len_serialized(&self) -> usize {
    self
      .parameters
      .iter()
      .map(Parameter::len_serialized)
      .sum::<usize>()
      + 4
  }
}

impl<'a, C: Context> Readable<'a, C> for ParameterList {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut parameters = Vec::new();
    loop {
      let parameter_id: ParameterId = reader.read_value()?;
      let length = reader.read_u16()? as usize;
      if parameter_id == ParameterId::PID_SENTINEL {
        // sentinel length is ignored
        return Ok(Self { parameters });
      }
      let mut value = vec![0u8; length];
      reader.read_bytes(&mut value)?;
      if parameter_id != ParameterId::PID_PAD {
        parameters.push(Parameter {
          parameter_id,
          value,
        });
      }
    }
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for ParameterList {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for param in self.parameters.iter() {
      writer.write_value(param)?;
    }
    writer.write_value(&ParameterId::PID_SENTINEL)?;
    writer.write_u16(0)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use speedy::Endianness;

  use super::*;

  serialization_test!( type = Parameter,
  {
      pid_protocol_version,
      Parameter::new(ParameterId::PID_PROTOCOL_VERSION, vec![0x02, 0x03, 0x00, 0x00]),
      le = [0x15, 0x00, 0x04, 0x00,
            0x02, 0x03, 0x00, 0x00],
      be = [0x00, 0x15, 0x00, 0x04,
            0x02, 0x03, 0x00, 0x00]
  });

  #[test]
  fn parameter_value_is_padded() {
    let p = Parameter::new(ParameterId::PID_TOPIC_NAME, vec![1, 2, 3, 4, 5]);
    let bytes = p.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(
      bytes,
      vec![0x05, 0x00, 0x08, 0x00, 1, 2, 3, 4, 5, 0, 0, 0]
    );
    assert_eq!(p.len_serialized(), bytes.len());
  }

  #[test]
  fn list_ends_with_sentinel_and_skips_pad() {
    let mut list = ParameterList::new();
    list.push(ParameterId::PID_STATUS_INFO, vec![0, 0, 0, 1]);
    list.push(ParameterId::PID_KEY_HASH, vec![7; 16]);
    let bytes = list.write_to_vec_with_ctx(Endianness::BigEndian).unwrap();
    assert_eq!(bytes.len(), list.len_serialized());
    assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x01, 0x00, 0x00]);

    let back = ParameterList::read_from_buffer_with_ctx(Endianness::BigEndian, &bytes).unwrap();
    assert_eq!(back, list);
    assert_eq!(
      back.get(ParameterId::PID_KEY_HASH).map(|p| p.value.clone()),
      Some(vec![7; 16])
    );

    let padded: Vec<u8> = vec![
      0x00, 0x00, 0x04, 0x00, 0xff, 0xff, 0xff, 0xff, // PAD
      0x71, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x02, // STATUS_INFO
      0x01, 0x00, 0x00, 0x00,
    ];
    let back = ParameterList::read_from_buffer_with_ctx(Endianness::LittleEndian, &padded).unwrap();
    assert_eq!(back.parameters.len(), 1);
    assert_eq!(back.parameters[0].parameter_id, ParameterId::PID_STATUS_INFO);
  }

  #[test]
  fn truncated_list_is_an_error() {
    let bytes = [0x00, 0x05, 0x00, 0x08, 0x01];
    assert!(ParameterList::read_from_buffer_with_ctx(Endianness::BigEndian, &bytes).is_err());
  }
}
