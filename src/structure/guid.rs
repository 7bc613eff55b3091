use std::{fmt, ops::RangeInclusive};

use mio::Token;
use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::vendor_id::VendorId;

/// First 12 bytes of a GUID. Shared by the participant and every entity it
/// contains.
#[derive(
  Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct GuidPrefix {
  pub bytes: [u8; 12],
}

impl GuidPrefix {
  pub const UNKNOWN: GuidPrefix = GuidPrefix { bytes: [0x00; 12] };

  pub fn new(prefix: &[u8]) -> GuidPrefix {
    let mut bytes: [u8; 12] = [0; 12];
    for (ix, data) in prefix.iter().enumerate() {
      if ix >= 12 {
        break;
      }
      bytes[ix] = *data;
    }
    GuidPrefix { bytes }
  }

  /// Random prefix that starts with our vendor id, so that prefixes we
  /// generate never collide with another vendor's.
  pub fn random_for_this_participant() -> GuidPrefix {
    let mut bytes: [u8; 12] = [0; 12];
    let uuid = Uuid::new_v4();
    bytes.copy_from_slice(&uuid.as_bytes()[0..12]);
    let vendor = VendorId::THIS_IMPLEMENTATION.as_bytes();
    bytes[0] = vendor[0];
    bytes[1] = vendor[1];
    GuidPrefix { bytes }
  }

  /// All GUIDs that share this prefix, for range queries over GUID-keyed maps.
  pub fn range(&self) -> RangeInclusive<GUID> {
    GUID::new(*self, EntityId::MIN)..=GUID::new(*self, EntityId::MAX)
  }
}

impl fmt::Debug for GuidPrefix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.bytes.iter() {
      write!(f, "{:02x}", b)?;
    }
    Ok(())
  }
}

impl<'a, C: Context> Readable<'a, C> for GuidPrefix {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut guid_prefix = GuidPrefix::default();
    for i in 0..guid_prefix.bytes.len() {
      guid_prefix.bytes[i] = reader.read_u8()?;
    }
    Ok(guid_prefix)
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    std::mem::size_of::<Self>()
  }
}

impl<C: Context> Writable<C> for GuidPrefix {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for elem in &self.bytes {
      writer.write_u8(*elem)?;
    }
    Ok(())
  }
}

#[derive(
  Copy,
  Clone,
  PartialOrd,
  PartialEq,
  Ord,
  Eq,
  Hash,
  Readable,
  Writable,
  Serialize,
  Deserialize,
)]
pub struct EntityKind(u8);

impl EntityKind {
  // constants from RTPS spec Table 9.1
  pub const UNKNOWN_USER_DEFINED: EntityKind = EntityKind(0x00);
  pub const WRITER_WITH_KEY_USER_DEFINED: EntityKind = EntityKind(0x02);
  pub const WRITER_NO_KEY_USER_DEFINED: EntityKind = EntityKind(0x03);
  pub const READER_NO_KEY_USER_DEFINED: EntityKind = EntityKind(0x04);
  pub const READER_WITH_KEY_USER_DEFINED: EntityKind = EntityKind(0x07);

  pub const UNKNOWN_BUILT_IN: EntityKind = EntityKind(0xC0);
  pub const PARTICIPANT_BUILT_IN: EntityKind = EntityKind(0xC1);
  pub const WRITER_WITH_KEY_BUILT_IN: EntityKind = EntityKind(0xC2);
  pub const WRITER_NO_KEY_BUILT_IN: EntityKind = EntityKind(0xC3);
  pub const READER_NO_KEY_BUILT_IN: EntityKind = EntityKind(0xC4);
  pub const READER_WITH_KEY_BUILT_IN: EntityKind = EntityKind(0xC7);

  pub fn is_reader(&self) -> bool {
    let e = self.0 & 0x0F;
    e == 0x04 || e == 0x07
  }

  pub fn is_writer(&self) -> bool {
    let e = self.0 & 0x0F;
    e == 0x02 || e == 0x03
  }

  pub fn is_built_in(&self) -> bool {
    (self.0 & 0xF0) == 0xC0
  }

  pub fn is_user_defined(&self) -> bool {
    (self.0 & 0xF0) == 0x00
  }

  pub fn is_with_key(&self) -> bool {
    let e = self.0 & 0x0F;
    e == 0x02 || e == 0x07
  }
}

impl From<u8> for EntityKind {
  fn from(b: u8) -> EntityKind {
    EntityKind(b)
  }
}

impl From<EntityKind> for u8 {
  fn from(ek: EntityKind) -> u8 {
    ek.0
  }
}

impl fmt::Debug for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      EntityKind::UNKNOWN_USER_DEFINED => f.write_str("EntityKind::UNKNOWN_USER_DEFINED"),
      EntityKind::WRITER_WITH_KEY_USER_DEFINED => f.write_str("EntityKind::WRITER_WITH_KEY_USER"),
      EntityKind::WRITER_NO_KEY_USER_DEFINED => f.write_str("EntityKind::WRITER_NO_KEY_USER"),
      EntityKind::READER_NO_KEY_USER_DEFINED => f.write_str("EntityKind::READER_NO_KEY_USER"),
      EntityKind::READER_WITH_KEY_USER_DEFINED => f.write_str("EntityKind::READER_WITH_KEY_USER"),
      EntityKind::PARTICIPANT_BUILT_IN => f.write_str("EntityKind::PARTICIPANT_BUILT_IN"),
      EntityKind::WRITER_WITH_KEY_BUILT_IN => f.write_str("EntityKind::WRITER_WITH_KEY_BUILT_IN"),
      EntityKind::READER_WITH_KEY_BUILT_IN => f.write_str("EntityKind::READER_WITH_KEY_BUILT_IN"),
      EntityKind(other) => write!(f, "EntityKind({:x?})", other),
    }
  }
}

/// RTPS EntityId: 3-byte key plus 1-byte kind. Unique within a participant.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
  pub entity_key: [u8; 3],
  pub entity_kind: EntityKind,
}

impl EntityId {
  pub const UNKNOWN: EntityId = EntityId {
    entity_key: [0x00; 3],
    entity_kind: EntityKind::UNKNOWN_USER_DEFINED,
  };
  pub const PARTICIPANT: EntityId = EntityId {
    entity_key: [0x00, 0x00, 0x01],
    entity_kind: EntityKind::PARTICIPANT_BUILT_IN,
  };
  pub const SEDP_BUILTIN_PUBLICATIONS_WRITER: EntityId = EntityId {
    entity_key: [0x00, 0x00, 0x03],
    entity_kind: EntityKind::WRITER_WITH_KEY_BUILT_IN,
  };
  pub const SEDP_BUILTIN_PUBLICATIONS_READER: EntityId = EntityId {
    entity_key: [0x00, 0x00, 0x03],
    entity_kind: EntityKind::READER_WITH_KEY_BUILT_IN,
  };
  pub const SEDP_BUILTIN_SUBSCRIPTIONS_WRITER: EntityId = EntityId {
    entity_key: [0x00, 0x00, 0x04],
    entity_kind: EntityKind::WRITER_WITH_KEY_BUILT_IN,
  };
  pub const SEDP_BUILTIN_SUBSCRIPTIONS_READER: EntityId = EntityId {
    entity_key: [0x00, 0x00, 0x04],
    entity_kind: EntityKind::READER_WITH_KEY_BUILT_IN,
  };
  pub const SPDP_BUILTIN_PARTICIPANT_WRITER: EntityId = EntityId {
    entity_key: [0x00, 0x01, 0x00],
    entity_kind: EntityKind::WRITER_WITH_KEY_BUILT_IN,
  };
  pub const SPDP_BUILTIN_PARTICIPANT_READER: EntityId = EntityId {
    entity_key: [0x00, 0x01, 0x00],
    entity_kind: EntityKind::READER_WITH_KEY_BUILT_IN,
  };

  pub const MIN: EntityId = EntityId {
    entity_key: [0x00; 3],
    entity_kind: EntityKind(0x00),
  };
  pub const MAX: EntityId = EntityId {
    entity_key: [0xFF; 3],
    entity_kind: EntityKind(0xFF),
  };

  pub fn new(entity_key: [u8; 3], entity_kind: EntityKind) -> EntityId {
    EntityId {
      entity_key,
      entity_kind,
    }
  }

  pub fn kind(self) -> EntityKind {
    self.entity_kind
  }

  /// Entity key as a number. Used to hand out keys for user entities.
  pub fn key_as_u32(self) -> u32 {
    u32::from(self.entity_key[0]) << 16
      | u32::from(self.entity_key[1]) << 8
      | u32::from(self.entity_key[2])
  }

  pub fn from_key_u32(key: u32, entity_kind: EntityKind) -> EntityId {
    EntityId {
      entity_key: [(key >> 16) as u8, (key >> 8) as u8, key as u8],
      entity_kind,
    }
  }
}

/// Result of decoding a poll `Token` back to what it was made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecode {
  /// Command channel of the entity
  Entity(EntityId),
  /// Timer of the entity
  AltEntity(EntityId),
  /// One of the fixed tokens of the event loop
  FixedToken(Token),
}

const ENTITY_TOKEN_TAG: usize = 1 << 32;
const ALT_ENTITY_TOKEN_TAG: usize = 2 << 32;
const TOKEN_TAG_MASK: usize = 0xF << 32;

impl EntityId {
  fn token_bits(self) -> usize {
    (self.key_as_u32() as usize) << 8 | usize::from(self.entity_kind.0)
  }

  /// Poll token for the command channel of this entity. Fixed tokens of the
  /// event loop are small numbers, so they never collide with these.
  pub fn as_token(self) -> Token {
    Token(self.token_bits() | ENTITY_TOKEN_TAG)
  }

  /// Second token for the same entity, used for its timer.
  pub fn as_alt_token(self) -> Token {
    Token(self.token_bits() | ALT_ENTITY_TOKEN_TAG)
  }

  pub fn from_token(token: Token) -> TokenDecode {
    let entity = || {
      EntityId::from_key_u32(
        ((token.0 >> 8) & 0xFF_FFFF) as u32,
        EntityKind((token.0 & 0xFF) as u8),
      )
    };
    match token.0 & TOKEN_TAG_MASK {
      ENTITY_TOKEN_TAG => TokenDecode::Entity(entity()),
      ALT_ENTITY_TOKEN_TAG => TokenDecode::AltEntity(entity()),
      _ => TokenDecode::FixedToken(token),
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for EntityId {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let entity_key = [reader.read_u8()?, reader.read_u8()?, reader.read_u8()?];
    let entity_kind = EntityKind(reader.read_u8()?);
    Ok(EntityId {
      entity_key,
      entity_kind,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for EntityId {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for elem in &self.entity_key {
      writer.write_u8(*elem)?;
    }
    writer.write_u8(self.entity_kind.0)
  }
}

impl Default for EntityId {
  fn default() -> EntityId {
    EntityId::UNKNOWN
  }
}

impl fmt::Debug for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      EntityId::UNKNOWN => f.write_str("EntityId::UNKNOWN"),
      EntityId::PARTICIPANT => f.write_str("EntityId::PARTICIPANT"),
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER => {
        f.write_str("EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER")
      }
      EntityId::SEDP_BUILTIN_PUBLICATIONS_READER => {
        f.write_str("EntityId::SEDP_BUILTIN_PUBLICATIONS_READER")
      }
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER => {
        f.write_str("EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER")
      }
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER => {
        f.write_str("EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER")
      }
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER => {
        f.write_str("EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER")
      }
      EntityId::SPDP_BUILTIN_PARTICIPANT_READER => {
        f.write_str("EntityId::SPDP_BUILTIN_PARTICIPANT_READER")
      }
      _ => {
        f.write_str("EntityId {")?;
        fmt::Debug::fmt(&self.entity_key, f)?;
        f.write_str(" ")?;
        fmt::Debug::fmt(&self.entity_kind, f)?;
        f.write_str("}")
      }
    }
  }
}

/// Globally unique identity of an RTPS entity.
#[derive(
  Copy,
  Clone,
  Default,
  PartialOrd,
  PartialEq,
  Ord,
  Eq,
  Hash,
  Readable,
  Writable,
  Serialize,
  Deserialize,
)]
pub struct GUID {
  pub prefix: GuidPrefix,
  pub entity_id: EntityId,
}

impl GUID {
  pub const GUID_UNKNOWN: GUID = GUID {
    prefix: GuidPrefix::UNKNOWN,
    entity_id: EntityId::UNKNOWN,
  };

  pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> GUID {
    GUID { prefix, entity_id }
  }

  /// Fresh participant GUID
  pub fn new_participant_guid() -> GUID {
    GUID {
      prefix: GuidPrefix::random_for_this_participant(),
      entity_id: EntityId::PARTICIPANT,
    }
  }

  /// Another entity in the same participant
  pub fn from_prefix(self, entity_id: EntityId) -> GUID {
    GUID {
      prefix: self.prefix,
      entity_id,
    }
  }

  pub fn participant_guid(self) -> GUID {
    self.from_prefix(EntityId::PARTICIPANT)
  }

  /// Inverse of the 16-byte wire form. Builtin topic instance handles are
  /// exactly these bytes.
  pub fn from_bytes(bytes: [u8; 16]) -> GUID {
    GUID {
      prefix: GuidPrefix::new(&bytes[..12]),
      entity_id: EntityId::new([bytes[12], bytes[13], bytes[14]], EntityKind(bytes[15])),
    }
  }
}

impl fmt::Debug for GUID {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GUID {{{:?} {:?}}}", self.prefix, self.entity_id)
  }
}
