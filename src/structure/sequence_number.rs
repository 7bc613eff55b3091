use std::{
  collections::BTreeSet,
  mem::size_of,
  ops::{Bound, RangeBounds},
};

use num_derive::{FromPrimitive, NumOps, ToPrimitive};
use speedy::{Context, Readable, Reader, Writable, Writer};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// RTPS Specification v2.3 Section "8.3.5.4 SequenceNumber"
#[derive(
  Copy,
  Clone,
  Debug,
  Hash,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  NumOps,
  FromPrimitive,
  ToPrimitive,
  Serialize,
  Deserialize,
)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
  pub const SEQUENCENUMBER_UNKNOWN: SequenceNumber = SequenceNumber((u32::MAX as i64) << 32);

  pub fn new(value: i64) -> SequenceNumber {
    SequenceNumber(value)
  }

  pub const fn zero() -> SequenceNumber {
    SequenceNumber(0)
  }

  /// Saturates at `i64::MAX`.
  pub fn plus_1(self) -> SequenceNumber {
    SequenceNumber(self.0.saturating_add(1))
  }

  /// Saturates at `i64::MIN`.
  pub fn minus_1(self) -> SequenceNumber {
    SequenceNumber(self.0.saturating_sub(1))
  }

  /// Subtraction that saturates at zero
  pub fn sub_or_zero(self, rhs: Self) -> SequenceNumber {
    if self >= rhs {
      self - rhs
    } else {
      SequenceNumber(0)
    }
  }

  pub fn range_inclusive(begin: Self, end: Self) -> SequenceNumberRange {
    SequenceNumberRange::new(begin, end)
  }
}

impl From<i64> for SequenceNumber {
  fn from(value: i64) -> Self {
    SequenceNumber(value)
  }
}

impl From<i32> for SequenceNumber {
  fn from(value: i32) -> Self {
    SequenceNumber(i64::from(value))
  }
}

impl From<SequenceNumber> for i64 {
  fn from(sequence_number: SequenceNumber) -> Self {
    sequence_number.0
  }
}

mod sequence_number_checked {
  use super::SequenceNumber;
  checked_impl!(CheckedAdd, checked_add, SequenceNumber);
  checked_impl!(CheckedSub, checked_sub, SequenceNumber);
}

impl Default for SequenceNumber {
  fn default() -> SequenceNumber {
    SequenceNumber(1)
  }
}

// RTPS Spec v2.3 Section 9.4.2.5:
// SequenceNumber is serialized high 32-bit word first, then the low word,
// regardless of endianness. Within the words the encoding endianness applies.
impl<'a, C: Context> Readable<'a, C> for SequenceNumber {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let high: i32 = reader.read_value()?;
    let low: u32 = reader.read_value()?;
    Ok(SequenceNumber((i64::from(high) << 32) + i64::from(low)))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    size_of::<Self>()
  }
}

impl<C: Context> Writable<C> for SequenceNumber {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_i32((self.0 >> 32) as i32)?;
    writer.write_u32(self.0 as u32)?;
    Ok(())
  }
}

/// Inclusive range of sequence numbers, iterable in ascending order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceNumberRange {
  begin: SequenceNumber,
  end: SequenceNumber,
}

impl SequenceNumberRange {
  pub fn new(begin: SequenceNumber, end: SequenceNumber) -> SequenceNumberRange {
    SequenceNumberRange { begin, end }
  }

  pub fn is_empty(&self) -> bool {
    self.begin > self.end
  }
}

impl Iterator for SequenceNumberRange {
  type Item = SequenceNumber;
  fn next(&mut self) -> Option<Self::Item> {
    if self.begin > self.end {
      None
    } else {
      let b = self.begin;
      match b.0.checked_add(1) {
        Some(next) => self.begin = SequenceNumber(next),
        None => self.end = SequenceNumber(i64::MIN),
      }
      Some(b)
    }
  }
}

impl RangeBounds<SequenceNumber> for SequenceNumberRange {
  fn start_bound(&self) -> Bound<&SequenceNumber> {
    Bound::Included(&self.begin)
  }
  fn end_bound(&self) -> Bound<&SequenceNumber> {
    Bound::Included(&self.end)
  }
}

// ---------------------------------------------------------------

/// SequenceNumberSet from RTPS spec 9.4.2.6: a base and up to 256 bits.
/// Bit 0 is the MSB of bitmap[0] and stands for `bitmap_base`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SequenceNumberSet {
  bitmap_base: SequenceNumber,
  num_bits: u32,
  bitmap: Vec<u32>, // len == (num_bits + 31) / 32
}

impl SequenceNumberSet {
  pub const MAX_BITS: u32 = 256;

  /// An all-zeroes set covering `num_bits` numbers from `bitmap_base`.
  pub fn new(bitmap_base: SequenceNumber, num_bits: u32) -> SequenceNumberSet {
    let num_bits = num_bits.min(Self::MAX_BITS);
    let word_count = (num_bits + 31) / 32;
    SequenceNumberSet {
      bitmap_base,
      num_bits,
      bitmap: vec![0; word_count as usize],
    }
  }

  pub fn new_empty(bitmap_base: SequenceNumber) -> SequenceNumberSet {
    SequenceNumberSet::new(bitmap_base, 0)
  }

  pub fn base(&self) -> SequenceNumber {
    self.bitmap_base
  }

  pub fn num_bits(&self) -> u32 {
    self.num_bits
  }

  pub fn is_empty(&self) -> bool {
    self.iter().next().is_none()
  }

  pub fn insert(&mut self, sn: SequenceNumber) {
    let end = self.bitmap_base + SequenceNumber::from(i64::from(self.num_bits));
    if sn < self.bitmap_base || sn >= end {
      error!("out of bounds .insert({:?}) to {:?}", sn, self);
      return;
    }
    let bit_pos = i64::from(sn - self.bitmap_base) as u32;
    self.bitmap[(bit_pos / 32) as usize] |= 1u32 << (31 - bit_pos % 32);
  }

  /// Builds a set from `base` that contains the members of `set`. Members
  /// that do not fit in 256 bits from `base` are left out. They can be
  /// reported in a later message.
  pub fn from_base_and_set(
    base: SequenceNumber,
    set: &BTreeSet<SequenceNumber>,
  ) -> SequenceNumberSet {
    let limit = base + SequenceNumber::from(i64::from(Self::MAX_BITS));
    match set.range(base..limit).next_back() {
      Some(&top) => {
        let num_bits = i64::from(top - base) as u32 + 1;
        let mut sns = SequenceNumberSet::new(base, num_bits);
        for &s in set.range(base..limit) {
          sns.insert(s);
        }
        if set.range(limit..).next().is_some() {
          debug!(
            "from_base_and_set: set does not fit 256 bits from base {:?}, truncating",
            base
          );
        }
        sns
      }
      None => SequenceNumberSet::new_empty(base),
    }
  }

  pub fn iter(&self) -> SequenceNumberSetIter<'_> {
    SequenceNumberSetIter {
      set: self,
      at_bit: 0,
      rev_at_bit: self.num_bits,
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for SequenceNumberSet {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let bitmap_base: SequenceNumber = reader.read_value()?;
    let num_bits: u32 = reader.read_value()?;
    if num_bits > SequenceNumberSet::MAX_BITS {
      return Err(
        speedy::Error::custom(format!(
          "SequenceNumberSet has {} bits, at most 256 allowed",
          num_bits
        ))
        .into(),
      );
    }
    let word_count = (num_bits + 31) / 32;
    let mut bitmap: Vec<u32> = Vec::with_capacity(word_count as usize);
    for _ in 0..word_count {
      bitmap.push(reader.read_value()?);
    }
    Ok(SequenceNumberSet {
      bitmap_base,
      num_bits,
      bitmap,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    size_of::<SequenceNumber>() + size_of::<u32>()
  }
}

impl<C: Context> Writable<C> for SequenceNumberSet {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.bitmap_base)?;
    writer.write_u32(self.num_bits)?;
    for word in &self.bitmap {
      writer.write_u32(*word)?;
    }
    Ok(())
  }
}

#[derive(Clone, Debug)]
pub struct SequenceNumberSetIter<'a> {
  set: &'a SequenceNumberSet,
  at_bit: u32,
  rev_at_bit: u32,
}

impl<'a> SequenceNumberSetIter<'a> {
  fn bit_is_set(&self, bit: u32) -> bool {
    self.set.bitmap[(bit / 32) as usize] & (1 << (31 - bit % 32)) != 0
  }
}

impl<'a> Iterator for SequenceNumberSetIter<'a> {
  type Item = SequenceNumber;

  fn next(&mut self) -> Option<Self::Item> {
    while self.at_bit < self.rev_at_bit {
      let bit = self.at_bit;
      self.at_bit += 1;
      if self.bit_is_set(bit) {
        return Some(self.set.bitmap_base + SequenceNumber::from(i64::from(bit)));
      }
    }
    None
  }
}

impl<'a> DoubleEndedIterator for SequenceNumberSetIter<'a> {
  fn next_back(&mut self) -> Option<Self::Item> {
    while self.at_bit < self.rev_at_bit {
      self.rev_at_bit -= 1;
      if self.bit_is_set(self.rev_at_bit) {
        return Some(self.set.bitmap_base + SequenceNumber::from(i64::from(self.rev_at_bit)));
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use speedy::Endianness;

  use super::*;

  #[test]
  fn sequence_number_starts_by_default_from_one() {
    assert_eq!(SequenceNumber::from(1), SequenceNumber::default());
  }

  #[test]
  fn sequence_number_range_is_inclusive() {
    let sns: Vec<SequenceNumber> =
      SequenceNumber::range_inclusive(SequenceNumber::new(3), SequenceNumber::new(5)).collect();
    assert_eq!(
      sns,
      vec![
        SequenceNumber::new(3),
        SequenceNumber::new(4),
        SequenceNumber::new(5)
      ]
    );
    assert!(SequenceNumberRange::new(SequenceNumber::new(5), SequenceNumber::new(4)).is_empty());
  }

  #[test]
  fn range_ending_at_max_terminates() {
    let top = SequenceNumber::new(i64::MAX);
    let sns: Vec<SequenceNumber> =
      SequenceNumber::range_inclusive(SequenceNumber::new(i64::MAX - 1), top).collect();
    assert_eq!(sns, vec![SequenceNumber::new(i64::MAX - 1), top]);
    assert_eq!(top.plus_1(), top);
    assert_eq!(SequenceNumber::new(i64::MIN).minus_1(), SequenceNumber::new(i64::MIN));
  }

  #[test]
  fn set_from_base_and_set_truncates_at_256_bits() {
    let base = SequenceNumber::new(10);
    let members: BTreeSet<SequenceNumber> = [10, 12, 265, 266, 400]
      .iter()
      .map(|&i| SequenceNumber::new(i))
      .collect();
    let set = SequenceNumberSet::from_base_and_set(base, &members);
    assert!(set.num_bits() <= 256);
    let back: Vec<i64> = set.iter().map(i64::from).collect();
    assert_eq!(back, vec![10, 12, 265]);
  }

  #[test]
  fn set_iterates_both_ways() {
    let mut set = SequenceNumberSet::new(SequenceNumber::new(100), 70);
    for sn in &[100, 131, 132, 169] {
      set.insert(SequenceNumber::new(*sn));
    }
    let fwd: Vec<i64> = set.iter().map(i64::from).collect();
    let rev: Vec<i64> = set.iter().rev().map(i64::from).collect();
    assert_eq!(fwd, vec![100, 131, 132, 169]);
    assert_eq!(rev, vec![169, 132, 131, 100]);
  }

  #[test]
  fn out_of_bounds_insert_is_ignored() {
    let mut set = SequenceNumberSet::new(SequenceNumber::new(5), 3);
    set.insert(SequenceNumber::new(4));
    set.insert(SequenceNumber::new(8));
    assert!(set.is_empty());
  }

  #[test]
  fn oversized_set_is_rejected_on_read() {
    let bytes: Vec<u8> = vec![
      0x00, 0x00, 0x00, 0x00, // base high
      0x01, 0x00, 0x00, 0x00, // base low
      0x01, 0x01, 0x00, 0x00, // 257 bits
    ];
    assert!(
      SequenceNumberSet::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).is_err()
    );
  }

  serialization_test!( type = SequenceNumber,
  {
      sequence_number_default,
      SequenceNumber::default(),
      le = [0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]
  },
  {
      sequence_number_unknown,
      SequenceNumber::SEQUENCENUMBER_UNKNOWN,
      le = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00],
      be = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]
  },
  {
      sequence_number_non_zero,
      SequenceNumber::from(0x0011_2233_4455_6677i64),
      le = [0x33, 0x22, 0x11, 0x00, 0x77, 0x66, 0x55, 0x44],
      be = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
  });

  serialization_test!( type = SequenceNumberSet,
  {
      sequence_number_set_empty,
      SequenceNumberSet::new_empty(SequenceNumber::from(42)),
      le = [0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00, 0x00, 0x00]
  },
  {
      sequence_number_set_manual,
      {
        let mut set = SequenceNumberSet::new(SequenceNumber::from(1), 25);
        for sn in 1..12 {
          set.insert(SequenceNumber::from(sn));
        }
        set
      },
      le = [0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x19, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xe0, 0xff],
      be = [0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x19,
            0xff, 0xe0, 0x00, 0x00]
  },
  {
      sequence_number_set_multiword,
      {
        let mut set = SequenceNumberSet::new(SequenceNumber::from(10), 64);
        for sn in 10..=52 {
          set.insert(SequenceNumber::from(sn));
        }
        set
      },
      le = [0x00, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00,
            0x40, 0x00, 0x00, 0x00,
            0xff, 0xff, 0xff, 0xff,
            0x00, 0x00, 0xe0, 0xff],
      be = [0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x0A,
            0x00, 0x00, 0x00, 0x40,
            0xff, 0xff, 0xff, 0xff,
            0xff, 0xe0, 0x00, 0x00]
  });
}
