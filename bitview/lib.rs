// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Bit-range views over instruction word buffers.
//!
//! Instruction words are stored as little-endian `u32` chunks and fields are
//! addressed by absolute bit ranges.  All accessors are bounds- and
//! fit-checked; a value that does not fit its field is a programming error,
//! not a runtime condition.

use std::ops::Range;

fn u64_mask_for_bits(bits: usize) -> u64 {
    assert!(bits > 0 && bits <= 64);
    !0u64 >> (64 - bits)
}

pub trait BitViewable {
    fn bits(&self) -> usize;

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64;
}

pub trait BitMutViewable: BitViewable {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64);
}

macro_rules! decl_bit_viewable_for_uint {
    ($ty: ty) => {
        impl BitViewable for $ty {
            fn bits(&self) -> usize {
                <$ty>::BITS as usize
            }

            fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
                assert!(!range.is_empty());
                assert!(range.end <= self.bits());

                let mask = <$ty>::MAX >> (self.bits() - range.len());
                ((self >> range.start) & mask).into()
            }
        }

        impl BitMutViewable for $ty {
            fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
                assert!(!range.is_empty());
                assert!(range.end <= self.bits());

                let mask = <$ty>::MAX >> (self.bits() - range.len());
                assert!((val & u64::from(mask)) == val);
                let val = val as $ty;

                *self = (*self & !(mask << range.start)) | (val << range.start);
            }
        }
    };
}

decl_bit_viewable_for_uint!(u32);
decl_bit_viewable_for_uint!(u64);

impl BitViewable for [u32] {
    fn bits(&self) -> usize {
        self.len() * 32
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        assert!(!range.is_empty());
        assert!(range.end <= self.bits());

        let mask = u64_mask_for_bits(range.len());

        let w0 = range.start / 32;
        let shift = range.start % 32;
        let words = (shift + range.len()).div_ceil(32);

        let mut val = 0_u64;
        for i in 0..words {
            let word = u64::from(self[w0 + i]);
            if i == 0 {
                val |= word >> shift;
            } else {
                val |= word << (i * 32 - shift);
            }
        }
        val & mask
    }
}

impl BitMutViewable for [u32] {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        assert!(!range.is_empty());
        assert!(range.end <= self.bits());

        let mask = u64_mask_for_bits(range.len());
        assert!((val & mask) == val);

        let w0 = range.start / 32;
        let shift = range.start % 32;
        let words = (shift + range.len()).div_ceil(32);

        for i in 0..words {
            let word = &mut self[w0 + i];
            if i == 0 {
                *word &= !((mask << shift) as u32);
                *word |= (val << shift) as u32;
            } else {
                let down = i * 32 - shift;
                *word &= !((mask >> down) as u32);
                *word |= (val >> down) as u32;
            }
        }
    }
}

impl<const N: usize> BitViewable for [u32; N] {
    fn bits(&self) -> usize {
        N * 32
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self[..].get_bit_range_u64(range)
    }
}

impl<const N: usize> BitMutViewable for [u32; N] {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        self[..].set_bit_range_u64(range, val);
    }
}

pub struct BitView<'a, BS: BitViewable + ?Sized> {
    parent: &'a BS,
    range: Range<usize>,
}

impl<'a, BS: BitViewable + ?Sized> BitView<'a, BS> {
    pub fn new(parent: &'a BS) -> Self {
        let len = parent.bits();
        Self {
            parent: parent,
            range: 0..len,
        }
    }

    pub fn new_subset(parent: &'a BS, range: Range<usize>) -> Self {
        assert!(range.end <= parent.bits());
        Self {
            parent: parent,
            range: range,
        }
    }

    fn range_in_parent(&self, range: Range<usize>) -> Range<usize> {
        let new_start = self.range.start + range.start;
        let new_end = self.range.start + range.end;
        assert!(new_end <= self.range.end);
        new_start..new_end
    }
}

impl<'a, BS: BitViewable + ?Sized> BitViewable for BitView<'a, BS> {
    fn bits(&self) -> usize {
        self.range.end - self.range.start
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self.parent.get_bit_range_u64(self.range_in_parent(range))
    }
}

pub struct BitMutView<'a, BS: BitMutViewable + ?Sized> {
    parent: &'a mut BS,
    range: Range<usize>,
}

impl<'a, BS: BitMutViewable + ?Sized> BitMutView<'a, BS> {
    pub fn new(parent: &'a mut BS) -> Self {
        let len = parent.bits();
        Self {
            parent: parent,
            range: 0..len,
        }
    }

    pub fn new_subset(parent: &'a mut BS, range: Range<usize>) -> Self {
        assert!(range.end <= parent.bits());
        Self {
            parent: parent,
            range: range,
        }
    }

    fn range_in_parent(&self, range: Range<usize>) -> Range<usize> {
        let new_start = self.range.start + range.start;
        let new_end = self.range.start + range.end;
        assert!(new_end <= self.range.end);
        new_start..new_end
    }
}

impl<'a, BS: BitMutViewable + ?Sized> BitViewable for BitMutView<'a, BS> {
    fn bits(&self) -> usize {
        self.range.end - self.range.start
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self.parent.get_bit_range_u64(self.range_in_parent(range))
    }
}

impl<'a, BS: BitMutViewable + ?Sized> BitMutViewable for BitMutView<'a, BS> {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        self.parent
            .set_bit_range_u64(self.range_in_parent(range), val);
    }
}

pub trait SetFieldU64 {
    fn set_field_u64(&mut self, range: Range<usize>, val: u64);
}

impl<BS: BitMutViewable> SetFieldU64 for BS {
    fn set_field_u64(&mut self, range: Range<usize>, val: u64) {
        // Check that it fits in the bitfield
        assert!((val & u64_mask_for_bits(range.len())) == val);

        self.set_bit_range_u64(range, val);
    }
}

pub trait GetField {
    fn get_field_u64(&self, range: Range<usize>) -> u64;
    fn get_field_i64(&self, range: Range<usize>) -> i64;

    fn get_bit(&self, bit: usize) -> bool {
        self.get_field_u64(bit..(bit + 1)) != 0
    }
}

impl<BS: BitViewable> GetField for BS {
    fn get_field_u64(&self, range: Range<usize>) -> u64 {
        self.get_bit_range_u64(range)
    }

    fn get_field_i64(&self, range: Range<usize>) -> i64 {
        let bits = range.len();
        let val = self.get_bit_range_u64(range);
        // Sign-extend from the field width
        ((val << (64 - bits)) as i64) >> (64 - bits)
    }
}

pub trait SetField<F> {
    fn set_field(&mut self, range: Range<usize>, val: F);
}

pub trait ToFieldBits {
    fn to_field_bits(self, bits: usize) -> u64;
}

impl<T: SetFieldU64, F: ToFieldBits> SetField<F> for T {
    fn set_field(&mut self, range: Range<usize>, val: F) {
        let bits = range.len();
        self.set_field_u64(range, val.to_field_bits(bits));
    }
}

/// Sets one value split across two disjoint ranges, low half first.
pub trait SetField2<F> {
    fn set_field2(
        &mut self,
        range1: Range<usize>,
        range2: Range<usize>,
        val: F,
    );
}

impl<T: SetFieldU64, F: ToFieldBits> SetField2<F> for T {
    fn set_field2(
        &mut self,
        range1: Range<usize>,
        range2: Range<usize>,
        val: F,
    ) {
        let bits1 = range1.len();
        let bits2 = range2.len();
        let val = val.to_field_bits(bits1 + bits2);
        self.set_field_u64(range1, val & u64_mask_for_bits(bits1));
        self.set_field_u64(range2, val >> bits1);
    }
}

/// Reads one value split across two disjoint ranges, low half first.
pub trait GetField2 {
    fn get_field2_u64(
        &self,
        range1: Range<usize>,
        range2: Range<usize>,
    ) -> u64;
}

impl<T: BitViewable> GetField2 for T {
    fn get_field2_u64(
        &self,
        range1: Range<usize>,
        range2: Range<usize>,
    ) -> u64 {
        let bits1 = range1.len();
        self.get_bit_range_u64(range1) | (self.get_bit_range_u64(range2) << bits1)
    }
}

macro_rules! impl_to_field_bits_for_uN {
    ($typ: ident) => {
        impl ToFieldBits for $typ {
            fn to_field_bits(self, bits: usize) -> u64 {
                let val = u64::from(self);
                assert!((val & u64_mask_for_bits(bits)) == val);
                val
            }
        }
    };
}

impl_to_field_bits_for_uN!(u8);
impl_to_field_bits_for_uN!(u16);
impl_to_field_bits_for_uN!(u32);
impl_to_field_bits_for_uN!(u64);

macro_rules! impl_to_field_bits_for_iN {
    ($typ: ident) => {
        impl ToFieldBits for $typ {
            fn to_field_bits(self, bits: usize) -> u64 {
                let mask = u64_mask_for_bits(bits);

                // It's easier to work with a u64
                let val = i64::from(self) as u64;

                // Check that it fits in the bitfield, taking sign into account
                let sign_mask = !(mask >> 1);
                assert!(
                    (val & sign_mask) == 0 || (val & sign_mask) == sign_mask
                );

                val & mask
            }
        }
    };
}

impl_to_field_bits_for_iN!(i8);
impl_to_field_bits_for_iN!(i16);
impl_to_field_bits_for_iN!(i32);
impl_to_field_bits_for_iN!(i64);

impl ToFieldBits for bool {
    fn to_field_bits(self, bits: usize) -> u64 {
        assert!(bits == 1);
        u64::from(self)
    }
}

impl ToFieldBits for f32 {
    fn to_field_bits(self, bits: usize) -> u64 {
        assert!(bits == 32);
        u64::from(self.to_bits())
    }
}

pub trait SetBit {
    fn set_bit(&mut self, bit: usize, val: bool);
}

impl<T: SetFieldU64> SetBit for T {
    fn set_bit(&mut self, bit: usize, val: bool) {
        self.set_field(bit..(bit + 1), val);
    }
}
