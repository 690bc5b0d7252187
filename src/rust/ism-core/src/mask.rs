// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::ops::BitOrAssign;

use bitvec::array::BitArray;
use bitvec::order::Lsb0;

/// Capacity of a [`SlotMask`]; chains with more slots are rejected by the catalog.
pub const MAX_SLOTS_PER_CHAIN: usize = 128;

const MASK_WORDS: usize = MAX_SLOTS_PER_CHAIN / 64;

/// Fixed-capacity set of slot positions within one chain.
///
/// Bit `i` refers to the `i`-th entry of [`Chain::slots`](crate::Chain::slots),
/// *not* to bit `i` of the scan chain. The two only coincide by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMask(BitArray<[u64; MASK_WORDS], Lsb0>);

impl Default for SlotMask {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotMask {
    pub fn new() -> Self {
        SlotMask(BitArray::new([0; MASK_WORDS]))
    }

    /// Build a mask from slot positions.
    ///
    /// Panics if a position is not below [`MAX_SLOTS_PER_CHAIN`].
    pub fn from_positions(positions: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::new();
        for position in positions {
            mask.insert(position);
        }
        mask
    }

    /// Panics if `position` is not below [`MAX_SLOTS_PER_CHAIN`].
    pub fn insert(&mut self, position: usize) {
        self.0.set(position, true);
    }

    pub fn remove(&mut self, position: usize) {
        if position < MAX_SLOTS_PER_CHAIN {
            self.0.set(position, false);
        }
    }

    pub fn contains(&self, position: usize) -> bool {
        self.0.get(position).is_some_and(|bit| *bit)
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter_ones()
    }

    pub fn len(&self) -> usize {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }
}

impl BitOrAssign for SlotMask {
    fn bitor_assign(&mut self, rhs: Self) {
        for (word, other) in self
            .0
            .as_raw_mut_slice()
            .iter_mut()
            .zip(rhs.0.as_raw_slice())
        {
            *word |= *other;
        }
    }
}
