// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the hardware collaborators.
//!
//! Slot layout used by [`FakeBackend`]:
//! bit 0 IDDQ (set when powered down), bit 1 enable, bits 2.. a count field of
//! up to 32 bits. The encoder stores the duration in the count field.
//! Controllers use bit 0 IDDQ, bit 1 enable, bit 2 loop, bit 3 done,
//! bit 4 external trigger.

use std::collections::HashMap;

use anyhow::bail;
use bitvec::prelude::*;

use crate::backend::{
    ControllerProgram, HardwareBackend, LoopMode, RawCounts, ScanTransport, SlotProgram, Timer,
    TriggerSource,
};
use crate::bits::ChainBits;
use crate::catalog::ChainId;
use crate::category::Category;
use crate::hw_type::HwType;

const COUNT_FIELD_BITS: usize = 32;
pub const CONTROLLER_DONE_BIT: usize = 3;

fn count_field(hw_type: HwType) -> std::ops::Range<usize> {
    let end = (hw_type.slot_bits() as usize).min(2 + COUNT_FIELD_BITS);
    2..end
}

pub fn is_powered(chain: &BitSlice<u32, Lsb0>, offset: usize) -> bool {
    !chain[offset]
}

pub fn is_enabled(chain: &BitSlice<u32, Lsb0>, offset: usize) -> bool {
    chain[offset + 1]
}

pub fn controller_loops(chain: &BitSlice<u32, Lsb0>, offset: usize) -> bool {
    chain[offset + 2]
}

/// Chain image with powered-up slots holding the given raw counts.
pub fn chain_with_counts(width: usize, slots: &[(usize, HwType, u64)]) -> ChainBits {
    let mut chain = ChainBits::repeat(false, width);
    for (offset, hw_type, count) in slots {
        let field = count_field(*hw_type);
        chain[offset + field.start..offset + field.end].store_le(*count);
    }
    chain
}

pub fn set_controller_done(chain: &mut ChainBits, offset: usize) {
    chain.set(offset + CONTROLLER_DONE_BIT, true);
}

#[derive(Debug, Clone)]
pub struct FakeBackend {
    pub ref_clk_khz: u32,
    pub default_duration: u32,
    /// Make the slot encoder return one bit too many.
    pub encode_width_error: bool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        FakeBackend {
            ref_clk_khz: 25000,
            default_duration: 1000,
            encode_width_error: false,
        }
    }
}

impl HardwareBackend for FakeBackend {
    fn encode_slot(&self, hw_type: HwType, program: &SlotProgram<'_>) -> anyhow::Result<ChainBits> {
        let mut bits = ChainBits::repeat(false, hw_type.slot_bits() as usize);
        bits.set(0, !program.power_up);
        bits.set(1, program.enable);
        if program.power_up {
            let field = count_field(hw_type);
            bits[field].store_le(u64::from(program.duration));
        }
        if self.encode_width_error {
            bits.push(false);
        }
        Ok(bits)
    }

    fn decode_counts(
        &self,
        hw_type: HwType,
        bits: &BitSlice<u32, Lsb0>,
    ) -> anyhow::Result<RawCounts> {
        let raw_count: u64 = bits[count_field(hw_type)].load_le();
        let dcd_count = match hw_type {
            HwType::NmeasV2 | HwType::NmeasV3 => Some(raw_count / 2),
            _ => None,
        };
        Ok(RawCounts {
            raw_count,
            dcd_count,
        })
    }

    fn encode_controller(
        &self,
        hw_type: HwType,
        program: &ControllerProgram,
    ) -> anyhow::Result<ChainBits> {
        if !matches!(hw_type, HwType::CtrlV1 | HwType::CtrlV2) {
            bail!("{hw_type} is not a controller");
        }
        let mut bits = ChainBits::repeat(false, hw_type.slot_bits() as usize);
        bits.set(0, !program.enable);
        bits.set(1, program.enable);
        bits.set(2, program.loop_mode == LoopMode::Loop);
        bits.set(4, program.trigger_source == TriggerSource::External);
        Ok(bits)
    }

    fn controller_complete(
        &self,
        _hw_type: HwType,
        bits: &BitSlice<u32, Lsb0>,
    ) -> anyhow::Result<bool> {
        Ok(bits[CONTROLLER_DONE_BIT])
    }

    fn reference_clock_khz(&self) -> anyhow::Result<u32> {
        Ok(self.ref_clk_khz)
    }

    fn default_out_div(&self, category: Category) -> u32 {
        match category {
            Category::Tsosc => 1,
            _ => 0,
        }
    }

    fn default_osc_idx(&self, _category: Category) -> u32 {
        0
    }

    fn default_mode(&self, _category: Category) -> u32 {
        0
    }

    fn default_ref_clk_sel(&self, _category: Category) -> u32 {
        0
    }

    fn default_duration_clk_cycles(&self) -> u32 {
        self.default_duration
    }
}

/// Records every transport access. Reads return the configured read-back
/// image for a chain, else the last image written to it.
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub writes: Vec<(ChainId, ChainBits)>,
    pub reads: Vec<ChainId>,
    pub read_back: HashMap<ChainId, ChainBits>,
    pub fail_writes: bool,
}

impl FakeTransport {
    pub fn writes_to(&self, chain: ChainId) -> Vec<&ChainBits> {
        self.writes
            .iter()
            .filter(|(id, _)| *id == chain)
            .map(|(_, bits)| bits)
            .collect()
    }

    pub fn last_write(&self, chain: ChainId) -> Option<&ChainBits> {
        self.writes_to(chain).pop()
    }
}

impl ScanTransport for FakeTransport {
    fn scan_write(
        &mut self,
        chain: ChainId,
        width: u32,
        bits: &BitSlice<u32, Lsb0>,
    ) -> anyhow::Result<()> {
        if self.fail_writes {
            bail!("scan write to {chain} failed");
        }
        if bits.len() != width as usize {
            bail!("scan write of {} bits to a {width} bit chain", bits.len());
        }
        self.writes.push((chain, bits.to_bitvec()));
        Ok(())
    }

    fn scan_read(&mut self, chain: ChainId, width: u32) -> anyhow::Result<ChainBits> {
        self.reads.push(chain);
        let bits = match self.read_back.get(&chain) {
            Some(bits) => bits.clone(),
            None => self
                .last_write(chain)
                .cloned()
                .unwrap_or_else(|| ChainBits::repeat(false, width as usize)),
        };
        Ok(bits)
    }
}

#[derive(Debug, Default)]
pub struct FakeTimer {
    pub sleeps: Vec<u64>,
    pub hardware: bool,
}

impl Timer for FakeTimer {
    fn sleep_us(&mut self, us: u64) {
        self.sleeps.push(us);
    }

    fn is_hardware_platform(&self) -> bool {
        self.hardware
    }
}
