// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Collaborators the core drives but does not implement.
//!
//! A chip family provides one [`HardwareBackend`] with the register-level
//! codecs of its ISM macros and its calibration defaults. The scan-chain
//! transport and the timing source are separate capabilities so that the
//! same backend can run against hardware, an RTL simulation or a test double.

use bitvec::prelude::*;

use crate::bits::ChainBits;
use crate::catalog::ChainId;
use crate::category::Category;
use crate::hw_type::HwType;
use crate::settings::IsmSettings;

/// Raw chain access. `bits` always has the chain's width; bit 0 is the first chain bit.
pub trait ScanTransport {
    fn scan_write(
        &mut self,
        chain: ChainId,
        width: u32,
        bits: &BitSlice<u32, Lsb0>,
    ) -> anyhow::Result<()>;

    fn scan_read(&mut self, chain: ChainId, width: u32) -> anyhow::Result<ChainBits>;
}

pub trait Timer {
    fn sleep_us(&mut self, us: u64);

    /// `false` on pure simulation models, where no timing margin is needed.
    fn is_hardware_platform(&self) -> bool;
}

/// What a single slot should be programmed to.
#[derive(Debug, Clone, Copy)]
pub struct SlotProgram<'a> {
    /// `false` asserts IDDQ (power-down) for the slot.
    pub power_up: bool,
    pub enable: bool,
    /// Experiment length in reference clock cycles.
    pub duration: u32,
    pub settings: &'a IsmSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawCounts {
    pub raw_count: u64,
    /// Duty-cycle count, only for variants that expose one.
    pub dcd_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Immediate,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Stop after a single experiment.
    #[default]
    Halt,
    /// Restart the experiment until disabled.
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerProgram {
    pub enable: bool,
    pub trigger_source: TriggerSource,
    pub loop_mode: LoopMode,
    pub duration: u32,
}

/// Chip-specific codecs and calibration inputs.
///
/// Encoders must return exactly `hw_type.slot_bits()` bits; decoders receive
/// the slot's bits isolated from the chain, starting at index 0.
pub trait HardwareBackend {
    fn encode_slot(&self, hw_type: HwType, program: &SlotProgram<'_>) -> anyhow::Result<ChainBits>;

    fn decode_counts(&self, hw_type: HwType, bits: &BitSlice<u32, Lsb0>)
    -> anyhow::Result<RawCounts>;

    fn encode_controller(
        &self,
        hw_type: HwType,
        program: &ControllerProgram,
    ) -> anyhow::Result<ChainBits>;

    fn controller_complete(&self, hw_type: HwType, bits: &BitSlice<u32, Lsb0>)
    -> anyhow::Result<bool>;

    fn reference_clock_khz(&self) -> anyhow::Result<u32>;

    fn default_out_div(&self, category: Category) -> u32;

    fn default_osc_idx(&self, category: Category) -> u32;

    fn default_mode(&self, category: Category) -> u32;

    fn default_ref_clk_sel(&self, category: Category) -> u32;

    fn default_duration_clk_cycles(&self) -> u32;
}
