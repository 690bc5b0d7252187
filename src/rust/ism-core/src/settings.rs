// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Per-slot measurement settings and their resolution.
//!
//! Callers pass an ordered list of [`IsmSettings`] rows with every query.
//! Row 0 is the default for all slots; rows 1.. override oscillator index,
//! output divider and mode for the slot whose start bit matches, but only for
//! MINI and NMEAS-lite sensors.

use serde::{Deserialize, Serialize};

use crate::catalog::{Chain, SensorSlot};
use crate::hw_type::IsmFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IsmSettings {
    pub chiplet: u32,
    pub instruction_id: u32,
    /// Chain bit of the slot; the key for override rows.
    pub start_bit: u32,
    /// Hardware version tag of the slot's macro.
    pub version: u32,
    pub osc_idx: u32,
    /// Counts are scaled by `2^out_div`.
    pub out_div: u32,
    pub mode: u32,
    pub duration: u32,
    pub delay: u32,
    pub ref_clk_sel: u32,
    /// Reference clock at the time of the query.
    pub ref_clk_khz: u32,
}

/// Produce the settings a single slot is programmed with.
///
/// `fallback` is used when the caller supplied no rows at all.
pub fn resolve_slot_settings(
    rows: &[IsmSettings],
    fallback: &IsmSettings,
    chain: &Chain,
    slot: &SensorSlot,
    ref_clk_khz: u32,
) -> IsmSettings {
    let mut settings = rows.first().copied().unwrap_or(*fallback);
    settings.chiplet = chain.id.chiplet;
    settings.instruction_id = chain.id.instruction_id;
    settings.start_bit = slot.offset;
    settings.version = slot.hw_type.version();
    settings.ref_clk_khz = ref_clk_khz;

    let override_row = match slot.hw_type.family() {
        IsmFamily::Mini | IsmFamily::NmeasLite => rows
            .iter()
            .skip(1)
            .find(|row| row.start_bit == slot.offset),
        _ => None,
    };
    if let Some(row) = override_row {
        settings.osc_idx = row.osc_idx;
        settings.out_div = row.out_div;
        settings.mode = row.mode;
    }
    settings
}

/// Resolve settings for every slot of a chain, aligned with `chain.slots`.
pub fn resolve_chain_settings(
    rows: &[IsmSettings],
    fallback: &IsmSettings,
    chain: &Chain,
    ref_clk_khz: u32,
) -> Vec<IsmSettings> {
    chain
        .slots
        .iter()
        .map(|slot| resolve_slot_settings(rows, fallback, chain, slot, ref_clk_khz))
        .collect()
}
