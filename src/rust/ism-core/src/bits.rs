// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Mapping between per-slot programs/results and the flat chain bit vector.

use bitvec::prelude::*;

use crate::backend::{HardwareBackend, SlotProgram};
use crate::catalog::Chain;
use crate::extract::{IsmReading, scale_count};
use crate::mask::SlotMask;
use crate::settings::IsmSettings;
use crate::{Error, Result};

/// Flat image of a scan chain; bit 0 is the first chain bit.
pub type ChainBits = BitVec<u32, Lsb0>;

/// Copy `len` bits between arbitrary, not necessarily word-aligned, offsets.
pub fn copy_bits(
    src: &BitSlice<u32, Lsb0>,
    src_offset: usize,
    dst: &mut BitSlice<u32, Lsb0>,
    dst_offset: usize,
    len: usize,
) -> Result<()> {
    if src_offset + len > src.len() || dst_offset + len > dst.len() {
        return Err(Error::software(format!(
            "Bit copy of {len} bits from {src_offset} (of {}) to {dst_offset} (of {}) out of range",
            src.len(),
            dst.len()
        )));
    }
    dst[dst_offset..dst_offset + len].copy_from_bitslice(&src[src_offset..src_offset + len]);
    Ok(())
}

fn check_settings_len(chain: &Chain, settings: &[IsmSettings]) -> Result<()> {
    if settings.len() != chain.slots.len() {
        return Err(Error::software(format!(
            "Chain {} has {} slots but {} settings were resolved",
            chain.id,
            chain.slots.len(),
            settings.len()
        )));
    }
    Ok(())
}

/// Build the chain image for one phase of an experiment.
///
/// Slots in `mask` are powered up and programmed with `enable`/`duration`;
/// all other slots are encoded powered down. `settings` is aligned with
/// `chain.slots`.
pub fn pack_chain<B: HardwareBackend + ?Sized>(
    backend: &B,
    chain: &Chain,
    mask: SlotMask,
    enable: bool,
    duration: u32,
    settings: &[IsmSettings],
) -> Result<ChainBits> {
    check_settings_len(chain, settings)?;
    let mut bits = ChainBits::repeat(false, chain.width as usize);
    for (position, (slot, slot_settings)) in chain.slots.iter().zip(settings).enumerate() {
        let selected = mask.contains(position);
        let program = SlotProgram {
            power_up: selected,
            enable: selected && enable,
            duration: if selected { duration } else { 0 },
            settings: slot_settings,
        };
        let encoded = backend.encode_slot(slot.hw_type, &program)?;
        let slot_bits = slot.hw_type.slot_bits() as usize;
        if encoded.len() != slot_bits {
            return Err(Error::software(format!(
                "{} encoder returned {} bits, expected {slot_bits}",
                slot.hw_type,
                encoded.len()
            )));
        }
        copy_bits(&encoded, 0, &mut bits, slot.offset as usize, slot_bits)?;
    }
    Ok(bits)
}

/// Extract and scale the counts of the slots in `mask` from a chain image.
///
/// Results are returned in slot order.
pub fn unpack_chain<B: HardwareBackend + ?Sized>(
    backend: &B,
    chain: &Chain,
    bits: &BitSlice<u32, Lsb0>,
    mask: SlotMask,
    duration: u32,
    settings: &[IsmSettings],
) -> Result<Vec<IsmReading>> {
    if duration == 0 {
        return Err(Error::bad_parameter("ISM experiment duration must be nonzero"));
    }
    check_settings_len(chain, settings)?;
    let mut readings = Vec::with_capacity(mask.len());
    for (position, (slot, slot_settings)) in chain.slots.iter().zip(settings).enumerate() {
        if !mask.contains(position) {
            continue;
        }
        let slot_len = slot.hw_type.slot_bits() as usize;
        let mut slot_bits = ChainBits::repeat(false, slot_len);
        copy_bits(bits, slot.offset as usize, &mut slot_bits, 0, slot_len)?;
        let counts = backend.decode_counts(slot.hw_type, &slot_bits)?;
        let count = scale_count(
            counts.raw_count,
            slot_settings.out_div,
            slot_settings.ref_clk_khz,
            duration,
        )?;
        readings.push(IsmReading {
            chain: chain.id,
            hw_type: slot.hw_type,
            settings: *slot_settings,
            raw_count: counts.raw_count,
            count,
            dcd_count: counts.dcd_count,
        });
    }
    Ok(readings)
}
