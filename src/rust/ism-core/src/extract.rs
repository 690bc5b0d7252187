// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Conversion of raw oscillator counts into calibrated frequency values.

use crate::catalog::ChainId;
use crate::hw_type::HwType;
use crate::settings::IsmSettings;
use crate::{Error, Result};

/// Outcome of one slot measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsmReading {
    pub chain: ChainId,
    pub hw_type: HwType,
    /// Settings the slot was programmed with.
    pub settings: IsmSettings,
    pub raw_count: u64,
    /// Oscillator frequency in tenths of Hz.
    pub count: u64,
    pub dcd_count: Option<u64>,
}

/// Scale a raw cycle count to tenths of Hz.
///
/// `count = raw_count * 2^out_div * ref_clk_khz * 10 / duration`, where
/// `duration` is in reference clock cycles.
pub fn scale_count(raw_count: u64, out_div: u32, ref_clk_khz: u32, duration: u32) -> Result<u64> {
    if duration == 0 {
        return Err(Error::bad_parameter("ISM experiment duration must be nonzero"));
    }
    if out_div >= 64 {
        return Err(Error::bad_parameter(format!(
            "ISM output divider {out_div} out of range"
        )));
    }
    let factor = (1u128 << out_div) * u128::from(ref_clk_khz) * 10;
    let scaled = u128::from(raw_count)
        .checked_mul(factor)
        .map(|value| value / u128::from(duration))
        .and_then(|value| u64::try_from(value).ok())
        .ok_or_else(|| {
            Error::software(format!(
                "ISM count overflow: raw {raw_count}, divider {out_div}, clock {ref_clk_khz} kHz"
            ))
        })?;
    Ok(scaled)
}
