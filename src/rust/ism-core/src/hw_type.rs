// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Hardware ISM macro variants and their static metadata.
//!
//! Every variant belongs to exactly one [`Category`] and one [`IsmFamily`].
//! Names, versions and slot sizes live in a single declarative table, looked
//! up by discriminant.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::{Error, Result};

/// How a sensor family is driven by the experiment sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsmFamily {
    /// Individually enabled sensors, measured with the per-chain protocol.
    Standard,
    /// Sensors without an enable bit, started in lock-step by the primary controller.
    Mini,
    /// Lightweight noise measurement, also triggered by the primary controller.
    NmeasLite,
    /// Hold-type sensors; experiments are chip specific.
    Hold,
    /// The ISM controller macros themselves.
    Controller,
}

impl IsmFamily {
    pub fn is_primary_controlled(self) -> bool {
        matches!(self, IsmFamily::Mini | IsmFamily::NmeasLite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum HwType {
    RoscCompV1,
    RoscCompV2,
    RoscBinV1,
    RoscBinV2,
    RoscBinV3,
    RoscBinV4,
    RoscBinMetal,
    RoscBinAging,
    AgingV1,
    TsoscA,
    TsoscA2,
    TsoscA3,
    TsoscA4,
    VnsenseDdly,
    NmeasV2,
    NmeasV3,
    NmeasLite,
    NmeasLiteV2,
    HoldV1,
    Mini1Clk,
    Mini2Clk,
    Mini1ClkDbg,
    Mini2ClkDbg,
    CpmV1,
    CpmV2,
    ImonV1,
    ImonV2,
    CtrlV1,
    CtrlV2,
}

#[derive(Debug)]
pub struct HwTypeInfo {
    pub hw_type: HwType,
    pub name: &'static str,
    pub category: Category,
    pub version: u32,
    /// Number of chain bits occupied by one instance.
    pub slot_bits: u32,
    pub family: IsmFamily,
}

const fn entry(
    hw_type: HwType,
    name: &'static str,
    category: Category,
    version: u32,
    slot_bits: u32,
    family: IsmFamily,
) -> HwTypeInfo {
    HwTypeInfo {
        hw_type,
        name,
        category,
        version,
        slot_bits,
        family,
    }
}

use Category as C;
use IsmFamily as F;

/// Indexed by `HwType as usize`.
static HW_TYPES: [HwTypeInfo; 29] = [
    entry(HwType::RoscCompV1, "ROSC_COMP_V1", C::Comp, 1, 32, F::Standard),
    entry(HwType::RoscCompV2, "ROSC_COMP_V2", C::Comp, 2, 40, F::Standard),
    entry(HwType::RoscBinV1, "ROSC_BIN_V1", C::Bin, 1, 32, F::Standard),
    entry(HwType::RoscBinV2, "ROSC_BIN_V2", C::Bin, 2, 32, F::Standard),
    entry(HwType::RoscBinV3, "ROSC_BIN_V3", C::Bin, 3, 40, F::Standard),
    entry(HwType::RoscBinV4, "ROSC_BIN_V4", C::Bin, 4, 48, F::Standard),
    entry(HwType::RoscBinMetal, "ROSC_BIN_METAL", C::Metal, 1, 32, F::Standard),
    entry(HwType::RoscBinAging, "ROSC_BIN_AGING", C::BinAging, 1, 48, F::Standard),
    entry(HwType::AgingV1, "AGING_V1", C::Aging, 1, 40, F::Standard),
    entry(HwType::TsoscA, "TSOSC_A", C::Tsosc, 1, 32, F::Standard),
    entry(HwType::TsoscA2, "TSOSC_A2", C::Tsosc, 2, 40, F::Standard),
    entry(HwType::TsoscA3, "TSOSC_A3", C::Tsosc, 3, 48, F::Standard),
    entry(HwType::TsoscA4, "TSOSC_A4", C::Tsosc, 4, 48, F::Standard),
    entry(HwType::VnsenseDdly, "VNSENSE_DDLY", C::Vnsense, 1, 36, F::Standard),
    entry(HwType::NmeasV2, "NMEAS_V2", C::Nmeas, 2, 56, F::Standard),
    entry(HwType::NmeasV3, "NMEAS_V3", C::Nmeas, 3, 64, F::Standard),
    entry(HwType::NmeasLite, "NMEAS_LITE", C::NmeasLite, 1, 40, F::NmeasLite),
    entry(HwType::NmeasLiteV2, "NMEAS_LITE_V2", C::NmeasLite, 2, 48, F::NmeasLite),
    entry(HwType::HoldV1, "HOLD_V1", C::Hold, 1, 48, F::Hold),
    entry(HwType::Mini1Clk, "MINI_1CLK", C::Mini1Clk, 1, 24, F::Mini),
    entry(HwType::Mini2Clk, "MINI_2CLK", C::Mini2Clk, 1, 32, F::Mini),
    entry(HwType::Mini1ClkDbg, "MINI_1CLK_DBG", C::Mini1ClkDbg, 1, 32, F::Mini),
    entry(HwType::Mini2ClkDbg, "MINI_2CLK_DBG", C::Mini2ClkDbg, 1, 40, F::Mini),
    entry(HwType::CpmV1, "CPM_V1", C::Cpm, 1, 72, F::Standard),
    entry(HwType::CpmV2, "CPM_V2", C::Cpm, 2, 80, F::Standard),
    entry(HwType::ImonV1, "IMON_V1", C::Imon, 1, 64, F::Standard),
    entry(HwType::ImonV2, "IMON_V2", C::Imon, 2, 64, F::Standard),
    entry(HwType::CtrlV1, "ISM_CTRL_V1", C::Ctrl, 1, 16, F::Controller),
    entry(HwType::CtrlV2, "ISM_CTRL_V2", C::Ctrl, 2, 24, F::Controller),
];

impl HwType {
    pub fn all() -> impl Iterator<Item = HwType> {
        HW_TYPES.iter().map(|info| info.hw_type)
    }

    pub fn info(self) -> &'static HwTypeInfo {
        &HW_TYPES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn category(self) -> Category {
        self.info().category
    }

    pub fn version(self) -> u32 {
        self.info().version
    }

    pub fn slot_bits(self) -> u32 {
        self.info().slot_bits
    }

    pub fn family(self) -> IsmFamily {
        self.info().family
    }
}

impl fmt::Display for HwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HwType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HW_TYPES
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(s))
            .map(|info| info.hw_type)
            .ok_or_else(|| Error::bad_parameter(format!("Unknown ISM hardware type '{s}'")))
    }
}

impl TryFrom<String> for HwType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HwType> for &'static str {
    fn from(value: HwType) -> Self {
        value.name()
    }
}
