// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logical sensor categories ("speedo types") and their hardware variants.

use std::fmt;
use std::str::FromStr;

use crate::hw_type::{HwType, IsmFamily};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Comp,
    Bin,
    Metal,
    BinAging,
    Aging,
    Tsosc,
    Vnsense,
    Nmeas,
    NmeasLite,
    Hold,
    Mini1Clk,
    Mini2Clk,
    Mini1ClkDbg,
    Mini2ClkDbg,
    Cpm,
    Imon,
    Ctrl,
}

struct CategoryInfo {
    category: Category,
    name: &'static str,
    family: IsmFamily,
    hw_types: &'static [HwType],
}

/// Indexed by `Category as usize`.
static CATEGORIES: [CategoryInfo; 17] = [
    CategoryInfo {
        category: Category::Comp,
        name: "COMP",
        family: IsmFamily::Standard,
        hw_types: &[HwType::RoscCompV1, HwType::RoscCompV2],
    },
    CategoryInfo {
        category: Category::Bin,
        name: "BIN",
        family: IsmFamily::Standard,
        hw_types: &[
            HwType::RoscBinV1,
            HwType::RoscBinV2,
            HwType::RoscBinV3,
            HwType::RoscBinV4,
        ],
    },
    CategoryInfo {
        category: Category::Metal,
        name: "METAL",
        family: IsmFamily::Standard,
        hw_types: &[HwType::RoscBinMetal],
    },
    CategoryInfo {
        category: Category::BinAging,
        name: "BIN_AGING",
        family: IsmFamily::Standard,
        hw_types: &[HwType::RoscBinAging],
    },
    CategoryInfo {
        category: Category::Aging,
        name: "AGING",
        family: IsmFamily::Standard,
        hw_types: &[HwType::AgingV1],
    },
    CategoryInfo {
        category: Category::Tsosc,
        name: "TSOSC",
        family: IsmFamily::Standard,
        hw_types: &[
            HwType::TsoscA,
            HwType::TsoscA2,
            HwType::TsoscA3,
            HwType::TsoscA4,
        ],
    },
    CategoryInfo {
        category: Category::Vnsense,
        name: "VNSENSE",
        family: IsmFamily::Standard,
        hw_types: &[HwType::VnsenseDdly],
    },
    CategoryInfo {
        category: Category::Nmeas,
        name: "NMEAS",
        family: IsmFamily::Standard,
        hw_types: &[HwType::NmeasV2, HwType::NmeasV3],
    },
    CategoryInfo {
        category: Category::NmeasLite,
        name: "NMEAS_LITE",
        family: IsmFamily::NmeasLite,
        hw_types: &[HwType::NmeasLite, HwType::NmeasLiteV2],
    },
    CategoryInfo {
        category: Category::Hold,
        name: "HOLD",
        family: IsmFamily::Hold,
        hw_types: &[HwType::HoldV1],
    },
    CategoryInfo {
        category: Category::Mini1Clk,
        name: "MINI_1CLK",
        family: IsmFamily::Mini,
        hw_types: &[HwType::Mini1Clk],
    },
    CategoryInfo {
        category: Category::Mini2Clk,
        name: "MINI_2CLK",
        family: IsmFamily::Mini,
        hw_types: &[HwType::Mini2Clk],
    },
    CategoryInfo {
        category: Category::Mini1ClkDbg,
        name: "MINI_1CLK_DBG",
        family: IsmFamily::Mini,
        hw_types: &[HwType::Mini1ClkDbg],
    },
    CategoryInfo {
        category: Category::Mini2ClkDbg,
        name: "MINI_2CLK_DBG",
        family: IsmFamily::Mini,
        hw_types: &[HwType::Mini2ClkDbg],
    },
    CategoryInfo {
        category: Category::Cpm,
        name: "CPM",
        family: IsmFamily::Standard,
        // CPM queries also resolve to the IMON variants.
        // TODO: drop IMON here if the hardware owners confirm the overlap is unintended.
        hw_types: &[
            HwType::CpmV1,
            HwType::CpmV2,
            HwType::ImonV1,
            HwType::ImonV2,
        ],
    },
    CategoryInfo {
        category: Category::Imon,
        name: "IMON",
        family: IsmFamily::Standard,
        hw_types: &[HwType::ImonV1, HwType::ImonV2],
    },
    CategoryInfo {
        category: Category::Ctrl,
        name: "CTRL",
        family: IsmFamily::Controller,
        hw_types: &[HwType::CtrlV1, HwType::CtrlV2],
    },
];

impl Category {
    pub fn all() -> impl Iterator<Item = Category> {
        CATEGORIES.iter().map(|info| info.category)
    }

    fn info(self) -> &'static CategoryInfo {
        &CATEGORIES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Hardware variants a query for this category resolves to.
    pub fn hw_types(self) -> &'static [HwType] {
        self.info().hw_types
    }

    pub fn family(self) -> IsmFamily {
        self.info().family
    }

    /// Whether reads of this category are refused while the catalog is invalid.
    ///
    /// MINI, NMEAS and HOLD reads locate their sensors independently and are
    /// allowed to proceed on a catalog that failed validation.
    pub fn requires_valid_catalog(self) -> bool {
        !matches!(
            self,
            Category::Mini1Clk
                | Category::Mini2Clk
                | Category::Mini1ClkDbg
                | Category::Mini2ClkDbg
                | Category::Nmeas
                | Category::NmeasLite
                | Category::Hold
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = Error;

    /// An unknown category name is a caller bug and reported as a software error.
    fn from_str(s: &str) -> Result<Self> {
        CATEGORIES
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(s))
            .map(|info| info.category)
            .ok_or_else(|| Error::software(format!("Unknown ISM category '{s}'")))
    }
}
