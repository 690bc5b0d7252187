// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Catalog integrity checks.
//!
//! * No two chains share a (chiplet, instruction id) address.
//!
//! * Slots of a chain are stored in ascending order and do not overlap.
//!
//! * The last occupied bit of a chain is its width minus one, give or take
//!   the configured unused-bit slack.
//!
//! * Exactly one slot of the whole catalog is the primary controller.

use std::collections::HashMap;
use std::fmt;

use ism_log::error;

use crate::catalog::{Catalog, ChainId};
use crate::config::IsmConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogProblem {
    DuplicateChain {
        first_index: usize,
        duplicate_index: usize,
        id: ChainId,
    },
    SlotOverlap {
        chain_index: usize,
        slot_index: usize,
        offset: u32,
        occupied_until: u64,
    },
    ChainSize {
        chain_index: usize,
        last_bit: u64,
        width: u32,
    },
    PrimaryControllerCount {
        count: usize,
    },
}

impl fmt::Display for CatalogProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogProblem::DuplicateChain {
                first_index,
                duplicate_index,
                id,
            } => write!(
                f,
                "ISM chain {duplicate_index} duplicates chain {first_index} at {id}"
            ),
            CatalogProblem::SlotOverlap {
                chain_index,
                slot_index,
                offset,
                occupied_until,
            } => write!(
                f,
                "ISM chain {chain_index} slot {slot_index}: offset = {offset} overlaps \
                 bits occupied up to {occupied_until}"
            ),
            CatalogProblem::ChainSize {
                chain_index,
                last_bit,
                width,
            } => {
                let kind = if *last_bit + 1 > u64::from(*width) {
                    "oversized"
                } else {
                    "undersized"
                };
                write!(
                    f,
                    "ISM chain {chain_index} {kind}: width = {width}, \
                     last occupied bit = {last_bit}"
                )
            }
            CatalogProblem::PrimaryControllerCount { count } => write!(
                f,
                "Expected exactly one primary ISM controller, found {count}"
            ),
        }
    }
}

/// Collect every integrity violation of the catalog.
pub fn find_problems(catalog: &Catalog, unused_bit_slack: u32) -> Vec<CatalogProblem> {
    let mut problems = vec![];

    let mut seen: HashMap<ChainId, usize> = HashMap::new();
    for (chain_index, chain) in catalog.chains().iter().enumerate() {
        if let Some(first_index) = seen.get(&chain.id) {
            problems.push(CatalogProblem::DuplicateChain {
                first_index: *first_index,
                duplicate_index: chain_index,
                id: chain.id,
            });
        } else {
            seen.insert(chain.id, chain_index);
        }
    }

    for (chain_index, chain) in catalog.chains().iter().enumerate() {
        let mut occupied_until: Option<u64> = None;
        for (slot_index, slot) in chain.slots.iter().enumerate() {
            match occupied_until {
                Some(max_bit) if u64::from(slot.offset) <= max_bit => {
                    problems.push(CatalogProblem::SlotOverlap {
                        chain_index,
                        slot_index,
                        offset: slot.offset,
                        occupied_until: max_bit,
                    });
                }
                _ => {}
            }
            occupied_until = Some(occupied_until.map_or(slot.last_bit(), |max_bit| {
                max_bit.max(slot.last_bit())
            }));
        }
        if let Some(last_bit) = occupied_until {
            let width = u64::from(chain.width);
            let oversized = last_bit + 1 > width;
            let undersized = width > last_bit + 1 + u64::from(unused_bit_slack);
            if oversized || undersized {
                problems.push(CatalogProblem::ChainSize {
                    chain_index,
                    last_bit,
                    width: chain.width,
                });
            }
        }
    }

    let count = catalog.primary_controllers().len();
    if count != 1 {
        problems.push(CatalogProblem::PrimaryControllerCount { count });
    }
    problems
}

/// Validate the catalog, logging every violation.
pub fn validate_catalog(catalog: &Catalog, config: &IsmConfig) -> Result<()> {
    let problems = find_problems(catalog, config.unused_bit_slack());
    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        error!("{}", problem);
    }
    Err(Error::software(format!(
        "ISM catalog failed validation with {} problem(s), first: {}",
        problems.len(),
        problems[0]
    )))
}
