// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Scan chains and the sensor instances placed on them.
//!
//! The catalog is built once per device session from a table handed over by
//! the floorsweeping logic. Apart from the keep-active flags it is read-only
//! afterwards. Integrity is not checked here; see [`crate::validate`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::hw_type::HwType;
use crate::mask::{MAX_SLOTS_PER_CHAIN, SlotMask};
use crate::{Error, Result};

/// Chain subtype mask that matches every chain.
pub const ANY_CHAIN_FLAGS: u32 = u32::MAX;

/// Bus address of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId {
    pub chiplet: u32,
    pub instruction_id: u32,
}

impl ChainId {
    pub fn new(chiplet: u32, instruction_id: u32) -> Self {
        ChainId {
            chiplet,
            instruction_id,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chiplet {} / instruction 0x{:x}",
            self.chiplet, self.instruction_id
        )
    }
}

/// One ISM instance on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSlot {
    pub hw_type: HwType,
    /// First chain bit occupied by the instance.
    pub offset: u32,
    #[serde(default)]
    pub primary_controller: bool,
    #[serde(default)]
    pub keep_active: bool,
}

impl SensorSlot {
    pub fn new(hw_type: HwType, offset: u32) -> Self {
        SensorSlot {
            hw_type,
            offset,
            primary_controller: false,
            keep_active: false,
        }
    }

    /// Mark the slot as the primary controller of the catalog.
    pub fn primary(mut self) -> Self {
        self.primary_controller = true;
        self
    }

    /// Last chain bit occupied by the instance.
    pub fn last_bit(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.hw_type.slot_bits()) - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(flatten)]
    pub id: ChainId,
    /// Total number of bits shifted through the chain.
    pub width: u32,
    /// Chain subtype flag word, matched against [`IsmQuery::chain_flags`](crate::IsmQuery).
    #[serde(default)]
    pub flags: u32,
    /// Sensor instances in ascending offset order.
    pub slots: Vec<SensorSlot>,
}

impl Chain {
    pub fn new(id: ChainId, width: u32, slots: Vec<SensorSlot>) -> Self {
        Chain {
            id,
            width,
            flags: 0,
            slots,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn find_slot(&self, offset: u32) -> Option<usize> {
        self.slots.iter().position(|slot| slot.offset == offset)
    }

    /// Positions of all slots of the given hardware type.
    pub fn mask_of(&self, hw_type: HwType) -> SlotMask {
        SlotMask::from_positions(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.hw_type == hw_type)
                .map(|(idx, _)| idx),
        )
    }

    /// Positions of the slots flagged to stay powered after a read.
    pub fn keep_active_mask(&self) -> SlotMask {
        SlotMask::from_positions(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.keep_active)
                .map(|(idx, _)| idx),
        )
    }
}

/// Position of a slot inside a [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub chain_index: usize,
    pub slot_index: usize,
}

/// Deserialization goes through [`Catalog::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Chain>", into = "Vec<Chain>")]
pub struct Catalog {
    chains: Vec<Chain>,
}

impl TryFrom<Vec<Chain>> for Catalog {
    type Error = Error;

    fn try_from(chains: Vec<Chain>) -> Result<Self> {
        Catalog::new(chains)
    }
}

impl From<Catalog> for Vec<Chain> {
    fn from(catalog: Catalog) -> Self {
        catalog.chains
    }
}

impl Catalog {
    pub fn new(chains: Vec<Chain>) -> Result<Self> {
        for chain in &chains {
            if chain.slots.len() > MAX_SLOTS_PER_CHAIN {
                return Err(Error::bad_parameter(format!(
                    "ISM chain {} holds {} slots, at most {} are supported",
                    chain.id,
                    chain.slots.len(),
                    MAX_SLOTS_PER_CHAIN
                )));
            }
        }
        Ok(Catalog { chains })
    }

    /// Parse the chain table produced by the floorsweeping step.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::bad_parameter(format!("Invalid ISM chain table: {e}")))
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.iter().find(|chain| chain.id == id)
    }

    pub fn slot(&self, location: SlotLocation) -> Option<&SensorSlot> {
        self.chains
            .get(location.chain_index)
            .and_then(|chain| chain.slots.get(location.slot_index))
    }

    /// Number of instances that a query for `category` would touch.
    pub fn sensor_count(&self, category: Category) -> usize {
        let hw_types = category.hw_types();
        self.chains
            .iter()
            .flat_map(|chain| chain.slots.iter())
            .filter(|slot| hw_types.contains(&slot.hw_type))
            .count()
    }

    pub(crate) fn primary_controllers(&self) -> Vec<SlotLocation> {
        self.chains
            .iter()
            .enumerate()
            .flat_map(|(chain_index, chain)| {
                chain
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.primary_controller)
                    .map(move |(slot_index, _)| SlotLocation {
                        chain_index,
                        slot_index,
                    })
            })
            .collect()
    }

    /// The unique slot flagged as primary controller.
    pub fn primary_controller(&self) -> Result<SlotLocation> {
        match self.primary_controllers().as_slice() {
            [location] => Ok(*location),
            locations => Err(Error::software(format!(
                "Expected exactly one primary ISM controller, found {}",
                locations.len()
            ))),
        }
    }

    pub fn set_keep_active(&mut self, id: ChainId, offset: u32, keep_active: bool) -> Result<()> {
        let chain = self
            .chains
            .iter_mut()
            .find(|chain| chain.id == id)
            .ok_or_else(|| Error::bad_parameter(format!("No ISM chain at {id}")))?;
        let slot_index = chain
            .find_slot(offset)
            .ok_or_else(|| Error::bad_parameter(format!("No ISM at bit {offset} of {id}")))?;
        chain.slots[slot_index].keep_active = keep_active;
        Ok(())
    }

    pub fn clear_keep_active(&mut self) {
        self.chains
            .iter_mut()
            .flat_map(|chain| chain.slots.iter_mut())
            .for_each(|slot| slot.keep_active = false);
    }
}
