// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Category resolution: which slots of which chains a query touches.

use indexmap::IndexMap;

use crate::catalog::{ANY_CHAIN_FLAGS, Catalog, Chain, ChainId};
use crate::category::Category;
use crate::mask::SlotMask;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsmQuery {
    pub category: Category,
    /// Restrict the query to a single chain.
    pub chain: Option<ChainId>,
    /// Only chains whose subtype flags intersect this mask take part.
    pub chain_flags: u32,
}

impl IsmQuery {
    pub fn new(category: Category) -> Self {
        IsmQuery {
            category,
            chain: None,
            chain_flags: ANY_CHAIN_FLAGS,
        }
    }

    pub fn with_chain(mut self, chain: ChainId) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_chain_flags(mut self, chain_flags: u32) -> Self {
        self.chain_flags = chain_flags;
        self
    }

    fn matches(&self, chain: &Chain) -> bool {
        if self.chain.is_some_and(|id| id != chain.id) {
            return false;
        }
        self.chain_flags == ANY_CHAIN_FLAGS || chain.flags & self.chain_flags != 0
    }
}

/// Participating slots of one chain for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainFilter {
    /// Index into [`Catalog::chains`].
    pub chain_index: usize,
    pub mask: SlotMask,
}

/// Build one [`ChainFilter`] per chain holding sensors of the queried category.
///
/// Chains matched through several hardware variants get a single entry with
/// the union of the per-variant masks. Filters are returned in catalog order.
/// Finding no sensor at all is reported as a bad parameter.
pub fn resolve_filters(catalog: &Catalog, query: &IsmQuery) -> Result<Vec<ChainFilter>> {
    let mut masks: IndexMap<usize, SlotMask> = IndexMap::new();
    for hw_type in query.category.hw_types() {
        for (chain_index, chain) in catalog.chains().iter().enumerate() {
            if !query.matches(chain) {
                continue;
            }
            let mask = chain.mask_of(*hw_type);
            if mask.is_empty() {
                continue;
            }
            *masks.entry(chain_index).or_default() |= mask;
        }
    }
    if masks.is_empty() {
        let scope = match query.chain {
            Some(id) => format!(" on {id}"),
            None => String::new(),
        };
        return Err(Error::bad_parameter(format!(
            "No {} ISMs found{scope}",
            query.category
        )));
    }
    masks.sort_keys();
    Ok(masks
        .into_iter()
        .map(|(chain_index, mask)| ChainFilter { chain_index, mask })
        .collect())
}
