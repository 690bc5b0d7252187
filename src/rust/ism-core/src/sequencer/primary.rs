// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Experiments started and stopped by the primary ISM controller.
//!
//! MINI and NMEAS-lite sensors have no individual enable. Their chains are
//! configured first, then the single primary controller of the catalog
//! triggers all of them at once and flags completion.

use indexmap::IndexMap;
use ism_log::{diagnostic, warn};

use super::{ChainPhase, Sequencer};
use crate::backend::{
    ControllerProgram, HardwareBackend, LoopMode, ScanTransport, Timer, TriggerSource,
};
use crate::bits::{ChainBits, copy_bits, pack_chain, unpack_chain};
use crate::catalog::{Catalog, Chain, ChainId, SensorSlot, SlotLocation};
use crate::category::Category;
use crate::extract::IsmReading;
use crate::filter::ChainFilter;
use crate::mask::SlotMask;
use crate::settings::IsmSettings;
use crate::{Error, Result};

#[derive(Debug)]
struct ArmedChain {
    id: ChainId,
    mask: SlotMask,
    settings: Vec<IsmSettings>,
    image: ChainBits,
}

/// A running primary-controller experiment.
///
/// Returned by [`IsmSession::setup_mini_experiment`](crate::IsmSession::setup_mini_experiment)
/// and handed back to the read call. Holds the per-chain settings and the
/// chain images last written, so the read-out and teardown need no other state.
#[derive(Debug)]
pub struct MiniExperiment {
    category: Category,
    duration: u32,
    loop_mode: LoopMode,
    controller: SlotLocation,
    controller_image: ChainBits,
    /// Keyed by catalog index.
    chains: IndexMap<usize, ArmedChain>,
}

impl MiniExperiment {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Chains taking part, in query order.
    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.values().map(|armed| armed.id)
    }
}

/// Inputs of [`Sequencer::arm_primary`].
pub(crate) struct PrimaryRequest {
    pub category: Category,
    pub duration: u32,
    pub loop_mode: LoopMode,
    /// Participating chains with settings aligned to their slots.
    pub chains: Vec<(ChainFilter, Vec<IsmSettings>)>,
    /// Settings of the controller's chain, used when it does not take part.
    pub controller_settings: Vec<IsmSettings>,
}

fn chain_at(catalog: &Catalog, chain_index: usize) -> Result<&Chain> {
    catalog.chains().get(chain_index).ok_or_else(|| {
        Error::software(format!(
            "ISM chain index {chain_index} out of range for a catalog of {} chains",
            catalog.chains().len()
        ))
    })
}

fn controller_of(catalog: &Catalog, location: SlotLocation) -> Result<(&Chain, &SensorSlot)> {
    let chain = chain_at(catalog, location.chain_index)?;
    let slot = catalog
        .slot(location)
        .ok_or_else(|| Error::software("Primary ISM controller slot out of range"))?;
    Ok((chain, slot))
}

impl<B, S, T> Sequencer<'_, B, S, T>
where
    B: HardwareBackend + ?Sized,
    S: ScanTransport + ?Sized,
    T: Timer + ?Sized,
{
    /// Overlay the controller program onto `image` and write the result.
    fn program_controller(
        &mut self,
        chain: &Chain,
        slot: &SensorSlot,
        mut image: ChainBits,
        program: &ControllerProgram,
        phase: ChainPhase,
    ) -> Result<ChainBits> {
        let encoded = self.backend.encode_controller(slot.hw_type, program)?;
        let slot_bits = slot.hw_type.slot_bits() as usize;
        if encoded.len() != slot_bits {
            return Err(Error::software(format!(
                "{} controller encoder returned {} bits, expected {slot_bits}",
                slot.hw_type,
                encoded.len()
            )));
        }
        copy_bits(&encoded, 0, &mut image, slot.offset as usize, slot_bits)?;
        self.write(chain, &image, phase)?;
        Ok(image)
    }

    /// Configure all participating chains and start the primary controller.
    pub(crate) fn arm_primary(
        &mut self,
        catalog: &Catalog,
        request: PrimaryRequest,
    ) -> Result<MiniExperiment> {
        let controller = catalog.primary_controller()?;
        let mut chains = IndexMap::new();
        for (filter, settings) in request.chains {
            let chain = chain_at(catalog, filter.chain_index)?;
            let image = pack_chain(
                self.backend,
                chain,
                filter.mask,
                false,
                request.duration,
                &settings,
            )?;
            self.write(chain, &image, ChainPhase::Armed)?;
            chains.insert(
                filter.chain_index,
                ArmedChain {
                    id: chain.id,
                    mask: filter.mask,
                    settings,
                    image,
                },
            );
        }

        let (controller_chain, controller_slot) = controller_of(catalog, controller)?;
        let base = match chains.get(&controller.chain_index) {
            Some(armed) => armed.image.clone(),
            None => pack_chain(
                self.backend,
                controller_chain,
                controller_chain.keep_active_mask(),
                false,
                0,
                &request.controller_settings,
            )?,
        };
        let program = ControllerProgram {
            enable: true,
            trigger_source: TriggerSource::Immediate,
            loop_mode: request.loop_mode,
            duration: request.duration,
        };
        let controller_image = self.program_controller(
            controller_chain,
            controller_slot,
            base,
            &program,
            ChainPhase::Triggered,
        )?;
        Ok(MiniExperiment {
            category: request.category,
            duration: request.duration,
            loop_mode: request.loop_mode,
            controller,
            controller_image,
            chains,
        })
    }

    pub(crate) fn controller_done(
        &mut self,
        catalog: &Catalog,
        experiment: &MiniExperiment,
    ) -> Result<bool> {
        let (chain, slot) = controller_of(catalog, experiment.controller)?;
        let bits = self.transport.scan_read(chain.id, chain.width)?;
        let slot_len = slot.hw_type.slot_bits() as usize;
        let mut slot_bits = ChainBits::repeat(false, slot_len);
        copy_bits(&bits, slot.offset as usize, &mut slot_bits, 0, slot_len)?;
        let done = self.backend.controller_complete(slot.hw_type, &slot_bits)?;
        diagnostic!("ISM controller on {}: complete = {}", chain.id, done);
        Ok(done)
    }

    /// Sleep for the experiment duration, then poll the controller until the
    /// margin window is used up.
    pub(crate) fn wait_for_controller(
        &mut self,
        catalog: &Catalog,
        experiment: &MiniExperiment,
        ref_clk_khz: u32,
    ) -> Result<()> {
        if ref_clk_khz == 0 {
            return Err(Error::bad_parameter("ISM reference clock reads as 0 kHz"));
        }
        let duration_us = (u64::from(experiment.duration) * 1000)
            .div_ceil(u64::from(ref_clk_khz))
            .max(1);
        let margin_us = (duration_us * u64::from(self.config.controller_margin_percent))
            .div_ceil(100)
            .max(1);
        self.timer.sleep_us(duration_us);

        let mut waited_us = 0;
        loop {
            if self.controller_done(catalog, experiment)? {
                return Ok(());
            }
            if waited_us >= margin_us {
                warn!(
                    "ISM controller did not complete within {} us",
                    duration_us + margin_us
                );
                return Err(Error::Timeout(format!(
                    "{} experiment did not complete within {} us",
                    experiment.category,
                    duration_us + margin_us
                )));
            }
            let step = self
                .config
                .controller_poll_interval_us
                .max(1)
                .min(margin_us - waited_us);
            self.timer.sleep_us(step);
            waited_us += step;
        }
    }

    /// Read and scale the counts of every participating chain.
    pub(crate) fn collect_primary(
        &mut self,
        catalog: &Catalog,
        experiment: &MiniExperiment,
    ) -> Result<Vec<IsmReading>> {
        let mut readings = vec![];
        for (chain_index, armed) in &experiment.chains {
            let chain = chain_at(catalog, *chain_index)?;
            let bits = self.transport.scan_read(chain.id, chain.width)?;
            readings.extend(unpack_chain(
                self.backend,
                chain,
                &bits,
                armed.mask,
                experiment.duration,
                &armed.settings,
            )?);
        }
        Ok(readings)
    }

    /// Power the chains down to their keep-active slots and stop the controller.
    pub(crate) fn teardown_primary(
        &mut self,
        catalog: &Catalog,
        mut experiment: MiniExperiment,
    ) -> Result<()> {
        for (chain_index, armed) in &mut experiment.chains {
            let chain = chain_at(catalog, *chain_index)?;
            let powered_down = pack_chain(
                self.backend,
                chain,
                chain.keep_active_mask(),
                false,
                experiment.duration,
                &armed.settings,
            )?;
            self.write_if_changed(
                chain,
                powered_down,
                &mut armed.image,
                ChainPhase::PoweredDown,
            )?;
        }

        let (controller_chain, controller_slot) = controller_of(catalog, experiment.controller)?;
        let base = match experiment.chains.swap_remove(&experiment.controller.chain_index) {
            Some(armed) => armed.image,
            None => experiment.controller_image,
        };
        let program = ControllerProgram {
            enable: false,
            trigger_source: TriggerSource::Immediate,
            loop_mode: experiment.loop_mode,
            duration: experiment.duration,
        };
        self.program_controller(
            controller_chain,
            controller_slot,
            base,
            &program,
            ChainPhase::PoweredDown,
        )?;
        Ok(())
    }

    /// Combined arm, wait, read-out and teardown.
    pub(crate) fn run_primary(
        &mut self,
        catalog: &Catalog,
        request: PrimaryRequest,
        ref_clk_khz: u32,
    ) -> Result<Vec<IsmReading>> {
        let experiment = self.arm_primary(catalog, request)?;
        self.wait_for_controller(catalog, &experiment, ref_clk_khz)?;
        let readings = self.collect_primary(catalog, &experiment)?;
        self.teardown_primary(catalog, experiment)?;
        Ok(readings)
    }
}
