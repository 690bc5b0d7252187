// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Timed experiment protocols.
//!
//! Everything here is blocking: transport calls and inter-phase waits are
//! executed strictly in order, one chain after another. A failing transport
//! call aborts the sequence; sensors that were already powered up stay
//! powered.

mod primary;

pub use primary::MiniExperiment;
pub(crate) use primary::PrimaryRequest;

use bitvec::prelude::*;
use ism_log::diagnostic;

use crate::Result;
use crate::backend::{HardwareBackend, ScanTransport, Timer};
use crate::bits::{ChainBits, pack_chain, unpack_chain};
use crate::catalog::Chain;
use crate::config::IsmConfig;
use crate::extract::IsmReading;
use crate::mask::SlotMask;
use crate::settings::IsmSettings;

/// Phases a chain passes through during one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainPhase {
    PoweredUp,
    Armed,
    Triggered,
    Measuring,
    Extracted,
    PoweredDown,
}

/// Wait between trigger and read-out of an ordinary chain.
///
/// The chain clock is assumed rather than measured; see
/// [`IsmConfig::chain_clock_mhz`].
pub(crate) fn measurement_wait_us(duration: u32, config: &IsmConfig, hardware: bool) -> u64 {
    let mut wait_us = u64::from(duration) / u64::from(config.chain_clock_mhz.max(1));
    if hardware {
        wait_us += config.hardware_margin_us;
    }
    wait_us.max(1)
}

pub(crate) struct Sequencer<'a, B: ?Sized, S: ?Sized, T: ?Sized> {
    pub backend: &'a B,
    pub transport: &'a mut S,
    pub timer: &'a mut T,
    pub config: &'a IsmConfig,
}

impl<B, S, T> Sequencer<'_, B, S, T>
where
    B: HardwareBackend + ?Sized,
    S: ScanTransport + ?Sized,
    T: Timer + ?Sized,
{
    fn write(
        &mut self,
        chain: &Chain,
        bits: &BitSlice<u32, Lsb0>,
        phase: ChainPhase,
    ) -> Result<()> {
        diagnostic!("ISM chain {}: {:?}", chain.id, phase);
        self.transport.scan_write(chain.id, chain.width, bits)?;
        Ok(())
    }

    /// Write `bits` unless they equal the image last written to the chain.
    fn write_if_changed(
        &mut self,
        chain: &Chain,
        bits: ChainBits,
        last_written: &mut ChainBits,
        phase: ChainPhase,
    ) -> Result<()> {
        if bits == *last_written {
            diagnostic!("ISM chain {}: {:?} unchanged, write skipped", chain.id, phase);
            return Ok(());
        }
        self.write(chain, &bits, phase)?;
        *last_written = bits;
        Ok(())
    }

    /// Measure the slots of `mask` on an individually enabled chain.
    ///
    /// `settings` is aligned with `chain.slots`. After the read-out only the
    /// slots flagged keep-active remain powered.
    pub(crate) fn run_chain(
        &mut self,
        chain: &Chain,
        mask: SlotMask,
        settings: &[IsmSettings],
        duration: u32,
    ) -> Result<Vec<IsmReading>> {
        let powered_up = pack_chain(self.backend, chain, mask, false, 0, settings)?;
        self.write(chain, &powered_up, ChainPhase::PoweredUp)?;
        let mut last_written = powered_up;
        self.timer.sleep_us(self.config.power_up_settle_us);

        let armed = pack_chain(self.backend, chain, mask, false, duration, settings)?;
        self.write_if_changed(chain, armed, &mut last_written, ChainPhase::Armed)?;
        self.timer.sleep_us(self.config.enable_guard_us);

        let triggered = pack_chain(self.backend, chain, mask, true, duration, settings)?;
        self.write_if_changed(chain, triggered, &mut last_written, ChainPhase::Triggered)?;

        let wait_us = measurement_wait_us(duration, self.config, self.timer.is_hardware_platform());
        diagnostic!(
            "ISM chain {}: {:?} for {} us",
            chain.id,
            ChainPhase::Measuring,
            wait_us
        );
        self.timer.sleep_us(wait_us);

        let bits = self.transport.scan_read(chain.id, chain.width)?;
        let readings = unpack_chain(self.backend, chain, &bits, mask, duration, settings)?;
        diagnostic!(
            "ISM chain {}: {:?} {} counts",
            chain.id,
            ChainPhase::Extracted,
            readings.len()
        );

        let powered_down = pack_chain(
            self.backend,
            chain,
            chain.keep_active_mask(),
            false,
            duration,
            settings,
        )?;
        self.write_if_changed(chain, powered_down, &mut last_written, ChainPhase::PoweredDown)?;
        Ok(readings)
    }
}
