// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Per-device entry point of the ISM core.
//!
//! An [`IsmSession`] owns the catalog of one device together with its
//! hardware collaborators. Category reads run the ordinary protocol for
//! individually enabled sensors and the primary-controller protocol for
//! MINI and NMEAS-lite sensors. MINI experiments can also be split into a
//! setup call returning a [`MiniExperiment`] handle and one or more reads.

use ism_log::{diagnostic, warn};

use crate::backend::{HardwareBackend, LoopMode, ScanTransport, Timer};
use crate::catalog::{Catalog, ChainId};
use crate::category::Category;
use crate::config::IsmConfig;
use crate::extract::IsmReading;
use crate::filter::{IsmQuery, resolve_filters};
use crate::hw_type::IsmFamily;
use crate::sequencer::{MiniExperiment, PrimaryRequest, Sequencer};
use crate::settings::{IsmSettings, resolve_chain_settings};
use crate::validate::validate_catalog;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validity {
    Unchecked,
    Valid,
    Invalid,
}

pub struct IsmSession<B, S, T> {
    catalog: Catalog,
    backend: B,
    transport: S,
    timer: T,
    config: IsmConfig,
    validity: Validity,
}

fn check_duration(duration: u32) -> Result<()> {
    if duration == 0 {
        return Err(Error::bad_parameter("ISM experiment duration must be nonzero"));
    }
    Ok(())
}

fn unsupported(category: Category, what: &str) -> Error {
    warn!("{} ISMs do not support {}", category, what);
    Error::unsupported(format!("{category} ISMs do not support {what}"))
}

impl<B, S, T> IsmSession<B, S, T>
where
    B: HardwareBackend,
    S: ScanTransport,
    T: Timer,
{
    /// Create a session. Out-of-range configuration values are clamped.
    pub fn new(
        catalog: Catalog,
        backend: B,
        transport: S,
        timer: T,
        mut config: IsmConfig,
    ) -> Self {
        for change in config.sanitize() {
            warn!(
                "ISM configuration '{}' changed from {} to {}: {}",
                change.field,
                change.original,
                change.sanitized,
                change.reason
            );
        }
        IsmSession {
            catalog,
            backend,
            transport,
            timer,
            config,
            validity: Validity::Unchecked,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &IsmConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Validate the catalog on first use and report the cached outcome.
    ///
    /// The result is not recomputed after keep-active changes; those do not
    /// affect bit ranges.
    pub fn is_catalog_valid(&mut self) -> bool {
        if self.validity == Validity::Unchecked {
            self.validity = match validate_catalog(&self.catalog, &self.config) {
                Ok(()) => Validity::Valid,
                Err(err) => {
                    warn!("ISM catalog marked invalid: {}", err);
                    Validity::Invalid
                }
            };
        }
        self.validity == Validity::Valid
    }

    fn ensure_valid(&mut self, category: Category) -> Result<()> {
        if !self.is_catalog_valid() && category.requires_valid_catalog() {
            return Err(Error::software(format!(
                "ISM catalog failed validation, refusing to read {category} ISMs"
            )));
        }
        Ok(())
    }

    pub fn default_duration(&self) -> u32 {
        self.backend.default_duration_clk_cycles()
    }

    /// Row-0 settings used when the caller supplies none.
    pub fn default_settings(&self, category: Category) -> IsmSettings {
        IsmSettings {
            osc_idx: self.backend.default_osc_idx(category),
            out_div: self.backend.default_out_div(category),
            mode: self.backend.default_mode(category),
            ref_clk_sel: self.backend.default_ref_clk_sel(category),
            duration: self.default_duration(),
            ..Default::default()
        }
    }

    fn fallback_settings(&self, category: Category, duration: u32) -> IsmSettings {
        IsmSettings {
            duration,
            ..self.default_settings(category)
        }
    }

    /// Resolved settings of every slot a query touches, without any chain access.
    pub fn list_sensors(
        &self,
        query: &IsmQuery,
        rows: &[IsmSettings],
    ) -> Result<Vec<IsmSettings>> {
        let filters = resolve_filters(&self.catalog, query)?;
        let ref_clk_khz = self.backend.reference_clock_khz()?;
        let fallback = self.default_settings(query.category);
        let mut sensors = vec![];
        for filter in filters {
            let chain = &self.catalog.chains()[filter.chain_index];
            let settings = resolve_chain_settings(rows, &fallback, chain, ref_clk_khz);
            sensors.extend(
                filter
                    .mask
                    .positions()
                    .filter_map(|position| settings.get(position).copied()),
            );
        }
        Ok(sensors)
    }

    /// Measure every sensor of an individually enabled category.
    ///
    /// Chains are processed one after another in catalog order.
    pub fn read_category(
        &mut self,
        query: &IsmQuery,
        rows: &[IsmSettings],
        duration: u32,
    ) -> Result<Vec<IsmReading>> {
        check_duration(duration)?;
        match query.category.family() {
            IsmFamily::Standard => {}
            IsmFamily::Mini | IsmFamily::NmeasLite => {
                return Err(unsupported(
                    query.category,
                    "individual reads, use the primary controller experiment",
                ));
            }
            IsmFamily::Hold | IsmFamily::Controller => {
                return Err(unsupported(query.category, "reads on this chip"));
            }
        }
        self.ensure_valid(query.category)?;
        let filters = resolve_filters(&self.catalog, query)?;
        let ref_clk_khz = self.backend.reference_clock_khz()?;
        let fallback = self.fallback_settings(query.category, duration);

        let mut sequencer = Sequencer {
            backend: &self.backend,
            transport: &mut self.transport,
            timer: &mut self.timer,
            config: &self.config,
        };
        let mut readings = vec![];
        for filter in filters {
            let chain = &self.catalog.chains()[filter.chain_index];
            let settings = resolve_chain_settings(rows, &fallback, chain, ref_clk_khz);
            readings.extend(sequencer.run_chain(chain, filter.mask, &settings, duration)?);
        }
        diagnostic!("{} {} ISMs read", readings.len(), query.category);
        Ok(readings)
    }

    fn primary_request(
        &mut self,
        query: &IsmQuery,
        rows: &[IsmSettings],
        duration: u32,
        loop_mode: LoopMode,
    ) -> Result<(PrimaryRequest, u32)> {
        check_duration(duration)?;
        self.ensure_valid(query.category)?;
        let filters = resolve_filters(&self.catalog, query)?;
        let controller = self.catalog.primary_controller()?;
        let ref_clk_khz = self.backend.reference_clock_khz()?;
        let fallback = self.fallback_settings(query.category, duration);

        let chains = filters
            .into_iter()
            .map(|filter| {
                let chain = &self.catalog.chains()[filter.chain_index];
                let settings = resolve_chain_settings(rows, &fallback, chain, ref_clk_khz);
                (filter, settings)
            })
            .collect();
        let controller_chain = &self.catalog.chains()[controller.chain_index];
        let controller_settings =
            resolve_chain_settings(rows, &fallback, controller_chain, ref_clk_khz);
        let request = PrimaryRequest {
            category: query.category,
            duration,
            loop_mode,
            chains,
            controller_settings,
        };
        Ok((request, ref_clk_khz))
    }

    /// Measure a MINI or NMEAS-lite category in one primary-controller experiment.
    pub fn read_primary_category(
        &mut self,
        query: &IsmQuery,
        rows: &[IsmSettings],
        duration: u32,
        loop_mode: LoopMode,
    ) -> Result<Vec<IsmReading>> {
        if !query.category.family().is_primary_controlled() {
            return Err(unsupported(query.category, "primary controller experiments"));
        }
        let (request, ref_clk_khz) = self.primary_request(query, rows, duration, loop_mode)?;
        let mut sequencer = Sequencer {
            backend: &self.backend,
            transport: &mut self.transport,
            timer: &mut self.timer,
            config: &self.config,
        };
        sequencer.run_primary(&self.catalog, request, ref_clk_khz)
    }

    /// Configure and trigger a MINI experiment without waiting for it.
    pub fn setup_mini_experiment(
        &mut self,
        query: &IsmQuery,
        rows: &[IsmSettings],
        duration: u32,
        loop_mode: LoopMode,
    ) -> Result<MiniExperiment> {
        if query.category.family() != IsmFamily::Mini {
            return Err(unsupported(query.category, "split experiments"));
        }
        let (request, _) = self.primary_request(query, rows, duration, loop_mode)?;
        let mut sequencer = Sequencer {
            backend: &self.backend,
            transport: &mut self.transport,
            timer: &mut self.timer,
            config: &self.config,
        };
        sequencer.arm_primary(&self.catalog, request)
    }

    /// Read the counts of a MINI experiment started by [`Self::setup_mini_experiment`].
    ///
    /// Fails with [`Error::Incomplete`] if `experiment` is empty or the
    /// controller has not completed yet; the handle is left in place in the
    /// latter case. Unless `keep_running` is set the chains are powered down,
    /// the controller is stopped and the handle is cleared.
    pub fn read_mini_experiment(
        &mut self,
        experiment: &mut Option<MiniExperiment>,
        keep_running: bool,
    ) -> Result<Vec<IsmReading>> {
        let Some(running) = experiment.as_ref() else {
            return Err(Error::Incomplete(
                "MINI experiment read before setup".to_string(),
            ));
        };
        let mut sequencer = Sequencer {
            backend: &self.backend,
            transport: &mut self.transport,
            timer: &mut self.timer,
            config: &self.config,
        };
        if !sequencer.controller_done(&self.catalog, running)? {
            return Err(Error::Incomplete(format!(
                "{} experiment has not completed yet",
                running.category()
            )));
        }
        let readings = sequencer.collect_primary(&self.catalog, running)?;
        if keep_running {
            return Ok(readings);
        }
        if let Some(finished) = experiment.take() {
            sequencer.teardown_primary(&self.catalog, finished)?;
        }
        Ok(readings)
    }

    /// Keep the slot at `offset` of a chain powered after reads.
    pub fn set_keep_active(
        &mut self,
        chiplet: u32,
        instruction_id: u32,
        offset: u32,
        keep_active: bool,
    ) -> Result<()> {
        self.catalog
            .set_keep_active(ChainId::new(chiplet, instruction_id), offset, keep_active)
    }

    pub fn clear_keep_active(&mut self) {
        self.catalog.clear_keep_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::bits::ChainBits;
    use crate::catalog::{Chain, SensorSlot};
    use crate::fake::{self, FakeBackend, FakeTimer, FakeTransport};
    use crate::hw_type::HwType;

    const BIN: ChainId = ChainId {
        chiplet: 0,
        instruction_id: 0x20,
    };
    const MINI: ChainId = ChainId {
        chiplet: 0,
        instruction_id: 0x40,
    };
    const CTRL: ChainId = ChainId {
        chiplet: 0,
        instruction_id: 0x50,
    };

    type TestSession = IsmSession<FakeBackend, FakeTransport, FakeTimer>;

    fn chains(bin_width: u32) -> Vec<Chain> {
        vec![
            Chain::new(
                BIN,
                bin_width,
                vec![
                    SensorSlot::new(HwType::RoscBinV1, 0),
                    SensorSlot::new(HwType::RoscBinV1, 32),
                ],
            ),
            Chain::new(
                MINI,
                64,
                vec![
                    SensorSlot::new(HwType::Mini2Clk, 0),
                    SensorSlot::new(HwType::Mini2Clk, 32),
                ],
            ),
            Chain::new(CTRL, 16, vec![SensorSlot::new(HwType::CtrlV1, 0).primary()]),
        ]
    }

    fn session_with(chains: Vec<Chain>) -> TestSession {
        let mut transport = FakeTransport::default();
        let bin_counts = [(0, HwType::RoscBinV1, 500), (32, HwType::RoscBinV1, 600)];
        transport
            .read_back
            .insert(BIN, fake::chain_with_counts(64, &bin_counts));
        let mini_counts = [(0, HwType::Mini2Clk, 500), (32, HwType::Mini2Clk, 600)];
        transport
            .read_back
            .insert(MINI, fake::chain_with_counts(64, &mini_counts));
        IsmSession::new(
            Catalog::new(chains).unwrap(),
            FakeBackend::default(),
            transport,
            FakeTimer::default(),
            IsmConfig::default(),
        )
    }

    fn session() -> TestSession {
        session_with(chains(64))
    }

    fn complete_controller(session: &mut TestSession) {
        let mut bits = ChainBits::repeat(false, 16);
        fake::set_controller_done(&mut bits, 0);
        session.transport_mut().read_back.insert(CTRL, bits);
    }

    fn counts(readings: &[IsmReading]) -> Vec<u64> {
        readings.iter().map(|r| r.count).collect()
    }

    #[test]
    fn test_read_category_end_to_end() {
        let mut session = session();
        let readings = session
            .read_category(&IsmQuery::new(Category::Bin), &[], 1000)
            .unwrap();
        assert_eq!(counts(&readings), vec![125000, 150000]);
        assert_eq!(readings[0].settings.start_bit, 0);
        assert_eq!(readings[1].settings.start_bit, 32);
        assert_eq!(readings[1].settings.ref_clk_khz, 25000);
        assert_eq!(readings[0].settings.duration, 1000);
        assert!(session.transport().writes_to(MINI).is_empty());
        assert!(session.is_catalog_valid());
    }

    #[test]
    fn test_keep_active_isolation() {
        let mut session = session();
        session.set_keep_active(0, 0x20, 32, true).unwrap();
        session
            .read_category(&IsmQuery::new(Category::Bin), &[], 1000)
            .unwrap();
        let last = session.transport().last_write(BIN).unwrap();
        assert!(!fake::is_powered(last, 0));
        assert!(fake::is_powered(last, 32));

        session.clear_keep_active();
        session
            .read_category(&IsmQuery::new(Category::Bin), &[], 1000)
            .unwrap();
        let last = session.transport().last_write(BIN).unwrap();
        assert!(!fake::is_powered(last, 32));
    }

    #[test]
    fn test_set_keep_active_unknown_target() {
        let mut session = session();
        let err = session.set_keep_active(7, 0x20, 0, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        let err = session.set_keep_active(0, 0x20, 5, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn test_zero_duration() {
        let mut session = session();
        let err = session
            .read_category(&IsmQuery::new(Category::Bin), &[], 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        assert!(session.transport().writes.is_empty());
    }

    #[test]
    fn test_invalid_catalog_refuses_ordinary_reads() {
        // Two trailing bits unused on the BIN chain.
        let mut session = session_with(chains(66));
        let err = session
            .read_category(&IsmQuery::new(Category::Bin), &[], 1000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SoftwareError);
        assert!(session.transport().writes.is_empty());
        assert!(!session.is_catalog_valid());

        // MINI sensors are still reachable.
        complete_controller(&mut session);
        let readings = session
            .read_primary_category(&IsmQuery::new(Category::Mini2Clk), &[], 1000, LoopMode::Halt)
            .unwrap();
        assert_eq!(counts(&readings), vec![125000, 150000]);
    }

    #[test]
    fn test_slack_configuration() {
        let mut transport = FakeTransport::default();
        transport
            .read_back
            .insert(BIN, ChainBits::repeat(false, 66));
        let config = IsmConfig {
            allow_one_unused_bit: true,
            allow_two_unused_bits: true,
            ..Default::default()
        };
        let mut session = IsmSession::new(
            Catalog::new(chains(66)).unwrap(),
            FakeBackend::default(),
            transport,
            FakeTimer::default(),
            config,
        );
        assert!(session.is_catalog_valid());
        assert!(
            session
                .read_category(&IsmQuery::new(Category::Bin), &[], 1000)
                .is_ok()
        );
    }

    #[test]
    fn test_unsupported_reads() {
        let mut session = session();
        for category in [Category::Mini2Clk, Category::NmeasLite, Category::Hold, Category::Ctrl] {
            let err = session
                .read_category(&IsmQuery::new(category), &[], 1000)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported, "{category}");
        }
        let err = session
            .read_primary_category(&IsmQuery::new(Category::Bin), &[], 1000, LoopMode::Halt)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = session
            .setup_mini_experiment(&IsmQuery::new(Category::NmeasLite), &[], 1000, LoopMode::Halt)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(session.transport().writes.is_empty());
    }

    #[test]
    fn test_empty_category() {
        let mut session = session();
        let err = session
            .read_category(&IsmQuery::new(Category::Tsosc), &[], 1000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn test_mini_override_rows() {
        let mut session = session();
        complete_controller(&mut session);
        let rows = [
            IsmSettings::default(),
            IsmSettings {
                start_bit: 32,
                out_div: 1,
                osc_idx: 3,
                ..Default::default()
            },
        ];
        let readings = session
            .read_primary_category(&IsmQuery::new(Category::Mini2Clk), &rows, 1000, LoopMode::Halt)
            .unwrap();
        assert_eq!(counts(&readings), vec![125000, 300000]);
        assert_eq!(readings[1].settings.osc_idx, 3);
        assert_eq!(readings[0].settings.osc_idx, 0);
    }

    #[test]
    fn test_nmeas_lite_primary_read() {
        const NMEAS_LITE: ChainId = ChainId {
            chiplet: 1,
            instruction_id: 0x44,
        };
        let mut chains = chains(64);
        chains.push(Chain::new(
            NMEAS_LITE,
            88,
            vec![
                SensorSlot::new(HwType::NmeasLite, 0),
                SensorSlot::new(HwType::NmeasLiteV2, 40),
            ],
        ));
        let mut session = session_with(chains);
        let nmeas_counts = [(0, HwType::NmeasLite, 500), (40, HwType::NmeasLiteV2, 600)];
        session
            .transport_mut()
            .read_back
            .insert(NMEAS_LITE, fake::chain_with_counts(88, &nmeas_counts));
        complete_controller(&mut session);
        let rows = [
            IsmSettings::default(),
            IsmSettings {
                start_bit: 40,
                out_div: 1,
                ..Default::default()
            },
        ];
        let readings = session
            .read_primary_category(
                &IsmQuery::new(Category::NmeasLite),
                &rows,
                1000,
                LoopMode::Halt,
            )
            .unwrap();
        assert_eq!(counts(&readings), vec![125000, 300000]);
        assert_eq!(readings[1].hw_type, HwType::NmeasLiteV2);
        assert_eq!(readings[1].settings.out_div, 1);
        assert!(session.transport().writes_to(MINI).is_empty());
        // Armed, then powered down after the read.
        let writes = session.transport().writes_to(NMEAS_LITE);
        assert_eq!(writes.len(), 2);
        assert!(fake::is_powered(writes[0], 40));
        assert!(!fake::is_powered(writes[1], 40));
        let ctrl_writes = session.transport().writes_to(CTRL);
        assert!(fake::is_enabled(ctrl_writes[0], 0));
        assert!(!fake::is_enabled(ctrl_writes[1], 0));
    }

    #[test]
    fn test_split_mini_experiment() {
        let mut session = session();
        let query = IsmQuery::new(Category::Mini2Clk);

        let mut experiment = None;
        let err = session
            .read_mini_experiment(&mut experiment, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Incomplete);

        experiment = Some(
            session
                .setup_mini_experiment(&query, &[], 1000, LoopMode::Loop)
                .unwrap(),
        );
        assert!(fake::controller_loops(
            session.transport().last_write(CTRL).unwrap(),
            0
        ));

        // Controller has not flagged completion yet.
        let err = session
            .read_mini_experiment(&mut experiment, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Incomplete);
        assert!(experiment.is_some());

        complete_controller(&mut session);
        let readings = session.read_mini_experiment(&mut experiment, true).unwrap();
        assert_eq!(counts(&readings), vec![125000, 150000]);
        assert!(experiment.is_some());
        assert_eq!(session.transport().writes_to(CTRL).len(), 1);

        let readings = session.read_mini_experiment(&mut experiment, false).unwrap();
        assert_eq!(readings.len(), 2);
        assert!(experiment.is_none());
        let ctrl_writes = session.transport().writes_to(CTRL);
        assert_eq!(ctrl_writes.len(), 2);
        assert!(!fake::is_enabled(ctrl_writes[1], 0));
        assert!(!fake::is_powered(session.transport().last_write(MINI).unwrap(), 0));
        // No waits on the split path.
        assert!(session.timer().sleeps.is_empty());
    }

    #[test]
    fn test_list_sensors() {
        let session = session();
        let sensors = session
            .list_sensors(&IsmQuery::new(Category::Mini2Clk), &[])
            .unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[1].instruction_id, 0x40);
        assert_eq!(sensors[1].start_bit, 32);
        assert_eq!(sensors[0].duration, 1000);
        assert!(session.transport().reads.is_empty());
    }

    #[test]
    fn test_default_settings() {
        let session = session();
        assert_eq!(session.default_settings(Category::Tsosc).out_div, 1);
        assert_eq!(session.default_settings(Category::Bin).out_div, 0);
        assert_eq!(session.default_duration(), 1000);
    }

    #[test]
    fn test_config_is_sanitized() {
        let config = IsmConfig {
            controller_margin_percent: 0,
            ..Default::default()
        };
        let session = IsmSession::new(
            Catalog::new(chains(64)).unwrap(),
            FakeBackend::default(),
            FakeTransport::default(),
            FakeTimer::default(),
            config,
        );
        assert_eq!(session.config().controller_margin_percent, 10);
    }
}
