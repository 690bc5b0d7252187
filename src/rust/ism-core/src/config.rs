// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Tunables of the ISM core.
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lower bound of [`IsmConfig::controller_margin_percent`].
pub const MIN_CONTROLLER_MARGIN_PERCENT: u32 = 10;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsmConfig {
    /// Accept chains whose last slot ends one bit short of the declared width.
    pub allow_one_unused_bit: bool,
    /// Accept one more trailing unused bit; combines with `allow_one_unused_bit`.
    pub allow_two_unused_bits: bool,
    /// Wait after power-up before the configuration is written.
    pub power_up_settle_us: u64,
    /// Wait between writing the configuration and enabling the sensors.
    pub enable_guard_us: u64,
    /// Added to the measurement wait unless running on a simulation model.
    pub hardware_margin_us: u64,
    /// Assumed clock of the scan chains. There is no way to query it.
    pub chain_clock_mhz: u32,
    /// Margin added to the primary-controller experiment wait.
    pub controller_margin_percent: u32,
    /// Spacing of completion polls inside the margin window.
    pub controller_poll_interval_us: u64,
}

impl Default for IsmConfig {
    fn default() -> Self {
        IsmConfig {
            allow_one_unused_bit: false,
            allow_two_unused_bits: false,
            power_up_settle_us: 2,
            enable_guard_us: 1,
            hardware_margin_us: 5,
            chain_clock_mhz: 25,
            controller_margin_percent: MIN_CONTROLLER_MARGIN_PERCENT,
            controller_poll_interval_us: 10,
        }
    }
}

impl IsmConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::bad_parameter(format!("Invalid ISM configuration: {e}")))
    }

    /// Number of trailing chain bits the validator tolerates.
    pub fn unused_bit_slack(&self) -> u32 {
        u32::from(self.allow_one_unused_bit) + u32::from(self.allow_two_unused_bits)
    }

    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        if self.controller_margin_percent < MIN_CONTROLLER_MARGIN_PERCENT {
            changes.push(SanitizationChange {
                field: "controller_margin_percent",
                original: self.controller_margin_percent.to_string(),
                sanitized: MIN_CONTROLLER_MARGIN_PERCENT.to_string(),
                reason: format!("Must be at least {MIN_CONTROLLER_MARGIN_PERCENT}%."),
            });
            self.controller_margin_percent = MIN_CONTROLLER_MARGIN_PERCENT;
        }
        if self.chain_clock_mhz == 0 {
            let default = IsmConfig::default().chain_clock_mhz;
            changes.push(SanitizationChange {
                field: "chain_clock_mhz",
                original: "0".to_string(),
                sanitized: default.to_string(),
                reason: "Chain clock cannot be zero.".to_string(),
            });
            self.chain_clock_mhz = default;
        }
        if self.controller_poll_interval_us == 0 {
            changes.push(SanitizationChange {
                field: "controller_poll_interval_us",
                original: "0".to_string(),
                sanitized: "1".to_string(),
                reason: "Poll interval cannot be zero.".to_string(),
            });
            self.controller_poll_interval_us = 1;
        }
        changes
    }
}
