// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Control core for on-die in-silicon measurement (ISM) macros.
//!
//! The crate locates every sensor instance of a logical [`Category`] on the
//! scan chains described by a [`Catalog`], programs them through a
//! [`HardwareBackend`] codec and a [`ScanTransport`], runs the timed
//! measurement protocol and converts the raw oscillator counts into
//! calibrated frequency values.
//!
//! [`IsmSession`] is the entry point; the remaining modules are public so
//! that hosts can inspect the catalog, build queries and drive the
//! bit-packing engine directly in tests.

pub mod backend;
pub mod bits;
pub mod catalog;
pub mod category;
pub mod config;
pub mod extract;
pub mod filter;
pub mod hw_type;
pub mod mask;
mod sequencer;
pub mod session;
pub mod settings;
pub mod validate;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt::Display;

pub use backend::{
    ControllerProgram, HardwareBackend, LoopMode, RawCounts, ScanTransport, SlotProgram, Timer,
    TriggerSource,
};
pub use bits::ChainBits;
pub use catalog::{Catalog, Chain, ChainId, SensorSlot, SlotLocation};
pub use category::Category;
pub use config::IsmConfig;
pub use extract::IsmReading;
pub use filter::{ChainFilter, IsmQuery};
pub use hw_type::{HwType, IsmFamily};
pub use mask::SlotMask;
pub use sequencer::MiniExperiment;
pub use session::IsmSession;
pub use settings::IsmSettings;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadParameter,
    SoftwareError,
    Unsupported,
    Timeout,
    Incomplete,
    External,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid request from the caller, e.g. zero duration or an empty category.
    #[error("Bad parameter: {0}")]
    BadParameter(String),
    /// Malformed catalog or an internal inconsistency.
    #[error("Software error: {0}")]
    SoftwareError(String),
    /// Category or experiment type not implemented for this chip.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// The primary controller never reported completion.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// A split experiment was read before it was set up or before it completed.
    #[error("Experiment incomplete: {0}")]
    Incomplete(String),
    /// Failure reported by the transport or a backend codec.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl Error {
    pub fn bad_parameter(msg: impl Display) -> Self {
        Error::BadParameter(msg.to_string())
    }

    pub fn software(msg: impl Display) -> Self {
        Error::SoftwareError(msg.to_string())
    }

    pub fn unsupported(msg: impl Display) -> Self {
        Error::Unsupported(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadParameter(_) => ErrorKind::BadParameter,
            Error::SoftwareError(_) => ErrorKind::SoftwareError,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Incomplete(_) => ErrorKind::Incomplete,
            Error::External(_) => ErrorKind::External,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
