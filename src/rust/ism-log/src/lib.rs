// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logging macros shared by the ISM crates.
//!
//! All records are emitted through the [`log`] facade with a target of the form
//! `ism.rust::<module path>`, so a host application can route or filter the
//! measurement core independently of its own logging.

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        ism_log::_log::info!(target: concat!("ism.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ism_log::_log::info!(target: concat!("ism.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        ism_log::_log::warn!(target: concat!("ism.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ism_log::_log::warn!(target: concat!("ism.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! error {
    ($msg:literal, $($arg:tt)+) => {
        ism_log::_log::error!(target: concat!("ism.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ism_log::_log::error!(target: concat!("ism.rust::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at debug level if diagnostics logging is enabled.
///
/// Used for per-phase sequencing details (skipped writes, wait times, polls)
/// that are too chatty for regular runs.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if ism_log::is_diagnostics_enabled() {
             ism_log::_log::debug!(target: concat!("ism.rust::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if ism_log::is_diagnostics_enabled() {
            ism_log::_log::debug!(target: concat!("ism.rust::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// Meant to be called once by the host before the first measurement.
/// No concrete logger is installed here; the host owns the `log` backend.
/// This only switches the sequencing diagnostics on or off.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}
