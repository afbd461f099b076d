// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options in the
//! harness.
//!
//! As in the rest of the harness, a typed `const` object is preferred over
//! scattering `#[cfg(feature = ...)]` through the code: every path is
//! type-checked whichever features are enabled, and the compiler folds the
//! disabled branches away.

/// Data structure holding compile-time configuration options.
///
/// To change the configuration, modify the relevant values in the `CONFIG`
/// constant object defined at the end of this file.
pub(crate) struct Config {
    /// Whether the fault handler must attribute a trap to the armed tracker
    /// and the registered probe before reporting a pass.
    ///
    /// When disabled, any protection fault is reported as a pass, as the
    /// placeholder handler of older images did. Only useful for comparing
    /// results against those images.
    pub(crate) attribute_faults: bool,

    /// Whether scenario state transitions and fault classification are
    /// logged at `Trace` level rather than `Debug`.
    pub(crate) trace_scenarios: bool,

    /// Number of priority levels configured in the scheduler
    /// (`configMAX_PRIORITIES`).
    pub(crate) max_priorities: u8,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined. This is the only location in the harness where `#[cfg(x)]` is
/// used to configure code based on Cargo features.
pub(crate) const CONFIG: Config = Config {
    attribute_faults: !cfg!(feature = "unattributed_faults"),
    trace_scenarios: cfg!(feature = "trace_scenarios"),
    max_priorities: 5,
};
