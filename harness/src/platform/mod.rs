// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interfaces to the collaborators a scenario runs on top of.
//!
//! None of these are implemented in this crate. A board implements them over
//! the real scheduler, MPU and UART; `harness-sim` implements them on the
//! host so the scenarios can run under `cargo test`.

use core::ops::Range;

pub mod machine;
pub mod mpu;
pub mod scheduler;

pub use self::machine::{Machine, UserContext};
pub use self::scheduler::{Priority, RestrictedScheduler};

/// Address ranges the linker script publishes to the harness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Memory-mapped peripherals, including the console UART.
    /// `[__peripherals_start__, __peripherals_end__)`.
    pub peripherals: Range<usize>,
    /// Stack used by privileged exception and kernel code.
    /// `[__svc_stack_start__, __svc_stack_end__)`.
    pub system_stack: Range<usize>,
}
