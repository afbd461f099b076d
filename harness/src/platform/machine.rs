// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Services available at each privilege level.

use crate::debug::DiagnosticWriter;
use crate::scenario::Outcome;

/// Services available to privileged code: the scenario driver and the fault
/// handler.
pub trait Machine {
    type Console: DiagnosticWriter;

    /// The diagnostic console.
    fn console(&self) -> &Self::Console;

    /// Whether the protection hardware is currently enabled (SCTLR.M on
    /// Cortex-R).
    fn protection_enabled(&self) -> bool;

    /// Stop the scenario for good.
    ///
    /// On hardware this spins forever so the console output is the last thing
    /// the scenario does. Implementations may record `outcome` first.
    fn halt(&self, outcome: Outcome) -> !;
}

/// Operations a restricted task can attempt.
///
/// Every memory operation here may trap. When the protection hardware refuses
/// the access the call does not return unless the fault handler chose to
/// resume past the faulting instruction, in which case reads yield an
/// unspecified value.
pub trait UserContext {
    /// Write a line to the console. Requires the peripheral region to be
    /// granted to the calling task.
    fn print(&self, line: &str);

    /// Load a 32-bit word.
    ///
    /// # Safety
    ///
    /// `address` must be word aligned and name memory that is valid to read
    /// from privileged code, so the only possible failure is a protection
    /// fault.
    unsafe fn read_word(&self, address: usize) -> u32;

    /// Store a 32-bit word.
    ///
    /// # Safety
    ///
    /// As for [`read_word`](UserContext::read_word); if the store is not
    /// trapped it really happens.
    unsafe fn write_word(&self, address: usize, value: u32);

    /// Copy `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// # Safety
    ///
    /// As for [`read_word`](UserContext::read_word), for the whole range.
    unsafe fn read_block(&self, address: usize, buf: &mut [u8]);

    /// Run the privileged instruction sequence that clears the MPU enable
    /// bit.
    ///
    /// From unprivileged code this must raise an undefined instruction
    /// exception before the bit is written.
    fn attempt_protection_disable(&self);

    /// Block the calling task for at least `ms` milliseconds.
    fn delay_ms(&self, ms: u32);

    /// Stop the scenario for good from inside a task.
    fn halt(&self, outcome: Outcome) -> !;
}
