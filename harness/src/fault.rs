// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Classification of protection faults.
//!
//! The platform's exception vectors build a [`FaultRecord`] and pass it to
//! [`ExceptionTable::dispatch`]. The [`FaultHandler`] then decides whether the
//! fault is the one the running scenario set out to provoke:
//!
//! 1. the protection hardware must still be enabled,
//! 2. a scenario must have registered an [`Expectation`],
//! 3. the expectation's tracker must be armed,
//! 4. the exception kind must match the probe, and
//! 5. for data aborts, the faulting address must lie inside the probe.
//!
//! A fault passing every check is attributed to the tracker, which is
//! disarmed, and the scenario's [`Recovery`] policy is applied. Anything else
//! ends the scenario as a failure.

use core::cell::Cell;
use core::fmt;

use tock_cells::optional_cell::OptionalCell;

use crate::config::CONFIG;
use crate::debug::{self, event_level};
use crate::platform::machine::Machine;
use crate::platform::mpu::Access;
use crate::scenario::{Failure, Outcome};
use crate::tracker::FaultTracker;

/// Exceptions a protection violation can raise on Cortex-R.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    /// A privileged instruction executed in user mode.
    UndefinedInstruction,
    /// Instruction fetch from a region the task may not execute.
    PrefetchAbort,
    /// Load or store to a region the task may not access.
    DataAbort,
}

impl Exception {
    pub const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Exception::UndefinedInstruction => 0,
            Exception::PrefetchAbort => 1,
            Exception::DataAbort => 2,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::UndefinedInstruction => f.write_str("undefined instruction"),
            Exception::PrefetchAbort => f.write_str("prefetch abort"),
            Exception::DataAbort => f.write_str("data abort"),
        }
    }
}

/// What the exception vector knows about a fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaultRecord {
    pub exception: Exception,
    /// Faulting data address (DFAR), when the hardware reports one.
    pub address: Option<usize>,
    /// Direction of the faulting access (DFSR.WnR), when known.
    pub access: Option<Access>,
    /// Address of the faulting instruction.
    pub pc: usize,
}

/// The violation a victim is about to commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    Read { address: usize, len: usize },
    Write { address: usize, len: usize },
    DisableProtection,
}

impl Probe {
    /// Exception the hardware raises when it refuses the probe.
    pub fn exception(&self) -> Exception {
        match self {
            Probe::Read { .. } | Probe::Write { .. } => Exception::DataAbort,
            Probe::DisableProtection => Exception::UndefinedInstruction,
        }
    }

    /// Direction of the access the probe makes, if it touches memory.
    pub fn access(&self) -> Option<Access> {
        match self {
            Probe::Read { .. } => Some(Access::Read),
            Probe::Write { .. } => Some(Access::Write),
            Probe::DisableProtection => None,
        }
    }

    /// Memory range touched by the probe, as `(address, len)`.
    pub fn range(&self) -> Option<(usize, usize)> {
        match *self {
            Probe::Read { address, len } | Probe::Write { address, len } => Some((address, len)),
            Probe::DisableProtection => None,
        }
    }

    fn covers(&self, address: usize) -> bool {
        match self.range() {
            Some((start, len)) => address >= start && address - start < len,
            None => true,
        }
    }
}

/// What happens after an attributed fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Report success and stop.
    Halt,
    /// Return from the exception past the faulting instruction. The victim
    /// reports the verdict itself.
    Resume,
}

/// A fault a scenario has announced it is about to provoke.
#[derive(Copy, Clone)]
pub struct Expectation {
    pub tracker: &'static FaultTracker,
    pub probe: Probe,
    pub recovery: Recovery,
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("tracker", &format_args!("{:#010x}", self.tracker.base()))
            .field("probe", &self.probe)
            .field("recovery", &self.recovery)
            .finish()
    }
}

/// Why a fault could not be attributed to the running scenario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnexpectedCause {
    /// No scenario registered an expectation.
    NoExpectation,
    /// The tracker was not armed when the fault hit.
    NotArmed,
    /// The probe should have raised a different exception.
    WrongException,
    /// The fault address lies outside the probe.
    WrongAddress,
    /// A read probe faulted on a write, or the other way round.
    WrongAccess,
    /// No handler is registered for the exception.
    Unhandled,
}

impl fmt::Display for UnexpectedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnexpectedCause::NoExpectation => f.write_str("no expected fault"),
            UnexpectedCause::NotArmed => f.write_str("tracker not armed"),
            UnexpectedCause::WrongException => f.write_str("wrong exception"),
            UnexpectedCause::WrongAddress => f.write_str("address outside probe"),
            UnexpectedCause::WrongAccess => f.write_str("wrong access direction"),
            UnexpectedCause::Unhandled => f.write_str("no handler registered"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Expected(Recovery),
    Unexpected(UnexpectedCause),
    ProtectionDisabled,
}

/// Privileged fault classifier shared by all exception vectors.
pub struct FaultHandler {
    expectation: OptionalCell<Expectation>,
    faults: Cell<usize>,
}

// Single core; only touched by the driver before the scheduler starts and by
// exception handlers afterwards, never concurrently.
unsafe impl Sync for FaultHandler {}

impl FaultHandler {
    pub const fn new() -> FaultHandler {
        FaultHandler {
            expectation: OptionalCell::empty(),
            faults: Cell::new(0),
        }
    }

    /// Register the fault the next scenario will provoke.
    pub fn expect(&self, expectation: Expectation) {
        log::log!(event_level(), "expecting {:?}", expectation);
        self.expectation.set(expectation);
    }

    pub fn clear(&self) {
        self.expectation.clear();
    }

    /// Number of faults dispatched so far, attributed or not.
    pub fn fault_count(&self) -> usize {
        self.faults.get()
    }

    pub fn classify<M: Machine>(&self, machine: &M, record: &FaultRecord) -> Classification {
        if !CONFIG.attribute_faults {
            return Classification::Expected(
                self.expectation
                    .map_or(Recovery::Halt, |expectation| expectation.recovery),
            );
        }

        if !machine.protection_enabled() {
            return Classification::ProtectionDisabled;
        }

        self.expectation.map_or(
            Classification::Unexpected(UnexpectedCause::NoExpectation),
            |expectation| match attribute(&expectation, record) {
                Ok(recovery) => Classification::Expected(recovery),
                Err(cause) => Classification::Unexpected(cause),
            },
        )
    }

    /// Classify `record` and act on it.
    ///
    /// Returns only when the fault is attributed and the scenario asked to
    /// resume, in which case the caller must skip the faulting instruction.
    pub fn handle<M: Machine>(&self, machine: &M, record: &FaultRecord) {
        self.faults.set(self.faults.get() + 1);
        let classification = self.classify(machine, record);
        log::log!(
            event_level(),
            "{} at pc {:#010x}: {:?}",
            record.exception,
            record.pc,
            classification
        );

        match classification {
            Classification::Expected(recovery) => {
                self.expectation.map(|expectation| {
                    expectation.tracker.record_trap();
                    expectation.tracker.disarm();
                });
                match recovery {
                    Recovery::Halt => {
                        debug::print(machine.console(), debug::TEST_PASSED);
                        machine.halt(Outcome::Passed)
                    }
                    Recovery::Resume => {}
                }
            }
            Classification::Unexpected(cause) => self.unexpected(machine, record, cause),
            Classification::ProtectionDisabled => {
                log::warn!("protection disabled when {} was taken", record.exception);
                debug::print(
                    machine.console(),
                    "MPU was disabled by an unprivileged task.\r\n",
                );
                machine.halt(Outcome::Failed(Failure::ProtectionDisabled))
            }
        }
    }

    fn unexpected<M: Machine>(&self, machine: &M, record: &FaultRecord, cause: UnexpectedCause) -> ! {
        log::warn!("unexpected {}: {}", record.exception, cause);
        debug::print_fmt(
            machine.console(),
            format_args!(
                "Unexpected {} at pc {:#010x}: {}.\r\n",
                record.exception, record.pc, cause
            ),
        );
        machine.halt(Outcome::Failed(Failure::UnexpectedFault(cause)))
    }
}

fn attribute(expectation: &Expectation, record: &FaultRecord) -> Result<Recovery, UnexpectedCause> {
    if !expectation.tracker.is_armed() {
        return Err(UnexpectedCause::NotArmed);
    }
    if record.exception != expectation.probe.exception() {
        return Err(UnexpectedCause::WrongException);
    }
    if expectation.probe.range().is_some() {
        match record.address {
            Some(address) if expectation.probe.covers(address) => {}
            _ => return Err(UnexpectedCause::WrongAddress),
        }
    }
    if let (Some(actual), Some(expected)) = (record.access, expectation.probe.access()) {
        if actual != expected {
            return Err(UnexpectedCause::WrongAccess);
        }
    }
    Ok(expectation.recovery)
}

/// Handler for one exception vector.
pub type ExceptionHandler<M> = fn(&FaultHandler, &M, &FaultRecord);

/// Exception vector table indexed by [`Exception`].
pub struct ExceptionTable<M: Machine> {
    handlers: [Option<ExceptionHandler<M>>; Exception::COUNT],
}

impl<M: Machine> ExceptionTable<M> {
    /// A table with no handlers. Every exception is unexpected.
    pub const fn empty() -> ExceptionTable<M> {
        ExceptionTable {
            handlers: [None; Exception::COUNT],
        }
    }

    /// A table routing every protection exception to
    /// [`FaultHandler::handle`].
    pub const fn protection_faults() -> ExceptionTable<M> {
        let handle: ExceptionHandler<M> = FaultHandler::handle::<M>;
        ExceptionTable {
            handlers: [Some(handle); Exception::COUNT],
        }
    }

    pub fn register(&mut self, exception: Exception, handler: ExceptionHandler<M>) {
        self.handlers[exception.index()] = Some(handler);
    }

    /// Route `record` to the handler for its exception.
    pub fn dispatch(&self, faults: &FaultHandler, machine: &M, record: &FaultRecord) {
        match self.handlers[record.exception.index()] {
            Some(handler) => handler(faults, machine, record),
            None => {
                faults.faults.set(faults.faults.get() + 1);
                faults.unexpected(machine, record, UnexpectedCause::Unhandled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DiagnosticWriter;

    struct Quiet;

    impl DiagnosticWriter for Quiet {
        fn write(&self, _buf: &[u8]) {}
    }

    struct TestMachine {
        enabled: bool,
    }

    impl Machine for TestMachine {
        type Console = Quiet;

        fn console(&self) -> &Quiet {
            &Quiet
        }

        fn protection_enabled(&self) -> bool {
            self.enabled
        }

        fn halt(&self, outcome: Outcome) -> ! {
            panic!("halt: {:?}", outcome)
        }
    }

    const ENABLED: TestMachine = TestMachine { enabled: true };

    fn read_probe(tracker: &'static FaultTracker, recovery: Recovery) -> Expectation {
        Expectation {
            tracker,
            probe: Probe::Read {
                address: 0x0800_0100,
                len: 4,
            },
            recovery,
        }
    }

    fn data_abort(address: usize) -> FaultRecord {
        FaultRecord {
            exception: Exception::DataAbort,
            address: Some(address),
            access: Some(Access::Read),
            pc: 0x0000_1000,
        }
    }

    #[test]
    #[cfg(not(feature = "unattributed_faults"))]
    fn nothing_expected() {
        let faults = FaultHandler::new();
        assert_eq!(
            faults.classify(&ENABLED, &data_abort(0x0800_0100)),
            Classification::Unexpected(UnexpectedCause::NoExpectation)
        );
    }

    #[test]
    #[cfg(not(feature = "unattributed_faults"))]
    fn attribution_checks() {
        static TRACKER: FaultTracker = FaultTracker::new();
        let faults = FaultHandler::new();
        faults.expect(read_probe(&TRACKER, Recovery::Halt));

        assert_eq!(
            faults.classify(&ENABLED, &data_abort(0x0800_0100)),
            Classification::Unexpected(UnexpectedCause::NotArmed)
        );

        TRACKER.arm();
        assert_eq!(
            faults.classify(&ENABLED, &data_abort(0x0800_0100)),
            Classification::Expected(Recovery::Halt)
        );
        assert_eq!(
            faults.classify(&ENABLED, &data_abort(0x0800_0104)),
            Classification::Unexpected(UnexpectedCause::WrongAddress)
        );

        let mut record = data_abort(0x0800_0100);
        record.access = Some(Access::Write);
        assert_eq!(
            faults.classify(&ENABLED, &record),
            Classification::Unexpected(UnexpectedCause::WrongAccess)
        );

        record.exception = Exception::UndefinedInstruction;
        assert_eq!(
            faults.classify(&ENABLED, &record),
            Classification::Unexpected(UnexpectedCause::WrongException)
        );
    }

    #[test]
    #[cfg(not(feature = "unattributed_faults"))]
    fn disabled_protection_trumps_attribution() {
        static TRACKER: FaultTracker = FaultTracker::new();
        let faults = FaultHandler::new();
        faults.expect(read_probe(&TRACKER, Recovery::Halt));
        TRACKER.arm();
        assert_eq!(
            faults.classify(&TestMachine { enabled: false }, &data_abort(0x0800_0100)),
            Classification::ProtectionDisabled
        );
    }

    #[test]
    fn resume_disarms_and_counts() {
        static TRACKER: FaultTracker = FaultTracker::new();
        let faults = FaultHandler::new();
        faults.expect(read_probe(&TRACKER, Recovery::Resume));
        TRACKER.arm();

        let table = ExceptionTable::<TestMachine>::protection_faults();
        table.dispatch(&faults, &ENABLED, &data_abort(0x0800_0102));

        assert!(!TRACKER.is_armed());
        assert_eq!(TRACKER.trap_count(), 1);
        assert_eq!(faults.fault_count(), 1);
    }

    #[test]
    #[should_panic(expected = "halt: Passed")]
    fn expected_fault_halts_with_pass() {
        static TRACKER: FaultTracker = FaultTracker::new();
        let faults = FaultHandler::new();
        faults.expect(read_probe(&TRACKER, Recovery::Halt));
        TRACKER.arm();
        faults.handle(&ENABLED, &data_abort(0x0800_0100));
    }

    #[test]
    #[cfg(feature = "unattributed_faults")]
    fn any_fault_passes_without_attribution() {
        let faults = FaultHandler::new();
        assert_eq!(
            faults.classify(&TestMachine { enabled: false }, &data_abort(0)),
            Classification::Expected(Recovery::Halt)
        );
    }

    #[test]
    #[should_panic(expected = "halt: Failed(UnexpectedFault(Unhandled))")]
    fn unregistered_exception_is_unexpected() {
        static TRACKER: FaultTracker = FaultTracker::new();
        let faults = FaultHandler::new();
        faults.expect(read_probe(&TRACKER, Recovery::Halt));
        TRACKER.arm();

        let mut table = ExceptionTable::<TestMachine>::empty();
        table.register(Exception::UndefinedInstruction, FaultHandler::handle::<TestMachine>);
        table.dispatch(&faults, &ENABLED, &data_abort(0x0800_0100));
    }
}
