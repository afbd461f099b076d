// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Isolation scenario image for the TI Hercules RM46 LaunchPad.
//!
//! The FreeRTOS demo's `main` brings up the clocks and the UART and then
//! calls [`vRunTest`]. The port's abort and undefined instruction stubs call
//! [`vHandleMemoryFault`] and [`vHandleUndefinedInstruction`] with the saved
//! registers of the faulting task.
//!
//! One scenario is built into each image, chosen with the `HARNESS_SCENARIO`
//! environment variable at build time:
//!
//! ```text
//! HARNESS_SCENARIO=write_kernel_data cargo build --release
//! ```

#![no_std]

mod freertos;
mod io;

use cortexr4::abort::{self, ExceptionFrame};
use cortexr4::mpu::CortexR4Mpu;
use harness::debug::{self, ConsoleLogger};
use harness::fault::{Exception, ExceptionTable, FaultHandler, FaultRecord};
use harness::platform::{Machine, MemoryLayout};
use harness::{scenarios, Outcome, ScenarioDriver};

use crate::freertos::FreeRtos;
use crate::io::SciConsole;

/// Scenario built into this image.
const SCENARIO: &str = match option_env!("HARNESS_SCENARIO") {
    Some(name) => name,
    None => "read_kernel_data",
};

static FAULTS: FaultHandler = FaultHandler::new();
static VECTORS: ExceptionTable<Hercules> = ExceptionTable::protection_faults();
static LOGGER: ConsoleLogger<SciConsole> = ConsoleLogger::new(SciConsole);
static MPU: CortexR4Mpu = CortexR4Mpu::new();

extern "C" {
    static __peripherals_start__: u8;
    static __peripherals_end__: u8;
    static __svc_stack_start__: u8;
    static __svc_stack_end__: u8;
}

/// Address ranges the linker script placed the peripherals and the
/// supervisor stack at.
fn memory_layout() -> MemoryLayout {
    // SAFETY: only the addresses of the linker symbols are taken.
    unsafe {
        MemoryLayout {
            peripherals: core::ptr::addr_of!(__peripherals_start__) as usize
                ..core::ptr::addr_of!(__peripherals_end__) as usize,
            system_stack: core::ptr::addr_of!(__svc_stack_start__) as usize
                ..core::ptr::addr_of!(__svc_stack_end__) as usize,
        }
    }
}

/// The RM46 as seen from privileged code.
struct Hercules;

impl Machine for Hercules {
    type Console = SciConsole;

    fn console(&self) -> &SciConsole {
        &SciConsole
    }

    fn protection_enabled(&self) -> bool {
        MPU.protection_enabled()
    }

    fn halt(&self, outcome: Outcome) -> ! {
        log::debug!("halted: {}", outcome);
        SciConsole.drain();
        cortexr4::support::halt()
    }
}

/// Route a fault through the vector table. When the handler returns the
/// faulting instruction is skipped.
fn dispatch(frame: *mut ExceptionFrame, record: FaultRecord) {
    VECTORS.dispatch(&FAULTS, &Hercules, &record);
    // SAFETY: the port's exception stub passes the frame it saved on the
    // exception stack and restores it when this handler returns.
    unsafe {
        (*frame).lr = abort::resume_address(record.exception, (*frame).lr);
    }
}

/// Build and run the selected scenario.
#[no_mangle]
pub extern "C" fn vRunTest() -> ! {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(debug::max_level());
    }
    log::debug!("{} MPU regions implemented", MPU.number_regions());

    let Some(scenario) = scenarios::find(SCENARIO) else {
        debug::print_fmt(
            &SciConsole,
            format_args!("No scenario named {}.\r\n", SCENARIO),
        );
        Hercules.halt(Outcome::Failed(harness::Failure::Registration(
            harness::ErrorCode::INVAL,
        )))
    };

    ScenarioDriver::new(scenario, &Hercules, &FreeRtos, &FAULTS).run(&memory_layout())
}

/// Data abort hook called by the port.
#[no_mangle]
pub extern "C" fn vHandleMemoryFault(frame: *mut ExceptionFrame) {
    // SAFETY: see `dispatch`.
    let lr = unsafe { (*frame).lr };
    let record = abort::data_abort_record(abort::read_dfsr(), abort::read_dfar(), lr);
    dispatch(frame, record);
}

/// Undefined instruction hook called by the port.
#[no_mangle]
pub extern "C" fn vHandleUndefinedInstruction(frame: *mut ExceptionFrame) {
    // SAFETY: see `dispatch`.
    let lr = unsafe { (*frame).lr };
    dispatch(frame, abort::undefined_instruction_record(lr));
}

/// Prefetch aborts are never expected, but are reported the same way.
#[no_mangle]
pub extern "C" fn vHandlePrefetchAbort(frame: *mut ExceptionFrame) {
    // SAFETY: see `dispatch`.
    let lr = unsafe { (*frame).lr };
    dispatch(
        frame,
        FaultRecord {
            exception: Exception::PrefetchAbort,
            address: None,
            access: None,
            pc: abort::faulting_pc(Exception::PrefetchAbort, lr) as usize,
        },
    );
}
