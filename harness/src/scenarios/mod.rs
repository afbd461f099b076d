// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The isolation scenarios.
//!
//! Each module owns the static stacks, control blocks and tracker its tasks
//! use, and exports one [`Scenario`]. A board image runs exactly one of them.

use tock_cells::volatile_cell::VolatileCell;

use crate::debug;
use crate::platform::machine::UserContext;
use crate::platform::mpu::{self, MemoryType, RegionDescriptor};
use crate::platform::MemoryLayout;
use crate::scenario::{ConfigError, Failure, Outcome, Scenario};
use crate::task::RestrictedTask;
use crate::tracker::FaultTracker;

pub mod disable_protection;
pub mod read_kernel_data;
pub mod read_system_stack;
pub mod read_task_control_block;
pub mod write_kernel_data;

/// Every scenario, in the order a test runner should try them.
pub static ALL: [&Scenario; 5] = [
    &disable_protection::SCENARIO,
    &read_kernel_data::SCENARIO,
    &write_kernel_data::SCENARIO,
    &read_task_control_block::SCENARIO,
    &read_system_stack::SCENARIO,
];

/// Look a scenario up by name.
pub fn find(name: &str) -> Option<&'static Scenario> {
    ALL.iter().copied().find(|scenario| scenario.name == name)
}

/// A word of kernel data no restricted task is granted.
///
/// Statics of this type belong in privileged data.
#[repr(C, align(4))]
pub(crate) struct KernelWord(VolatileCell<u32>);

// Only privileged code may legitimately touch it; unprivileged accesses trap.
unsafe impl Sync for KernelWord {}

impl KernelWord {
    pub(crate) const fn new(value: u32) -> KernelWord {
        KernelWord(VolatileCell::new(value))
    }

    pub(crate) fn address(&self) -> usize {
        self as *const KernelWord as usize
    }

    pub(crate) fn get(&self) -> u32 {
        self.0.get()
    }
}

/// Read/write, never-execute access to the memory-mapped peripherals, so a
/// restricted task can print.
pub(crate) fn peripheral_region(layout: &MemoryLayout) -> Result<RegionDescriptor, ConfigError> {
    Ok(RegionDescriptor::from_range(
        layout.peripherals.clone(),
        mpu::read_write_no_exec(MemoryType::Device),
    )?)
}

/// Grant a victim the console and its tracker, in that order.
pub(crate) fn grant_console_and_tracker(
    task: &mut RestrictedTask,
    layout: &MemoryLayout,
    tracker: &FaultTracker,
) -> Result<(), ConfigError> {
    task.grant(peripheral_region(layout)?)
        .map_err(|_| ConfigError::RegionListFull)?;
    task.grant(tracker.region()?)
        .map_err(|_| ConfigError::RegionListFull)
}

/// Finish a victim after its violation.
///
/// A tracker that is still armed means the violation completed without a
/// trap. A disarmed one means the handler attributed the trap and resumed the
/// victim.
pub(crate) fn conclude(ctx: &dyn UserContext, tracker: &FaultTracker) -> ! {
    if tracker.is_armed() {
        ctx.print(debug::TEST_FAILED);
        ctx.halt(Outcome::Failed(Failure::NotTrapped))
    } else {
        ctx.print(debug::TEST_PASSED);
        ctx.halt(Outcome::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MemoryLayout {
        MemoryLayout {
            peripherals: 0xfff7_0000..0xfff8_0000,
            system_stack: 0x0800_0000..0x0800_0400,
        }
    }

    #[test]
    fn scenarios_are_found_by_name() {
        for scenario in ALL.iter() {
            assert_eq!(find(scenario.name).map(|found| found.name), Some(scenario.name));
        }
        assert!(find("read_flash").is_none());
    }

    #[test]
    fn every_scenario_verifies() {
        for scenario in ALL.iter() {
            let plan = (scenario.build)(&layout()).unwrap();
            assert_eq!(plan.verify(), Ok(()), "{}", scenario.name);
            assert!(core::ptr::eq(plan.expectation().tracker, scenario.tracker));
        }
    }

    #[test]
    fn peripheral_range_must_be_a_region() {
        let layout = MemoryLayout {
            peripherals: 0xfff7_e400..0xfff7_e500 + 4,
            ..layout()
        };
        assert_eq!(
            peripheral_region(&layout).unwrap_err(),
            ConfigError::Region(mpu::RegionError::NotPowerOfTwo)
        );
    }
}
