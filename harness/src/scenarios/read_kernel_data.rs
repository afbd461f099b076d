// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A restricted task reads a word of kernel data.
//!
//! This is the one scenario that survives its own violation: the handler
//! resumes the victim past the faulting load, and the victim checks that the
//! tracker was disarmed before reporting.

use super::KernelWord;
use crate::fault::{Expectation, Probe, Recovery};
use crate::platform::machine::UserContext;
use crate::platform::MemoryLayout;
use crate::scenario::{ConfigError, Scenario, ScenarioPlan};
use crate::task::{ControlBlock, RestrictedTask, TaskStack};
use crate::tracker::FaultTracker;

static TRACKER: FaultTracker = FaultTracker::new();
static STACK: TaskStack = TaskStack::new();
#[cfg_attr(target_os = "none", link_section = "privileged_data")]
static TCB: ControlBlock = ControlBlock::new();
#[cfg_attr(target_os = "none", link_section = "privileged_data")]
static KERNEL_DATA: KernelWord = KernelWord::new(0xFEED);

pub static SCENARIO: Scenario = Scenario {
    name: "read_kernel_data",
    description: "Creating the unprivileged task which attempts to directly read from kernel data\r\n\r\n",
    tracker: &TRACKER,
    build,
};

fn victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Attempting to read kernel data.\r\n");
    TRACKER.arm();
    // Whatever comes back from a resumed load is meaningless.
    let _ = unsafe { ctx.read_word(KERNEL_DATA.address()) };
    super::conclude(ctx, &TRACKER)
}

fn build(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let mut task = RestrictedTask::new("ReadKernelData", victim, &STACK, &TCB);
    super::grant_console_and_tracker(&mut task, layout, &TRACKER)?;
    Ok(ScenarioPlan::new(
        task,
        Expectation {
            tracker: &TRACKER,
            probe: Probe::Read {
                address: KERNEL_DATA.address(),
                len: 4,
            },
            recovery: Recovery::Resume,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_word_keeps_its_value() {
        assert_eq!(KERNEL_DATA.get(), 0xFEED);
    }
}
