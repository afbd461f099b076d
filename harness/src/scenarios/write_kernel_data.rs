// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A restricted task writes a word of kernel data.

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
    name: "write_kernel_data",
    description: "Creating the unprivileged task which attempts to directly write to kernel data\r\n\r\n",
    tracker: &TRACKER,
    build,
};

fn victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Attempting to write kernel data.\r\n");
    TRACKER.arm();
    unsafe { ctx.write_word(KERNEL_DATA.address(), 0xBAD) };
    super::conclude(ctx, &TRACKER)
}

fn build(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let mut task = RestrictedTask::new("WriteKernelData", victim, &STACK, &TCB);
    super::grant_console_and_tracker(&mut task, layout, &TRACKER)?;
    Ok(ScenarioPlan::new(
        task,
        Expectation {
            tracker: &TRACKER,
            probe: Probe::Write {
                address: KERNEL_DATA.address(),
                len: 4,
            },
            recovery: Recovery::Halt,
        },
    ))
}

/// Current value of the kernel word, for checking that a refused store left
/// it alone.
pub fn kernel_data() -> u32 {
    KERNEL_DATA.get()
}
