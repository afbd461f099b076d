// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A restricted task tries to switch the MPU off.
//!
//! Clearing SCTLR.M is a privileged CP15 write. From user mode the processor
//! must refuse it with an undefined instruction exception, leaving the MPU
//! enabled.

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

pub static SCENARIO: Scenario = Scenario {
    name: "disable_protection",
    description: "Creating the unprivileged task which attempts to disable the MPU\r\n\r\n",
    tracker: &TRACKER,
    build,
};

fn victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Attempting to disable the MPU with an unprivileged task.\r\n");
    TRACKER.arm();
    ctx.attempt_protection_disable();
    super::conclude(ctx, &TRACKER)
}

fn build(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let mut task = RestrictedTask::new("DisableMPU", victim, &STACK, &TCB);
    super::grant_console_and_tracker(&mut task, layout, &TRACKER)?;
    Ok(ScenarioPlan::new(
        task,
        Expectation {
            tracker: &TRACKER,
            probe: Probe::DisableProtection,
            recovery: Recovery::Halt,
        },
    ))
}
