// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A restricted task reads the stack used by privileged code.
//!
//! The stack's location is only known from linker symbols, so the address is
//! handed to the victim through the tracker's operand.

use crate::fault::{Expectation, Probe, Recovery};
use crate::platform::machine::UserContext;
use crate::platform::mpu::RegionError;
use crate::platform::MemoryLayout;
use crate::scenario::{ConfigError, Scenario, ScenarioPlan};
use crate::task::{ControlBlock, RestrictedTask, TaskStack};
use crate::tracker::FaultTracker;

static TRACKER: FaultTracker = FaultTracker::new();
static STACK: TaskStack = TaskStack::new();
#[cfg_attr(target_os = "none", link_section = "privileged_data")]
static TCB: ControlBlock = ControlBlock::new();

pub static SCENARIO: Scenario = Scenario {
    name: "read_system_stack",
    description: "Creating the unprivileged task which attempts to directly read from the system stack.\r\n\r\n",
    tracker: &TRACKER,
    build,
};

fn victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Attempting to read the system stack.\r\n");
    let target = TRACKER.operand();
    TRACKER.arm();
    let _ = unsafe { ctx.read_word(target) };
    super::conclude(ctx, &TRACKER)
}

fn build(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let stack = layout.system_stack.clone();
    if stack.end.saturating_sub(stack.start) < 4 {
        return Err(ConfigError::Region(RegionError::Empty));
    }
    TRACKER.set_operand(stack.start);

    let mut task = RestrictedTask::new("ReadSystemStack", victim, &STACK, &TCB);
    super::grant_console_and_tracker(&mut task, layout, &TRACKER)?;
    Ok(ScenarioPlan::new(
        task,
        Expectation {
            tracker: &TRACKER,
            probe: Probe::Read {
                address: stack.start,
                len: 4,
            },
            recovery: Recovery::Halt,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_address_comes_from_layout() {
        let layout = MemoryLayout {
            peripherals: 0xfff7_0000..0xfff8_0000,
            system_stack: 0x0800_2000..0x0800_2200,
        };
        let plan = build(&layout).unwrap();
        assert_eq!(
            plan.expectation().probe,
            Probe::Read {
                address: 0x0800_2000,
                len: 4
            }
        );
    }

    #[test]
    fn empty_stack_is_rejected() {
        let layout = MemoryLayout {
            peripherals: 0xfff7_0000..0xfff8_0000,
            system_stack: 0x0800_2000..0x0800_2000,
        };
        assert_eq!(
            build(&layout).unwrap_err(),
            ConfigError::Region(RegionError::Empty)
        );
    }
}
