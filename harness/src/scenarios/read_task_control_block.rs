// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A restricted task copies another task's control block.
//!
//! Two tasks with disjoint stacks. The companion does nothing but sleep; it
//! exists so that there is a live control block to read.
//!
//! The victim copies only the first 64 bytes of the companion's control
//! block, not the whole of it. The first byte is inside the protected region,
//! so the copy faults just the same, and a full copy would not fit on the
//! victim's stack.

use crate::fault::{Expectation, Probe, Recovery};
use crate::platform::machine::UserContext;
use crate::platform::MemoryLayout;
use crate::scenario::{ConfigError, Scenario, ScenarioPlan};
use crate::task::{ControlBlock, RestrictedTask, TaskStack, CONTROL_BLOCK_BYTES};
use crate::tracker::FaultTracker;

/// Bytes of the companion's control block the victim copies. A prefix is
/// enough, and the victim's stack is only [`STACK_BYTES`](crate::task::STACK_BYTES) deep.
const SNAPSHOT_BYTES: usize = 64;
const _: () = assert!(SNAPSHOT_BYTES <= CONTROL_BLOCK_BYTES);

static TRACKER: FaultTracker = FaultTracker::new();
static VICTIM_STACK: TaskStack = TaskStack::new();
static COMPANION_STACK: TaskStack = TaskStack::new();
#[cfg_attr(target_os = "none", link_section = "privileged_data")]
static VICTIM_TCB: ControlBlock = ControlBlock::new();
#[cfg_attr(target_os = "none", link_section = "privileged_data")]
static COMPANION_TCB: ControlBlock = ControlBlock::new();

pub static SCENARIO: Scenario = Scenario {
    name: "read_task_control_block",
    description: "Creating two tasks, one of which attempts to read from the others TCB\r\n\r\n",
    tracker: &TRACKER,
    build,
};

fn victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Attempting to read from Task Two's TCB.\r\n\r\n");
    let mut copy = [0u8; SNAPSHOT_BYTES];
    TRACKER.arm();
    unsafe { ctx.read_block(COMPANION_TCB.base(), &mut copy) };
    super::conclude(ctx, &TRACKER)
}

fn companion(ctx: &dyn UserContext) -> ! {
    loop {
        ctx.delay_ms(1000);
    }
}

fn build(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let mut victim_task = RestrictedTask::new("ReadTCB", victim, &VICTIM_STACK, &VICTIM_TCB);
    super::grant_console_and_tracker(&mut victim_task, layout, &TRACKER)?;
    let companion_task = RestrictedTask::new("TaskTwo", companion, &COMPANION_STACK, &COMPANION_TCB);

    ScenarioPlan::new(
        victim_task,
        Expectation {
            tracker: &TRACKER,
            probe: Probe::Read {
                address: COMPANION_TCB.base(),
                len: SNAPSHOT_BYTES,
            },
            recovery: Recovery::Halt,
        },
    )
    .with_companion(companion_task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mpu::{Access, Mode};

    #[test]
    fn stacks_are_disjoint() {
        let victim = VICTIM_STACK.region().unwrap();
        assert!(!victim.overlaps(COMPANION_STACK.base(), crate::task::STACK_BYTES));
    }

    #[test]
    fn victim_copies_a_prefix_of_the_companion_block() {
        let layout = MemoryLayout {
            peripherals: 0xfff7_0000..0xfff8_0000,
            system_stack: 0x0800_2000..0x0800_2200,
        };
        let plan = build(&layout).unwrap();
        assert_eq!(
            plan.expectation().probe,
            Probe::Read {
                address: COMPANION_TCB.base(),
                len: 64
            }
        );
    }

    #[test]
    fn companion_cannot_reach_the_victim_either() {
        let companion_task =
            RestrictedTask::new("TaskTwo", companion, &COMPANION_STACK, &COMPANION_TCB);
        let map = companion_task.memory_map().unwrap();
        assert!(!map.permits(VICTIM_TCB.base(), CONTROL_BLOCK_BYTES, Access::Read, Mode::Unprivileged));
        assert!(!map.permits(TRACKER.base(), 1, Access::Write, Mode::Unprivileged));
    }
}
