// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Restricted task descriptors and the static memory they run in.
//!
//! Every task a scenario creates is unprivileged. It may touch its own stack
//! and the regions listed in its descriptor; everything else, including its
//! own control block, belongs to the kernel.

use core::cell::UnsafeCell;
use core::fmt;

use crate::platform::machine::UserContext;
use crate::platform::mpu::{
    self, MemoryType, RegionDescriptor, RegionError, RegionList, TaskMemoryMap,
};
use crate::platform::scheduler::Priority;
use crate::ErrorCode;

/// Stack depth of every scenario task, in words (`configMINIMAL_STACK_SIZE`).
pub const MINIMAL_STACK_WORDS: usize = 128;

/// Size of a task stack in bytes. A stack is its own MPU region, so this is
/// also its alignment.
pub const STACK_BYTES: usize = mpu::region_size(MINIMAL_STACK_WORDS * 4);

/// Bytes reserved for a scheduler task control block (`StaticTask_t`).
pub const CONTROL_BLOCK_BYTES: usize = 256;

/// Stack of one restricted task.
#[repr(C, align(512))]
pub struct TaskStack(UnsafeCell<[u32; MINIMAL_STACK_WORDS]>);

const _: () = assert!(core::mem::size_of::<TaskStack>() == STACK_BYTES);
const _: () = assert!(core::mem::align_of::<TaskStack>() == STACK_BYTES);

// The stack is only written by the task that owns it, through the pointer the
// scheduler is handed at creation.
unsafe impl Sync for TaskStack {}

impl TaskStack {
    pub const fn new() -> TaskStack {
        TaskStack(UnsafeCell::new([0; MINIMAL_STACK_WORDS]))
    }

    pub fn base(&self) -> usize {
        self.0.get() as usize
    }

    pub fn as_mut_ptr(&self) -> *mut u32 {
        self.0.get().cast()
    }

    pub fn depth(&self) -> usize {
        MINIMAL_STACK_WORDS
    }

    /// The region granting the owning task read/write access to its stack.
    pub fn region(&self) -> Result<RegionDescriptor, RegionError> {
        RegionDescriptor::new(
            self.base(),
            STACK_BYTES,
            mpu::read_write_no_exec(MemoryType::NormalWriteThrough { shareable: false }),
        )
    }
}

/// Storage for a scheduler task control block.
///
/// Statics of this type must be placed in privileged data so that no
/// restricted task can read them:
///
/// ```ignore
/// #[cfg_attr(target_os = "none", link_section = "privileged_data")]
/// static VICTIM_TCB: ControlBlock = ControlBlock::new();
/// ```
#[repr(C, align(8))]
pub struct ControlBlock(UnsafeCell<[u8; CONTROL_BLOCK_BYTES]>);

// Only the scheduler writes a control block, with interrupts masked.
unsafe impl Sync for ControlBlock {}

impl ControlBlock {
    pub const fn new() -> ControlBlock {
        ControlBlock(UnsafeCell::new([0; CONTROL_BLOCK_BYTES]))
    }

    pub fn base(&self) -> usize {
        self.0.get() as usize
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.0.get().cast()
    }

    pub fn size(&self) -> usize {
        CONTROL_BLOCK_BYTES
    }
}

/// Entry point of a restricted task. It runs unprivileged and never returns.
pub type TaskBody = fn(&dyn UserContext) -> !;

/// Everything the scheduler needs to create one restricted task.
#[derive(Copy, Clone)]
pub struct RestrictedTask {
    name: &'static str,
    body: TaskBody,
    stack: &'static TaskStack,
    control_block: &'static ControlBlock,
    priority: Priority,
    regions: RegionList,
}

impl RestrictedTask {
    /// A task with access to its stack only, at the scenario priority.
    pub fn new(
        name: &'static str,
        body: TaskBody,
        stack: &'static TaskStack,
        control_block: &'static ControlBlock,
    ) -> RestrictedTask {
        RestrictedTask {
            name,
            body,
            stack,
            control_block,
            priority: Priority::scenario(),
            regions: RegionList::new(),
        }
    }

    /// Give the task access to `region`.
    ///
    /// Fails with `SIZE` once the task already declares
    /// [`mpu::NUM_CONFIGURABLE_REGIONS`] regions.
    pub fn grant(&mut self, region: RegionDescriptor) -> Result<(), ErrorCode> {
        self.regions.push(region)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn body(&self) -> TaskBody {
        self.body
    }

    pub fn stack(&self) -> &'static TaskStack {
        self.stack
    }

    pub fn control_block(&self) -> &'static ControlBlock {
        self.control_block
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// The complete set of memory this task is allowed to reach.
    pub fn memory_map(&self) -> Result<TaskMemoryMap<'_>, RegionError> {
        Ok(TaskMemoryMap::new(self.stack.region()?, &self.regions))
    }
}

impl fmt::Debug for RestrictedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestrictedTask")
            .field("name", &self.name)
            .field("stack", &format_args!("{:#010x}", self.stack.base()))
            .field(
                "control_block",
                &format_args!("{:#010x}", self.control_block.base()),
            )
            .field("priority", &self.priority)
            .field("regions", &self.regions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mpu::{Access, Mode};

    static STACK: TaskStack = TaskStack::new();
    static TCB: ControlBlock = ControlBlock::new();

    fn idle(ctx: &dyn UserContext) -> ! {
        loop {
            ctx.delay_ms(1000);
        }
    }

    #[test]
    fn stack_is_its_own_region() {
        assert_eq!(STACK.base() % STACK_BYTES, 0);
        let region = STACK.region().unwrap();
        assert_eq!(region.length(), 512);
        assert!(region.permits(Access::Write, Mode::Unprivileged));
        assert!(!region.permits(Access::Execute, Mode::Unprivileged));
    }

    #[test]
    fn task_reaches_stack_but_not_control_block() {
        let task = RestrictedTask::new("victim", idle, &STACK, &TCB);
        let map = task.memory_map().unwrap();
        assert!(map.permits(STACK.base(), STACK_BYTES, Access::Write, Mode::Unprivileged));
        assert!(!map.permits(TCB.base(), TCB.size(), Access::Read, Mode::Unprivileged));
    }

    #[test]
    fn grants_are_bounded() {
        let mut task = RestrictedTask::new("victim", idle, &STACK, &TCB);
        let region = RegionDescriptor::new(
            0x0800_0000,
            32,
            mpu::read_write_no_exec(MemoryType::Device),
        )
        .unwrap();
        for _ in 0..mpu::NUM_CONFIGURABLE_REGIONS {
            task.grant(region).unwrap();
        }
        assert_eq!(task.grant(region), Err(ErrorCode::SIZE));
        assert_eq!(task.priority(), Priority(4));
    }
}
