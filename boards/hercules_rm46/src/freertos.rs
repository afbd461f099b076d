// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Bindings to the FreeRTOS MPU port and the harness traits built on them.

use core::ffi::{c_char, c_void};
use core::ptr;

use harness::debug::DiagnosticWriter;
use harness::platform::mpu::NUM_CONFIGURABLE_REGIONS;
use harness::platform::{RestrictedScheduler, UserContext};
use harness::task::{RestrictedTask, TaskBody};
use harness::{ErrorCode, Outcome};

use crate::io::SciConsole;

type BaseType = i32;
type UBaseType = u32;
type TickType = u32;
/// `configSTACK_DEPTH_TYPE`
type StackDepth = u16;
type TaskFunction = extern "C" fn(*mut c_void);

const PD_PASS: BaseType = 1;

/// `configMAX_TASK_NAME_LEN`, including the terminating NUL.
const MAX_TASK_NAME_LEN: usize = 16;

/// `configTICK_RATE_HZ`
const TICK_RATE_HZ: u32 = 1000;

/// `MemoryRegion_t`
#[repr(C)]
#[derive(Copy, Clone)]
struct MemoryRegion {
    base_address: *mut c_void,
    length_in_bytes: u32,
    /// DRACR value for the region. A zero length leaves the slot disabled.
    parameters: u32,
}

impl MemoryRegion {
    const UNUSED: MemoryRegion = MemoryRegion {
        base_address: ptr::null_mut(),
        length_in_bytes: 0,
        parameters: 0,
    };
}

/// `TaskParameters_t` as laid out with `portUSING_MPU_WRAPPERS` and
/// `configSUPPORT_STATIC_ALLOCATION` both enabled.
#[repr(C)]
struct TaskParameters {
    task_code: TaskFunction,
    name: *const c_char,
    stack_depth: StackDepth,
    parameters: *mut c_void,
    priority: UBaseType,
    stack_buffer: *mut u32,
    regions: [MemoryRegion; NUM_CONFIGURABLE_REGIONS],
    task_buffer: *mut c_void,
}

extern "C" {
    fn xTaskCreateRestrictedStatic(
        parameters: *const TaskParameters,
        created_task: *mut *mut c_void,
    ) -> BaseType;
    fn vTaskStartScheduler();
    fn vTaskDelay(ticks_to_delay: TickType);
}

/// Entry point of every restricted task. `parameters` carries the task body.
extern "C" fn task_entry(parameters: *mut c_void) {
    // SAFETY: `create_restricted` passes a `TaskBody` as the parameter, and
    // function pointers and data pointers have the same size on this target.
    let body: TaskBody = unsafe { core::mem::transmute::<*mut c_void, TaskBody>(parameters) };
    body(&FreeRtosContext)
}

fn task_name(name: &str) -> [c_char; MAX_TASK_NAME_LEN] {
    let mut buf = [0; MAX_TASK_NAME_LEN];
    for (dst, &src) in buf
        .iter_mut()
        .zip(name.as_bytes().iter().take(MAX_TASK_NAME_LEN - 1))
    {
        *dst = src as c_char;
    }
    buf
}

/// The FreeRTOS scheduler, seen from privileged code.
pub struct FreeRtos;

impl RestrictedScheduler for FreeRtos {
    fn create_restricted(&self, task: &RestrictedTask) -> Result<(), ErrorCode> {
        let mut regions = [MemoryRegion::UNUSED; NUM_CONFIGURABLE_REGIONS];
        for (slot, region) in regions.iter_mut().zip(task.regions().iter()) {
            let registers = cortexr4::mpu::encode_region(region);
            *slot = MemoryRegion {
                base_address: region.base() as *mut c_void,
                length_in_bytes: region.length() as u32,
                parameters: registers.access.get(),
            };
        }

        // FreeRTOS copies the name into the control block during creation.
        let name = task_name(task.name());
        let parameters = TaskParameters {
            task_code: task_entry,
            name: name.as_ptr(),
            stack_depth: task.stack().depth() as StackDepth,
            parameters: task.body() as *mut c_void,
            priority: task.priority().0 as UBaseType,
            stack_buffer: task.stack().as_mut_ptr(),
            regions,
            task_buffer: task.control_block().as_mut_ptr().cast(),
        };

        // SAFETY: the stack and control block are statics owned by the
        // scenario and handed to FreeRTOS for the rest of the program.
        let result = unsafe { xTaskCreateRestrictedStatic(&parameters, ptr::null_mut()) };
        if result == PD_PASS {
            Ok(())
        } else {
            Err(ErrorCode::NOMEM)
        }
    }

    fn start(&self) -> ErrorCode {
        // SAFETY: called once, from privileged code, after all tasks exist.
        unsafe { vTaskStartScheduler() };
        // Only reached if the idle or timer task could not be created.
        ErrorCode::NOMEM
    }
}

/// What a restricted task can do. Every operation runs in user mode, so the
/// MPU and the exception vectors have the final say.
struct FreeRtosContext;

impl UserContext for FreeRtosContext {
    fn print(&self, line: &str) {
        SciConsole.write(line.as_bytes());
    }

    unsafe fn read_word(&self, address: usize) -> u32 {
        ptr::read_volatile(address as *const u32)
    }

    unsafe fn write_word(&self, address: usize, value: u32) {
        ptr::write_volatile(address as *mut u32, value);
    }

    unsafe fn read_block(&self, address: usize, buf: &mut [u8]) {
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = ptr::read_volatile((address + offset) as *const u8);
        }
    }

    fn attempt_protection_disable(&self) {
        cortexr4::mpu::attempt_disable();
    }

    fn delay_ms(&self, ms: u32) {
        let ticks = ms.saturating_mul(TICK_RATE_HZ) / 1000;
        // SAFETY: `vTaskDelay` is an MPU-wrapped system call.
        unsafe { vTaskDelay(ticks) };
    }

    fn halt(&self, _outcome: Outcome) -> ! {
        cortexr4::support::halt()
    }
}

