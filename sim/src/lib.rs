// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Host simulator for the isolation scenarios.
//!
//! The simulator stands in for the scheduler, the MPU and the exception
//! vectors so that every scenario can run under `cargo test`:
//!
//! - Tasks run on the host thread, one at a time. Starting the scheduler
//!   calls the body of the first task; a task that delays hands over to the
//!   next task that has not run yet.
//! - Every memory operation a task makes through its [`UserContext`] is
//!   checked against the task's [`TaskMemoryMap`]. A denied access is turned
//!   into a [`FaultRecord`] and dispatched through the harness's
//!   [`ExceptionTable`], exactly as the board's abort vectors would.
//! - `halt` unwinds back out to [`Simulator::run`], which reports the outcome
//!   together with everything written to the console.
//!
//! [`SimConfig`] can break the simulated hardware in the ways the harness is
//! meant to catch.
//!
//! [`TaskMemoryMap`]: harness::platform::mpu::TaskMemoryMap

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use harness::debug::DiagnosticWriter;
use harness::fault::{Exception, ExceptionTable, FaultHandler, FaultRecord};
use harness::platform::mpu::{Access, Mode};
use harness::platform::{Machine, MemoryLayout, RestrictedScheduler, UserContext};
use harness::task::RestrictedTask;
use harness::{ErrorCode, Outcome, Scenario, ScenarioDriver, ScenarioState};

/// Size of the simulated peripheral window. Must be a valid MPU region size.
const PERIPHERAL_BYTES: usize = 256;

/// Words in the simulated privileged stack.
const SYSTEM_STACK_WORDS: usize = 64;

/// Knobs for breaking the simulated hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// When false, the MPU never refuses anything and unprivileged code can
    /// execute privileged instructions.
    pub enforce_protection: bool,
    /// Clear the MPU enable bit just before a fault is dispatched.
    pub clear_enable_before_trap: bool,
    /// How many tasks the scheduler accepts.
    pub task_capacity: usize,
    /// Make `start` fail with this error instead of running a task.
    pub fail_start: Option<ErrorCode>,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            enforce_protection: true,
            clear_enable_before_trap: false,
            task_capacity: 4,
            fail_start: None,
        }
    }
}

/// What a scenario did.
#[derive(Clone, Debug)]
pub struct Report {
    pub outcome: Outcome,
    /// Everything written to the console, by the driver, tasks and handler.
    pub transcript: String,
    /// Faults dispatched to the handler.
    pub faults: usize,
    /// Traps the handler attributed to the scenario's tracker.
    pub trap_count: u8,
    /// Whether the tracker was still armed when the scenario halted.
    pub tracker_armed: bool,
}

impl Report {
    pub fn state(&self) -> ScenarioState {
        self.outcome.state()
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Unwind payload carrying a halted scenario's outcome.
struct Halt(Outcome);

/// Console backed by a byte buffer.
#[derive(Default)]
pub struct SimConsole {
    buf: RefCell<Vec<u8>>,
}

impl SimConsole {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.borrow()).into_owned()
    }
}

impl DiagnosticWriter for SimConsole {
    fn write(&self, buf: &[u8]) {
        self.buf.borrow_mut().extend_from_slice(buf);
    }
}

#[repr(C, align(256))]
struct Peripherals([u8; PERIPHERAL_BYTES]);

#[repr(C, align(8))]
struct SystemStack([u32; SYSTEM_STACK_WORDS]);

struct SimTask {
    task: RestrictedTask,
    started: bool,
}

pub struct Simulator {
    config: SimConfig,
    console: SimConsole,
    mpu_enabled: Cell<bool>,
    tasks: RefCell<Vec<SimTask>>,
    faults: FaultHandler,
    vectors: ExceptionTable<Simulator>,
    peripherals: Box<Peripherals>,
    system_stack: Box<SystemStack>,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Simulator {
        Simulator {
            config,
            console: SimConsole::default(),
            mpu_enabled: Cell::new(true),
            tasks: RefCell::new(Vec::new()),
            faults: FaultHandler::new(),
            vectors: ExceptionTable::protection_faults(),
            peripherals: Box::new(Peripherals([0; PERIPHERAL_BYTES])),
            system_stack: Box::new(SystemStack([0; SYSTEM_STACK_WORDS])),
        }
    }

    /// Address ranges of the simulated peripherals and privileged stack.
    pub fn layout(&self) -> MemoryLayout {
        let peripherals = self.peripherals.0.as_ptr() as usize;
        let system_stack = self.system_stack.0.as_ptr() as usize;
        MemoryLayout {
            peripherals: peripherals..peripherals + PERIPHERAL_BYTES,
            system_stack: system_stack..system_stack + SYSTEM_STACK_WORDS * 4,
        }
    }

    pub fn fault_handler(&self) -> &FaultHandler {
        &self.faults
    }

    /// Run `scenario` on a fresh simulator until it halts.
    pub fn run(scenario: &'static Scenario, config: SimConfig) -> Report {
        let sim = Simulator::new(config);
        let layout = sim.layout();
        log::debug!("running {} with {:?}", scenario.name, config);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            ScenarioDriver::new(scenario, &sim, &sim, &sim.faults).run(&layout)
        }));
        let outcome = match result {
            Ok(_) => unreachable!("scenario driver returned"),
            Err(payload) => match payload.downcast::<Halt>() {
                Ok(halt) => halt.0,
                Err(payload) => panic::resume_unwind(payload),
            },
        };

        Report {
            outcome,
            transcript: sim.console.contents(),
            faults: sim.faults.fault_count(),
            trap_count: scenario.tracker.trap_count(),
            tracker_armed: scenario.tracker.is_armed(),
        }
    }

    /// Index of the task the scheduler would pick among those not started
    /// yet: highest priority first, and among equals the most recently
    /// created.
    fn next_unstarted(&self) -> Option<usize> {
        self.tasks
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, sim_task)| !sim_task.started)
            .max_by_key(|(index, sim_task)| (sim_task.task.priority(), *index))
            .map(|(index, _)| index)
    }

    fn switch_to(&self, index: usize) -> ! {
        let task = {
            let mut tasks = self.tasks.borrow_mut();
            tasks[index].started = true;
            tasks[index].task
        };
        log::debug!("switching to {}", task.name());
        let ctx = SimContext {
            sim: self,
            task: &task,
        };
        (task.body())(&ctx)
    }

    fn dispatch(&self, record: FaultRecord) {
        if self.config.clear_enable_before_trap {
            self.mpu_enabled.set(false);
        }
        log::debug!("dispatching {:?}", record);
        self.vectors.dispatch(&self.faults, self, &record);
    }
}

impl Machine for Simulator {
    type Console = SimConsole;

    fn console(&self) -> &SimConsole {
        &self.console
    }

    fn protection_enabled(&self) -> bool {
        self.mpu_enabled.get()
    }

    fn halt(&self, outcome: Outcome) -> ! {
        log::debug!("halted: {}", outcome);
        panic::resume_unwind(Box::new(Halt(outcome)))
    }
}

impl RestrictedScheduler for Simulator {
    fn create_restricted(&self, task: &RestrictedTask) -> Result<(), ErrorCode> {
        let mut tasks = self.tasks.borrow_mut();
        if tasks.len() >= self.config.task_capacity {
            return Err(ErrorCode::NOMEM);
        }
        tasks.push(SimTask {
            task: *task,
            started: false,
        });
        Ok(())
    }

    fn start(&self) -> ErrorCode {
        if let Some(err) = self.config.fail_start {
            return err;
        }
        match self.next_unstarted() {
            Some(index) => self.switch_to(index),
            None => ErrorCode::FAIL,
        }
    }
}

/// The view a running task has of the simulator.
struct SimContext<'a> {
    sim: &'a Simulator,
    task: &'a RestrictedTask,
}

impl SimContext<'_> {
    /// Fault record for a denied access, or `None` if it is allowed.
    fn check(&self, address: usize, len: usize, access: Access) -> Option<FaultRecord> {
        if !self.sim.config.enforce_protection || !self.sim.mpu_enabled.get() {
            return None;
        }
        let map = match self.task.memory_map() {
            Ok(map) => map,
            Err(_) => {
                return Some(self.data_abort(address, access));
            }
        };
        if map.permits(address, len, access, Mode::Unprivileged) {
            return None;
        }
        let first_denied = (address..address.saturating_add(len))
            .find(|&byte| !map.permits(byte, 1, access, Mode::Unprivileged))
            .unwrap_or(address);
        Some(self.data_abort(first_denied, access))
    }

    fn data_abort(&self, address: usize, access: Access) -> FaultRecord {
        FaultRecord {
            exception: Exception::DataAbort,
            address: Some(address),
            access: Some(access),
            pc: self.task.body() as usize,
        }
    }
}

impl UserContext for SimContext<'_> {
    fn print(&self, line: &str) {
        let uart = self.sim.layout().peripherals.start;
        match self.check(uart, 4, Access::Write) {
            None => self.sim.console.write(line.as_bytes()),
            Some(record) => self.sim.dispatch(record),
        }
    }

    unsafe fn read_word(&self, address: usize) -> u32 {
        match self.check(address, 4, Access::Read) {
            None => core::ptr::read_volatile(address as *const u32),
            Some(record) => {
                self.sim.dispatch(record);
                0
            }
        }
    }

    unsafe fn write_word(&self, address: usize, value: u32) {
        match self.check(address, 4, Access::Write) {
            None => core::ptr::write_volatile(address as *mut u32, value),
            Some(record) => self.sim.dispatch(record),
        }
    }

    unsafe fn read_block(&self, address: usize, buf: &mut [u8]) {
        match self.check(address, buf.len(), Access::Read) {
            None => {
                for (offset, byte) in buf.iter_mut().enumerate() {
                    *byte = core::ptr::read_volatile((address + offset) as *const u8);
                }
            }
            Some(record) => self.sim.dispatch(record),
        }
    }

    fn attempt_protection_disable(&self) {
        if self.sim.config.enforce_protection {
            self.sim.dispatch(FaultRecord {
                exception: Exception::UndefinedInstruction,
                address: None,
                access: None,
                pc: self.task.body() as usize,
            });
        } else {
            self.sim.mpu_enabled.set(false);
        }
    }

    fn delay_ms(&self, ms: u32) {
        log::trace!("{} sleeps for {} ms", self.task.name(), ms);
        match self.sim.next_unstarted() {
            Some(index) => self.sim.switch_to(index),
            None => panic!("every simulated task is blocked"),
        }
    }

    fn halt(&self, outcome: Outcome) -> ! {
        Machine::halt(self.sim, outcome)
    }
}
