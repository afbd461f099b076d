// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Scenario descriptions and the driver that runs one.
//!
//! A scenario is run exactly once per boot. The driver walks it through
//!
//! ```text
//! Unconfigured -> TasksRegistered -> SchedulerRunning -> { Passed | Failed }
//! ```
//!
//! The final transition is not made by the driver. Once the scheduler is
//! running, the verdict comes from either the fault handler (an attributed
//! trap) or the victim itself (a violation that was not trapped, or a
//! resumed one).

use core::cell::Cell;
use core::fmt;

use crate::debug::{self, event_level};
use crate::fault::{Expectation, FaultHandler, UnexpectedCause};
use crate::platform::machine::Machine;
use crate::platform::mpu::{Access, Mode, RegionError};
use crate::platform::scheduler::RestrictedScheduler;
use crate::platform::MemoryLayout;
use crate::task::RestrictedTask;
use crate::tracker::{FaultTracker, TRACKER_BYTES};
use crate::ErrorCode;

/// Tasks a single scenario may create: the victim and one companion.
pub const MAX_SCENARIO_TASKS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScenarioState {
    Unconfigured,
    TasksRegistered,
    SchedulerRunning,
    Passed,
    Failed,
}

/// Terminal result of a scenario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(Failure),
}

impl Outcome {
    pub fn state(&self) -> ScenarioState {
        match self {
            Outcome::Passed => ScenarioState::Passed,
            Outcome::Failed(_) => ScenarioState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("PASS"),
            Outcome::Failed(failure) => write!(f, "FAIL ({})", failure),
        }
    }
}

/// Why a scenario failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The scheduler refused to create one of the scenario's tasks.
    Registration(ErrorCode),
    /// The scheduler returned from `start`.
    SchedulerStart(ErrorCode),
    /// The victim's illegal operation completed without a trap.
    NotTrapped,
    /// A fault was taken that the scenario did not announce.
    UnexpectedFault(UnexpectedCause),
    /// The protection hardware was found disabled when a fault was taken.
    ProtectionDisabled,
    /// The scenario's own description is inconsistent.
    Misconfigured(ConfigError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Registration(err) => write!(f, "registration: {}", err),
            Failure::SchedulerStart(err) => write!(f, "scheduler start: {}", err),
            Failure::NotTrapped => f.write_str("not trapped"),
            Failure::UnexpectedFault(cause) => write!(f, "unexpected fault: {}", cause),
            Failure::ProtectionDisabled => f.write_str("protection disabled"),
            Failure::Misconfigured(err) => write!(f, "misconfigured: {}", err),
        }
    }
}

/// A scenario that fails its own consistency checks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Region(RegionError),
    /// The victim has been granted the memory it is supposed to be denied.
    ProbeAccessible,
    /// The victim could not arm its tracker.
    TrackerNotWritable,
    /// The probe touches the tracker, so a trap could not be told apart from
    /// a bad tracker grant.
    ProbeOverlapsTracker,
    RegionListFull,
    TooManyTasks,
}

impl From<RegionError> for ConfigError {
    fn from(err: RegionError) -> ConfigError {
        ConfigError::Region(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Region(err) => fmt::Display::fmt(err, f),
            ConfigError::ProbeAccessible => f.write_str("probe is accessible to the victim"),
            ConfigError::TrackerNotWritable => f.write_str("tracker is not writable by the victim"),
            ConfigError::ProbeOverlapsTracker => f.write_str("probe overlaps the tracker"),
            ConfigError::RegionListFull => f.write_str("too many regions for one task"),
            ConfigError::TooManyTasks => f.write_str("too many tasks for one scenario"),
        }
    }
}

/// The tasks and expected fault of one scenario, ready to be registered.
#[derive(Copy, Clone, Debug)]
pub struct ScenarioPlan {
    victim: RestrictedTask,
    companion: Option<RestrictedTask>,
    expectation: Expectation,
}

impl ScenarioPlan {
    pub fn new(victim: RestrictedTask, expectation: Expectation) -> ScenarioPlan {
        ScenarioPlan {
            victim,
            companion: None,
            expectation,
        }
    }

    /// Add a task that only exists so the victim has something to probe.
    pub fn with_companion(mut self, companion: RestrictedTask) -> Result<ScenarioPlan, ConfigError> {
        if self.companion.is_some() {
            return Err(ConfigError::TooManyTasks);
        }
        self.companion = Some(companion);
        Ok(self)
    }

    pub fn victim(&self) -> &RestrictedTask {
        &self.victim
    }

    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    /// Tasks in creation order.
    pub fn tasks(&self) -> impl Iterator<Item = &RestrictedTask> {
        core::iter::once(&self.victim).chain(self.companion.as_ref())
    }

    /// Check that the plan can only pass if the hardware actually enforces
    /// the victim's region list.
    pub fn verify(&self) -> Result<(), ConfigError> {
        let map = self.victim.memory_map()?;
        let tracker = self.expectation.tracker;

        if !map.permits(tracker.base(), TRACKER_BYTES, Access::Write, Mode::Unprivileged) {
            return Err(ConfigError::TrackerNotWritable);
        }

        if let (Some((address, len)), Some(access)) = (
            self.expectation.probe.range(),
            self.expectation.probe.access(),
        ) {
            if tracker.region()?.overlaps(address, len) {
                return Err(ConfigError::ProbeOverlapsTracker);
            }
            if map.permits(address, len, access, Mode::Unprivileged) {
                return Err(ConfigError::ProbeAccessible);
            }
        }
        Ok(())
    }
}

/// A named, self-contained isolation check.
pub struct Scenario {
    pub name: &'static str,
    /// Printed on the console before the tasks are created.
    pub description: &'static str,
    /// Tracker shared by the scenario's victim and the fault handler.
    pub tracker: &'static FaultTracker,
    /// Describe the scenario's tasks for this memory layout.
    pub build: fn(&MemoryLayout) -> Result<ScenarioPlan, ConfigError>,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

/// Runs one [`Scenario`] on top of a machine and scheduler.
pub struct ScenarioDriver<'a, M: Machine, S: RestrictedScheduler> {
    scenario: &'a Scenario,
    machine: &'a M,
    scheduler: &'a S,
    faults: &'a FaultHandler,
    state: Cell<ScenarioState>,
}

impl<'a, M: Machine, S: RestrictedScheduler> ScenarioDriver<'a, M, S> {
    pub fn new(
        scenario: &'a Scenario,
        machine: &'a M,
        scheduler: &'a S,
        faults: &'a FaultHandler,
    ) -> ScenarioDriver<'a, M, S> {
        ScenarioDriver {
            scenario,
            machine,
            scheduler,
            faults,
            state: Cell::new(ScenarioState::Unconfigured),
        }
    }

    pub fn state(&self) -> ScenarioState {
        self.state.get()
    }

    fn transition(&self, next: ScenarioState) {
        log::log!(
            event_level(),
            "{}: {:?} -> {:?}",
            self.scenario.name,
            self.state.get(),
            next
        );
        self.state.set(next);
    }

    /// Build and check the scenario, then create its tasks.
    ///
    /// The fault handler is told what to expect before any task exists, so
    /// no task can fault ahead of the expectation.
    pub fn register(&self, layout: &MemoryLayout) -> Result<ScenarioPlan, Failure> {
        if self.state.get() != ScenarioState::Unconfigured {
            return Err(Failure::Registration(ErrorCode::ALREADY));
        }

        debug::print(self.machine.console(), self.scenario.description);

        self.scenario.tracker.reset();
        let plan = (self.scenario.build)(layout).map_err(Failure::Misconfigured)?;
        plan.verify().map_err(Failure::Misconfigured)?;

        self.faults.expect(plan.expectation());
        for task in plan.tasks() {
            log::log!(event_level(), "creating {:?}", task);
            self.scheduler
                .create_restricted(task)
                .map_err(Failure::Registration)?;
        }

        self.transition(ScenarioState::TasksRegistered);
        Ok(plan)
    }

    /// Hand over to the scheduler. Only returns on failure.
    pub fn start(&self) -> Failure {
        if self.state.get() != ScenarioState::TasksRegistered {
            return Failure::SchedulerStart(ErrorCode::INVAL);
        }
        debug::banner(self.machine.console(), debug::STARTING_SCHEDULER);
        self.transition(ScenarioState::SchedulerRunning);
        Failure::SchedulerStart(self.scheduler.start())
    }

    /// Run the scenario to completion.
    pub fn run(&self, layout: &MemoryLayout) -> ! {
        let failure = match self.register(layout) {
            Ok(_) => self.start(),
            Err(failure) => failure,
        };
        self.fail(failure)
    }

    fn fail(&self, failure: Failure) -> ! {
        log::warn!("{}: {}", self.scenario.name, failure);
        match failure {
            Failure::Misconfigured(err) => debug::print_fmt(
                self.machine.console(),
                format_args!("Scenario {} is misconfigured: {}.\r\n", self.scenario.name, err),
            ),
            _ => debug::banner(self.machine.console(), debug::FAILED_TO_START_SCHEDULER),
        }
        self.faults.clear();
        self.transition(ScenarioState::Failed);
        self.machine.halt(Outcome::Failed(failure))
    }
}
