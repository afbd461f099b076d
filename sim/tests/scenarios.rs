// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! End-to-end runs of every scenario on the simulator.
//!
//! Scenarios own static trackers and task memory, so these tests must not run
//! concurrently.

use harness::debug::{FAILED_TO_START_SCHEDULER, STARTING_SCHEDULER, TEST_FAILED, TEST_PASSED};
use std::sync::atomic::AtomicU32;

use harness::fault::{Expectation, Probe, Recovery, UnexpectedCause};
use harness::platform::machine::UserContext;
use harness::platform::mpu::{read_write_no_exec, MemoryType, RegionDescriptor};
use harness::platform::MemoryLayout;
use harness::scenario::{ConfigError, ScenarioPlan};
use harness::scenarios::{self, write_kernel_data};
use harness::task::{ControlBlock, RestrictedTask, TaskStack};
use harness::tracker::FaultTracker;
use harness::{ErrorCode, Failure, Outcome, Scenario, ScenarioState};
use harness_sim::{Report, SimConfig, Simulator};
use serial_test::serial;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run(name: &str, config: SimConfig) -> Report {
    init_logging();
    let scenario = scenarios::find(name).expect("scenario exists");
    Simulator::run(scenario, config)
}

fn position(report: &Report, needle: &str) -> usize {
    report
        .transcript
        .find(needle)
        .unwrap_or_else(|| panic!("{:?} not in transcript:\n{}", needle, report.transcript))
}

#[test]
#[serial]
fn every_scenario_passes_on_working_hardware() {
    for scenario in scenarios::ALL.iter() {
        init_logging();
        let report = Simulator::run(scenario, SimConfig::default());
        assert_eq!(report.outcome, Outcome::Passed, "{}", report.transcript);
        assert_eq!(report.state(), ScenarioState::Passed);
        assert_eq!(report.trap_count, 1, "{}", scenario.name);
        assert!(!report.tracker_armed, "{}", scenario.name);
        assert_eq!(report.faults, 1, "{}", scenario.name);
    }
}

#[test]
#[serial]
fn pass_is_reported_after_the_scheduler_starts() {
    let report = run("disable_protection", SimConfig::default());
    let description = position(&report, "attempts to disable the MPU");
    let banner = position(&report, STARTING_SCHEDULER);
    let attempt = position(&report, "Attempting to disable the MPU");
    let verdict = position(&report, TEST_PASSED);
    assert!(description < banner && banner < attempt && attempt < verdict);
    assert!(!report.transcript.contains(TEST_FAILED));
}

#[test]
#[serial]
fn read_is_resumed_and_victim_reports() {
    let report = run("read_kernel_data", SimConfig::default());
    assert!(report.passed());
    // The handler resumed instead of halting, so only the victim printed the
    // verdict.
    assert_eq!(report.transcript.matches(TEST_PASSED).count(), 1);
    assert!(position(&report, "Attempting to read kernel data") < position(&report, TEST_PASSED));
}

#[test]
#[serial]
fn refused_write_leaves_kernel_data_alone() {
    let report = run("write_kernel_data", SimConfig::default());
    assert!(report.passed());
    assert_eq!(write_kernel_data::kernel_data(), 0xFEED);
}

#[test]
#[serial]
fn companion_control_block_is_out_of_reach() {
    let report = run("read_task_control_block", SimConfig::default());
    assert!(report.passed());
    assert!(report.transcript.contains("Attempting to read from Task Two's TCB."));
}

#[test]
#[serial]
fn untrapped_read_is_reported_by_the_victim() {
    let report = run(
        "read_kernel_data",
        SimConfig {
            enforce_protection: false,
            ..SimConfig::default()
        },
    );
    assert_eq!(report.outcome, Outcome::Failed(Failure::NotTrapped));
    assert!(report.transcript.contains(TEST_FAILED));
    assert!(!report.transcript.contains(TEST_PASSED));
    assert_eq!(report.faults, 0);
    assert!(report.tracker_armed);
}

#[test]
#[serial]
fn untrapped_system_stack_read() {
    let report = run(
        "read_system_stack",
        SimConfig {
            enforce_protection: false,
            ..SimConfig::default()
        },
    );
    assert_eq!(report.outcome, Outcome::Failed(Failure::NotTrapped));
}

#[test]
#[serial]
fn privileged_instruction_from_user_mode_is_caught() {
    let report = run(
        "disable_protection",
        SimConfig {
            enforce_protection: false,
            ..SimConfig::default()
        },
    );
    assert_eq!(report.outcome, Outcome::Failed(Failure::NotTrapped));
    assert_eq!(report.trap_count, 0);
}

#[test]
#[serial]
fn cleared_enable_bit_fails_even_when_trapped() {
    let report = run(
        "write_kernel_data",
        SimConfig {
            clear_enable_before_trap: true,
            ..SimConfig::default()
        },
    );
    assert_eq!(report.outcome, Outcome::Failed(Failure::ProtectionDisabled));
    assert!(!report.transcript.contains(TEST_PASSED));
}

#[test]
#[serial]
fn disable_attempt_that_clears_enable_bit_fails() {
    let report = run(
        "disable_protection",
        SimConfig {
            clear_enable_before_trap: true,
            ..SimConfig::default()
        },
    );
    assert_eq!(report.outcome, Outcome::Failed(Failure::ProtectionDisabled));
    assert!(report
        .transcript
        .contains("MPU was disabled by an unprivileged task."));
    assert!(!report.transcript.contains(TEST_PASSED));
}

#[test]
#[serial]
fn full_task_table_fails_registration() {
    let report = run(
        "read_task_control_block",
        SimConfig {
            task_capacity: 1,
            ..SimConfig::default()
        },
    );
    assert_eq!(
        report.outcome,
        Outcome::Failed(Failure::Registration(ErrorCode::NOMEM))
    );
    assert!(report.transcript.contains(FAILED_TO_START_SCHEDULER));
    assert!(!report.transcript.contains(STARTING_SCHEDULER));
    assert_eq!(report.faults, 0);
}

#[test]
#[serial]
fn scheduler_that_returns_fails_the_scenario() {
    let report = run(
        "read_system_stack",
        SimConfig {
            fail_start: Some(ErrorCode::BUSY),
            ..SimConfig::default()
        },
    );
    assert_eq!(
        report.outcome,
        Outcome::Failed(Failure::SchedulerStart(ErrorCode::BUSY))
    );
    assert!(position(&report, STARTING_SCHEDULER) < position(&report, FAILED_TO_START_SCHEDULER));
}

static STRAY_TRACKER: FaultTracker = FaultTracker::new();
static STRAY_STACK: TaskStack = TaskStack::new();
static STRAY_TCB: ControlBlock = ControlBlock::new();
static STRAY_TARGET: AtomicU32 = AtomicU32::new(0);

/// A victim that reads its target without arming the tracker first.
static STRAY: Scenario = Scenario {
    name: "stray_read",
    description: "Creating a task that faults without arming its tracker\r\n",
    tracker: &STRAY_TRACKER,
    build: build_stray,
};

fn stray_victim(ctx: &dyn UserContext) -> ! {
    ctx.print("Reading without arming.\r\n");
    let _ = unsafe { ctx.read_word(&STRAY_TARGET as *const AtomicU32 as usize) };
    ctx.halt(Outcome::Failed(Failure::NotTrapped))
}

fn build_stray(layout: &MemoryLayout) -> Result<ScenarioPlan, ConfigError> {
    let mut task = RestrictedTask::new("Stray", stray_victim, &STRAY_STACK, &STRAY_TCB);
    let console = RegionDescriptor::from_range(
        layout.peripherals.clone(),
        read_write_no_exec(MemoryType::Device),
    )?;
    task.grant(console)
        .map_err(|_| ConfigError::RegionListFull)?;
    task.grant(STRAY_TRACKER.region()?)
        .map_err(|_| ConfigError::RegionListFull)?;
    Ok(ScenarioPlan::new(
        task,
        Expectation {
            tracker: &STRAY_TRACKER,
            probe: Probe::Read {
                address: &STRAY_TARGET as *const AtomicU32 as usize,
                len: 4,
            },
            recovery: Recovery::Halt,
        },
    ))
}

#[test]
#[serial]
fn fault_with_disarmed_tracker_is_unexpected() {
    init_logging();
    let report = Simulator::run(&STRAY, SimConfig::default());
    assert_eq!(
        report.outcome,
        Outcome::Failed(Failure::UnexpectedFault(UnexpectedCause::NotArmed))
    );
    assert!(report.transcript.contains("Unexpected data abort at pc"));
    assert!(report.transcript.contains("tracker not armed"));
    assert!(!report.transcript.contains(TEST_PASSED));
    assert_eq!(report.trap_count, 0);
}
