// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Run isolation scenarios on the host simulator.
//!
//! ```text
//! run-scenario [OPTIONS] [SCENARIO...]
//! ```
//!
//! With no scenario names every scenario is run. The console transcript of
//! each scenario is printed followed by its outcome; the exit status is
//! non-zero if any scenario failed. Set `RUST_LOG=debug` to see the harness's
//! internal events.

use std::process::ExitCode;

use clap::Parser;
use harness::{scenarios, Scenario};
use harness_sim::{SimConfig, Simulator};

/// Run MPU isolation scenarios against the simulated Cortex-R4.
#[derive(Parser, Debug)]
#[command(name = "run-scenario")]
struct Cli {
    /// Scenarios to run, by name. Runs all of them when empty.
    #[arg(value_parser = parse_scenario)]
    scenarios: Vec<&'static Scenario>,

    /// Let every access through, as if the MPU were not programmed.
    #[arg(long)]
    no_protection: bool,

    /// Clear the MPU enable bit right before each fault is handled.
    #[arg(long)]
    clear_enable_before_trap: bool,

    /// Number of tasks the simulated scheduler accepts.
    #[arg(long, default_value_t = SimConfig::default().task_capacity)]
    task_capacity: usize,
}

impl Cli {
    fn config(&self) -> SimConfig {
        SimConfig {
            enforce_protection: !self.no_protection,
            clear_enable_before_trap: self.clear_enable_before_trap,
            task_capacity: self.task_capacity,
            ..SimConfig::default()
        }
    }

    fn selected(&self) -> Vec<&'static Scenario> {
        if self.scenarios.is_empty() {
            scenarios::ALL.to_vec()
        } else {
            self.scenarios.clone()
        }
    }
}

fn parse_scenario(name: &str) -> Result<&'static Scenario, String> {
    scenarios::find(name).ok_or_else(|| {
        let known: Vec<&str> = scenarios::ALL.iter().map(|scenario| scenario.name).collect();
        format!("unknown scenario (expected one of: {})", known.join(", "))
    })
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config();

    let mut failed = 0;
    for scenario in cli.selected() {
        let report = Simulator::run(scenario, config);
        print!("{}", report.transcript);
        println!("{}: {}", scenario.name, report.outcome);
        if !report.passed() {
            failed += 1;
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
