// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Conformance harness for MPU-based task isolation.
//!
//! Every scenario in this crate starts one deliberately under-privileged task
//! that commits exactly one illegal operation: touching kernel data, another
//! task's control block, the privileged stack, or the MPU enable bit itself.
//! The scenario passes only if the protection hardware traps the operation
//! and the privileged fault handler attributes the trap to the armed
//! [`FaultTracker`](tracker::FaultTracker).
//!
//! The crate only describes the protocol. Scheduling, MPU programming,
//! exception vectoring and the console are consumed through the traits in
//! [`platform`], implemented by a board crate on hardware and by
//! `harness-sim` on the host.

#![no_std]

pub mod debug;
pub mod errorcode;
pub mod fault;
pub mod platform;
pub mod scenario;
pub mod scenarios;
pub mod task;
pub mod tracker;

mod config;

pub use crate::errorcode::ErrorCode;
pub use crate::scenario::{Failure, Outcome, Scenario, ScenarioDriver, ScenarioState};
