// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface to the kernel scheduler.

use crate::config::CONFIG;
use crate::task::RestrictedTask;
use crate::ErrorCode;

/// Scheduling priority of a task. Larger is more urgent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority every scenario task runs at: `configMAX_PRIORITIES - 1`.
    pub const fn scenario() -> Priority {
        Priority(CONFIG.max_priorities - 1)
    }
}

/// The scheduler primitives the harness consumes.
pub trait RestrictedScheduler {
    /// Create a task that runs unprivileged, with access to its own stack and
    /// the regions in `task.regions()` only.
    ///
    /// Fails when the scheduler cannot accept another task, for example
    /// because its task table is full.
    fn create_restricted(&self, task: &RestrictedTask) -> Result<(), ErrorCode>;

    /// Hand the processor to the scheduler.
    ///
    /// Only returns if the scheduler could not be started, with the reason.
    fn start(&self) -> ErrorCode;
}
