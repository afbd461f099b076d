// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Shared cell a victim uses to announce that its next access is meant to
//! trap.
//!
//! The tracker is the one piece of memory both the victim and the fault
//! handler legitimately touch. It is exactly one minimum-size MPU region and
//! is granted to the victim explicitly, with attributes that differ from those
//! of the memory under test.
//!
//! ```text
//!  0       1         2..8      8..8+size_of::<usize>()    ..32
//! +-------+---------+---------+---------------------------+--------+
//! | armed | trapped | (zero)  | operand (native endian)   | (zero) |
//! +-------+---------+---------+---------------------------+--------+
//! ```
//!
//! - `armed` is written 1 by the victim strictly before its faulting
//!   instruction and cleared by the handler when it attributes a trap.
//! - `trapped` counts the traps the handler attributed to this tracker.
//! - `operand` is written by privileged code before the scheduler starts, for
//!   probes whose target is only known at runtime.

use core::sync::atomic::{compiler_fence, Ordering};

use tock_cells::volatile_cell::VolatileCell;

use crate::platform::mpu::{self, MemoryType, RegionDescriptor, RegionError};

/// Size of a tracker, the smallest region the MPU can protect.
pub const TRACKER_BYTES: usize = mpu::region_size(mpu::MIN_REGION_SIZE);

const ARMED: usize = 0;
const TRAPPED: usize = 1;
const OPERAND: usize = 8;
const OPERAND_BYTES: usize = core::mem::size_of::<usize>();

const _: () = assert!(OPERAND + OPERAND_BYTES <= TRACKER_BYTES);

#[repr(C, align(32))]
pub struct FaultTracker {
    cells: [VolatileCell<u8>; TRACKER_BYTES],
}

const _: () = assert!(core::mem::size_of::<FaultTracker>() == TRACKER_BYTES);
const _: () = assert!(core::mem::align_of::<FaultTracker>() == TRACKER_BYTES);

// Single core. The victim only writes `armed`, and only while the handler
// cannot run; the handler only runs after the hardware stopped the victim.
unsafe impl Sync for FaultTracker {}

impl FaultTracker {
    pub const fn new() -> FaultTracker {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: VolatileCell<u8> = VolatileCell::new(0);
        FaultTracker {
            cells: [ZERO; TRACKER_BYTES],
        }
    }

    pub fn base(&self) -> usize {
        self.cells.as_ptr() as usize
    }

    /// Announce that the next access is expected to trap.
    ///
    /// The store must not be reordered past the access that follows it.
    pub fn arm(&self) {
        self.cells[ARMED].set(1);
        compiler_fence(Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.cells[ARMED].set(0);
        compiler_fence(Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        compiler_fence(Ordering::SeqCst);
        self.cells[ARMED].get() != 0
    }

    /// Count one attributed trap. Saturates at 255.
    pub fn record_trap(&self) {
        let count = self.cells[TRAPPED].get();
        self.cells[TRAPPED].set(count.saturating_add(1));
    }

    pub fn trap_count(&self) -> u8 {
        self.cells[TRAPPED].get()
    }

    pub fn set_operand(&self, value: usize) {
        for (cell, byte) in self.cells[OPERAND..OPERAND + OPERAND_BYTES]
            .iter()
            .zip(value.to_ne_bytes())
        {
            cell.set(byte);
        }
    }

    pub fn operand(&self) -> usize {
        let mut bytes = [0; OPERAND_BYTES];
        for (byte, cell) in bytes
            .iter_mut()
            .zip(&self.cells[OPERAND..OPERAND + OPERAND_BYTES])
        {
            *byte = cell.get();
        }
        usize::from_ne_bytes(bytes)
    }

    /// Zero the whole tracker. Only done by privileged code before any task
    /// that can see the tracker has been created.
    pub fn reset(&self) {
        for cell in self.cells.iter() {
            cell.set(0);
        }
    }

    /// The region granting a victim read/write access to this tracker.
    ///
    /// Normal write-through memory, so it never shares attributes with the
    /// kernel data or peripherals a scenario probes.
    pub fn region(&self) -> Result<RegionDescriptor, RegionError> {
        RegionDescriptor::new(
            self.base(),
            TRACKER_BYTES,
            mpu::read_write_no_exec(MemoryType::NormalWriteThrough { shareable: true }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mpu::{Access, Mode};

    #[test]
    fn arm_and_disarm() {
        let tracker = FaultTracker::new();
        assert!(!tracker.is_armed());
        tracker.arm();
        assert!(tracker.is_armed());
        tracker.disarm();
        assert!(!tracker.is_armed());
    }

    #[test]
    fn trap_count_saturates() {
        let tracker = FaultTracker::new();
        for _ in 0..300 {
            tracker.record_trap();
        }
        assert_eq!(tracker.trap_count(), u8::MAX);
        tracker.reset();
        assert_eq!(tracker.trap_count(), 0);
    }

    #[test]
    fn operand_does_not_touch_flags() {
        let tracker = FaultTracker::new();
        tracker.arm();
        tracker.set_operand(0x0800_3ff0);
        assert_eq!(tracker.operand(), 0x0800_3ff0);
        assert!(tracker.is_armed());
        assert_eq!(tracker.trap_count(), 0);
    }

    #[test]
    fn tracker_is_one_user_writable_region() {
        let tracker = FaultTracker::new();
        assert_eq!(tracker.base() % TRACKER_BYTES, 0);
        let region = tracker.region().unwrap();
        assert_eq!(region.length(), 32);
        assert!(region.permits(Access::Write, Mode::Unprivileged));
    }
}
