// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Decoding of abort and undefined instruction exceptions.
//!
//! The scheduler's exception stubs save the interrupted task's registers on
//! the exception stack and hand a pointer to them to the harness. On return
//! the stub restores them and branches to `lr`, so a handler that wants to
//! skip the faulting instruction rewrites `lr` in the saved frame.
//!
//! Tasks are assumed to run in ARM state. The return-address arithmetic below
//! is wrong for Thumb code.

use harness::fault::{Exception, FaultRecord};
use harness::platform::mpu::Access;
use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields![u32,
    /// Data Fault Status Register
    pub DFSR [
        /// AXI slave error, as opposed to a decode error
        SD OFFSET(12) NUMBITS(1) [],
        /// The abort was caused by a write
        WNR OFFSET(11) NUMBITS(1) [],
        /// Bit 4 of the fault status
        FS4 OFFSET(10) NUMBITS(1) [],
        /// Bits 3:0 of the fault status
        FS OFFSET(0) NUMBITS(4) []
    ]
];

/// Registers saved by an exception stub, in stacking order.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct ExceptionFrame {
    pub r: [u32; 13],
    /// Exception-mode link register. Holds the return address on exit.
    pub lr: u32,
}

/// Decoded DFSR fault status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultStatus {
    /// No region matched and the background region is disabled.
    Background,
    /// A region matched but denied the access.
    Permission,
    Alignment,
    SynchronousExternal,
    Debug,
    Other(u8),
}

/// Split a DFSR value into the fault status and access direction.
pub fn decode_dfsr(dfsr: u32) -> (FaultStatus, Access) {
    let dfsr = LocalRegisterCopy::<u32, DFSR::Register>::new(dfsr);
    let status = (dfsr.read(DFSR::FS4) << 4) | dfsr.read(DFSR::FS);
    let status = match status {
        0b00000 => FaultStatus::Background,
        0b01101 => FaultStatus::Permission,
        0b00001 => FaultStatus::Alignment,
        0b01000 => FaultStatus::SynchronousExternal,
        0b00010 => FaultStatus::Debug,
        other => FaultStatus::Other(other as u8),
    };
    let access = if dfsr.is_set(DFSR::WNR) {
        Access::Write
    } else {
        Access::Read
    };
    (status, access)
}

/// Address of the instruction that raised `exception`, given the banked `lr`
/// on entry.
pub fn faulting_pc(exception: Exception, lr: u32) -> u32 {
    match exception {
        Exception::DataAbort => lr.wrapping_sub(8),
        Exception::PrefetchAbort | Exception::UndefinedInstruction => lr.wrapping_sub(4),
    }
}

/// Address to return to in order to skip the faulting instruction.
pub fn resume_address(exception: Exception, lr: u32) -> u32 {
    faulting_pc(exception, lr).wrapping_add(4)
}

/// Build the harness's view of a data abort.
pub fn data_abort_record(dfsr: u32, dfar: u32, lr: u32) -> FaultRecord {
    let (status, access) = decode_dfsr(dfsr);
    // DFAR is only meaningful for synchronous faults the MPU raised.
    let address = match status {
        FaultStatus::Background | FaultStatus::Permission | FaultStatus::Alignment => {
            Some(dfar as usize)
        }
        _ => None,
    };
    FaultRecord {
        exception: Exception::DataAbort,
        address,
        access: Some(access),
        pc: faulting_pc(Exception::DataAbort, lr) as usize,
    }
}

/// Build the harness's view of an undefined instruction exception.
pub fn undefined_instruction_record(lr: u32) -> FaultRecord {
    FaultRecord {
        exception: Exception::UndefinedInstruction,
        address: None,
        access: None,
        pc: faulting_pc(Exception::UndefinedInstruction, lr) as usize,
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
pub fn read_dfsr() -> u32 {
    use core::arch::asm;
    let value: u32;
    unsafe {
        asm!("mrc p15, #0, {0}, c5, c0, #0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
pub fn read_dfar() -> u32 {
    use core::arch::asm;
    let value: u32;
    unsafe {
        asm!("mrc p15, #0, {0}, c6, c0, #0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
pub fn read_dfsr() -> u32 {
    unimplemented!()
}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
pub fn read_dfar() -> u32 {
    unimplemented!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_fault_on_read() {
        assert_eq!(decode_dfsr(0x0000_000d), (FaultStatus::Permission, Access::Read));
    }

    #[test]
    fn permission_fault_on_write() {
        assert_eq!(decode_dfsr(0x0000_080d), (FaultStatus::Permission, Access::Write));
    }

    #[test]
    fn background_and_other_status() {
        assert_eq!(decode_dfsr(0).0, FaultStatus::Background);
        assert_eq!(decode_dfsr(0x0000_0406).0, FaultStatus::Other(0b10110));
    }

    #[test]
    fn return_addresses() {
        assert_eq!(faulting_pc(Exception::DataAbort, 0x1008), 0x1000);
        assert_eq!(resume_address(Exception::DataAbort, 0x1008), 0x1004);
        assert_eq!(faulting_pc(Exception::UndefinedInstruction, 0x1004), 0x1000);
        assert_eq!(resume_address(Exception::UndefinedInstruction, 0x1004), 0x1004);
    }

    #[test]
    fn data_abort_record_carries_address() {
        let record = data_abort_record(0x0000_080d, 0x0800_0100, 0x2008);
        assert_eq!(record.exception, Exception::DataAbort);
        assert_eq!(record.address, Some(0x0800_0100));
        assert_eq!(record.access, Some(Access::Write));
        assert_eq!(record.pc, 0x2000);

        let external = data_abort_record(0x0000_0008, 0x0800_0100, 0x2008);
        assert_eq!(external.address, None);
    }

    #[test]
    fn frame_layout() {
        assert_eq!(core::mem::size_of::<ExceptionFrame>(), 14 * 4);
    }
}
