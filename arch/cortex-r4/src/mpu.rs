// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! PMSAv7 memory protection unit of the Cortex-R4.
//!
//! The MPU is programmed through CP15 c6 one region at a time: select the
//! region in RGNR, then write its base (DRBAR), size and enable (DRSR) and
//! access control (DRACR). When several enabled regions match an address,
//! the highest-numbered one decides.
//!
//! The scheduler programs the per-task regions on every context switch. This
//! module only encodes region descriptors into register values and reads back
//! the global MPU state.

use harness::platform::mpu::RegionDescriptor;
use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields![u32,
    /// MPU Type Register
    pub MPUIR [
        /// Number of data regions
        DREGION OFFSET(8) NUMBITS(8) [],
        /// Unified or separate instruction and data maps
        NU OFFSET(0) NUMBITS(1) [
            Unified = 0,
            Separate = 1
        ]
    ],

    /// Data Region Size and Enable Register
    pub DRSR [
        /// Subregion disable bits
        SD OFFSET(8) NUMBITS(8) [],
        /// Region size is 2^(RSIZE + 1) bytes
        RSIZE OFFSET(1) NUMBITS(5) [],
        /// Region enable
        EN OFFSET(0) NUMBITS(1) []
    ],

    /// Data Region Access Control Register
    pub DRACR [
        /// Execute never
        XN OFFSET(12) NUMBITS(1) [],
        /// Access permissions
        AP OFFSET(8) NUMBITS(3) [],
        /// Type extension
        TEX OFFSET(3) NUMBITS(3) [],
        /// Shareable
        S OFFSET(2) NUMBITS(1) [],
        /// Cacheable
        C OFFSET(1) NUMBITS(1) [],
        /// Bufferable
        B OFFSET(0) NUMBITS(1) []
    ],

    /// System Control Register
    pub SCTLR [
        /// Exception handlers run in Thumb state
        TE OFFSET(30) NUMBITS(1) [],
        /// Background region enable for privileged accesses
        BR OFFSET(17) NUMBITS(1) [],
        /// Instruction cache enable
        I OFFSET(12) NUMBITS(1) [],
        /// Data cache enable
        C OFFSET(2) NUMBITS(1) [],
        /// Alignment checking
        A OFFSET(1) NUMBITS(1) [],
        /// MPU enable
        M OFFSET(0) NUMBITS(1) []
    ]
];

/// Bits of a harness attribute word that map one to one onto DRACR.
const DRACR_MASK: u32 = 0x173f;

/// Register values for one MPU region.
#[derive(Copy, Clone, Debug)]
pub struct RegionRegisters {
    /// DRBAR
    pub base: u32,
    pub size: LocalRegisterCopy<u32, DRSR::Register>,
    pub access: LocalRegisterCopy<u32, DRACR::Register>,
}

/// Encode a region descriptor into the values the MPU expects.
///
/// The descriptor has already been validated, so its length is a power of
/// two of at least 32 bytes and its base is aligned to it.
pub fn encode_region(region: &RegionDescriptor) -> RegionRegisters {
    let rsize = region.length().trailing_zeros() - 1;
    let enable = if region.is_enabled() {
        DRSR::EN::SET
    } else {
        DRSR::EN::CLEAR
    };
    RegionRegisters {
        base: region.base() as u32,
        size: LocalRegisterCopy::new((DRSR::RSIZE.val(rsize) + enable).value),
        access: LocalRegisterCopy::new(region.attributes().get() & DRACR_MASK),
    }
}

/// The Cortex-R4 MPU.
pub struct CortexR4Mpu;

impl CortexR4Mpu {
    pub const fn new() -> CortexR4Mpu {
        CortexR4Mpu
    }

    /// Number of data regions implemented by this core (8 or 12 on the
    /// Cortex-R4).
    pub fn number_regions(&self) -> usize {
        let mpuir = LocalRegisterCopy::<u32, MPUIR::Register>::new(read_mpuir());
        mpuir.read(MPUIR::DREGION) as usize
    }

    /// Whether SCTLR.M is set.
    pub fn protection_enabled(&self) -> bool {
        let sctlr = LocalRegisterCopy::<u32, SCTLR::Register>::new(read_sctlr());
        sctlr.is_set(SCTLR::M)
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn read_mpuir() -> u32 {
    use core::arch::asm;
    let value: u32;
    unsafe {
        asm!("mrc p15, #0, {0}, c0, c0, #4", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn read_sctlr() -> u32 {
    use core::arch::asm;
    let value: u32;
    unsafe {
        asm!("mrc p15, #0, {0}, c1, c0, #0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Clear SCTLR.M.
///
/// Only succeeds at PL1. From user mode the first CP15 access raises an
/// undefined instruction exception and the MPU stays enabled, which is what
/// the protection-disable scenario checks for.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
#[inline(never)]
pub fn attempt_disable() {
    use core::arch::asm;
    unsafe {
        asm!(
            "mrc p15, #0, {t}, c1, c0, #0",
            "bic {t}, {t}, #1",
            "dsb",
            "mcr p15, #0, {t}, c1, c0, #0",
            "isb",
            t = out(reg) _,
            options(nostack, preserves_flags),
        );
    }
}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn read_mpuir() -> u32 {
    unimplemented!()
}

#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
fn read_sctlr() -> u32 {
    unimplemented!()
}

/// Clear SCTLR.M (mock)
#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
pub fn attempt_disable() {
    unimplemented!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::platform::mpu::{read_write_no_exec, Attributes, MemoryType};

    #[test]
    fn size_field_is_log2_minus_one() {
        let region =
            RegionDescriptor::new(0x0800_0000, 32, read_write_no_exec(MemoryType::Device)).unwrap();
        let regs = encode_region(&region);
        assert_eq!(regs.size.read(DRSR::RSIZE), 4);
        assert!(regs.size.is_set(DRSR::EN));
        assert_eq!(regs.size.get(), 0b1001);

        let region = RegionDescriptor::new(
            0x0800_0000,
            512,
            read_write_no_exec(MemoryType::NormalWriteThrough { shareable: false }),
        )
        .unwrap();
        assert_eq!(encode_region(&region).size.read(DRSR::RSIZE), 8);
    }

    #[test]
    fn access_control_drops_enable_flag() {
        let region = RegionDescriptor::new(
            0x0800_0020,
            32,
            read_write_no_exec(MemoryType::NormalWriteThrough { shareable: true }),
        )
        .unwrap();
        let regs = encode_region(&region);
        assert_eq!(regs.base, 0x0800_0020);
        assert_eq!(regs.access.get(), 0x1306);
        assert!(regs.access.is_set(DRACR::XN));
        assert_eq!(regs.access.read(DRACR::AP), 0b011);

        // Strongly ordered memory leaves TEX, C and B clear.
        let kernel = RegionDescriptor::new(
            0x0800_0000,
            64,
            Attributes::ENABLE::SET + Attributes::XN::ExecuteNever + Attributes::AP::PrivilegedOnly,
        )
        .unwrap();
        assert_eq!(encode_region(&kernel).access.read(DRACR::AP), 0b001);
    }

    #[test]
    fn disabled_region_is_encoded_disabled() {
        let region =
            RegionDescriptor::new(0x0800_0000, 32, Attributes::AP::ReadWrite).unwrap();
        assert!(!encode_region(&region).size.is_set(DRSR::EN));
    }
}
