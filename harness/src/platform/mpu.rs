// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Declarative description of MPU regions.
//!
//! A [`RegionDescriptor`] states an address range and what may be done with
//! it. The MPU driver turns descriptors into hardware region registers; the
//! harness only uses them as the declared policy and, through
//! [`TaskMemoryMap`], to check ahead of time that a scenario's probe really
//! falls outside everything the victim was granted.
//!
//! The attribute word mirrors the PMSAv7 Data Region Access Control Register
//! in bits 0-12, with the region enable flag carried in bit 16:
//!
//! ```text
//!  16        12    10..8    5..3   2   1   0
//! +--------+----+--------+------+---+---+---+
//! | ENABLE | XN |   AP   | TEX  | S | C | B |
//! +--------+----+--------+------+---+---+---+
//! ```

use core::fmt;
use core::ops::Range;

use tock_registers::fields::FieldValue;
use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::ErrorCode;

/// Smallest region the MPU can protect, in bytes.
pub const MIN_REGION_SIZE: usize = 32;

/// Number of regions a restricted task may declare beyond its stack.
pub const NUM_CONFIGURABLE_REGIONS: usize = 3;

register_bitfields![u32,
    pub Attributes [
        /// Region is matched by the MPU.
        ENABLE OFFSET(16) NUMBITS(1) [],
        /// Execute never
        XN OFFSET(12) NUMBITS(1) [
            Execute = 0,
            ExecuteNever = 1
        ],
        /// Access permissions
        AP OFFSET(8) NUMBITS(3) [
            //                                 Privileged  Unprivileged
            //                                 Access      Access
            NoAccess = 0b000,               // --          --
            PrivilegedOnly = 0b001,         // RW          --
            UnprivilegedReadOnly = 0b010,   // RW          R-
            ReadWrite = 0b011,              // RW          RW
            PrivilegedReadOnly = 0b101,     // R-          --
            ReadOnly = 0b110                // R-          R-
        ],
        /// Type extension
        TEX OFFSET(3) NUMBITS(3) [],
        /// Shareable
        S OFFSET(2) NUMBITS(1) [],
        /// Cacheable
        C OFFSET(1) NUMBITS(1) [],
        /// Bufferable
        B OFFSET(0) NUMBITS(1) []
    ]
];

/// Raw attribute word of a region.
pub type AttributeBits = LocalRegisterCopy<u32, Attributes::Register>;

/// Returns `len` if it is a valid MPU region size, and fails const
/// evaluation otherwise.
///
/// Sizes of statically allocated regions (trackers, stacks) go through this
/// function so that an invalid size is rejected when the image is built:
///
/// ```compile_fail
/// static TOO_SMALL: usize = harness::platform::mpu::region_size(31);
/// ```
///
/// ```
/// static SMALLEST: usize = harness::platform::mpu::region_size(32);
/// assert_eq!(SMALLEST, 32);
/// ```
pub const fn region_size(len: usize) -> usize {
    assert!(
        len.is_power_of_two(),
        "MPU region size must be a power of two"
    );
    assert!(
        len >= MIN_REGION_SIZE,
        "MPU region size is below the minimum granule"
    );
    len
}

/// Kind of memory access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

/// Processor privilege level an access is made from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Privileged,
    Unprivileged,
}

/// Memory type and cache policy of a region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryType {
    StronglyOrdered,
    /// Shared device memory, used for peripherals.
    Device,
    /// Normal memory, outer and inner write-through, no write-allocate.
    NormalWriteThrough { shareable: bool },
}

impl MemoryType {
    fn field(self) -> FieldValue<u32, Attributes::Register> {
        match self {
            MemoryType::StronglyOrdered => {
                Attributes::TEX.val(0) + Attributes::C::CLEAR + Attributes::B::CLEAR
            }
            MemoryType::Device => {
                Attributes::TEX.val(0) + Attributes::C::CLEAR + Attributes::B::SET
            }
            MemoryType::NormalWriteThrough { shareable } => {
                let s = if shareable {
                    Attributes::S::SET
                } else {
                    Attributes::S::CLEAR
                };
                Attributes::TEX.val(0) + Attributes::C::SET + Attributes::B::CLEAR + s
            }
        }
    }
}

/// Attribute word for an enabled, non-executable region that both privilege
/// levels may read and write.
pub fn read_write_no_exec(memory: MemoryType) -> FieldValue<u32, Attributes::Register> {
    Attributes::ENABLE::SET
        + Attributes::XN::ExecuteNever
        + Attributes::AP::ReadWrite
        + memory.field()
}


/// Why a region could not be described.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionError {
    Empty,
    NotPowerOfTwo,
    /// Smaller than [`MIN_REGION_SIZE`].
    TooSmall,
    /// The base is not aligned to the region length.
    Misaligned,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::Empty => f.write_str("region is empty"),
            RegionError::NotPowerOfTwo => f.write_str("region length is not a power of two"),
            RegionError::TooSmall => write!(
                f,
                "region length is below the {} byte minimum",
                MIN_REGION_SIZE
            ),
            RegionError::Misaligned => f.write_str("region base is not aligned to its length"),
        }
    }
}

/// One MPU region: an address range plus its attribute word.
#[derive(Copy, Clone)]
pub struct RegionDescriptor {
    base: usize,
    length: usize,
    attributes: AttributeBits,
}

impl RegionDescriptor {
    /// Describe `length` bytes starting at `base`.
    ///
    /// The length must be a power of two of at least [`MIN_REGION_SIZE`]
    /// bytes and `base` must be aligned to it.
    pub fn new(
        base: usize,
        length: usize,
        attributes: FieldValue<u32, Attributes::Register>,
    ) -> Result<RegionDescriptor, RegionError> {
        if length == 0 {
            return Err(RegionError::Empty);
        }
        if !length.is_power_of_two() {
            return Err(RegionError::NotPowerOfTwo);
        }
        if length < MIN_REGION_SIZE {
            return Err(RegionError::TooSmall);
        }
        if base % length != 0 {
            return Err(RegionError::Misaligned);
        }
        Ok(RegionDescriptor {
            base,
            length,
            attributes: LocalRegisterCopy::new(attributes.value),
        })
    }

    /// Describe a `[start, end)` range, typically bounded by linker symbols.
    pub fn from_range(
        range: Range<usize>,
        attributes: FieldValue<u32, Attributes::Register>,
    ) -> Result<RegionDescriptor, RegionError> {
        let length = range.end.checked_sub(range.start).ok_or(RegionError::Empty)?;
        RegionDescriptor::new(range.start, length, attributes)
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Address of the last byte in the region.
    ///
    /// Regions may end at the top of the address space, so there is no
    /// exclusive end address.
    pub fn last(&self) -> usize {
        self.base + (self.length - 1)
    }

    pub fn attributes(&self) -> AttributeBits {
        self.attributes
    }

    pub fn is_enabled(&self) -> bool {
        self.attributes.is_set(Attributes::ENABLE)
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address - self.base < self.length
    }

    /// Whether any byte of `[address, address + len)` lies in the region.
    pub fn overlaps(&self, address: usize, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        let last = address.saturating_add(len - 1);
        address <= self.last() && last >= self.base
    }

    /// Whether this region alone allows `access` from `mode`.
    pub fn permits(&self, access: Access, mode: Mode) -> bool {
        let (privileged, unprivileged) = match self.attributes.read(Attributes::AP) {
            0b001 => ((true, true), (false, false)),
            0b010 => ((true, true), (true, false)),
            0b011 => ((true, true), (true, true)),
            0b101 => ((true, false), (false, false)),
            0b110 => ((true, false), (true, false)),
            _ => ((false, false), (false, false)),
        };
        let (read, write) = match mode {
            Mode::Privileged => privileged,
            Mode::Unprivileged => unprivileged,
        };
        match access {
            Access::Read => read,
            Access::Write => write,
            Access::Execute => read && !self.attributes.is_set(Attributes::XN),
        }
    }
}

impl PartialEq for RegionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.length == other.length
            && self.attributes.get() == other.attributes.get()
    }
}

impl fmt::Debug for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionDescriptor")
            .field("base", &format_args!("{:#010x}", self.base))
            .field("length", &format_args!("{:#x}", self.length))
            .field("attributes", &format_args!("{:#07x}", self.attributes.get()))
            .finish()
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x}..={:#010x} attr {:#07x}",
            self.base,
            self.last(),
            self.attributes.get()
        )
    }
}

/// Fixed-capacity, ordered list of the regions a restricted task declares.
#[derive(Copy, Clone, Debug)]
pub struct RegionList {
    slots: [Option<RegionDescriptor>; NUM_CONFIGURABLE_REGIONS],
    len: usize,
}

impl RegionList {
    pub const fn new() -> RegionList {
        RegionList {
            slots: [None; NUM_CONFIGURABLE_REGIONS],
            len: 0,
        }
    }

    /// Append a region. Later regions take priority over earlier ones where
    /// they overlap.
    pub fn push(&mut self, region: RegionDescriptor) -> Result<(), ErrorCode> {
        let slot = self.slots.get_mut(self.len).ok_or(ErrorCode::SIZE)?;
        *slot = Some(region);
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionDescriptor> {
        self.slots[..self.len].iter().flatten()
    }
}

/// Everything one restricted task can reach, ordered by MPU region number.
///
/// Region priority follows the hardware rule that the highest-numbered
/// matching region wins. From lowest to highest: the privileged background
/// map, the declared regions in list order, then the task's stack.
pub struct TaskMemoryMap<'a> {
    stack: RegionDescriptor,
    regions: &'a RegionList,
}

impl<'a> TaskMemoryMap<'a> {
    pub fn new(stack: RegionDescriptor, regions: &'a RegionList) -> TaskMemoryMap<'a> {
        TaskMemoryMap { stack, regions }
    }

    fn by_region_number(&self) -> impl Iterator<Item = &RegionDescriptor> {
        self.regions
            .iter()
            .chain(core::iter::once(&self.stack))
            .filter(|region| region.is_enabled())
    }

    /// The region that decides accesses to `address`, if any matches.
    pub fn resolve(&self, address: usize) -> Option<&RegionDescriptor> {
        self.by_region_number()
            .filter(|region| region.contains(address))
            .last()
    }

    /// Smallest address above `after` at which the deciding region may
    /// change.
    fn next_boundary(&self, after: usize) -> Option<usize> {
        self.by_region_number()
            .flat_map(|region| [Some(region.base()), region.last().checked_add(1)])
            .flatten()
            .filter(|&boundary| boundary > after)
            .min()
    }

    /// Whether every byte of `[address, address + len)` allows `access` from
    /// `mode`.
    ///
    /// Addresses no region matches are only reachable by privileged code,
    /// through the background map.
    pub fn permits(&self, address: usize, len: usize, access: Access, mode: Mode) -> bool {
        if len == 0 {
            return true;
        }
        let last = match address.checked_add(len - 1) {
            Some(last) => last,
            None => return false,
        };

        let mut cursor = address;
        loop {
            let allowed = match self.resolve(cursor) {
                Some(region) => region.permits(access, mode),
                None => mode == Mode::Privileged,
            };
            if !allowed {
                return false;
            }
            match self.next_boundary(cursor) {
                Some(next) if next <= last => cursor = next,
                _ => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_rw(base: usize, length: usize) -> RegionDescriptor {
        RegionDescriptor::new(
            base,
            length,
            read_write_no_exec(MemoryType::NormalWriteThrough { shareable: true }),
        )
        .unwrap()
    }

    fn kernel_only(base: usize, length: usize) -> RegionDescriptor {
        let attributes = Attributes::ENABLE::SET
            + Attributes::XN::ExecuteNever
            + Attributes::AP::PrivilegedOnly
            + MemoryType::StronglyOrdered.field();
        RegionDescriptor::new(base, length, attributes).unwrap()
    }

    #[test]
    fn minimum_granule_is_accepted() {
        let region = user_rw(0x0800_0000, MIN_REGION_SIZE);
        assert_eq!(region.length(), 32);
        assert_eq!(region.last(), 0x0800_001f);
    }

    #[test]
    fn region_one_byte_below_granule_is_rejected() {
        let attrs = read_write_no_exec(MemoryType::Device);
        assert_eq!(
            RegionDescriptor::new(0x0800_0000, 31, attrs).unwrap_err(),
            RegionError::NotPowerOfTwo
        );
        assert_eq!(
            RegionDescriptor::new(0x0800_0000, 16, attrs).unwrap_err(),
            RegionError::TooSmall
        );
    }

    #[test]
    fn region_validation() {
        let attrs = read_write_no_exec(MemoryType::Device);
        assert_eq!(
            RegionDescriptor::new(0x0800_0000, 0, attrs).unwrap_err(),
            RegionError::Empty
        );
        assert_eq!(
            RegionDescriptor::new(0x0800_0000, 48, attrs).unwrap_err(),
            RegionError::NotPowerOfTwo
        );
        assert_eq!(
            RegionDescriptor::new(0x0800_0020, 64, attrs).unwrap_err(),
            RegionError::Misaligned
        );
        assert_eq!(
            RegionDescriptor::from_range(0x2000..0x1000, attrs).unwrap_err(),
            RegionError::Empty
        );
        assert!(RegionDescriptor::from_range(0x1000..0x2000, attrs).is_ok());
    }

    #[test]
    fn region_at_top_of_address_space() {
        let region = user_rw(usize::MAX - 0xff, 0x100);
        assert_eq!(region.last(), usize::MAX);
        assert!(region.contains(usize::MAX));
        assert!(region.overlaps(usize::MAX - 3, 4));
    }

    #[test]
    fn attribute_word_layout() {
        let region = user_rw(0x0800_0000, 32);
        // ENABLE | XN | AP=RW/RW | C | S
        assert_eq!(region.attributes().get(), 0x1_1306);
        let periph = RegionDescriptor::new(0xfff7_e400, 256, read_write_no_exec(MemoryType::Device))
            .unwrap();
        assert_eq!(periph.attributes().get(), 0x1_1301);
    }

    #[test]
    fn permission_table() {
        let rw = user_rw(0x1000, 32);
        assert!(rw.permits(Access::Read, Mode::Unprivileged));
        assert!(rw.permits(Access::Write, Mode::Unprivileged));
        assert!(!rw.permits(Access::Execute, Mode::Unprivileged));

        let kernel = kernel_only(0x1000, 32);
        assert!(kernel.permits(Access::Write, Mode::Privileged));
        assert!(!kernel.permits(Access::Read, Mode::Unprivileged));

        let user_ro = RegionDescriptor::new(
            0x1000,
            32,
            Attributes::ENABLE::SET + Attributes::AP::UnprivilegedReadOnly,
        )
        .unwrap();
        assert!(user_ro.permits(Access::Read, Mode::Unprivileged));
        assert!(!user_ro.permits(Access::Write, Mode::Unprivileged));
        assert!(user_ro.permits(Access::Execute, Mode::Unprivileged));
    }

    #[test]
    fn region_list_is_bounded() {
        let mut list = RegionList::new();
        for i in 0..NUM_CONFIGURABLE_REGIONS {
            list.push(user_rw(0x1000 * (i + 1), 32)).unwrap();
        }
        assert_eq!(list.push(user_rw(0x9000, 32)), Err(ErrorCode::SIZE));
        assert_eq!(list.len(), NUM_CONFIGURABLE_REGIONS);
        assert_eq!(list.iter().count(), NUM_CONFIGURABLE_REGIONS);
    }

    #[test]
    fn unmatched_address_is_privileged_only() {
        let list = RegionList::new();
        let map = TaskMemoryMap::new(user_rw(0x2000_0000, 512), &list);
        assert!(map.permits(0x2000_0000, 512, Access::Write, Mode::Unprivileged));
        assert!(!map.permits(0x0800_0000, 4, Access::Read, Mode::Unprivileged));
        assert!(map.permits(0x0800_0000, 4, Access::Read, Mode::Privileged));
        assert!(map.resolve(0x0800_0000).is_none());
    }

    #[test]
    fn highest_numbered_region_wins() {
        let mut list = RegionList::new();
        list.push(user_rw(0x1000, 0x100)).unwrap();
        list.push(kernel_only(0x1040, 0x40)).unwrap();
        let map = TaskMemoryMap::new(user_rw(0x2000_0000, 512), &list);

        assert_eq!(map.resolve(0x1040), Some(&kernel_only(0x1040, 0x40)));
        assert!(map.permits(0x1000, 0x40, Access::Read, Mode::Unprivileged));
        assert!(!map.permits(0x1040, 4, Access::Read, Mode::Unprivileged));
        assert!(map.permits(0x1080, 0x80, Access::Write, Mode::Unprivileged));

        // The same two regions in the opposite order: the larger grant wins.
        let mut reversed = RegionList::new();
        reversed.push(kernel_only(0x1040, 0x40)).unwrap();
        reversed.push(user_rw(0x1000, 0x100)).unwrap();
        let map = TaskMemoryMap::new(user_rw(0x2000_0000, 512), &reversed);
        assert!(map.permits(0x1040, 4, Access::Read, Mode::Unprivileged));
    }

    #[test]
    fn access_spanning_a_denied_region_is_denied() {
        let mut list = RegionList::new();
        list.push(user_rw(0x1000, 0x40)).unwrap();
        let map = TaskMemoryMap::new(user_rw(0x2000_0000, 512), &list);
        assert!(map.permits(0x1000, 0x40, Access::Read, Mode::Unprivileged));
        assert!(!map.permits(0x1020, 0x40, Access::Read, Mode::Unprivileged));
        assert!(!map.permits(0x0ff0, 0x20, Access::Read, Mode::Unprivileged));
    }

    #[test]
    fn disabled_region_grants_nothing() {
        let mut list = RegionList::new();
        list.push(
            RegionDescriptor::new(0x1000, 32, Attributes::AP::ReadWrite + Attributes::XN::SET)
                .unwrap(),
        )
        .unwrap();
        let map = TaskMemoryMap::new(user_rw(0x2000_0000, 512), &list);
        assert!(!map.permits(0x1000, 4, Access::Read, Mode::Unprivileged));
    }
}
