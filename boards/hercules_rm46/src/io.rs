// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Console on the SCI/LIN UART, and the panic handler.
//!
//! The C startup code configures the UART (baud rate, pins, TX enable) before
//! `vRunTest` is called, so only the transmit path lives here.

use core::panic::PanicInfo;

use harness::debug::{self, DiagnosticWriter};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

register_structs! {
    SciRegisters {
        (0x00 => _reserved0),
        /// Flags register
        (0x1c => flr: ReadOnly<u32, FLR::Register>),
        (0x20 => _reserved1),
        /// Transmit data buffer
        (0x38 => td: WriteOnly<u32>),
        (0x3c => @END),
    }
}

register_bitfields![u32,
    FLR [
        /// Transmitter empty
        TX_EMPTY OFFSET(11) NUMBITS(1) [],
        /// Transmit buffer ready for a new character
        TXRDY OFFSET(8) NUMBITS(1) [],
        BUSY OFFSET(3) NUMBITS(1) []
    ]
];

/// SCILIN, the UART routed to the XDS100 virtual COM port on the LaunchPad.
const SCILIN_BASE: usize = 0xFFF7_E400;

fn registers() -> &'static SciRegisters {
    // SAFETY: SCILIN_BASE is the address of the memory-mapped SCI/LIN block,
    // which is always present on the RM46.
    unsafe { &*(SCILIN_BASE as *const SciRegisters) }
}

/// Blocking writer for the SCI/LIN UART.
///
/// Usable both from privileged code and from tasks granted the peripheral
/// region.
#[derive(Copy, Clone)]
pub struct SciConsole;

impl SciConsole {
    fn put(&self, byte: u8) {
        let regs = registers();
        while !regs.flr.is_set(FLR::TXRDY) {
            cortexr4::support::nop();
        }
        regs.td.set(byte as u32);
    }

    /// Wait for the last character to leave the shift register.
    pub fn drain(&self) {
        let regs = registers();
        while !regs.flr.is_set(FLR::TX_EMPTY) || regs.flr.is_set(FLR::BUSY) {
            cortexr4::support::nop();
        }
    }
}

impl DiagnosticWriter for SciConsole {
    fn write(&self, buf: &[u8]) {
        for &byte in buf {
            self.put(byte);
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let console = SciConsole;
    debug::print_fmt(&console, format_args!("\r\nHarness panic: {}\r\n", info));
    console.drain();
    cortexr4::support::halt()
}
