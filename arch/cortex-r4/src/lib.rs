// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for the ARMv7-R Cortex-R4(F) as used by the isolation harness.
//!
//! The PMSAv7 MPU and the abort status registers live in CP15. Accessors
//! that need `mrc`/`mcr` are only built for bare-metal ARM targets; on any
//! other target they are replaced by mocks so that the pure encoding and
//! decoding helpers can be unit tested on the host.

#![crate_name = "cortexr4"]
#![crate_type = "rlib"]
#![no_std]

pub mod abort;
pub mod mpu;
pub mod support;
