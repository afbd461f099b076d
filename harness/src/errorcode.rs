// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Standard error enum for operations on external collaborators.

use core::fmt;

/// Errors reported by the scheduler and the other collaborators the harness
/// drives.
///
/// Scenario-level failures are described by
/// [`Failure`](crate::scenario::Failure); this enum only carries what a
/// collaborator said when it refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 0,
    /// Underlying system is busy; retry
    BUSY = 1,
    /// The state requested is already set
    ALREADY = 2,
    /// An invalid parameter was passed
    INVAL = 5,
    /// Parameter passed was too large
    SIZE = 6,
    /// Memory required not available
    NOMEM = 8,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::FAIL => "FAIL",
            ErrorCode::BUSY => "BUSY",
            ErrorCode::ALREADY => "ALREADY",
            ErrorCode::INVAL => "INVAL",
            ErrorCode::SIZE => "SIZE",
            ErrorCode::NOMEM => "NOMEM",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_their_numbering() {
        assert_eq!(usize::from(ErrorCode::FAIL), 0);
        assert_eq!(usize::from(ErrorCode::INVAL), 5);
        assert_eq!(usize::from(ErrorCode::NOMEM), 8);
    }
}
