//! Error classification, following the teacher's `std::io::{Error,
//! ErrorKind}` idiom (`backend/hw.rs` builds its errors the same way, e.g.
//! `Error::new(ErrorKind::PermissionDenied, "Password entry failed")`).
//!
//! spec.md §7 names five error kinds; we map each onto the closest
//! `std::io::ErrorKind` so callers can `match err.kind()` without this
//! crate inventing its own parallel taxonomy.

use std::io::{Error, ErrorKind};

/// Build an invalid-argument error (out-of-range series, null handle,
/// insufficient workspace, misaligned driver addresses).
pub(crate) fn invalid_argument(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidInput, msg.into())
}

/// Build a busy error: GC quota exhausted in non-blocking mode.
pub(crate) fn busy(msg: impl Into<String>) -> Error { Error::new(ErrorKind::WouldBlock, msg.into()) }

/// Build a no-space error: workspace cannot accommodate required arrays at open.
pub(crate) fn no_space(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::OutOfMemory, msg.into())
}

/// Build an integrity error: CRC mismatch or bad magic. Per spec.md §7 this
/// is never surfaced from `write`; it is only observable via the
/// `crc_errors`/`recovery_truncations` counters and iterator skip
/// behavior, but the scanner and iterator use this constructor internally
/// for the few paths (e.g. a corrupt snapshot during `snapshot_save`
/// verification) where it legitimately propagates.
pub(crate) fn integrity(msg: impl Into<String>) -> Error { Error::new(ErrorKind::InvalidData, msg.into()) }

/// Wrap a flash/clock driver failure.
pub(crate) fn io(msg: impl Into<String>) -> Error { Error::new(ErrorKind::Other, msg.into()) }
