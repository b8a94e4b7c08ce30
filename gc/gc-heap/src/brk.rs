//! Program-break growth.
//!
//! The heap takes its memory from the classic `sbrk` interface: each
//! growth request advances the break and yields one contiguous range that
//! is kept for the lifetime of the process.

use core::ffi::c_void;

/// Advance the program break by `bytes` and return the start of the fresh
/// range, or `None` when the OS refuses to move the break.
pub(crate) fn extend_break(bytes: usize) -> Option<*mut u8> {
    let Ok(increment) = isize::try_from(bytes) else {
        return None;
    };
    // SAFETY: sbrk only moves the break; the returned range is unmapped by
    // nothing else in this process and becomes exclusively ours.
    let p = unsafe { libc::sbrk(increment) };
    if p == usize::MAX as *mut c_void {
        return None;
    }
    Some(p.cast())
}
