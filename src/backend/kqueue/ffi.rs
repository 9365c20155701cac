//! Raw kqueue/kevent bindings beyond what `libc` already exposes.
//!
//! `libc` ships `kqueue`, `kevent`, `libc::kevent` (the struct), `EVFILT_*`
//! and most `EV_*`/`NOTE_*` constants already, so unlike the inotify backend
//! there is little to add here — this module exists to hold the few
//! `NOTE_*` flags that differ between BSD variants and aren't worth an
//! upstream `cfg` maze, kept local the same way the teacher keeps its own
//! small, self-contained `ffi.rs`.

pub const NOTE_DELETE: u32 = libc::NOTE_DELETE as u32;
pub const NOTE_WRITE: u32 = libc::NOTE_WRITE as u32;
pub const NOTE_EXTEND: u32 = libc::NOTE_EXTEND as u32;
pub const NOTE_ATTRIB: u32 = libc::NOTE_ATTRIB as u32;
pub const NOTE_RENAME: u32 = libc::NOTE_RENAME as u32;
#[cfg(target_os = "macos")]
pub const NOTE_REVOKE: u32 = libc::NOTE_REVOKE as u32;
#[cfg(not(target_os = "macos"))]
pub const NOTE_REVOKE: u32 = 0;

pub const WATCH_FFLAGS: u32 =
    NOTE_DELETE | NOTE_WRITE | NOTE_EXTEND | NOTE_ATTRIB | NOTE_RENAME | NOTE_REVOKE;
