//! Raw inotify bindings.
//!
//! Written by hand against `inotify(7)` rather than pulled in from a wrapper
//! crate, in the same spirit as the teacher crate's own `src/ffi.rs` — this
//! crate no longer depends on `inotify-sys`, but the raw-syscall style it
//! modeled is kept.

use libc::{c_char, c_int, c_void, size_t, ssize_t, uint32_t};

pub const IN_CLOEXEC: c_int = libc::O_CLOEXEC;
pub const IN_NONBLOCK: c_int = libc::O_NONBLOCK;

/// File was accessed.
pub const IN_ACCESS: u32 = 0x0000_0001;
/// Metadata changed.
pub const IN_ATTRIB: u32 = 0x0000_0004;
/// Writable file was closed.
pub const IN_CLOSE_WRITE: u32 = 0x0000_0008;
/// Unwritable file closed.
pub const IN_CLOSE_NOWRITE: u32 = 0x0000_0010;
/// Subfile was created.
pub const IN_CREATE: u32 = 0x0000_0100;
/// Subfile was deleted.
pub const IN_DELETE: u32 = 0x0000_0200;
/// Self was deleted.
pub const IN_DELETE_SELF: u32 = 0x0000_0400;
/// File was modified.
pub const IN_MODIFY: u32 = 0x0000_0002;
/// Self was moved.
pub const IN_MOVE_SELF: u32 = 0x0000_0800;
/// File was moved from this directory.
pub const IN_MOVED_FROM: u32 = 0x0000_0040;
/// File was moved to this directory.
pub const IN_MOVED_TO: u32 = 0x0000_0080;
/// File was opened.
pub const IN_OPEN: u32 = 0x0000_0020;

/// Only watch the path if it is a directory.
pub const IN_ONLYDIR: u32 = 0x0100_0000;
/// Don't follow a symlink.
pub const IN_DONT_FOLLOW: u32 = 0x0200_0000;
/// Exclude events on unlinked objects.
pub const IN_EXCL_UNLINK: u32 = 0x0400_0000;
/// Add to the mask of an already existing watch.
pub const IN_MASK_ADD: u32 = 0x2000_0000;
/// Event occurred against a directory.
pub const IN_ISDIR: u32 = 0x4000_0000;
/// Only send event once.
pub const IN_ONESHOT: u32 = 0x8000_0000;

/// Backing fs was unmounted.
pub const IN_UNMOUNT: u32 = 0x0000_2000;
/// Event queue overflowed.
pub const IN_Q_OVERFLOW: u32 = 0x0000_4000;
/// Watch was removed.
pub const IN_IGNORED: u32 = 0x0000_8000;

#[repr(C)]
pub struct inotify_event {
    pub wd: c_int,
    pub mask: uint32_t,
    pub cookie: uint32_t,
    pub len: uint32_t,
    // followed by `len` bytes of name, NUL-padded
}

extern "C" {
    pub fn inotify_init1(flags: c_int) -> c_int;
    pub fn inotify_add_watch(fd: c_int, pathname: *const c_char, mask: uint32_t) -> c_int;
    pub fn inotify_rm_watch(fd: c_int, wd: c_int) -> c_int;
    pub fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t;
    pub fn close(fd: c_int) -> c_int;
}
