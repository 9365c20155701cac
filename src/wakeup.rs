//! A self-pipe used to interrupt a reader thread blocked in `poll`/`kevent`/
//! `port_get` for cooperative shutdown.
//!
//! This is the same trick the teacher crate reaches for raw syscalls to
//! implement blocking/non-blocking mode switches (`src/ffi.rs`'s `fcntl`
//! bindings); here the same raw-libc style is applied to `pipe2` instead.
//! `close()` writes a single byte to the write end, which wakes the reader
//! out of its blocking wait; the reader then notices the closed state and
//! exits instead of treating the byte as a real event.
//!
//! The Windows backend doesn't poll a file descriptor at all (it waits on
//! an I/O completion port with a finite timeout instead, see
//! `backend::windows`), so on that platform this is an inert placeholder
//! kept only so `Watcher` doesn't need platform-specific fields.

#[cfg(unix)]
mod imp {
    use std::io;
    use std::os::unix::io::RawFd;

    pub struct Wakeup {
        read_fd: RawFd,
        write_fd: RawFd,
    }

    impl Wakeup {
        pub fn new() -> io::Result<Self> {
            let mut fds = [0; 2];
            let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(Wakeup {
                read_fd: fds[0],
                write_fd: fds[1],
            })
        }

        pub fn read_fd(&self) -> RawFd {
            self.read_fd
        }

        /// Wakes the reader. Idempotent: if the pipe's buffer already has a
        /// pending byte, writing fails with `EAGAIN`, which is not an error
        /// here.
        pub fn wake(&self) -> io::Result<()> {
            let byte = [1u8];
            let result = unsafe { libc::write(self.write_fd, byte.as_ptr() as *const _, 1) };
            if result == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        /// Drains every pending wake byte so the pipe doesn't immediately
        /// re-signal readiness on the next poll.
        pub fn drain(&self) {
            let mut buf = [0u8; 64];
            loop {
                let result = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
                if result <= 0 {
                    break;
                }
            }
        }
    }

    impl Drop for Wakeup {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read_fd);
                libc::close(self.write_fd);
            }
        }
    }

    // SAFETY: the two raw fds are never accessed concurrently in a way that
    // requires external synchronization beyond what the kernel already
    // guarantees for pipe reads/writes.
    unsafe impl Send for Wakeup {}
    unsafe impl Sync for Wakeup {}
}

#[cfg(windows)]
mod imp {
    use std::io;

    pub struct Wakeup;

    impl Wakeup {
        pub fn new() -> io::Result<Self> {
            Ok(Wakeup)
        }

        pub fn wake(&self) -> io::Result<()> {
            Ok(())
        }

        pub fn drain(&self) {}
    }

    unsafe impl Send for Wakeup {}
    unsafe impl Sync for Wakeup {}
}

pub use imp::Wakeup;
