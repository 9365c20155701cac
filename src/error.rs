use std::fmt;
use std::io;

/// Everything that can go wrong while constructing, configuring, or reading
/// from a [`Watcher`](crate::Watcher).
#[derive(Debug)]
pub enum Error {
    /// The watcher's `close` method has already been called, or the reader
    /// thread has shut itself down after an unrecoverable backend error.
    /// Every method on `Watcher` returns this once the watcher is closed.
    Closed,

    /// `remove` was called with a path that is not currently watched.
    NonExistentWatch,

    /// `add` was called with a path that does not exist on disk.
    PathNotFound,

    /// `add` was called with a path that is already watched under a
    /// configuration this backend cannot merge (see the registry's
    /// duplicate-add policy in `DESIGN.md`; plain re-adds are idempotent and
    /// do not produce this error).
    AlreadyWatched,

    /// The requested `AddOptions` toggle is not supported on this backend.
    UnsupportedOp,

    /// The event channel's buffer filled up before the caller drained it.
    /// Events were dropped; the caller should widen its buffer or read
    /// faster. This is signalled, never silently swallowed.
    EventOverflow,

    /// A syscall or I/O operation on the underlying backend failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Closed => write!(f, "the watcher is closed"),
            Error::NonExistentWatch => write!(f, "no watch exists for this path"),
            Error::PathNotFound => write!(f, "the path does not exist"),
            Error::AlreadyWatched => write!(f, "the path is already watched"),
            Error::UnsupportedOp => write!(f, "this operation is not supported on this platform"),
            Error::EventOverflow => write!(f, "the event buffer overflowed and events were dropped"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
