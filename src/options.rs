use crate::op::Op;

/// Per-watch configuration passed to `Watcher::add_with_options`.
///
/// Generalizes the same idea as the teacher's `WatchMask` bitflags — a set of
/// toggles describing what a single watch cares about — but as a plain
/// struct, since two of the four knobs here (`open`, `read`) aren't
/// available as flags on every backend and need to fail with
/// `Error::UnsupportedOp` rather than be silently ignored.
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Which canonical operations to report for this watch. Defaults to
    /// `Op::ALL`.
    pub op_filter: Op,

    /// Size, in bytes, of the buffer passed to `ReadDirectoryChangesW` for
    /// this watch. Windows-only; every other backend ignores it. Defaults to
    /// 64 KiB.
    pub buffer_size: usize,

    /// Report `open()` calls on the watched path. Linux-only (raw
    /// `IN_OPEN`); `Error::UnsupportedOp` on every other backend.
    pub open: bool,

    /// Report `read()` calls on the watched path. Linux-only (raw
    /// `IN_ACCESS`); `Error::UnsupportedOp` on every other backend.
    pub read: bool,

    /// Report the close of a file that was opened for writing, distinctly
    /// from a close of a file opened read-only. Linux-only.
    pub close_write: bool,

    /// Report the close of a file that was opened read-only. Linux-only.
    pub close_read: bool,
}

/// Default `ReadDirectoryChangesW` buffer size (64 KiB).
pub const DEFAULT_WINDOWS_BUFFER_SIZE: usize = 64 * 1024;

impl Default for AddOptions {
    fn default() -> Self {
        AddOptions {
            op_filter: Op::ALL,
            buffer_size: DEFAULT_WINDOWS_BUFFER_SIZE,
            open: false,
            read: false,
            close_write: false,
            close_read: false,
        }
    }
}

impl AddOptions {
    /// Restricts this watch to a subset of `Op`.
    pub fn with_op_filter(mut self, op_filter: Op) -> Self {
        self.op_filter = op_filter;
        self
    }

    /// Overrides the `ReadDirectoryChangesW` buffer size. No effect outside
    /// Windows.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// `true` if any of the four Linux-only toggles was requested. Other
    /// backends use this to short-circuit straight to `Error::UnsupportedOp`
    /// instead of silently ignoring the request.
    pub(crate) fn requests_unportable_toggle(&self) -> bool {
        self.open || self.read || self.close_write || self.close_read
    }
}

/// Builds a [`Watcher`](crate::Watcher) with non-default construction
/// parameters.
///
/// Mirrors `inotify-rs`'s split between `Inotify::init()` (defaults) and
/// hand-assembling flags; here expressed as a small builder since there is
/// more than one knob.
#[derive(Debug, Clone, Default)]
pub struct WatcherBuilder {
    pub(crate) buffer_size: Option<usize>,
}

impl WatcherBuilder {
    /// Starts from the same defaults as `Watcher::new()`.
    pub fn new() -> Self {
        WatcherBuilder::default()
    }

    /// Use a bounded event channel of `size` instead of an unbounded one.
    /// Once the buffer is full, further events are dropped and reported as
    /// `Error::EventOverflow` on the error stream rather than applying
    /// backpressure to the backend.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }
}
