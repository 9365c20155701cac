use bitflags::bitflags;

bitflags! {
    /// The canonical set of filesystem operations `vigil` reports.
    ///
    /// Every backend normalizer (see `backend::*::translate`) folds its own,
    /// OS-specific event vocabulary down into this bitset before an [`Event`]
    /// ever reaches a caller. That is the whole point of the crate: callers
    /// write one match against `Op`, not five against `IN_*`/`NOTE_*`/
    /// `FILE_ACTION_*` constants.
    ///
    /// [`Event`]: crate::Event
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Op: u32 {
        /// A file or directory was created, or an existing one was moved
        /// into the watched directory.
        ///
        /// Per the crate's policy on renames, a path moved into a watched
        /// directory is reported as `CREATE`, never `RENAME` — the watcher
        /// has no record of where the path came from.
        const CREATE = 1 << 0;

        /// The contents of a watched file changed.
        const WRITE = 1 << 1;

        /// A file or directory was removed, or was moved out of the watched
        /// directory.
        const REMOVE = 1 << 2;

        /// A watched file or directory was renamed within the same watched
        /// directory.
        const RENAME = 1 << 3;

        /// Permissions, ownership, or (on some backends) timestamps changed.
        ///
        /// Whether a timestamp-only change (e.g. `utimes`) raises `CHMOD` is
        /// OS-dependent and is not part of this crate's contract — do not
        /// write tests or logic that assume either behavior.
        const CHMOD = 1 << 4;

        /// Convenience union of every operation above.
        const ALL = Self::CREATE.bits()
            | Self::WRITE.bits()
            | Self::REMOVE.bits()
            | Self::RENAME.bits()
            | Self::CHMOD.bits();
    }
}

impl Default for Op {
    fn default() -> Self {
        Op::ALL
    }
}
