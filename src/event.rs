use std::path::PathBuf;

use crate::op::Op;

/// A single, normalized filesystem change.
///
/// This is the only event type `vigil` hands to callers. Every backend
/// translates its native notification into one or more of these before it
/// reaches the event sink; see `backend::*::translate` for the per-OS
/// translation tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The path the event occurred on. Always the path the caller watched,
    /// or a direct child of it for directory watches — never a path outside
    /// the watched subtree.
    pub name: PathBuf,

    /// Which operation(s) occurred. Usually a single flag; backends that
    /// coalesce native events into one record (see the rename-pair handling
    /// in `backend::inotify`) may set more than one.
    pub op: Op,
}

impl Event {
    pub(crate) fn new(name: PathBuf, op: Op) -> Self {
        Event { name, op }
    }
}
