//! OS backend dispatch.
//!
//! Per the design notes, one backend interface is enough: there is never more
//! than one backend alive per `Watcher`, so a boxed trait object costs
//! nothing that matters and keeps each OS's raw FFI contained in its own
//! module, the way `notify-rs`'s `Watcher` trait keeps `INotifyWatcher`,
//! `KqueueWatcher`, and `ReadDirectoryChangesWatcher` independent of one
//! another.

#[cfg(target_os = "linux")]
pub mod inotify;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

#[cfg(target_os = "illumos")]
pub mod eventport;

#[cfg(windows)]
pub mod windows;

#[cfg(target_os = "aix")]
pub mod ahafs;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "illumos",
    target_os = "aix",
    windows,
)))]
pub mod unsupported;

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::registry::{Handle, Kind, Registry, Watch};
use crate::options::AddOptions;
use crate::sink::{ErrorSink, EventSink};
use crate::wakeup::Wakeup;

/// `Running -> Closing -> Closed`, as section 4.5 specifies. Stored as a
/// plain `AtomicU8` rather than an enum so the reader loop can check it with
/// a single relaxed load on every wake without locking anything.
pub(crate) const RUNNING: u8 = 0;
pub(crate) const CLOSING: u8 = 1;
pub(crate) const CLOSED: u8 = 2;

/// Everything a backend's reader loop needs to translate native events into
/// canonical ones and publish them, without owning the registry or channels
/// itself.
pub struct ReaderContext {
    pub registry: Arc<Registry>,
    pub events: Arc<EventSink>,
    pub errors: Arc<ErrorSink>,
    pub wakeup: Arc<Wakeup>,
    pub state: Arc<AtomicU8>,
}

impl ReaderContext {
    pub fn should_stop(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    /// Publishes an event if the owning watch's `op_filter` allows it,
    /// forwarding `Error::EventOverflow` to the error sink instead of ever
    /// blocking the reader thread.
    ///
    /// `name_hint` is `None` exactly when the native record refers to the
    /// watch's own path rather than a child of a watched directory (every
    /// backend's self-referential events — `IN_DELETE_SELF`, kqueue's
    /// per-fd `NOTE_DELETE`, a single-file Windows watch, ...) are published
    /// this way). Per section 4.2's normalizer table ("for watched file:
    /// also triggers automatic watch drop after emission"), a `REMOVE` on
    /// the watch's own path drops it from the registry right after the event
    /// is published, satisfying testable property 2 (`watch_list()` no
    /// longer contains a path lost to the filesystem).
    ///
    /// Returns the drained `Watch` when that happened, so the calling
    /// backend can release whatever native resource (fd, object handle, ...)
    /// it still holds for it — the registry itself only tracks bookkeeping,
    /// it never owns a native handle directly.
    pub fn publish(&self, handle: &Handle, op: crate::op::Op, name_hint: Option<&Path>) -> Option<Watch> {
        let path = match self.registry.path_for(handle) {
            Some(p) => p,
            None => return None, // watch was removed racing with this event; drop it
        };
        let watch = match self.registry.get(&path) {
            Some(w) => w,
            None => return None,
        };
        let filtered = op & watch.mask;
        let self_event = name_hint.is_none();
        if !filtered.is_empty() {
            // `name_hint` is a child name (or, for backends that already
            // resolve the full path themselves, an absolute path — `join`
            // with an absolute argument just returns it verbatim, so this is
            // safe either way). The self-referential case keeps the watch's
            // own path.
            let name = match name_hint {
                Some(hint) => path.join(hint),
                None => path.clone(),
            };
            let event = crate::event::Event::new(name, filtered);
            if let Err(err) = self.events.send(event) {
                self.errors.send(err);
            }
        }
        if self_event && op.contains(crate::op::Op::REMOVE) {
            return self.registry.remove_by_path(&path);
        }
        None
    }
}

/// A pluggable OS notification mechanism.
///
/// Grounded on `notify-rs`'s `Watcher` trait (`new`/`watch`/`unwatch`), split
/// here into a synchronous registration half (`add`/`remove`, called from the
/// control path under the registry's discipline) and a blocking `run` half
/// (called once, from the dedicated reader thread described in section 4.3).
pub trait Backend: Send + Sync {
    /// Registers a new native watch and returns its handle. Must not touch
    /// the registry itself — the caller (`Watcher::add`) publishes the
    /// resulting `Watch` after this returns successfully, preserving the
    /// "build the handle, then take the lock" ordering from section 4.1.
    fn add(&self, path: &Path, kind: Kind, options: &AddOptions) -> Result<Handle, Error>;

    /// Releases a native watch. Errors are logged by the caller, not
    /// propagated as fatal — a native handle that's already gone (the file
    /// it watched was removed) is not a bug.
    fn remove(&self, handle: &Handle) -> Result<(), Error>;

    /// Blocks, translating and publishing events via `ctx`, until
    /// `ctx.should_stop()` is true. Must wake promptly when `ctx.wakeup` is
    /// signalled.
    fn run(&self, ctx: &ReaderContext);

    /// Backend-specific nudge to unblock `run` during shutdown, for
    /// backends whose native wait primitive the unix self-pipe trick can't
    /// reach (the Windows completion port). Defaults to a no-op since every
    /// unix backend multiplexes `ctx.wakeup`'s fd directly into its wait
    /// call and needs nothing further. Called by `Watcher::close` right
    /// alongside `ctx.wakeup.wake()`, never on its own.
    fn notify_shutdown(&self) {}
}

/// Builds the platform's default backend. `cfg`-dispatched the same way
/// `notify-rs`'s `recommended_watcher()` picks `RecommendedWatcher`.
pub fn default_backend() -> Result<Box<dyn Backend>, Error> {
    #[cfg(target_os = "linux")]
    {
        return Ok(Box::new(inotify::InotifyBackend::new()?));
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    {
        return Ok(Box::new(kqueue::KqueueBackend::new()?));
    }

    #[cfg(target_os = "illumos")]
    {
        return Ok(Box::new(eventport::EventPortBackend::new()?));
    }

    #[cfg(windows)]
    {
        return Ok(Box::new(windows::WindowsBackend::new()?));
    }

    #[cfg(target_os = "aix")]
    {
        return Ok(Box::new(ahafs::AhafsBackend::new()?));
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos",
        target_os = "aix",
        windows,
    )))]
    {
        Ok(Box::new(unsupported::UnsupportedBackend))
    }
}
