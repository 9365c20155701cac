use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use log::{debug, trace, warn};

use crate::backend::{self, Backend, ReaderContext, CLOSED, CLOSING, RUNNING};
use crate::error::Error;
use crate::event::Event;
use crate::options::{AddOptions, WatcherBuilder};
use crate::registry::{Kind, Registry, Watch};
use crate::sink::{ErrorSink, EventSink};
use crate::wakeup::Wakeup;

/// The engine: a registry, a backend, a reader thread, and the two channels
/// callers read from.
///
/// A thin handle around one OS resource, with `add`/`remove`/`close` methods
/// that serialize through the registry (the control path). The reader
/// thread spawned in `new` is the only thing that ever blocks on the
/// backend's native wait primitive.
pub struct Watcher {
    registry: Arc<Registry>,
    backend: Arc<dyn Backend>,
    wakeup: Arc<Wakeup>,
    state: Arc<AtomicU8>,
    reader: Option<JoinHandle<()>>,
    events_rx: Receiver<Event>,
    errors_rx: Receiver<Error>,
}

impl Watcher {
    /// Constructs a watcher with an unbounded event channel and the
    /// platform's default backend.
    pub fn new() -> Result<Self, Error> {
        WatcherBuilder::new().build()
    }

    /// Constructs a watcher with a bounded event channel of `size`.
    pub fn with_buffer(size: usize) -> Result<Self, Error> {
        WatcherBuilder::new().buffer_size(size).build()
    }

    fn from_parts(backend: Box<dyn Backend>, buffer_size: Option<usize>) -> Result<Self, Error> {
        let registry = Arc::new(Registry::new());
        let backend: Arc<dyn Backend> = Arc::from(backend);
        let wakeup = Arc::new(Wakeup::new()?);
        let state = Arc::new(AtomicU8::new(RUNNING));

        let (events, events_rx) = match buffer_size {
            Some(n) => EventSink::bounded(n),
            None => EventSink::unbounded(),
        };
        let (errors, errors_rx) = ErrorSink::new();

        let ctx = ReaderContext {
            registry: registry.clone(),
            events: Arc::new(events),
            errors: Arc::new(errors),
            wakeup: wakeup.clone(),
            state: state.clone(),
        };

        let reader_backend = backend.clone();
        let reader = std::thread::Builder::new()
            .name("vigil-reader".into())
            .spawn(move || {
                trace!("reader thread started");
                reader_backend.run(&ctx);
                debug!("reader thread exiting");
            })
            .map_err(Error::Io)?;

        Ok(Watcher {
            registry,
            backend,
            wakeup,
            state,
            reader: Some(reader),
            events_rx,
            errors_rx,
        })
    }

    /// Adds a watch on `path` with default options (`Op::ALL`, no unportable
    /// toggles). A second `add` on an already-watched path is a no-op
    /// success, not an error (see `DESIGN.md` for why idempotent success was
    /// chosen over an error here).
    pub fn add(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        self.add_with_options(path, AddOptions::default())
    }

    /// Adds a watch on `path` with explicit [`AddOptions`].
    pub fn add_with_options(&self, path: impl AsRef<Path>, options: AddOptions) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let path = path.as_ref();

        if self.registry.contains_path(path) {
            debug!("add() on already-watched path {}: idempotent success", path.display());
            return Ok(());
        }

        let metadata = fs::metadata(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::PathNotFound
            } else {
                Error::Io(err)
            }
        })?;
        let kind = if metadata.is_dir() { Kind::Directory } else { Kind::File };

        // Backend call happens before the registry is touched: a native
        // handle is only published once it's already valid.
        let handle = self.backend.add(path, kind, &options)?;

        let watch = Watch {
            path: path.to_path_buf(),
            handle,
            kind,
            by_user: true,
            mask: options.op_filter,
        };
        self.registry.insert(watch);
        debug!("added watch on {}", path.display());
        Ok(())
    }

    /// Stops watching `path`. Returns [`Error::NonExistentWatch`] if it was
    /// never watched (or was already removed).
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let path = path.as_ref();
        let watch = self.registry.remove_by_path(path).ok_or(Error::NonExistentWatch)?;
        if let Err(err) = self.backend.remove(&watch.handle) {
            warn!("removing native watch for {} failed: {}", path.display(), err);
        }
        debug!("removed watch on {}", path.display());
        Ok(())
    }

    /// Snapshot of every currently watched path.
    pub fn watch_list(&self) -> Vec<PathBuf> {
        self.registry.paths()
    }

    /// The channel events are delivered on.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events_rx
    }

    /// The channel asynchronous errors (backend I/O failures, overflow) are
    /// delivered on, distinct from the `Result` returned by `add`/`remove`.
    pub fn errors(&self) -> &Receiver<Error> {
        &self.errors_rx
    }

    /// `true` once `close()` has finished, or the reader thread has shut
    /// itself down after an unrecoverable backend error.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Transitions `Running -> Closing -> Closed`: wakes the reader thread,
    /// waits for it to exit, then releases every remaining native watch.
    /// Idempotent; a second `close()` is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(RUNNING, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        // On unix backends this is what actually interrupts the blocking
        // wait; on Windows it's a no-op and `notify_shutdown` below does the
        // equivalent job by posting to the completion port directly.
        self.wakeup.wake()?;
        self.backend.notify_shutdown();

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        for watch in self.registry.drain() {
            if let Err(err) = self.backend.remove(&watch.handle) {
                warn!("releasing watch on {} during close failed: {}", watch.path.display(), err);
            }
        }

        self.state.store(CLOSED, Ordering::Release);
        debug!("watcher closed");
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl WatcherBuilder {
    /// Constructs the `Watcher`, resolving the platform's default backend
    /// and spawning its reader thread.
    pub fn build(self) -> Result<Watcher, Error> {
        let backend = backend::default_backend()?;
        Watcher::from_parts(backend, self.buffer_size)
    }
}
