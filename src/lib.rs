#![crate_name = "vigil"]
#![crate_type = "lib"]
#![deny(missing_docs)]

//! A small, idiomatic engine for watching paths on disk and receiving a
//! canonical stream of events when they change.
//!
//! # About
//!
//! `vigil` is deliberately narrow in scope: one registry, one reader
//! thread, one normalized event shape, realized on top of whichever native
//! notification mechanism the target OS offers — `inotify` on Linux,
//! `kqueue` on the BSDs and macOS, event ports on illumos, I/O completion
//! ports on Windows, AHAFS on AIX. Recursive directory watching, event
//! coalescing policy, and guaranteed delivery of every underlying kernel
//! event are explicitly out of scope.
//!
//! The [`Watcher`] struct is the main entry point into the API.
//!
//! # Example
//!
//! ```no_run
//! use vigil::Watcher;
//!
//! # fn main() -> Result<(), vigil::Error> {
//! let watcher = Watcher::new()?;
//! watcher.add("/tmp")?;
//!
//! for event in watcher.events().iter() {
//!     println!("{:?}: {:?}", event.name, event.op);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Construction, adding and removing watches, and reading events can all
//! fail; every fallible operation returns [`Error`].

mod backend;
mod error;
mod event;
mod op;
mod options;
mod registry;
mod sink;
mod wakeup;
mod watcher;

pub use crate::error::Error;
pub use crate::event::Event;
pub use crate::op::Op;
pub use crate::options::{AddOptions, WatcherBuilder};
pub use crate::registry::Kind;
pub use crate::watcher::Watcher;
