//! Fallback backend for targets without a native implementation.
//!
//! Grounded on `notify-rs`'s `NullWatcher`: every operation fails with
//! `Error::UnsupportedOp` rather than the crate failing to compile at all on
//! an unrecognized platform.

use std::path::Path;

use crate::backend::{Backend, ReaderContext};
use crate::error::Error;
use crate::options::AddOptions;
use crate::registry::{Handle, Kind};

pub struct UnsupportedBackend;

impl Backend for UnsupportedBackend {
    fn add(&self, _path: &Path, _kind: Kind, _options: &AddOptions) -> Result<Handle, Error> {
        Err(Error::UnsupportedOp)
    }

    fn remove(&self, _handle: &Handle) -> Result<(), Error> {
        Err(Error::UnsupportedOp)
    }

    fn run(&self, ctx: &ReaderContext) {
        while !ctx.should_stop() {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
    }
}
