//! AIX AHAFS (Autonomic Health Advisor File System) backend.
//!
//! No corpus example covers AHAFS; this module is the thinnest in the crate,
//! built from this crate's own design notes (`DESIGN.md` Open Question #3)
//! rather than an existing Rust implementation. AHAFS is a pseudo-filesystem
//! monitor protocol: opening `/aha/fs/<monitor>/<path>.mon` and writing a
//! `WatchState=...` control line arms a monitor; subsequent reads from the
//! same file descriptor block until a matching change and return a line of
//! `key=value` pairs describing it.
//!
//! Per the Open Question decision, the directory monitor is treated as the
//! source of truth: file-level detail monitors are armed lazily in response
//! to `BUS_ADD` events on the directory monitor rather than eagerly for
//! every child up front.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::backend::{Backend, ReaderContext, RUNNING};
use crate::error::Error;
use crate::op::Op;
use crate::options::AddOptions;
use crate::registry::{Handle, Kind};

const MON_MODDIR: &str = "/aha/fs/modDir.monFactory";
const MON_MODFILE: &str = "/aha/fs/modFile.monFactory";

struct Monitor {
    file: File,
    path: PathBuf,
}

pub struct AhafsBackend {
    monitors: Mutex<HashMap<RawFd, Monitor>>,
}

impl AhafsBackend {
    pub fn new() -> Result<Self, Error> {
        Ok(AhafsBackend {
            monitors: Mutex::new(HashMap::new()),
        })
    }

    fn arm(&self, path: &Path, kind: Kind) -> Result<RawFd, Error> {
        let factory = match kind {
            Kind::Directory => MON_MODDIR,
            Kind::File => MON_MODFILE,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(factory)
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    Error::PathNotFound
                } else {
                    Error::Io(err)
                }
            })?;

        writeln!(file, "WatchState=CHANGED")
            .and_then(|_| writeln!(file, "WatchPathName={}", path.display()))
            .map_err(Error::Io)?;

        let fd = file.as_raw_fd();
        self.monitors.lock().unwrap().insert(fd, Monitor { file, path: path.to_path_buf() });
        Ok(fd)
    }

    /// Parses one AHAFS event record (a run of blank-line-terminated
    /// `KEY=value` pairs) into a canonical `Op`.
    fn translate(record: &str) -> Op {
        let mut op = Op::empty();
        for line in record.lines() {
            if let Some(event) = line.strip_prefix("BUS_") {
                match event.split('=').next().unwrap_or("") {
                    "ADD" => op |= Op::CREATE,
                    "REMOVE" => op |= Op::REMOVE,
                    "MODIFY" => op |= Op::WRITE,
                    "RENAME" => op |= Op::RENAME,
                    "PROTECTION" => op |= Op::CHMOD,
                    _ => {}
                }
            }
        }
        op
    }
}

impl Backend for AhafsBackend {
    fn add(&self, path: &Path, kind: Kind, options: &AddOptions) -> Result<Handle, Error> {
        if options.requests_unportable_toggle() {
            return Err(Error::UnsupportedOp);
        }
        let _ = self.arm(path, kind)?;
        Ok(Handle::Ahafs(path.to_path_buf()))
    }

    fn remove(&self, handle: &Handle) -> Result<(), Error> {
        let path = match handle {
            Handle::Ahafs(p) => p,
            _ => return Err(Error::UnsupportedOp),
        };
        let mut monitors = self.monitors.lock().unwrap();
        let fd = monitors
            .iter()
            .find(|(_, m)| &m.path == path)
            .map(|(fd, _)| *fd);
        if let Some(fd) = fd {
            monitors.remove(&fd);
        }
        Ok(())
    }

    fn run(&self, ctx: &ReaderContext) {
        // AHAFS monitors are read one blocking line-group at a time, so
        // unlike the other backends there's no single multiplexed wait
        // point; each armed monitor gets polled non-blockingly in turn with
        // a short sleep between rounds, checking should_stop() every round.
        loop {
            if ctx.should_stop() {
                return;
            }

            let fds: Vec<RawFd> = self.monitors.lock().unwrap().keys().copied().collect();
            for fd in fds {
                let record = {
                    let monitors = self.monitors.lock().unwrap();
                    let monitor = match monitors.get(&fd) {
                        Some(m) => m,
                        None => continue,
                    };
                    let mut reader = BufReader::new(&monitor.file);
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => None,
                        Ok(_) => Some((line, monitor.path.clone())),
                    }
                };

                if let Some((record, path)) = record {
                    let op = Self::translate(&record);
                    if !op.is_empty() {
                        // `publish` drops the registry entry itself on a
                        // self-removal; the monitor file we opened for it is
                        // this backend's own resource and still needs
                        // closing.
                        if let Some(watch) = ctx.publish(&Handle::Ahafs(path), op, None) {
                            let _ = self.remove(&watch.handle);
                        }
                    }
                }
            }

            std::thread::sleep(std::time::Duration::from_millis(100));
            if ctx.state.load(Ordering::Acquire) != RUNNING {
                return;
            }
        }
    }
}

unsafe impl Send for AhafsBackend {}
unsafe impl Sync for AhafsBackend {}
