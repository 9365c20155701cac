//! illumos event-port backend.
//!
//! No file in the retrieval pack covers event ports directly; the constants
//! and call sequence here follow the `port_create(3C)`/`port_associate(3C)`
//! contract cited in this crate's own design notes, written in the same raw
//! FFI style the teacher crate uses for inotify. Event ports are
//! one-shot: a path must be re-associated after every event it fires,
//! unlike inotify/kqueue which stay armed until explicitly removed.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use libc::{c_int, c_void, timespec};

use crate::backend::{Backend, ReaderContext, RUNNING};
use crate::error::Error;
use crate::op::Op;
use crate::options::AddOptions;
use crate::registry::{Handle, Kind};

const PORT_SOURCE_FILE: c_int = 4;

#[repr(C)]
struct file_obj {
    fo_atime: timespec,
    fo_mtime: timespec,
    fo_ctime: timespec,
    fo_name: *const libc::c_char,
}

#[repr(C)]
struct port_event {
    portev_events: u32,
    portev_source: u16,
    portev_pad: u16,
    portev_object: usize,
    portev_user: *mut c_void,
}

const FILE_MODIFIED: u32 = 0x0000_0002;
const FILE_ATTRIB: u32 = 0x0000_0004;
const FILE_DELETE: u32 = 0x0000_0010;
const FILE_RENAME_TO: u32 = 0x0000_0020;
const FILE_RENAME_FROM: u32 = 0x0000_0040;

extern "C" {
    fn port_create() -> c_int;
    fn port_associate(port: c_int, source: c_int, object: usize, events: c_int, user: *mut c_void) -> c_int;
    fn port_dissociate(port: c_int, source: c_int, object: usize) -> c_int;
    fn port_get(port: c_int, event: *mut port_event, timeout: *const timespec) -> c_int;
}

pub struct EventPortBackend {
    port: RawFd,
    // event ports identify objects by address, so each registration keeps
    // its `file_obj` (and the CString backing its name) alive for as long
    // as the watch is armed.
    objects: Mutex<HashMap<usize, (Box<file_obj>, std::ffi::CString, PathBuf, Kind)>>,
}

impl EventPortBackend {
    pub fn new() -> Result<Self, Error> {
        let port = unsafe { port_create() };
        if port == -1 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(EventPortBackend {
            port,
            objects: Mutex::new(HashMap::new()),
        })
    }

    fn associate(&self, path: &Path, kind: Kind) -> Result<usize, Error> {
        let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL byte")))?;
        let mut obj = Box::new(file_obj {
            fo_atime: unsafe { std::mem::zeroed() },
            fo_mtime: unsafe { std::mem::zeroed() },
            fo_ctime: unsafe { std::mem::zeroed() },
            fo_name: c_path.as_ptr(),
        });
        let object_addr = obj.as_mut() as *mut file_obj as usize;

        let events = FILE_MODIFIED | FILE_ATTRIB | FILE_DELETE | FILE_RENAME_TO | FILE_RENAME_FROM;
        let result = unsafe { port_associate(self.port, PORT_SOURCE_FILE, object_addr, events, ptr::null_mut()) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::NotFound {
                return Err(Error::PathNotFound);
            }
            return Err(Error::Io(err));
        }

        self.objects.lock().unwrap().insert(object_addr, (obj, c_path, path.to_path_buf(), kind));
        Ok(object_addr)
    }

    /// Per section 4.2's translation table: `FILE_RENAME_FROM` names the old
    /// path and is reported as `RENAME`; `FILE_RENAME_TO` names the new path
    /// and is reported as `CREATE`, mirroring the inotify `MOVED_FROM`/
    /// `MOVED_TO` split in `backend::inotify`.
    fn translate(events: u32) -> Op {
        let mut op = Op::empty();
        if events & FILE_DELETE != 0 {
            op |= Op::REMOVE;
        }
        if events & FILE_RENAME_FROM != 0 {
            op |= Op::RENAME;
        }
        if events & FILE_RENAME_TO != 0 {
            op |= Op::CREATE;
        }
        if events & FILE_MODIFIED != 0 {
            op |= Op::WRITE;
        }
        if events & FILE_ATTRIB != 0 {
            op |= Op::CHMOD;
        }
        op
    }
}

impl Backend for EventPortBackend {
    fn add(&self, path: &Path, kind: Kind, options: &AddOptions) -> Result<Handle, Error> {
        if options.requests_unportable_toggle() {
            return Err(Error::UnsupportedOp);
        }
        let _ = self.associate(path, kind)?;
        Ok(Handle::EventPort(self.port, path.to_path_buf()))
    }

    fn remove(&self, handle: &Handle) -> Result<(), Error> {
        let path = match handle {
            Handle::EventPort(port, path) if *port == self.port => path,
            Handle::EventPort(_, _) => return Err(Error::UnsupportedOp),
            _ => return Err(Error::UnsupportedOp),
        };
        let addr = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|(_, (_, _, p, _))| p == path)
            .map(|(addr, _)| *addr);
        if let Some(addr) = addr {
            unsafe { port_dissociate(self.port, PORT_SOURCE_FILE, addr) };
            self.objects.lock().unwrap().remove(&addr);
        }
        Ok(())
    }

    fn run(&self, ctx: &ReaderContext) {
        loop {
            if ctx.should_stop() {
                return;
            }

            let mut event: port_event = unsafe { std::mem::zeroed() };
            let timeout = timespec { tv_sec: 1, tv_nsec: 0 };
            let result = unsafe { port_get(self.port, &mut event, &timeout) };
            if result == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::TimedOut {
                    continue; // wake up periodically to check should_stop()
                }
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                ctx.errors.send(Error::Io(err));
                return;
            }

            if event.portev_source == PORT_SOURCE_FILE as u16 {
                let found = self
                    .objects
                    .lock()
                    .unwrap()
                    .get(&event.portev_object)
                    .map(|(_, _, p, k)| (p.clone(), *k));

                if let Some((path, kind)) = found {
                    let op = Self::translate(event.portev_events);
                    if !op.is_empty() {
                        ctx.publish(&Handle::EventPort(self.port, path.clone()), op, None);
                    }
                    // Event ports are one-shot: re-arm unless the object is gone
                    // from this path (deleted, or renamed away from it), in
                    // which case drop the stale bookkeeping entry instead.
                    if op.intersects(Op::REMOVE | Op::RENAME) {
                        self.objects.lock().unwrap().remove(&event.portev_object);
                    } else {
                        let _ = self.associate(&path, kind);
                    }
                }
            }
        }
    }
}

impl Drop for EventPortBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.port) };
    }
}

unsafe impl Send for EventPortBackend {}
unsafe impl Sync for EventPortBackend {}
