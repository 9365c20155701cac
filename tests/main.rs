use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use vigil::{Error, Op, Watcher, WatcherBuilder};

/// Scratch directory helper, in the spirit of the teacher crate's own
/// `TestDir`: wraps a `TempDir` and hands out paths for files the test is
/// about to create, without caring what their names actually are.
struct TestDir {
    dir: TempDir,
    counter: u32,
}

impl TestDir {
    fn new() -> Self {
        TestDir {
            dir: TempDir::new().expect("failed to create temp dir"),
            counter: 0,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn new_file(&mut self) -> PathBuf {
        self.counter += 1;
        let path = self.dir.path().join(format!("file-{}", self.counter));
        fs::File::create(&path).expect("failed to create test file");
        path
    }

    fn new_directory(&mut self) -> PathBuf {
        self.counter += 1;
        let path = self.dir.path().join(format!("dir-{}", self.counter));
        fs::create_dir(&path).expect("failed to create test directory");
        path
    }
}

/// Builds a watcher the way a test wants one, honoring `FSNOTIFY_BUFFER` if
/// it's set in the environment (a bounded channel of that capacity) and
/// falling back to the default unbounded `Watcher::new()` otherwise.
fn new_watcher() -> Watcher {
    match std::env::var("FSNOTIFY_BUFFER").ok().and_then(|v| v.parse().ok()) {
        Some(size) => Watcher::with_buffer(size).expect("failed to create watcher"),
        None => Watcher::new().expect("failed to create watcher"),
    }
}

fn recv_op(watcher: &Watcher, timeout: Duration) -> Option<vigil::Event> {
    watcher.events().recv_timeout(timeout).ok()
}

fn wait_for_op(watcher: &Watcher, op: Op, timeout: Duration) -> vigil::Event {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for {:?}", op);
        }
        if let Some(event) = recv_op(watcher, remaining) {
            if event.op.contains(op) {
                return event;
            }
        }
    }
}

#[test]
fn it_should_watch_a_directory_and_report_file_creation() {
    let mut test_dir = TestDir::new();
    let watcher = new_watcher();
    watcher.add(test_dir.path()).expect("failed to add watch");

    let file = test_dir.new_file();

    let event = wait_for_op(&watcher, Op::CREATE, Duration::from_secs(5));
    assert_eq!(event.name, file);
}

#[test]
fn it_should_report_writes_to_a_watched_file() {
    let mut test_dir = TestDir::new();
    let file = test_dir.new_file();

    let watcher = new_watcher();
    watcher.add(&file).expect("failed to add watch");

    let mut handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
    handle.write_all(b"hello").unwrap();
    handle.sync_all().unwrap();

    let event = wait_for_op(&watcher, Op::WRITE, Duration::from_secs(5));
    assert_eq!(event.name, file);
}

#[test]
fn it_should_report_removal_of_a_watched_file() {
    let mut test_dir = TestDir::new();
    let file = test_dir.new_file();

    let watcher = new_watcher();
    watcher.add(test_dir.path()).expect("failed to add watch");

    fs::remove_file(&file).unwrap();

    let event = wait_for_op(&watcher, Op::REMOVE, Duration::from_secs(5));
    assert_eq!(event.name, file);
}

#[test]
fn it_should_report_create_write_delete_in_sequence() {
    let test_dir = TestDir::new();
    let watcher = new_watcher();
    watcher.add(test_dir.path()).expect("failed to add watch");

    let file = test_dir.path().join("sequence");
    let mut handle = fs::File::create(&file).unwrap();
    wait_for_op(&watcher, Op::CREATE, Duration::from_secs(5));

    handle.write_all(b"data").unwrap();
    handle.sync_all().unwrap();
    wait_for_op(&watcher, Op::WRITE, Duration::from_secs(5));

    drop(handle);
    fs::remove_file(&file).unwrap();
    wait_for_op(&watcher, Op::REMOVE, Duration::from_secs(5));
}

#[test]
fn it_should_treat_a_path_moved_into_the_watched_directory_as_a_create() {
    let test_dir = TestDir::new();
    let outside = TempDir::new().unwrap();
    let source = outside.path().join("incoming");
    fs::File::create(&source).unwrap();

    let watcher = new_watcher();
    watcher.add(test_dir.path()).expect("failed to add watch");

    let dest = test_dir.path().join("incoming");
    fs::rename(&source, &dest).unwrap();

    let event = wait_for_op(&watcher, Op::CREATE, Duration::from_secs(5));
    assert_eq!(event.name, dest);
}

#[test]
fn it_should_return_an_error_when_removing_a_watch_that_does_not_exist() {
    let test_dir = TestDir::new();
    let watcher = new_watcher();

    let result = watcher.remove(test_dir.path());
    assert!(matches!(result, Err(Error::NonExistentWatch)));
}

#[test]
fn it_should_return_path_not_found_when_adding_a_nonexistent_path() {
    let watcher = new_watcher();
    let result = watcher.add("/this/path/should/not/exist/vigil-test");
    assert!(matches!(result, Err(Error::PathNotFound)));
}

#[test]
fn adding_the_same_path_twice_should_be_idempotent() {
    let test_dir = TestDir::new();
    let watcher = new_watcher();

    watcher.add(test_dir.path()).expect("first add should succeed");
    watcher.add(test_dir.path()).expect("second add should also succeed");

    assert_eq!(watcher.watch_list(), vec![test_dir.path().to_path_buf()]);
}

#[test]
fn watch_list_should_reflect_additions_and_removals() {
    let mut test_dir = TestDir::new();
    let watcher = new_watcher();

    let a = test_dir.new_directory();
    let b = test_dir.new_directory();
    watcher.add(&a).unwrap();
    watcher.add(&b).unwrap();

    let mut list = watcher.watch_list();
    list.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(list, expected);

    watcher.remove(&a).unwrap();
    assert_eq!(watcher.watch_list(), vec![b]);
}

#[test]
fn operations_after_close_should_return_closed() {
    let test_dir = TestDir::new();
    let mut watcher = new_watcher();
    watcher.close().expect("close should succeed");

    assert!(matches!(watcher.add(test_dir.path()), Err(Error::Closed)));
    assert!(matches!(watcher.remove(test_dir.path()), Err(Error::Closed)));
}

#[test]
fn close_should_be_idempotent() {
    let mut watcher = new_watcher();
    watcher.close().expect("first close should succeed");
    watcher.close().expect("second close should also succeed");
}

#[test]
fn a_full_bounded_buffer_should_report_overflow_without_blocking_the_reader() {
    let mut test_dir = TestDir::new();
    let watcher = WatcherBuilder::new()
        .buffer_size(1)
        .build()
        .expect("failed to create watcher");
    watcher.add(test_dir.path()).expect("failed to add watch");

    for _ in 0..64 {
        test_dir.new_file();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut saw_overflow = false;
    while std::time::Instant::now() < deadline {
        if let Ok(err) = watcher.errors().recv_timeout(Duration::from_millis(100)) {
            if matches!(err, Error::EventOverflow) {
                saw_overflow = true;
                break;
            }
        }
    }
    assert!(saw_overflow, "expected at least one EventOverflow with a buffer of 1 facing 64 creations");
}
