use std::env;

use vigil::{Op, Watcher, WatcherBuilder};

/// Shows watching with a bounded event buffer and filtering for a single
/// operation, in the spirit of `notify-rs`'s own `event_filtering` example.
fn main() {
    let watcher = WatcherBuilder::new()
        .buffer_size(256)
        .build()
        .expect("failed to initialize watcher");

    let path = env::args().nth(1).unwrap_or_else(|| ".".to_string());
    watcher.add(&path).expect("failed to add watch");

    println!("Watching {} for writes only...", path);

    loop {
        crossbeam_channel::select! {
            recv(watcher.events()) -> event => {
                match event {
                    Ok(event) if event.op.contains(Op::WRITE) => {
                        println!("write: {:?}", event.name);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            recv(watcher.errors()) -> err => {
                match err {
                    Ok(err) => eprintln!("watch error: {}", err),
                    Err(_) => break,
                }
            }
        }
    }
}
