use std::env;

use vigil::{Op, Watcher};

fn main() {
    let watcher = Watcher::new().expect("failed to initialize watcher");

    let current_dir = env::current_dir().expect("failed to determine current directory");

    watcher
        .add(&current_dir)
        .expect("failed to add watch");

    println!("Watching {} for activity...", current_dir.display());

    for event in watcher.events().iter() {
        if event.op.contains(Op::CREATE) {
            println!("created: {:?}", event.name);
        } else if event.op.contains(Op::REMOVE) {
            println!("removed: {:?}", event.name);
        } else if event.op.contains(Op::WRITE) {
            println!("modified: {:?}", event.name);
        } else if event.op.contains(Op::RENAME) {
            println!("renamed: {:?}", event.name);
        }
    }
}
