use std::sync::mpsc;

use threadlens_types::ThreadState;

use crate::scenarios::{SETTLE, spawn_worker};

pub async fn run() -> Result<(), String> {
    let (ready_tx, ready_rx) = mpsc::channel::<()>();

    for i in 0..4 {
        let ready_tx = ready_tx.clone();
        spawn_worker(format!("worker.idle.{i}"), move || {
            let (_never_tx, jobs) = mpsc::channel::<()>();
            let _waiting = threadlens_threads::enter_state(ThreadState::Waiting);
            let _ = ready_tx.send(());
            // Nothing ever sends; the worker parks here for the life of the process.
            let _ = jobs.recv();
        })?;
    }
    drop(ready_tx);

    for _ in 0..4 {
        ready_rx
            .recv()
            .map_err(|e| format!("worker failed to start: {e}"))?;
    }
    tokio::time::sleep(SETTLE).await;

    println!("four idle workers parked on empty queues; expecting no deadlocks");
    Ok(())
}
