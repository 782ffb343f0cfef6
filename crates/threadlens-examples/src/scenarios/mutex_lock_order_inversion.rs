use std::sync::{Arc, Barrier};

use threadlens_locks::TrackedMutex;

use crate::scenarios::{SETTLE, spawn_worker};

pub async fn run() -> Result<(), String> {
    let left = Arc::new(TrackedMutex::new("demo.shared.left", ()));
    let right = Arc::new(TrackedMutex::new("demo.shared.right", ()));
    let ready_barrier = Arc::new(Barrier::new(3));

    spawn_lock_order_worker(
        "worker.alpha",
        "left",
        Arc::clone(&left),
        "right",
        Arc::clone(&right),
        Arc::clone(&ready_barrier),
    )?;
    spawn_lock_order_worker(
        "worker.beta",
        "right",
        Arc::clone(&right),
        "left",
        Arc::clone(&left),
        Arc::clone(&ready_barrier),
    )?;

    tokio::task::spawn_blocking(move || ready_barrier.wait())
        .await
        .map_err(|e| format!("barrier task failed: {e}"))?;
    tokio::time::sleep(SETTLE).await;

    println!(
        "workers hold {} and {} in opposite order; expecting a confirmed two-thread cycle",
        left.resource(),
        right.resource()
    );
    Ok(())
}

fn spawn_lock_order_worker(
    thread_name: &'static str,
    first_name: &'static str,
    first: Arc<TrackedMutex<()>>,
    second_name: &'static str,
    second: Arc<TrackedMutex<()>>,
    ready_barrier: Arc<Barrier>,
) -> Result<(), String> {
    spawn_worker(thread_name, move || {
        let _first_guard = first.lock();
        println!("{thread_name} locked {first_name}; waiting for peer");
        ready_barrier.wait();

        println!("{thread_name} attempting {second_name}; this should deadlock");
        let _second_guard = second.lock();
        println!("{thread_name} unexpectedly acquired {second_name}");
    })
}
