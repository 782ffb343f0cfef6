use std::sync::{Arc, Barrier};
use std::time::Duration;

use threadlens_locks::TrackedMutex;

use crate::scenarios::{SETTLE, spawn_worker};

/// Long enough to outlast every diagnostic round.
const RETRY_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run() -> Result<(), String> {
    let ledger = Arc::new(TrackedMutex::new("demo.ledger", ()));
    let journal = Arc::new(TrackedMutex::new("demo.journal", ()));
    let ready_barrier = Arc::new(Barrier::new(3));

    {
        let ledger = Arc::clone(&ledger);
        let journal = Arc::clone(&journal);
        let ready_barrier = Arc::clone(&ready_barrier);
        spawn_worker("writer.ledger", move || {
            let _ledger_guard = ledger.lock();
            ready_barrier.wait();
            println!("writer.ledger waiting on journal with a timeout");
            match journal.try_lock_for(RETRY_TIMEOUT) {
                Some(_journal_guard) => println!("writer.ledger acquired journal"),
                None => println!("writer.ledger gave up on journal"),
            }
        })?;
    }
    {
        let ledger = Arc::clone(&ledger);
        let journal = Arc::clone(&journal);
        let ready_barrier = Arc::clone(&ready_barrier);
        spawn_worker("writer.journal", move || {
            let _journal_guard = journal.lock();
            ready_barrier.wait();
            println!("writer.journal waiting on ledger with a timeout");
            match ledger.try_lock_for(RETRY_TIMEOUT) {
                Some(_ledger_guard) => println!("writer.journal acquired ledger"),
                None => println!("writer.journal gave up on ledger"),
            }
        })?;
    }

    tokio::task::spawn_blocking(move || ready_barrier.wait())
        .await
        .map_err(|e| format!("barrier task failed: {e}"))?;
    tokio::time::sleep(SETTLE).await;

    println!("both writers wait with timeouts; expecting a suspected cycle");
    Ok(())
}
