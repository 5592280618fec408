//! Restart loop for long-running node tasks

use anyhow::Result;
use log::{error, info};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Build and run a node loop until `shutdown` turns true.
///
/// When the loop fails or panics, the failure is logged and the loop is
/// rebuilt after `backoff`. A loop that returns `Ok` ends supervision.
/// Returns how many times the loop was restarted.
pub async fn run_supervised<F, Fut>(
    name: &str,
    mut shutdown: watch::Receiver<bool>,
    backoff: Duration,
    mut factory: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut restarts = 0;
    loop {
        if *shutdown.borrow_and_update() {
            return restarts;
        }

        info!("[{}] : Initializing ...", name);
        let mut task = tokio::spawn(factory());
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = wait_for_shutdown(&mut shutdown) => {
                task.abort();
                return restarts;
            }
        };

        match joined {
            Ok(Ok(())) => return restarts,
            Ok(Err(e)) => error!("[{}] : {:#}", name, e),
            Err(e) if e.is_panic() => error!("[{}] : Unexpected error occurred.", name),
            Err(_) => return restarts,
        }
        error!("[{}] : Resuming ...", name);
        restarts += 1;

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = wait_for_shutdown(&mut shutdown) => return restarts,
        }
    }
}

/// Resolves once the flag is true or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn failing_loop_is_rebuilt() {
        let (_tx, rx) = watch::channel(false);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let restarts = run_supervised("flaky", rx, Duration::from_millis(100), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err(anyhow!("lost the bus")),
                    1 => panic!("boom"),
                    _ => Ok(()),
                }
            }
        })
        .await;

        assert_eq!(restarts, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_a_running_loop() {
        let (tx, rx) = watch::channel(false);
        let supervisor = tokio::spawn(async move {
            run_supervised("forever", rx, Duration::from_millis(100), || async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert_eq!(supervisor.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn already_shut_down_never_starts() {
        let (tx, rx) = watch::channel(true);
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let restarts = run_supervised("idle", rx, Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        drop(tx);
        assert_eq!(restarts, 0);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }
}
