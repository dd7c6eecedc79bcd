//! Single-flight coordination for refreshes and registrations.

use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

type Flight = Shared<BoxFuture<'static, Result<()>>>;

/// At most one outstanding operation; callers that arrive while it runs
/// await the same outcome, failures included.
///
/// The operation itself must re-check whatever precondition made the
/// caller start it: a caller may observe "not done" just before a flight
/// finishes and then start a fresh one.
pub struct SingleFlight {
    slot: Mutex<Option<(u64, Flight)>>,
    generation: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether an operation is outstanding.
    pub fn in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Join the outstanding operation, or start one with `start`.
    pub async fn run<F, Fut>(&self, start: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (generation, flight) = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some((generation, flight)) => (*generation, flight.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let flight = start().boxed().shared();
                    *slot = Some((generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let outcome = flight.await;

        let mut slot = self.slot.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
        }
        outcome
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let callers = (0..5).map(|_| {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            flight.run(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await.map_err(|e| LiveError::transport(e.to_string()))?;
                Ok(())
            })
        });

        let release = async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        };

        let (results, _) = futures::join!(join_all(callers), release);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(!flight.in_flight());
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_then_clears() {
        let flight = SingleFlight::new();
        let gate = Arc::new(Semaphore::new(0));

        let callers = (0..3).map(|_| {
            let gate = Arc::clone(&gate);
            flight.run(move || async move {
                let _permit = gate.acquire().await.map_err(|e| LiveError::transport(e.to_string()))?;
                Err(LiveError::transport("down"))
            })
        });
        let release = async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        };

        let (results, _) = futures::join!(join_all(callers), release);
        assert!(results
            .iter()
            .all(|r| *r == Err(LiveError::Transport("down".to_string()))));

        // A later call starts a new run.
        let result = flight.run(|| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sequential_runs_each_execute() {
        let flight = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            flight
                .run(move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(!flight.in_flight());
    }
}
