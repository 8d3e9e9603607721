use crate::error::IndexError;
use crate::indexer::ChangeStats;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

type SharedRun = Shared<BoxFuture<'static, Result<ChangeStats, Arc<IndexError>>>>;

/// At most one catch-up per project at a time.
///
/// A caller arriving while a catch-up is in flight does not start a second
/// one; it awaits the in-flight run and receives the same `ChangeStats`.
#[derive(Default)]
pub struct CatchUpGate {
    running: Mutex<Option<SharedRun>>,
}

impl CatchUpGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` unless a run is already in flight, in which case await that
    /// run's shared result instead. `fut` must acquire whatever locks it
    /// needs itself; the gate only guarantees single-flight.
    pub async fn run<F>(&self, fut: F) -> Result<ChangeStats, Arc<IndexError>>
    where
        F: Future<Output = Result<ChangeStats, IndexError>> + Send + 'static,
    {
        let shared = {
            let mut guard = self.running.lock().await;
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let shared = fut.map(|r| r.map_err(Arc::new)).boxed().shared();
                    *guard = Some(shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        // Whoever observes completion first retires the slot, so the next
        // caller starts a fresh run instead of replaying this result.
        let mut guard = self.running.lock().await;
        if guard.as_ref().map(|f| f.ptr_eq(&shared)).unwrap_or(false) {
            *guard = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_coalesce_to_one_run() {
        let gate = Arc::new(CatchUpGate::new());
        let runs = Arc::new(AtomicU32::new(0));

        let make = |runs: Arc<AtomicU32>| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ChangeStats {
                added: 7,
                ..Default::default()
            })
        };

        let a = {
            let gate = gate.clone();
            let runs = runs.clone();
            tokio::spawn(async move { gate.run(make(runs)).await })
        };
        let b = {
            let gate = gate.clone();
            let runs = runs.clone();
            tokio::spawn(async move { gate.run(make(runs)).await })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.added, 7);
        assert_eq!(b.added, 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failed_run_is_shared_then_cleared() {
        let gate = CatchUpGate::new();
        let result = gate
            .run(async { Err(IndexError::Fatal("boom".to_string())) })
            .await;
        assert!(result.is_err());

        // The gate is clear again; a later run succeeds.
        let result = gate.run(async { Ok(ChangeStats::default()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sequential_runs_each_execute() {
        let gate = CatchUpGate::new();
        let runs = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let runs = runs.clone();
            gate.run(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(ChangeStats::default())
            })
            .await
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
