//! Bounded-concurrency dispatch of tasks across targets.
//!
//! A fixed pool of workers pulls targets from a dispatcher. Admission is a
//! rendezvous: a worker asks for work by handing the dispatcher a one-shot
//! slot, and the dispatcher only ever gives a target to a worker that is
//! waiting for one. At most `workers` targets are therefore in flight, and
//! nothing is queued ahead of a free worker.
//!
//! Cancellation is cooperative. Once the token fires no further targets are
//! handed out and idle workers exit, but a task that is already running is
//! left to finish on its own (or hit its own deadline).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use kubefan_core::ClusterTarget;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorCause, ErrorRecord, RunFailure, TaskError};

/// Work performed for a single target.
#[async_trait]
pub trait TargetTask: Send + Sync {
    async fn run(&self, target: ClusterTarget) -> Result<(), TaskError>;
}

/// Everything a finished run reports.
#[derive(Debug)]
pub struct RunOutcome {
    /// Targets passed to the run.
    pub submitted: usize,

    /// Targets handed to a worker. Each of them ran to completion.
    pub attempted: usize,

    /// Targets never dispatched because the run was cancelled.
    pub skipped: usize,

    /// Failures in no particular order, plus an interruption record if the
    /// run was cancelled.
    pub errors: Vec<ErrorRecord>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), RunFailure> {
        match RunFailure::from_records(self.errors) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Dispatches targets to a fixed number of workers.
#[derive(Debug, Clone)]
pub struct Runner {
    workers: usize,
}

impl Runner {
    /// Create a runner. A worker count of zero is raised to one.
    pub fn new(workers: usize) -> Self {
        if workers == 0 {
            warn!("Worker count of 0 requested, using 1");
        }
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` once for every target and wait for all of it to finish.
    pub async fn run(
        &self,
        targets: Vec<ClusterTarget>,
        cancel: CancellationToken,
        task: Arc<dyn TargetTask>,
    ) -> RunOutcome {
        let submitted = targets.len();
        info!(targets = submitted, workers = self.workers, "Starting run");

        // Each worker has at most one outstanding slot, so this never fills.
        let (ready_tx, mut ready_rx) = mpsc::channel::<oneshot::Sender<ClusterTarget>>(self.workers);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Option<ErrorRecord>>();

        let collector = tokio::spawn(async move {
            let mut errors = Vec::new();
            while let Some(result) = result_rx.recv().await {
                if let Some(err) = result {
                    errors.push(err);
                }
            }
            errors
        });

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(
                id,
                ready_tx.clone(),
                result_tx.clone(),
                cancel.clone(),
                task.clone(),
            ));
        }
        drop(ready_tx);
        drop(result_tx);

        let mut attempted = 0;
        'dispatch: for target in targets {
            let mut target = target;
            loop {
                let slot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Stop requested, no further targets will be dispatched");
                        break 'dispatch;
                    }
                    slot = ready_rx.recv() => match slot {
                        Some(slot) => slot,
                        None => break 'dispatch,
                    },
                };
                match slot.send(target) {
                    Ok(()) => {
                        attempted += 1;
                        break;
                    }
                    // The worker is gone; offer the target to the next one.
                    Err(returned) => target = returned,
                }
            }
        }
        // Closing the ready channel drops any waiting slots, which tells idle
        // workers there is nothing left.
        drop(ready_rx);

        info!("waiting for all workers to finish");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker exited abnormally");
            }
        }

        info!("waiting to collect all errors");
        let mut errors = match collector.await {
            Ok(errors) => errors,
            Err(e) => {
                error!(error = %e, "Error collector failed");
                Vec::new()
            }
        };

        if cancel.is_cancelled() {
            errors.push(ErrorRecord::interrupted());
        }

        let skipped = submitted - attempted;
        info!(attempted, skipped, errors = errors.len(), "done");

        RunOutcome {
            submitted,
            attempted,
            skipped,
            errors,
        }
    }
}

async fn worker(
    id: usize,
    ready_tx: mpsc::Sender<oneshot::Sender<ClusterTarget>>,
    result_tx: mpsc::UnboundedSender<Option<ErrorRecord>>,
    cancel: CancellationToken,
    task: Arc<dyn TargetTask>,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(worker = id, "Stop requested, worker exiting");
            return;
        }

        let (slot_tx, slot_rx) = oneshot::channel();
        if ready_tx.send(slot_tx).await.is_err() {
            return;
        }
        let Ok(target) = slot_rx.await else {
            return;
        };

        let name = target.name().to_string();
        debug!(worker = id, target = %name, "Starting task");

        // Run on its own task so a panic fails this target only.
        let task = task.clone();
        let result = match tokio::spawn(async move { task.run(target).await }).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ErrorRecord::new(name.clone(), e)),
            Err(e) if e.is_panic() => Some(ErrorRecord::new(
                name.clone(),
                ErrorCause::Panicked(panic_message(e.into_panic())),
            )),
            Err(e) => Some(ErrorRecord::new(name.clone(), ErrorCause::Panicked(e.to_string()))),
        };
        debug!(worker = id, target = %name, failed = result.is_some(), "Finished task");

        if result_tx.send(result).is_err() {
            return;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
