//! Fixed-size pool of worker threads fed from a shared channel.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;
use tracing::{debug, warn};

use crate::error::IngestError;

/// Result of processing one unit, tagged with the unit itself.
#[derive(Debug)]
pub struct UnitOutcome<T, R> {
    pub unit: T,
    pub result: Result<R, IngestError>,
}

impl<T, R> UnitOutcome<T, R> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` once per unit and blocks until every unit is done.
    ///
    /// A failing or panicking job only fails its own unit. Outcomes come
    /// back in the order of `units`.
    pub fn run<T, R, F>(&self, units: Vec<T>, job: F) -> Vec<UnitOutcome<T, R>>
    where
        T: Display + Send,
        R: Send,
        F: Fn(&T) -> Result<R, IngestError> + Sync,
    {
        let total = units.len();
        if total == 0 {
            return Vec::new();
        }
        let (unit_tx, unit_rx) = unbounded::<(usize, T)>();
        let (outcome_tx, outcome_rx) = unbounded::<(usize, UnitOutcome<T, R>)>();
        for entry in units.into_iter().enumerate() {
            // The receiver lives until the scope below ends.
            let _ = unit_tx.send(entry);
        }
        drop(unit_tx);

        let workers = self.workers.min(total);
        debug!(workers, units = total, "starting worker pool");
        thread::scope(|scope| {
            for worker in 0..workers {
                let unit_rx = unit_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let job = &job;
                scope.spawn(move || {
                    for (position, unit) in unit_rx.iter() {
                        debug!(worker, unit = %unit, "processing work unit");
                        let result = panic::catch_unwind(AssertUnwindSafe(|| job(&unit)))
                            .unwrap_or_else(|payload| {
                                warn!(worker, unit = %unit, "worker panicked: {}", panic_message(&*payload));
                                Err(IngestError::WorkerPanic(unit.to_string()))
                            });
                        if outcome_tx.send((position, UnitOutcome { unit, result })).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(outcome_tx);

        let mut outcomes: Vec<(usize, UnitOutcome<T, R>)> = outcome_rx.iter().collect();
        outcomes.sort_by_key(|(position, _)| *position);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
