//! Batch Retriever: bounded-concurrency fan-out over a work's units.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::outcome::{FetchOutcome, UnitRef};
use super::unit::UnitFetcher;

/// Snapshot handed to the progress callback after every completed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchProgress {
    /// `completed / total * 100`, rounded down. An empty batch is complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Units that were planned, in directory order.
    pub planned: Vec<UnitRef>,
    pub outcomes: HashMap<String, FetchOutcome>,
    /// True if the batch stopped early because it was cancelled.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.planned.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Outcomes in planned order; units never attempted are skipped.
    pub fn ordered(&self) -> impl Iterator<Item = (&UnitRef, &FetchOutcome)> {
        self.planned
            .iter()
            .filter_map(|u| self.outcomes.get(&u.id).map(|o| (u, o)))
    }

    /// First failure in planned order.
    pub fn first_failure(&self) -> Option<String> {
        self.ordered().find_map(|(_, o)| o.failure_reason())
    }
}

/// Drop repeated unit ids (first occurrence wins), then apply the optional
/// preview cap. Directory order is kept.
pub fn plan_units(units: &[UnitRef], max_units: Option<usize>) -> Vec<UnitRef> {
    let mut seen = HashSet::with_capacity(units.len());
    let unique = units.iter().filter(|u| seen.insert(u.id.as_str()));
    match max_units {
        Some(cap) => unique.take(cap).cloned().collect(),
        None => unique.cloned().collect(),
    }
}

pub struct BatchRetriever {
    fetcher: Arc<UnitFetcher>,
    max_workers: usize,
}

impl BatchRetriever {
    pub fn new(fetcher: Arc<UnitFetcher>, max_workers: usize) -> Self {
        Self {
            fetcher,
            max_workers: max_workers.max(1),
        }
    }

    pub fn fetcher(&self) -> &Arc<UnitFetcher> {
        &self.fetcher
    }

    /// Fetch every planned unit with at most `max_workers` in flight.
    ///
    /// Individual failures never abort the batch. `on_progress` is called
    /// from this task only, once per completed unit, so the counts it sees
    /// never decrease. When `cancel` fires no further units are started and
    /// in-flight requests are dropped.
    pub async fn retrieve<F>(
        &self,
        units: &[UnitRef],
        max_units: Option<usize>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(BatchProgress),
    {
        let planned = plan_units(units, max_units);
        let total = planned.len();
        let mut report = BatchReport {
            planned: planned.clone(),
            outcomes: HashMap::with_capacity(total),
            cancelled: false,
        };

        info!(total, max_workers = self.max_workers, "Starting batch");

        let mut results = stream::iter(planned)
            .take_while(|_| futures_util::future::ready(!cancel.is_cancelled()))
            .map(|unit| {
                let fetcher = Arc::clone(&self.fetcher);
                async move {
                    let outcome = fetcher.fetch(&unit.id, &unit.title).await;
                    (unit.id, outcome)
                }
            })
            .buffer_unordered(self.max_workers);

        let mut progress = BatchProgress {
            completed: 0,
            total,
            succeeded: 0,
            failed: 0,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = results.next() => next,
            };
            let Some((unit_id, outcome)) = next else {
                break;
            };

            progress.completed += 1;
            if outcome.is_success() {
                progress.succeeded += 1;
            } else {
                progress.failed += 1;
            }
            debug!(
                unit_id = %unit_id,
                completed = progress.completed,
                total,
                "Unit finished"
            );
            report.outcomes.insert(unit_id, outcome);
            on_progress(progress);
        }

        if cancel.is_cancelled() && report.outcomes.len() < total {
            report.cancelled = true;
        }

        info!(
            total,
            succeeded = progress.succeeded,
            failed = progress.failed,
            cancelled = report.cancelled,
            "Batch finished"
        );
        report
    }
}
