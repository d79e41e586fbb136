//! Completion reloader: after a job settles, wait out the settle delay, refresh the
//! dashboard data, then hand the slot back by resetting the record to `Idle`.

use super::controller::{Monitor, Outcome};
use crate::backend::JobBackend;
use crate::error::BackendError;
use crate::model::{JobKind, JobState, MonitorEvent, NotificationKind, RefreshSummary};
use crate::refresh::DataRefresher;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingReload {
    kind: JobKind,
    run_id: u64,
    due: Instant,
}

/// Reload deadlines waiting for the controller's timer.
#[derive(Debug, Default)]
pub(crate) struct Reloads {
    pending: Vec<PendingReload>,
}

impl Reloads {
    fn schedule(&mut self, kind: JobKind, run_id: u64, due: Instant) {
        self.pending.push(PendingReload { kind, run_id, due });
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.due).min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<(JobKind, u64)> {
        let (due, later): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.due <= now);
        self.pending = later;
        due.into_iter().map(|p| (p.kind, p.run_id)).collect()
    }
}

impl<B: JobBackend, R: DataRefresher> Monitor<B, R> {
    pub(super) fn on_terminal(&mut self, kind: JobKind, run_id: u64) {
        let labels = kind.labels();
        let state = self.registry.get(kind).state;
        match state {
            JobState::Succeeded => self.notify(NotificationKind::Success, labels.completed),
            JobState::Failed => self.notify(NotificationKind::Error, labels.poll_failed),
            _ => return,
        }
        let due = Instant::now() + self.cfg.settle_delay;
        self.reloads.schedule(kind, run_id, due);
        tracing::info!(%kind, run_id, ?state, delay = ?self.cfg.settle_delay, "reload scheduled");
    }

    pub(super) fn on_reload_due(&mut self) {
        for (kind, run_id) in self.reloads.take_due(Instant::now()) {
            tracing::debug!(%kind, run_id, "refreshing dashboard data");
            let refresher = self.refresher.clone();
            let outcome_tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let result = refresher.refetch_all().await;
                let _ = outcome_tx.send(Outcome::Reloaded {
                    kind,
                    run_id,
                    result,
                });
            });
        }
    }

    pub(super) fn on_reloaded(
        &mut self,
        kind: JobKind,
        run_id: u64,
        result: Result<RefreshSummary, BackendError>,
    ) {
        match result {
            Ok(summary) => {
                tracing::info!(%kind, run_id, collections = summary.collections.len(), "data refreshed");
                let _ = self.event_tx.send(MonitorEvent::Reloaded(summary));
            }
            Err(e) => tracing::warn!(%kind, run_id, error = %e, "data refresh failed"),
        }
        if self.registry.is_settling(kind, run_id) {
            self.reset(kind);
            self.publish_jobs();
        }
    }
}
