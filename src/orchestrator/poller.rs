//! Status poller: one fixed-cadence timer, queries every active job per tick, and
//! suspends itself once nothing is left to observe.

use super::controller::{Monitor, Outcome, PollResult};
use crate::backend::{JobBackend, StatusReport};
use crate::error::{BackendError, MonitorError};
use crate::model::{JobKind, JobState, MonitorEvent, NotificationKind};
use crate::refresh::DataRefresher;
use futures::future::join_all;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};

impl<B: JobBackend, R: DataRefresher> Monitor<B, R> {
    /// Start the poll timer if it is not already running. First tick is one interval out.
    pub(crate) fn resume_polling(&mut self) {
        if self.poll.is_some() {
            return;
        }
        let period = self.cfg.poll_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(interval);
        tracing::debug!(interval = ?period, "status polling resumed");
        let _ = self.event_tx.send(MonitorEvent::Polling(true));
    }

    pub(super) fn suspend_polling(&mut self) {
        if self.poll.take().is_some() {
            tracing::debug!("status polling suspended");
            let _ = self.event_tx.send(MonitorEvent::Polling(false));
        }
    }

    pub(super) fn on_poll_tick(&mut self) {
        let active = self.registry.active();
        if active.is_empty() {
            self.suspend_polling();
            return;
        }
        if self.poll_in_flight {
            tracing::debug!("previous status queries still in flight; skipping tick");
            return;
        }
        self.poll_in_flight = true;

        let backend = self.backend.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let backend = &backend;
            let results = join_all(active.into_iter().map(|(kind, run_id)| async move {
                PollResult {
                    kind,
                    run_id,
                    result: backend.status(kind).await,
                }
            }))
            .await;
            let _ = outcome_tx.send(Outcome::Polled(results));
        });
    }

    /// Apply one tick's results together, then notify and schedule reloads for the
    /// jobs that reached a terminal state.
    pub(crate) fn on_polled(&mut self, results: Vec<PollResult>) {
        self.poll_in_flight = false;

        let mut settled = Vec::new();
        for r in results {
            if let Some(done) = self.apply_poll_result(r) {
                settled.push(done);
            }
        }
        self.publish_jobs();

        for (kind, run_id) in settled {
            self.on_terminal(kind, run_id);
        }
        if self.registry.active().is_empty() {
            self.suspend_polling();
        }
    }

    /// Returns the job if this result made it terminal.
    fn apply_poll_result(&mut self, r: PollResult) -> Option<(JobKind, u64)> {
        let PollResult {
            kind,
            run_id,
            result,
        } = r;
        if !self.registry.is_current(kind, run_id) {
            tracing::debug!(%kind, run_id, "discarding status for a stale run");
            return None;
        }

        match result {
            Ok(report) => {
                self.registry.set_last_run(kind, report.last_run.clone());
                let message = self.progress_message(kind, &report);
                if report.running {
                    tracing::trace!(%kind, run_id, %message, "job running");
                    self.apply(kind, JobState::Running, message);
                    None
                } else {
                    if self.registry.get(kind).state == JobState::Starting {
                        self.apply(kind, JobState::Running, message.clone());
                        self.publish_jobs();
                    }
                    let message = if report.message.is_empty() {
                        kind.labels().completed.to_string()
                    } else {
                        report.message
                    };
                    tracing::info!(%kind, run_id, "job no longer running");
                    self.apply(kind, JobState::Succeeded, message);
                    Some((kind, run_id))
                }
            }
            Err(e) => {
                let err = MonitorError::PollFailure {
                    kind,
                    message: e.to_string(),
                };
                tracing::warn!(%kind, run_id, error = %err, "status query failed");
                self.apply(kind, JobState::Failed, e.to_string());
                Some((kind, run_id))
            }
        }
    }

    /// Server message, or the last known one when the server sent none.
    fn progress_message(&self, kind: JobKind, report: &StatusReport) -> String {
        if report.message.is_empty() {
            self.registry.get(kind).message.clone()
        } else {
            report.message.clone()
        }
    }

    /// Query every kind once so jobs already running server-side are picked up.
    pub(super) fn sync_statuses(&mut self) {
        let backend = self.backend.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let backend = &backend;
            let results = join_all(
                JobKind::ALL
                    .into_iter()
                    .map(|kind| async move { (kind, backend.status(kind).await) }),
            )
            .await;
            let _ = outcome_tx.send(Outcome::Synced(results));
        });
    }

    pub(super) fn on_synced(&mut self, results: Vec<(JobKind, Result<StatusReport, BackendError>)>) {
        for (kind, result) in results {
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(%kind, error = %e, "initial status query failed");
                    continue;
                }
            };
            self.registry.set_last_run(kind, report.last_run.clone());
            if !report.running {
                continue;
            }
            let message = if report.message.is_empty() {
                kind.labels().starting.to_string()
            } else {
                report.message
            };
            match self.registry.adopt(kind, message, OffsetDateTime::now_utc()) {
                Ok(run_id) => {
                    tracing::info!(%kind, run_id, "adopted job already running on the backend");
                    self.notify(
                        NotificationKind::Info,
                        format!("{} em andamento no servidor", kind.labels().name),
                    );
                    self.resume_polling();
                }
                Err(e) => tracing::warn!(%kind, error = %e, "cannot adopt running job"),
            }
        }
        self.publish_jobs();
        let _ = self.event_tx.send(MonitorEvent::Synced);
    }
}
