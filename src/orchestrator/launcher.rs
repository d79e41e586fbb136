//! Job launcher: claim the slot, ask the backend to start, hand off to the poller.

use super::controller::{Monitor, Outcome};
use crate::backend::{JobBackend, StartAck};
use crate::error::{BackendError, MonitorError};
use crate::model::{JobKind, JobState, NotificationKind};
use crate::refresh::DataRefresher;
use time::OffsetDateTime;

pub(crate) const ALREADY_RUNNING: &str = "Já existe um processo em andamento";
const IN_PROGRESS: &str = "Processo em andamento...";

impl<B: JobBackend, R: DataRefresher> Monitor<B, R> {
    pub(super) fn launch(&mut self, kind: JobKind) {
        let run_id = match self.registry.try_start(kind, OffsetDateTime::now_utc()) {
            Ok(run_id) => run_id,
            Err(e) => {
                tracing::info!(%kind, error = %e, "launch rejected");
                self.notify(NotificationKind::Info, ALREADY_RUNNING);
                return;
            }
        };
        tracing::info!(%kind, run_id, "launching job");
        self.publish_jobs();

        let backend = self.backend.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = backend.start(kind).await;
            let _ = outcome_tx.send(Outcome::Started {
                kind,
                run_id,
                result,
            });
        });
    }

    pub(super) fn on_started(
        &mut self,
        kind: JobKind,
        run_id: u64,
        result: Result<StartAck, BackendError>,
    ) {
        if !self.registry.is_current(kind, run_id) {
            tracing::debug!(%kind, run_id, "discarding start response for a stale run");
            return;
        }
        let labels = kind.labels();
        match result {
            Ok(ack) => {
                tracing::info!(%kind, run_id, estimate = ?ack.estimated_duration, "job accepted");
                let detail = ack
                    .estimated_duration
                    .unwrap_or_else(|| IN_PROGRESS.to_string());
                self.notify(
                    NotificationKind::Info,
                    format!("{} {}", labels.started, detail),
                );
                self.resume_polling();
            }
            Err(e) => {
                let shown = match e.server_message() {
                    Some(msg) => msg.to_string(),
                    None => format!("{}: {e}", labels.launch_failed),
                };
                let err = MonitorError::LaunchFailure {
                    kind,
                    message: e.to_string(),
                };
                tracing::warn!(%kind, run_id, error = %err, "launch failed");

                self.apply(kind, JobState::Failed, shown.clone());
                self.publish_jobs();
                self.notify(NotificationKind::Error, shown);
                // No reload follows a rejected launch; give the slot back right away.
                self.reset(kind);
                self.publish_jobs();
            }
        }
    }
}
