//! Job monitor controller.
//!
//! One task owns the registry, the notification slot, the poll timer and the pending
//! reloads. Network calls run in spawned tasks and report back through `Outcome`, so
//! every state change happens here between awaits.

use super::reloader::Reloads;
use crate::backend::{JobBackend, StartAck, StatusReport};
use crate::config::MonitorConfig;
use crate::error::{BackendError, MonitorError};
use crate::jobs::{Notifier, Registry};
use crate::model::{JobKind, JobState, MonitorEvent, NotificationKind, RefreshSummary};
use crate::refresh::DataRefresher;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, Interval};

/// Commands emitted by UI layers to drive the monitor.
#[derive(Debug, Clone)]
pub(crate) enum MonitorCommand {
    Launch(JobKind),
    /// Client-side abort: stop observing, reset active jobs. The backend keeps running.
    Abort,
    Dismiss,
    Quit,
}

pub(super) struct PollResult {
    pub kind: JobKind,
    pub run_id: u64,
    pub result: Result<StatusReport, BackendError>,
}

/// Completed network work, fed back into the controller loop.
pub(super) enum Outcome {
    Started {
        kind: JobKind,
        run_id: u64,
        result: Result<StartAck, BackendError>,
    },
    Polled(Vec<PollResult>),
    Synced(Vec<(JobKind, Result<StatusReport, BackendError>)>),
    Reloaded {
        kind: JobKind,
        run_id: u64,
        result: Result<RefreshSummary, BackendError>,
    },
}

pub(crate) struct Monitor<B, R> {
    pub(super) cfg: MonitorConfig,
    pub(super) backend: Arc<B>,
    pub(super) refresher: Arc<R>,
    pub(super) registry: Registry,
    pub(super) notifier: Notifier,
    /// Present while polling; dropping it cancels the timer.
    pub(super) poll: Option<Interval>,
    pub(super) poll_in_flight: bool,
    pub(super) reloads: Reloads,
    pub(super) event_tx: UnboundedSender<MonitorEvent>,
    pub(super) outcome_tx: UnboundedSender<Outcome>,
}

impl<B: JobBackend, R: DataRefresher> Monitor<B, R> {
    pub(super) fn new(
        cfg: MonitorConfig,
        backend: B,
        refresher: R,
        event_tx: UnboundedSender<MonitorEvent>,
        outcome_tx: UnboundedSender<Outcome>,
    ) -> Self {
        Self {
            notifier: Notifier::new(cfg.notification_ttl),
            cfg,
            backend: Arc::new(backend),
            refresher: Arc::new(refresher),
            registry: Registry::new(),
            poll: None,
            poll_in_flight: false,
            reloads: Reloads::default(),
            event_tx,
            outcome_tx,
        }
    }

    pub(super) fn publish_jobs(&self) {
        let _ = self
            .event_tx
            .send(MonitorEvent::Jobs(self.registry.snapshot()));
    }

    pub(super) fn notify(&mut self, kind: NotificationKind, message: impl Into<String>) {
        let n = self.notifier.emit(kind, message, Instant::now());
        let _ = self.event_tx.send(MonitorEvent::Notification(Some(n)));
    }

    /// Apply a registry transition. A rejected edge is a bug in this module, never a
    /// runtime condition.
    pub(super) fn apply(&mut self, kind: JobKind, to: JobState, message: impl Into<String>) {
        if let Err(e) = self.registry.transition(kind, to, message) {
            invalid_transition(e);
        }
    }

    pub(super) fn reset(&mut self, kind: JobKind) {
        if let Err(e) = self.registry.reset(kind) {
            invalid_transition(e);
        }
    }

    fn on_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::Launch(kind) => self.launch(kind),
            MonitorCommand::Abort => self.abort(),
            MonitorCommand::Dismiss => {
                if let Some(n) = self.notifier.dismiss() {
                    tracing::debug!(message = %n.message, "notification dismissed");
                    let _ = self.event_tx.send(MonitorEvent::Notification(None));
                }
            }
            MonitorCommand::Quit => {}
        }
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Started {
                kind,
                run_id,
                result,
            } => self.on_started(kind, run_id, result),
            Outcome::Polled(results) => self.on_polled(results),
            Outcome::Synced(results) => self.on_synced(results),
            Outcome::Reloaded {
                kind,
                run_id,
                result,
            } => self.on_reloaded(kind, run_id, result),
        }
    }

    fn on_notification_due(&mut self) {
        if self.notifier.expire(Instant::now()) {
            let _ = self.event_tx.send(MonitorEvent::Notification(None));
        }
    }

    pub(super) fn abort(&mut self) {
        let aborted = self.registry.abort_all();
        if aborted.is_empty() {
            tracing::debug!("abort requested with no active job");
            return;
        }
        self.suspend_polling();
        for kind in aborted {
            tracing::info!(%kind, "job observation aborted by user");
            self.notify(NotificationKind::Info, kind.labels().aborted);
        }
        self.publish_jobs();
    }
}

fn invalid_transition(e: MonitorError) {
    tracing::error!(error = %e, "rejected job state transition");
    if cfg!(debug_assertions) {
        panic!("{e}");
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => futures::future::pending().await,
    }
}

/// Run the job monitor until `Quit` arrives or the command channel closes.
pub(crate) async fn run_monitor<B: JobBackend, R: DataRefresher>(
    cfg: MonitorConfig,
    backend: B,
    refresher: R,
    event_tx: UnboundedSender<MonitorEvent>,
    mut cmd_rx: UnboundedReceiver<MonitorCommand>,
) -> Result<()> {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<Outcome>();
    let mut monitor = Monitor::new(cfg, backend, refresher, event_tx, outcome_tx);

    monitor.publish_jobs();
    if monitor.cfg.sync_on_start {
        monitor.sync_statuses();
    }

    loop {
        let notify_at = monitor.notifier.deadline();
        let reload_at = monitor.reloads.next_due();

        // Handlers run after the branch futures are dropped, so they may borrow
        // `monitor` mutably even though `next_tick` borrowed the timer.
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(MonitorCommand::Quit) | None => break,
                    Some(cmd) => monitor.on_command(cmd),
                }
            }
            Some(outcome) = outcome_rx.recv() => monitor.on_outcome(outcome),
            _ = next_tick(&mut monitor.poll) => monitor.on_poll_tick(),
            _ = sleep_until_opt(notify_at) => monitor.on_notification_due(),
            _ = sleep_until_opt(reload_at) => monitor.on_reload_due(),
        }
    }

    tracing::debug!("job monitor stopped");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::JobSnapshot;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn states_of(snapshots: &[JobSnapshot], kind: JobKind) -> Vec<JobState> {
        snapshots.iter().map(|s| s[&kind].state).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn reevaluation_runs_to_completion_and_reloads_once() {
        let script = Script::default();
        script.push_status(JobKind::ReEvaluation, running("lote 1"));
        script.push_status(JobKind::ReEvaluation, running("lote 2"));
        script.push_status(JobKind::ReEvaluation, finished());
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));

        let mut snapshots = Vec::new();
        let mut notifications = Vec::new();
        let mut succeeded_at = None;
        loop {
            match h.events.recv().await.unwrap() {
                MonitorEvent::Jobs(s) => {
                    let state = s[&JobKind::ReEvaluation].state;
                    if state == JobState::Succeeded {
                        succeeded_at = Some(Instant::now());
                    }
                    let done = state == JobState::Idle && succeeded_at.is_some();
                    snapshots.push(s);
                    if done {
                        break;
                    }
                }
                MonitorEvent::Notification(Some(n)) => notifications.push(n),
                _ => {}
            }
        }

        assert_eq!(
            states_of(&snapshots, JobKind::ReEvaluation),
            vec![
                JobState::Idle,
                JobState::Starting,
                JobState::Running,
                JobState::Running,
                JobState::Succeeded,
                JobState::Idle,
            ]
        );
        // The other kind never moved.
        assert!(states_of(&snapshots, JobKind::DataIngestion)
            .iter()
            .all(|s| *s == JobState::Idle));

        let last = notifications.last().unwrap();
        assert_eq!(last.kind, NotificationKind::Success);
        assert_eq!(last.message, "Reavaliação de matches concluída!");

        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 1);
        let reload_at = h.refreshes.at.lock().unwrap()[0];
        assert_eq!(reload_at - succeeded_at.unwrap(), Duration::from_millis(2000));

        // Suspended: no more status queries once nothing is active.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.script.status_count(), 3);
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_reporting_done_still_publishes_running() {
        let script = Script::default();
        script.push_status(JobKind::DataIngestion, finished());
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::DataIngestion));

        let mut snapshots = Vec::new();
        let mut settled = false;
        loop {
            let MonitorEvent::Jobs(s) = h
                .wait_for(|ev| matches!(ev, MonitorEvent::Jobs(_)))
                .await
            else {
                unreachable!()
            };
            let state = s[&JobKind::DataIngestion].state;
            settled |= state == JobState::Succeeded;
            snapshots.push(s);
            if settled && state == JobState::Idle {
                break;
            }
        }

        assert_eq!(
            states_of(&snapshots, JobKind::DataIngestion),
            vec![
                JobState::Idle,
                JobState::Starting,
                JobState::Running,
                JobState::Succeeded,
                JobState::Idle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_during_settle_delay_frees_the_slot() {
        let script = Script::default();
        script.push_status(JobKind::ReEvaluation, finished());
        let cfg = MonitorConfig {
            settle_delay: Duration::from_secs(30),
            ..quiet_config()
        };
        let mut h = Harness::spawn(cfg, script);

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.wait_for_state(JobKind::ReEvaluation, JobState::Succeeded)
            .await;
        h.send(MonitorCommand::Abort);
        h.wait_for_state(JobKind::ReEvaluation, JobState::Idle)
            .await;

        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        h.wait_for_state(JobKind::DataIngestion, JobState::Starting)
            .await;

        // The earlier reload still refreshes data but does not touch the new run.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 1);
        let mut last = None;
        while let Ok(ev) = h.events.try_recv() {
            if let MonitorEvent::Jobs(s) = ev {
                last = Some(s);
            }
        }
        let last = last.expect("snapshots published after relaunch");
        assert_eq!(last[&JobKind::DataIngestion].state, JobState::Running);
        assert_eq!(last[&JobKind::ReEvaluation].state, JobState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_a_fixed_interval_after_the_start_ack() {
        let script = Script::default();
        script.push_status(JobKind::DataIngestion, running("a"));
        script.push_status(JobKind::DataIngestion, running("b"));
        script.push_status(JobKind::DataIngestion, finished());
        let mut h = Harness::spawn(quiet_config(), script);

        let t0 = Instant::now();
        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        h.wait_for(|ev| matches!(ev, MonitorEvent::Polling(true)))
            .await;
        h.wait_for(|ev| matches!(ev, MonitorEvent::Polling(false)))
            .await;

        let calls = h.script.status_calls.lock().unwrap().clone();
        let offsets: Vec<Duration> = calls.iter().map(|(_, at)| *at - t0).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_launch_is_rejected_while_first_is_active() {
        let script = Script {
            start_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        h.wait_for_state(JobKind::DataIngestion, JobState::Starting)
            .await;
        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.send(MonitorCommand::Launch(JobKind::DataIngestion));

        let n = h.wait_for_notification().await;
        assert_eq!(n.kind, NotificationKind::Info);
        assert_eq!(n.message, "Já existe um processo em andamento");

        h.wait_for_state(JobKind::DataIngestion, JobState::Running)
            .await;
        assert_eq!(
            *h.script.start_calls.lock().unwrap(),
            vec![JobKind::DataIngestion]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_frees_the_slot_without_polling_or_reload() {
        let script = Script::default();
        script.push_start(Err(BackendError::Application("Fila cheia".into())));
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.wait_for_state(JobKind::ReEvaluation, JobState::Failed)
            .await;
        let n = h.wait_for_notification().await;
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.message, "Fila cheia");
        h.wait_for_state(JobKind::ReEvaluation, JobState::Idle)
            .await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.script.status_count(), 0);
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 0);

        // The user can try again.
        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.wait_for_state(JobKind::ReEvaluation, JobState::Starting)
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_uses_fallback_label() {
        let script = Script::default();
        script.push_start(Err(BackendError::Transport("connection refused".into())));
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        let n = h.wait_for_notification().await;
        assert_eq!(n.kind, NotificationKind::Error);
        assert!(n
            .message
            .starts_with("Erro ao iniciar busca de licitações"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_fails_the_job_and_stops_polling() {
        let script = Script::default();
        script.push_status(
            JobKind::DataIngestion,
            Err(BackendError::Malformed("expected value".into())),
        );
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        h.wait_for_state(JobKind::DataIngestion, JobState::Failed)
            .await;
        let n = h.wait_for_notification().await;
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.message, "Erro ao verificar status da busca");

        h.wait_for_state(JobKind::DataIngestion, JobState::Idle)
            .await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.script.status_count(), 1);
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timeout_maps_to_failed() {
        let script = Script::default();
        script.push_status(JobKind::ReEvaluation, running("x"));
        script.push_status(JobKind::ReEvaluation, Err(BackendError::Timeout));
        let mut h = Harness::spawn(quiet_config(), script);

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.wait_for_state(JobKind::ReEvaluation, JobState::Running)
            .await;
        h.wait_for_state(JobKind::ReEvaluation, JobState::Failed)
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_polling_and_resets_to_idle() {
        let mut h = Harness::spawn(quiet_config(), Script::default());

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        h.wait_for_state(JobKind::ReEvaluation, JobState::Running)
            .await;
        h.send(MonitorCommand::Abort);

        let n = h.wait_for_notification().await;
        assert_eq!(n.kind, NotificationKind::Info);
        assert_eq!(n.message, "Reavaliação de matches interrompida pelo usuário");
        h.wait_for_state(JobKind::ReEvaluation, JobState::Idle)
            .await;

        let polled = h.script.status_count();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.script.status_count(), polled);
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_auto_hides_after_its_window() {
        let mut h = Harness::spawn(quiet_config(), Script::default());

        h.send(MonitorCommand::Launch(JobKind::ReEvaluation));
        let n = h.wait_for_notification().await;
        assert_eq!(n.message, "Reavaliação iniciada! Processo em andamento...");
        let shown = Instant::now();

        h.wait_for(|ev| matches!(ev, MonitorEvent::Notification(None)))
            .await;
        assert_eq!(Instant::now() - shown, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_hides_immediately() {
        let mut h = Harness::spawn(quiet_config(), Script::default());
        h.send(MonitorCommand::Launch(JobKind::DataIngestion));
        h.wait_for_notification().await;
        let shown = Instant::now();
        h.send(MonitorCommand::Dismiss);
        h.wait_for(|ev| matches!(ev, MonitorEvent::Notification(None)))
            .await;
        assert_eq!(Instant::now(), shown);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_sync_adopts_a_running_job() {
        let script = Script::default();
        script.push_status(JobKind::DataIngestion, running("processando"));
        script.push_status(
            JobKind::ReEvaluation,
            Ok(StatusReport {
                running: false,
                message: String::new(),
                last_run: Some("2024-05-01T10:00:00".into()),
            }),
        );
        script.push_status(JobKind::DataIngestion, finished());
        let mut h = Harness::spawn(MonitorConfig::default(), script);

        let ev = h
            .wait_for(|ev| {
                matches!(ev, MonitorEvent::Jobs(s) if s[&JobKind::DataIngestion].state == JobState::Running)
            })
            .await;
        let MonitorEvent::Jobs(snap) = ev else {
            unreachable!()
        };
        assert_eq!(snap[&JobKind::DataIngestion].message, "processando");
        assert_eq!(
            snap[&JobKind::ReEvaluation].last_run.as_deref(),
            Some("2024-05-01T10:00:00")
        );

        h.wait_for_state(JobKind::DataIngestion, JobState::Succeeded)
            .await;
        h.wait_for_state(JobKind::DataIngestion, JobState::Idle)
            .await;
        assert_eq!(h.refreshes.calls.load(Ordering::SeqCst), 1);
    }

    fn bare_monitor() -> (
        Monitor<FakeBackend, FakeRefresher>,
        UnboundedReceiver<MonitorEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, _outcome_rx) = mpsc::unbounded_channel();
        let monitor = Monitor::new(
            quiet_config(),
            FakeBackend(Arc::new(Script::default())),
            FakeRefresher(Arc::new(RefreshLog::default())),
            event_tx,
            outcome_tx,
        );
        (monitor, event_rx)
    }

    #[tokio::test]
    async fn abort_with_nothing_running_is_a_no_op() {
        let (mut monitor, mut events) = bare_monitor();
        monitor.abort();
        assert!(monitor.notifier.current().is_none());
        assert!(events.try_recv().is_err());
        assert!(monitor
            .registry
            .snapshot()
            .values()
            .all(|r| r.state == JobState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_for_one_kind_leaves_the_other_untouched() {
        let (mut monitor, _events) = bare_monitor();
        let a = monitor
            .registry
            .force(JobKind::DataIngestion, JobState::Running);
        let b = monitor
            .registry
            .force(JobKind::ReEvaluation, JobState::Running);
        monitor.resume_polling();
        monitor.poll_in_flight = true;

        monitor.on_polled(vec![
            PollResult {
                kind: JobKind::DataIngestion,
                run_id: a,
                result: Err(BackendError::Status(502)),
            },
            PollResult {
                kind: JobKind::ReEvaluation,
                run_id: b,
                result: running("lote 3"),
            },
        ]);

        assert_eq!(
            monitor.registry.get(JobKind::DataIngestion).state,
            JobState::Failed
        );
        let other = monitor.registry.get(JobKind::ReEvaluation);
        assert_eq!(other.state, JobState::Running);
        assert_eq!(other.message, "lote 3");
        assert_eq!(monitor.registry.active(), vec![(JobKind::ReEvaluation, b)]);
        assert!(monitor.poll.is_some());
        assert!(!monitor.poll_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_poll_results_are_discarded() {
        let (mut monitor, _events) = bare_monitor();
        let old = monitor
            .registry
            .try_start(JobKind::ReEvaluation, time::OffsetDateTime::now_utc())
            .unwrap();
        monitor.abort();
        let new = monitor
            .registry
            .try_start(JobKind::ReEvaluation, time::OffsetDateTime::now_utc())
            .unwrap();

        monitor.on_polled(vec![PollResult {
            kind: JobKind::ReEvaluation,
            run_id: old,
            result: finished(),
        }]);
        assert_eq!(
            monitor.registry.get(JobKind::ReEvaluation).state,
            JobState::Starting
        );
        assert!(monitor.registry.is_current(JobKind::ReEvaluation, new));
    }
}
