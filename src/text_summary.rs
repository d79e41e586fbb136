//! Text summary builder for CLI output.
//!
//! Formats job records and monitor events as human-readable lines for text mode.

use crate::model::{JobRecord, JobSnapshot, JobState, MonitorEvent, Notification, NotificationKind};
use std::time::Duration;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Whole-second elapsed time since the job started, if it has.
pub(crate) fn elapsed(record: &JobRecord, now: OffsetDateTime) -> Option<Duration> {
    let started = record.started_at?;
    let secs = (now - started).whole_seconds().max(0) as u64;
    Some(Duration::from_secs(secs))
}

pub(crate) fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Idle => "idle",
        JobState::Starting => "starting",
        JobState::Running => "running",
        JobState::Succeeded => "succeeded",
        JobState::Failed => "failed",
    }
}

pub(crate) fn job_line(record: &JobRecord, now: OffsetDateTime) -> String {
    let mut line = format!(
        "{:<15} {}",
        record.kind.as_str(),
        state_label(record.state)
    );
    if !record.message.is_empty() {
        line.push(' ');
        line.push_str(&record.message);
    }
    if record.state.is_active() {
        if let Some(d) = elapsed(record, now) {
            line.push_str(&format!(" ({})", humantime::format_duration(d)));
        }
    }
    if let Some(last) = record.last_run.as_deref() {
        line.push_str(&format!(" [last run: {last}]"));
    }
    line
}

pub(crate) fn notification_line(n: &Notification) -> String {
    let tag = match n.kind {
        NotificationKind::Success => "ok",
        NotificationKind::Error => "error",
        NotificationKind::Info => "info",
    };
    format!("[{tag}] {}", n.message)
}

/// Lines worth printing for one event. Snapshots only report the jobs that changed.
pub(crate) fn event_lines(
    ev: &MonitorEvent,
    previous: Option<&JobSnapshot>,
    now: OffsetDateTime,
) -> Vec<String> {
    match ev {
        MonitorEvent::Jobs(snapshot) => snapshot
            .values()
            .filter(|r| {
                previous
                    .and_then(|p| p.get(&r.kind))
                    .map_or(true, |old| old.state != r.state || old.message != r.message)
            })
            .map(|r| job_line(r, now))
            .collect(),
        MonitorEvent::Notification(Some(n)) => vec![notification_line(n)],
        MonitorEvent::Reloaded(summary) => vec![summary.to_message()],
        MonitorEvent::Notification(None) | MonitorEvent::Polling(_) | MonitorEvent::Synced => {
            Vec::new()
        }
    }
}

/// Build a text summary of every job in the snapshot.
pub(crate) fn build_text_summary(snapshot: &JobSnapshot, now: OffsetDateTime) -> TextSummary {
    TextSummary {
        lines: snapshot.values().map(|r| job_line(r, now)).collect(),
    }
}
