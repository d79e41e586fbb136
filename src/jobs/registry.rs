//! Job registry: one record per job kind and the guarded state machine over them.
//!
//! The registry is the only writer of `JobRecord`s. Launch exclusion is checked and
//! set in a single synchronous call so no caller can observe a half-applied start.

use crate::error::MonitorError;
use crate::model::{JobKind, JobRecord, JobSnapshot, JobState};
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub(crate) struct Registry {
    records: BTreeMap<JobKind, JobRecord>,
    next_run_id: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Edges of the job state machine reachable through `transition`.
fn allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Starting, Running)
            | (Starting, Failed)
            | (Running, Running)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Succeeded, Idle)
            | (Failed, Idle)
    )
}

impl Registry {
    pub fn new() -> Self {
        let records = JobKind::ALL
            .iter()
            .map(|&kind| (kind, JobRecord::idle(kind)))
            .collect();
        Self {
            records,
            next_run_id: 1,
        }
    }

    /// Kind currently holding the launch slot, if any.
    ///
    /// Terminal records that have not been reset yet still hold the slot.
    pub fn occupant(&self) -> Option<JobKind> {
        self.records
            .values()
            .find(|r| r.state != JobState::Idle)
            .map(|r| r.kind)
    }

    /// Claim the launch slot for `kind`, returning the new run id.
    pub fn try_start(&mut self, kind: JobKind, now: OffsetDateTime) -> Result<u64, MonitorError> {
        if let Some(active) = self.occupant() {
            return Err(MonitorError::AlreadyRunning { active });
        }
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let record = self.record_mut(kind);
        record.state = JobState::Starting;
        record.message = kind.labels().starting.to_string();
        record.started_at = Some(now);
        record.run_id = run_id;
        Ok(run_id)
    }

    /// Take over a job the backend already reports as running.
    pub fn adopt(
        &mut self,
        kind: JobKind,
        message: impl Into<String>,
        now: OffsetDateTime,
    ) -> Result<u64, MonitorError> {
        let run_id = self.try_start(kind, now)?;
        self.transition(kind, JobState::Running, message)?;
        Ok(run_id)
    }

    pub fn transition(
        &mut self,
        kind: JobKind,
        to: JobState,
        message: impl Into<String>,
    ) -> Result<(), MonitorError> {
        let record = self.record_mut(kind);
        if !allowed(record.state, to) {
            return Err(MonitorError::InvalidTransition {
                kind,
                from: record.state,
                to,
            });
        }
        record.state = to;
        record.message = message.into();
        if to == JobState::Idle {
            record.started_at = None;
        }
        Ok(())
    }

    /// Return a terminal record to `Idle`, keeping its last message.
    pub fn reset(&mut self, kind: JobKind) -> Result<(), MonitorError> {
        let message = self.record_mut(kind).message.clone();
        self.transition(kind, JobState::Idle, message)
    }

    /// Client-side abort: every record that is not `Idle` goes straight back to
    /// `Idle`, including terminal ones still waiting for their reload. The backend
    /// is not told.
    pub fn abort_all(&mut self) -> Vec<JobKind> {
        let mut aborted = Vec::new();
        for record in self.records.values_mut() {
            if record.state != JobState::Idle {
                record.state = JobState::Idle;
                record.message.clear();
                record.started_at = None;
                aborted.push(record.kind);
            }
        }
        aborted
    }

    pub fn set_last_run(&mut self, kind: JobKind, last_run: Option<String>) {
        if last_run.is_some() {
            self.record_mut(kind).last_run = last_run;
        }
    }

    /// Non-terminal records with the run id they were started under.
    pub fn active(&self) -> Vec<(JobKind, u64)> {
        self.records
            .values()
            .filter(|r| r.state.is_active())
            .map(|r| (r.kind, r.run_id))
            .collect()
    }

    /// Whether a network result for `run_id` still applies to `kind`.
    pub fn is_current(&self, kind: JobKind, run_id: u64) -> bool {
        self.records
            .get(&kind)
            .is_some_and(|r| r.run_id == run_id && r.state.is_active())
    }

    /// Whether `kind` is terminal and still belongs to `run_id`.
    pub fn is_settling(&self, kind: JobKind, run_id: u64) -> bool {
        self.records
            .get(&kind)
            .is_some_and(|r| r.run_id == run_id && r.state.is_terminal())
    }

    pub fn get(&self, kind: JobKind) -> &JobRecord {
        // Every kind is inserted by `new`.
        &self.records[&kind]
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.records.clone()
    }

    fn record_mut(&mut self, kind: JobKind) -> &mut JobRecord {
        self.records
            .entry(kind)
            .or_insert_with(|| JobRecord::idle(kind))
    }
}

#[cfg(test)]
impl Registry {
    /// Put a record in an arbitrary state, bypassing the exclusion guard.
    pub(crate) fn force(&mut self, kind: JobKind, state: JobState) -> u64 {
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let record = self.record_mut(kind);
        record.state = state;
        record.run_id = run_id;
        run_id
    }
}
