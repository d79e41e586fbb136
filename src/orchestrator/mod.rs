//! Job monitor orchestration.
//!
//! The controller owns the job lifecycle; the launcher, poller and reloader add the
//! behaviour for each stage of it. UI/CLI layers only send `MonitorCommand`s and read
//! `MonitorEvent`s.

mod controller;
mod launcher;
mod poller;
mod reloader;

pub(crate) use controller::{run_monitor, MonitorCommand};
pub(crate) use launcher::ALREADY_RUNNING;
