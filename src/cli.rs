use crate::backend::HttpBackend;
use crate::config::MonitorConfig;
use crate::model::{JobKind, JobRecord, JobSnapshot, JobState, MonitorEvent};
use crate::orchestrator::{self, MonitorCommand, ALREADY_RUNNING};
use crate::refresh::HttpRefresher;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (mpsc::UnboundedSender<OutputLine>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bid-job-monitor",
    version,
    about = "Launch and follow the bid dashboard's background jobs, with optional TUI"
)]
pub struct Cli {
    /// Base URL of the bid API
    #[arg(long, env = "BID_MONITOR_BASE_URL")]
    pub base_url: Option<String>,

    /// Config file (TOML). Defaults to the user config directory when present
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interval between status queries while a job is active
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Wait after a job settles before reloading dashboard data
    #[arg(long)]
    pub settle_delay: Option<humantime::Duration>,

    /// How long a notification stays visible
    #[arg(long)]
    pub notification_ttl: Option<humantime::Duration>,

    /// Per-request HTTP timeout
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Skip the startup status query
    #[arg(long)]
    pub no_sync: bool,

    /// Launch a job right away
    #[arg(long, value_enum)]
    pub launch: Option<JobKind>,

    /// Print the final job snapshot as JSON and exit (no TUI)
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Print job progress as text and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file for TUI sessions
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Whether this invocation ends up in the TUI.
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text
    }
}

/// Build a `MonitorConfig`: defaults, then the config file, then CLI flags.
pub fn build_config(args: &Cli) -> Result<MonitorConfig> {
    let mut cfg = crate::config::load(args.config.as_deref())?;
    if let Some(url) = args.base_url.as_ref() {
        cfg.base_url = url.clone();
    }
    if let Some(d) = args.poll_interval {
        cfg.poll_interval = Duration::from(d);
    }
    if let Some(d) = args.settle_delay {
        cfg.settle_delay = Duration::from(d);
    }
    if let Some(d) = args.notification_ttl {
        cfg.notification_ttl = Duration::from(d);
    }
    if let Some(d) = args.request_timeout {
        cfg.request_timeout = Duration::from(d);
    }
    if args.no_sync {
        cfg.sync_on_start = false;
    }
    if cfg.poll_interval.is_zero() {
        anyhow::bail!("poll interval must be greater than zero");
    }
    Ok(cfg)
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    tracing::info!(base_url = %cfg.base_url, poll_interval = ?cfg.poll_interval, "starting job monitor");

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cfg).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_headless(args, cfg).await;
        }
    }

    run_headless(args, cfg).await
}

/// Start the monitor on the HTTP backend. Shared by every output mode.
pub(crate) fn spawn_monitor(
    cfg: MonitorConfig,
) -> Result<(
    UnboundedReceiver<MonitorEvent>,
    UnboundedSender<MonitorCommand>,
    JoinHandle<Result<()>>,
)> {
    let backend = HttpBackend::new(&cfg)?;
    let refresher = HttpRefresher::new(&cfg)?;
    let (event_tx, event_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<MonitorCommand>();
    let handle = tokio::spawn(orchestrator::run_monitor(
        cfg, backend, refresher, event_tx, cmd_rx,
    ));
    Ok((event_rx, cmd_tx, handle))
}

/// Progress of a `--launch` run, fed one snapshot at a time.
#[derive(Debug, Default)]
struct LaunchWatch {
    seen_active: bool,
    settled: Option<JobRecord>,
}

impl LaunchWatch {
    /// Returns true once the job has run and been handed back to `Idle`.
    fn observe(&mut self, record: &JobRecord) -> bool {
        if record.state.is_active() {
            self.seen_active = true;
        }
        if record.state.is_terminal() {
            self.settled = Some(record.clone());
        }
        self.seen_active && record.state == JobState::Idle
    }

    fn into_result(self, kind: JobKind) -> Result<()> {
        match self.settled {
            Some(r) if r.state == JobState::Failed => {
                Err(anyhow::anyhow!("{} failed: {}", kind.labels().name, r.message))
            }
            _ => Ok(()),
        }
    }
}

/// Text and JSON modes: follow one launched job, or a one-shot status sync, then exit.
async fn run_headless(args: Cli, mut cfg: MonitorConfig) -> Result<()> {
    if args.launch.is_none() {
        cfg.sync_on_start = true;
    }
    let sync_first = cfg.sync_on_start;
    let (out_tx, out_handle) = spawn_output_writer();
    let (mut event_rx, cmd_tx, monitor) = spawn_monitor(cfg)?;

    let mut launched = false;
    if let (Some(kind), false) = (args.launch, sync_first) {
        let _ = cmd_tx.send(MonitorCommand::Launch(kind));
        launched = true;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut snapshot = JobSnapshot::new();
    let mut watch = LaunchWatch::default();
    let res: Result<()> = loop {
        let ev = tokio::select! {
            ev = event_rx.recv() => match ev {
                Some(ev) => ev,
                None => break Err(anyhow::anyhow!("job monitor stopped unexpectedly")),
            },
            _ = &mut ctrl_c => {
                let _ = cmd_tx.send(MonitorCommand::Abort);
                let _ = out_tx.send(OutputLine::Stderr("Interrupted".into()));
                break Ok(());
            }
        };

        if !args.json {
            let now = OffsetDateTime::now_utc();
            for line in crate::text_summary::event_lines(&ev, Some(&snapshot), now) {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
        }

        match ev {
            MonitorEvent::Jobs(s) => {
                snapshot = s;
                if let Some(record) = args.launch.and_then(|k| snapshot.get(&k)) {
                    if watch.observe(record) {
                        break Ok(());
                    }
                }
            }
            MonitorEvent::Synced => match args.launch {
                None => break Ok(()),
                Some(kind) if !launched => {
                    let _ = cmd_tx.send(MonitorCommand::Launch(kind));
                    launched = true;
                }
                Some(_) => {}
            },
            MonitorEvent::Notification(Some(n))
                if launched && !watch.seen_active && n.message == ALREADY_RUNNING =>
            {
                break Err(anyhow::anyhow!("another job is already running"));
            }
            _ => {}
        }
    };

    let _ = cmd_tx.send(MonitorCommand::Quit);
    monitor.await.context("job monitor task failed")??;

    if args.json {
        let out = serde_json::to_string_pretty(&snapshot)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary =
            crate::text_summary::build_text_summary(&snapshot, OffsetDateTime::now_utc());
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    res?;
    match args.launch {
        Some(kind) => watch.into_result(kind),
        None => Ok(()),
    }
}
