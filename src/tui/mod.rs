mod help;
mod state;

use crate::backend::HttpBackend;
use crate::cli::Cli;
use crate::config::MonitorConfig;
use crate::model::{JobKind, JobRecord, JobState, MonitorEvent, NotificationKind};
use crate::orchestrator::{self, MonitorCommand};
use crate::refresh::HttpRefresher;
use crate::text_summary::{elapsed, state_label};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState};
use std::{io, path::PathBuf, time::Duration, time::Instant};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, cfg: MonitorConfig) -> Result<()> {
    // Unbounded channels avoid backpressure between the monitor and the render loop.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<MonitorCommand>();

    let backend = HttpBackend::new(&cfg)?;
    let refresher = HttpRefresher::new(&cfg)?;
    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(crate::logging::default_log_file);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let sync_pending = cfg.sync_on_start;
    let ui_handle = std::thread::spawn(move || {
        run_threaded(ui_args, log_file, sync_pending, event_rx, cmd_tx)
    });

    let res = orchestrator::run_monitor(cfg, backend, refresher, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    log_file: PathBuf,
    sync_pending: bool,
    mut event_rx: UnboundedReceiver<MonitorEvent>,
    cmd_tx: UnboundedSender<MonitorCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        panel_expanded: crate::preferences::load().panel_expanded,
        synced: !sync_pending,
        ..Default::default()
    };
    let log_file = log_file.display().to_string();

    if let Some(kind) = args.launch {
        let _ = cmd_tx.send(MonitorCommand::Launch(kind));
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal
                .draw(|f| draw(f.area(), f, &state, &log_file))
                .ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(MonitorCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('b')) => {
                        let _ = cmd_tx.send(MonitorCommand::Launch(JobKind::DataIngestion));
                    }
                    (_, KeyCode::Char('r')) => {
                        let _ = cmd_tx.send(MonitorCommand::Launch(JobKind::ReEvaluation));
                    }
                    (_, KeyCode::Char('x')) => {
                        let _ = cmd_tx.send(MonitorCommand::Abort);
                    }
                    (_, KeyCode::Char('d')) => {
                        let _ = cmd_tx.send(MonitorCommand::Dismiss);
                    }
                    (_, KeyCode::Char('v')) => {
                        let prefs = state.toggle_panel();
                        if let Err(e) = crate::preferences::save(&prefs) {
                            tracing::warn!(error = %format!("{e:#}"), "failed to save preferences");
                            state.info = format!("Save preferences failed: {e:#}");
                        }
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 1;
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState, log_file: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Jobs"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("bid-job-monitor"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_jobs(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f, log_file),
    }
}

fn state_color(state: JobState) -> Color {
    match state {
        JobState::Idle => Color::Gray,
        JobState::Starting => Color::Yellow,
        JobState::Running => Color::Cyan,
        JobState::Succeeded => Color::Green,
        JobState::Failed => Color::Red,
    }
}

fn draw_jobs(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(0),
                Constraint::Length(3),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    draw_job_panel(rows[0], f, state);
    draw_toast(rows[1], f, state);
    draw_status_bar(rows[2], f, state);
}

fn draw_job_panel(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let now = OffsetDateTime::now_utc();
    let mut lines: Vec<Line<'static>> = Vec::new();
    for record in state.jobs.values() {
        lines.push(job_header(record));
        if state.panel_expanded {
            job_details(&mut lines, record, now, area.width);
            lines.push(Line::from(""));
        }
    }

    let polling = if state.polling {
        Span::styled(" ● verificando ", Style::default().fg(Color::Green))
    } else {
        Span::styled(" ○ ", Style::default().fg(Color::DarkGray))
    };
    let title = Line::from(vec![Span::raw("Processos "), polling]);
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn job_header(record: &JobRecord) -> Line<'static> {
    let key = match record.kind {
        JobKind::DataIngestion => "b",
        JobKind::ReEvaluation => "r",
    };
    Line::from(vec![
        Span::styled(format!("[{key}] "), Style::default().fg(Color::Magenta)),
        Span::styled(
            record.kind.labels().name,
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            state_label(record.state),
            Style::default().fg(state_color(record.state)),
        ),
    ])
}

fn job_details(out: &mut Vec<Line<'static>>, record: &JobRecord, now: OffsetDateTime, width: u16) {
    push_wrapped_status_kv(out, "  Status", &record.message, width);
    if record.state.is_active() {
        if let Some(d) = elapsed(record, now) {
            push_wrapped_status_kv(
                out,
                "  Tempo",
                &humantime::format_duration(d).to_string(),
                width,
            );
        }
    }
    if let Some(last) = record.last_run.as_deref() {
        push_wrapped_status_kv(out, "  Última execução", last, width);
    }
}

fn draw_toast(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(n) = state.notification.as_ref() else {
        f.render_widget(Block::default().borders(Borders::ALL), area);
        return;
    };
    let color = match n.kind {
        NotificationKind::Success => Color::Green,
        NotificationKind::Error => Color::Red,
        NotificationKind::Info => Color::Cyan,
    };
    let p = Paragraph::new(Line::from(vec![
        Span::styled(n.message.clone(), Style::default().fg(color)),
        Span::styled("  (d)", Style::default().fg(Color::DarkGray)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color)),
    );
    f.render_widget(p, area);
}

fn draw_status_bar(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut spans = Vec::new();
    match state.busy() {
        Some(r) => spans.push(Span::styled(
            format!("{} em andamento (x para parar)", r.kind.labels().name),
            Style::default().fg(Color::Yellow),
        )),
        None if !state.synced => spans.push(Span::styled(
            "Consultando status...",
            Style::default().fg(Color::DarkGray),
        )),
        None => spans.push(Span::raw("Pronto")),
    }
    if let Some(reload) = state.reload_text() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(reload, Style::default().fg(Color::Gray)));
    }
    if !state.info.is_empty() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::raw(state.info.clone()));
    }
    let p = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(p, area);
}
