use crate::model::{JobKind, JobRecord, JobSnapshot, MonitorEvent, Notification};
use crate::preferences::Preferences;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use time::OffsetDateTime;

pub struct UiState {
    pub tab: usize,
    pub jobs: JobSnapshot,
    pub notification: Option<Notification>,
    pub polling: bool,
    pub synced: bool,
    /// Local errors for the status bar.
    pub info: String,
    /// When the dashboard data was last reloaded, with its summary.
    pub last_reload: Option<(OffsetDateTime, String)>,
    pub panel_expanded: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            jobs: JobKind::ALL
                .iter()
                .map(|&k| (k, JobRecord::idle(k)))
                .collect(),
            notification: None,
            polling: false,
            synced: false,
            info: String::new(),
            last_reload: None,
            panel_expanded: Preferences::default().panel_expanded,
        }
    }
}

impl UiState {
    pub fn apply_event(&mut self, ev: MonitorEvent) {
        match ev {
            MonitorEvent::Jobs(snapshot) => self.jobs = snapshot,
            MonitorEvent::Notification(n) => self.notification = n,
            MonitorEvent::Polling(on) => self.polling = on,
            MonitorEvent::Reloaded(summary) => {
                let at = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
                self.last_reload = Some((at, summary.to_message()));
            }
            MonitorEvent::Synced => self.synced = true,
        }
    }

    /// The job currently holding the slot, if any.
    pub fn busy(&self) -> Option<&JobRecord> {
        self.jobs.values().find(|r| r.state.is_active())
    }

    pub fn reload_text(&self) -> Option<String> {
        let (at, summary) = self.last_reload.as_ref()?;
        let clock = at
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default();
        Some(format!("{summary} às {clock}"))
    }

    pub fn toggle_panel(&mut self) -> Preferences {
        self.panel_expanded = !self.panel_expanded;
        Preferences {
            panel_expanded: self.panel_expanded,
        }
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, NotificationKind, RefreshSummary};

    #[test]
    fn events_update_the_view() {
        let mut state = UiState::default();
        assert!(state.busy().is_none());

        let mut jobs = state.jobs.clone();
        if let Some(r) = jobs.get_mut(&JobKind::ReEvaluation) {
            r.state = JobState::Running;
        }
        state.apply_event(MonitorEvent::Jobs(jobs));
        state.apply_event(MonitorEvent::Polling(true));
        assert_eq!(state.busy().map(|r| r.kind), Some(JobKind::ReEvaluation));
        assert!(state.polling);

        state.apply_event(MonitorEvent::Notification(Some(Notification {
            kind: NotificationKind::Info,
            message: "Reavaliação iniciada!".into(),
            created_at: OffsetDateTime::now_utc(),
        })));
        assert!(state.notification.is_some());
        state.apply_event(MonitorEvent::Notification(None));
        assert!(state.notification.is_none());

        assert!(state.reload_text().is_none());
        state.apply_event(MonitorEvent::Reloaded(RefreshSummary::default()));
        assert!(state
            .reload_text()
            .is_some_and(|t| t.starts_with("Dados recarregados às ")));
        assert!(state.info.is_empty());
    }

    #[test]
    fn reload_time_is_shown_as_a_clock() {
        let state = UiState {
            last_reload: Some((
                time::macros::datetime!(2024-05-01 10:02:03 UTC),
                "Dados recarregados (bids: 4)".into(),
            )),
            ..Default::default()
        };
        assert_eq!(
            state.reload_text().as_deref(),
            Some("Dados recarregados (bids: 4) às 10:02:03")
        );
    }

    #[test]
    fn toggling_the_panel_yields_the_preference_to_save() {
        let mut state = UiState::default();
        assert!(state.panel_expanded);
        assert!(!state.toggle_panel().panel_expanded);
        assert!(state.toggle_panel().panel_expanded);
    }

    #[test]
    fn long_values_wrap_under_the_label() {
        let mut out = Vec::new();
        push_wrapped_status_kv(&mut out, "Msg", &"x".repeat(30), 20);
        // 16 usable columns: 11 on the first line after "Msg: ", 14 after the indent.
        assert_eq!(out.len(), 3);
        push_wrapped_status_kv(&mut out, "Empty", "   ", 20);
        assert_eq!(out.len(), 3);
    }
}
