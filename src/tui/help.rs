use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn keybind(keys: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(keys, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame, log_file: &str) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        keybind("b", 11, "Search for new bids"),
        keybind("r", 11, "Re-evaluate matches"),
        keybind("x", 11, "Stop following the active job"),
        keybind("d", 11, "Dismiss notification"),
        keybind("v", 11, "Expand/collapse job panel"),
        keybind("tab", 9, "Switch tabs"),
        keybind("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Only one job runs at a time; launching while another is active is refused."),
        Line::from("Stopping a job only stops following it here. The server keeps working."),
        Line::from(""),
        Line::from(vec![
            Span::raw("Logs: "),
            Span::styled(log_file.to_string(), Style::default().fg(Color::Cyan)),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
