use crate::state::App;
use crate::theme;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};
use runwatch_core::record::{DONE_GLYPHS, WARNING_GLYPHS};

const STAMP_WIDTH: usize = 8;

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(7),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, rows[0]);
    render_summary(f, app, rows[1]);
    render_feed(f, app, rows[2]);
    render_footer(f, app, rows[3]);

    if app.show_help {
        render_help(f, centered(area, 48, 16));
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let status = app.lifecycle.status();
    let task = app
        .config
        .task_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(no task selected)".to_string());
    let line = Line::from(vec![
        Span::styled(" runwatch ", theme::HEADER_STYLE),
        Span::styled(status.to_string(), theme::status_style(status)),
        Span::styled("  task ", theme::LABEL_STYLE),
        Span::styled(task, theme::VALUE_STYLE),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn summary_row<'a>(label: &'a str, value: Option<&'a str>) -> Line<'a> {
    let value = match value {
        Some(value) => Span::styled(value, theme::VALUE_STYLE),
        None => Span::styled("-", theme::MUTED_STYLE),
    };
    Line::from(vec![Span::styled(format!("{label:<15}"), theme::LABEL_STYLE), value])
}

fn render_summary(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::BORDER_STYLE)
        .title(Span::styled("Run", theme::HEADER_STYLE));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let dashboard = &app.dashboard;
    let iteration = dashboard.iteration_summary();
    let counters = format!(
        "{} received, {} buffered, {} dropped ({} critical), flush every {}",
        app.received,
        app.feed.len(),
        app.queue_dropped,
        app.critical_dropped,
        app.flush.adaptive_step()
    );
    let lines = vec![
        summary_row("Phase", Some(dashboard.phase_label())),
        summary_row("Iteration", iteration.as_deref()),
        summary_row("Current", dashboard.current_action.as_deref()),
        summary_row("Previous", dashboard.previous_action.as_deref()),
        summary_row("Last completed", dashboard.last_completed_action.as_deref()),
        summary_row("Output", Some(counters.as_str())),
    ];
    f.render_widget(Paragraph::new(lines), inner);
}

fn feed_line_style(line: &str) -> Style {
    let body = line.get(STAMP_WIDTH..).unwrap_or_default();
    if body.starts_with(" ! ") {
        return theme::ERROR_LINE_STYLE;
    }
    let text = body.trim_start();
    if WARNING_GLYPHS.iter().any(|glyph| text.starts_with(glyph)) {
        theme::WARN_LINE_STYLE
    } else if DONE_GLYPHS.iter().any(|glyph| text.starts_with(glyph)) {
        theme::SUCCESS_LINE_STYLE
    } else {
        theme::VALUE_STYLE
    }
}

fn render_feed(f: &mut Frame, app: &mut App, area: Rect) {
    let follow = if app.viewport.follow() {
        Span::styled(" follow ", theme::FOLLOW_STYLE)
    } else {
        Span::styled(" paused ", theme::MUTED_STYLE)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::BORDER_STYLE)
        .title(Line::from(vec![Span::styled("Output", theme::HEADER_STYLE), follow]));
    let inner = block.inner(area);
    f.render_widget(block, area);

    app.viewport.set_height(inner.height as usize);
    let viewport = &app.viewport;
    let lines: Vec<Line> = viewport
        .content()
        .lines()
        .skip(viewport.offset())
        .take(viewport.height())
        .map(|line| {
            let style = feed_line_style(line);
            match (line.get(..STAMP_WIDTH), line.get(STAMP_WIDTH..)) {
                (Some(stamp), Some(rest)) => Line::from(vec![
                    Span::styled(stamp, theme::MUTED_STYLE),
                    Span::styled(rest, style),
                ]),
                _ => Line::from(Span::styled(line, style)),
            }
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    let keys: &[(&str, &str)] = if app.lifecycle.running() {
        &[("c", "cancel"), ("f", "follow"), ("?", "help"), ("q", "quit")]
    } else {
        &[("s", "start"), ("f", "follow"), ("?", "help"), ("q", "quit")]
    };
    for (key, action) in keys {
        spans.push(Span::styled(format!(" {key}"), theme::KEY_STYLE));
        spans.push(Span::styled(format!(" {action} "), theme::LABEL_STYLE));
    }
    if let Some(note) = &app.note {
        spans.push(Span::styled(format!(" {note}"), theme::MUTED_STYLE));
    } else if let Some(err) = app.lifecycle.last_error() {
        spans.push(Span::styled(format!(" last error: {err}"), theme::MUTED_STYLE));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(theme::WARN_LINE_STYLE);
    let inner = block.inner(area);
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let entries = [
        ("s / r", "Start or retry run"),
        ("c", "Cancel run"),
        ("f", "Toggle follow"),
        ("j / Down", "Scroll down"),
        ("k / Up", "Scroll up"),
        ("PgUp/PgDn", "Page"),
        ("g / Home", "Top"),
        ("G / End", "Bottom (follow)"),
        ("?", "Toggle help"),
        ("q", "Quit (cancels run)"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    text.extend(entries.iter().map(|(key, action)| {
        Line::from(vec![
            Span::styled(format!("{key:<11}"), theme::KEY_STYLE),
            Span::raw(*action),
        ])
    }));
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
