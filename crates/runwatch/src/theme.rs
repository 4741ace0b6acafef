use ratatui::style::{Color, Modifier, Style};
use runwatch_core::RunStatus;

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const LABEL_STYLE: Style = Style::new().fg(Color::Rgb(168, 153, 132));
pub const VALUE_STYLE: Style = Style::new().fg(Color::Rgb(235, 219, 178));
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(102, 92, 84));
pub const KEY_STYLE: Style = Style::new().fg(Color::Rgb(131, 165, 152));
pub const BORDER_STYLE: Style = Style::new().fg(Color::Rgb(80, 73, 69));
pub const FOLLOW_STYLE: Style = Style::new()
    .fg(Color::Rgb(184, 187, 38))
    .add_modifier(Modifier::BOLD);
pub const ERROR_LINE_STYLE: Style = Style::new().fg(Color::Rgb(251, 73, 52));
pub const WARN_LINE_STYLE: Style = Style::new().fg(Color::Rgb(250, 189, 47));
pub const SUCCESS_LINE_STYLE: Style = Style::new().fg(Color::Rgb(142, 192, 124));

pub fn status_style(status: &RunStatus) -> Style {
    let color = match status {
        RunStatus::Idle => Color::Rgb(168, 153, 132),
        RunStatus::Starting | RunStatus::Running => Color::Rgb(131, 165, 152),
        RunStatus::Cancelling | RunStatus::Canceled => Color::Rgb(250, 189, 47),
        RunStatus::Failed(_) => Color::Rgb(251, 73, 52),
        RunStatus::Succeeded => Color::Rgb(142, 192, 124),
    };
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}
