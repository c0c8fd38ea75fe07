// Status bar widget: connection indicator, participant count, join state.

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::session::model::ConnectionStatus;
use crate::tui::ViewState;

/// Render the status bar into the given area.
///
/// Layout: [connection dot + label] [participants] [joined-as / hint]
pub fn render(frame: &mut Frame, area: Rect, state: &ViewState) {
    let mut spans = Vec::new();

    let (dot, dot_color) = connection_indicator(state.view.connection);
    spans.push(Span::styled(
        format!(" {} {} ", dot, state.view.connection.label()),
        Style::default().fg(dot_color),
    ));

    spans.push(Span::styled(" | ", Style::default().fg(Color::Gray)));
    spans.push(Span::styled(
        format!("{} bidding", state.view.participant_count),
        Style::default().fg(Color::White),
    ));

    spans.push(Span::styled(" | ", Style::default().fg(Color::Gray)));
    match &state.view.joined_as {
        Some(name) => {
            spans.push(Span::styled(
                format!("you: {name}"),
                Style::default().fg(Color::Cyan),
            ));
        }
        None => {
            spans.push(Span::styled(
                "not joined (press j)",
                Style::default().fg(Color::Yellow),
            ));
        }
    }

    if state.view.bid_pending {
        spans.push(Span::styled(
            "  [bid confirming...]",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::DIM),
        ));
    }

    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(paragraph, area);
}

/// Return the connection dot character and its color.
pub fn connection_indicator(status: ConnectionStatus) -> (&'static str, Color) {
    match status {
        ConnectionStatus::Subscribed => ("●", Color::Green),
        ConnectionStatus::Connecting => ("●", Color::Yellow),
        ConnectionStatus::Disconnected => ("●", Color::Red),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
