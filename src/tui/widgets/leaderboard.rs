// Leaderboard widget: ranked participants with amounts.

use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Row, Table};
use ratatui::Frame;

use crate::protocol::LeaderboardRow;
use crate::tui::ViewState;

/// Render the leaderboard table into the given area.
pub fn render(frame: &mut Frame, area: Rect, state: &ViewState) {
    let header = Row::new(vec!["#", "Name", "Amount"]).style(
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::BOLD),
    );

    let rows: Vec<Row> = state
        .view
        .rows
        .iter()
        .map(|row| {
            Row::new(vec![
                Cell::from(format!("{}", row.rank)),
                Cell::from(row_label(row)),
                Cell::from(format_amount(row.amount)),
            ])
            .style(row_style(row))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title("Leaderboard"));

    frame.render_widget(table, area);
}

/// Display label for one row; the local user's row is marked.
pub fn row_label(row: &LeaderboardRow) -> String {
    if row.is_self {
        format!("{} (you)", row.display_name)
    } else {
        row.display_name.clone()
    }
}

/// Style for one row: the leader stands out, the local user is tinted.
pub fn row_style(row: &LeaderboardRow) -> Style {
    if row.is_leader {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else if row.is_self {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::White)
    }
}

/// Format an amount: whole units without decimals, fractional ones with two.
pub fn format_amount(amount: f64) -> String {
    if (amount - amount.round()).abs() < 1e-9 {
        format!("{}", amount.round() as i64)
    } else {
        format!("{amount:.2}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
