// Screen layout: panel arrangement and sizing.
//
// Divides the terminal area into fixed zones for the session view:
//
// +--------------------------------------------------+
// | Status Bar (1 row)                                |
// +--------------------------------------------------+
// | Session Header (3 rows: title, code, total)       |
// +-------------------------+------------------------+
// | Leaderboard (60%)        | Recent Bids (40%)      |
// +-------------------------+------------------------+
// | Input Line (3 rows)                               |
// +--------------------------------------------------+
// | Help Bar (1 row)                                  |
// +--------------------------------------------------+

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Resolved screen areas for each zone.
#[derive(Debug, Clone)]
pub struct AppLayout {
    /// Top row: connection status and participant count.
    pub status_bar: Rect,
    /// Session title, code, and the running grand total.
    pub header: Rect,
    /// Left side of the middle section: the ranked participant table.
    pub leaderboard: Rect,
    /// Right side: observed bids, newest first.
    pub bids: Rect,
    /// Text-entry line for joining and custom amounts.
    pub input_line: Rect,
    /// Bottom row: keyboard shortcut hints.
    pub help_bar: Rect,
}

/// Build the session view layout from the available terminal area.
pub fn build_layout(area: Rect) -> AppLayout {
    // Vertical: status(1) | header(3) | middle(fill) | input(3) | help(1)
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(area);

    let status_bar = vertical[0];
    let header = vertical[1];
    let middle = vertical[2];
    let input_line = vertical[3];
    let help_bar = vertical[4];

    // Middle: leaderboard(60%) | bids(40%)
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(middle);

    AppLayout {
        status_bar,
        header,
        leaderboard: columns[0],
        bids: columns[1],
        input_line,
        help_bar,
    }
}
