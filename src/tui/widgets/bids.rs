// Recent bids widget: the observed append-only bid log, newest first.

use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem};
use ratatui::Frame;

use crate::protocol::BidRow;
use crate::tui::ViewState;

use super::leaderboard::format_amount;

/// Render the recent-bids panel into the given area.
pub fn render(frame: &mut Frame, area: Rect, state: &ViewState) {
    let items: Vec<ListItem> = state
        .view
        .recent_bids
        .iter()
        .map(|bid| ListItem::new(Line::from(bid_line(bid))))
        .collect();

    let list = List::new(items)
        .style(Style::default().fg(Color::White))
        .block(Block::default().borders(Borders::ALL).title("Recent Bids"));

    frame.render_widget(list, area);
}

/// One log line, e.g. `+10 Asha`.
pub fn bid_line(bid: &BidRow) -> String {
    format!("+{} {}", format_amount(bid.delta), bid.display_name)
}
