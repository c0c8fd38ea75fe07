// TUI widget modules for each panel.

pub mod bids;
pub mod leaderboard;
pub mod status_bar;
