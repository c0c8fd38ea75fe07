// Message types exchanged between the app event loop, the spawned remote
// calls, and the TUI.

use crate::rpc::SessionSnapshot;
use crate::session::error::SessionError;
use crate::session::model::ConnectionStatus;

/// Commands sent from the TUI to the app loop.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    /// Join the session (or update the existing row for this device).
    Join {
        display_name: String,
        mobile_number: String,
    },
    /// Place one of the preset bid amounts.
    PlaceBid { amount: f64 },
    /// Place a custom amount as typed; validated and parsed by the app.
    CustomBid { raw: String },
    /// Manually re-fetch a snapshot.
    Refresh,
    Quit,
}

/// Results of spawned remote calls, reported back to the app loop.
///
/// Every outcome carries the generation it was spawned under; outcomes from a
/// superseded generation (e.g. a bid that resolved after a snapshot reload)
/// are discarded by the receiver.
#[derive(Debug)]
pub enum TaskOutcome {
    Snapshot {
        generation: u64,
        result: Result<SessionSnapshot, SessionError>,
    },
    Join {
        generation: u64,
        display_name: String,
        result: Result<(), SessionError>,
    },
    Bid {
        generation: u64,
        participant_id: String,
        delta: f64,
        result: Result<(), SessionError>,
    },
}

/// Updates pushed from the app loop to the TUI render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Full view-state refresh after a projection change.
    Snapshot(Box<ViewSnapshot>),
    Connection(ConnectionStatus),
    /// Transient informational message (joined, bid accepted, ...).
    Notice(String),
    /// User-visible error with an implied manual retry.
    Error(String),
}

/// Everything the TUI needs to draw one frame, captured in one shot so the
/// render loop never reads shared state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewSnapshot {
    pub session_code: String,
    pub session_title: String,
    pub connection: ConnectionStatus,
    pub total_amount: f64,
    pub participant_count: usize,
    /// Leaderboard order (rank 1 first).
    pub rows: Vec<LeaderboardRow>,
    /// Observed bids, newest first, capped for display.
    pub recent_bids: Vec<BidRow>,
    /// Set once this device has a participant row.
    pub joined_as: Option<String>,
    /// True while this device's bid is awaiting the backend.
    pub bid_pending: bool,
    pub presets: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub display_name: String,
    pub amount: f64,
    /// This row belongs to the local device.
    pub is_self: bool,
    /// Rank-1 row with a nonzero amount.
    pub is_leader: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BidRow {
    pub display_name: String,
    pub delta: f64,
}
