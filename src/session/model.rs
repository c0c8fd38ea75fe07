// Row types for one auction session, as delivered by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One auction session, identified by a short shareable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Server-assigned opaque identifier.
    pub id: String,
    /// Short human-shareable code, unique per active session.
    pub code: String,
    /// Display title, mutable by the session owner.
    pub title: String,
}

/// A joined bidder, keyed by device identifier within a session.
///
/// At most one row exists per `(session_id, device_id)` pair; joining again
/// updates the existing row server-side instead of creating a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub session_id: String,
    /// Client-generated stable identifier, one per installation. Nullable on
    /// the wire for rows created before device tracking existed.
    #[serde(default)]
    pub device_id: Option<String>,
    pub display_name: String,
    /// Contact number. Only exposed to the session owner, so most payloads
    /// omit it.
    #[serde(default)]
    pub mobile_number: Option<String>,
    /// Running total of accepted bids. Authoritative value lives server-side;
    /// this field is the client's shadow copy.
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Append-only record of one increment to a participant's running amount.
/// Never mutated or deleted individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub session_id: String,
    pub participant_id: String,
    pub delta: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A row-level change pushed over the realtime channel, decoded and validated
/// at the subscriber boundary before it reaches the projection store.
///
/// Participant events are absolute statements about the row with that id
/// (upsert or remove); bid inserts are append-only log entries.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ParticipantInserted(Participant),
    ParticipantUpdated(Participant),
    ParticipantDeleted { id: String },
    BidInserted(Bid),
}

/// Connectivity of the realtime channel, as mirrored into the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No channel established (initial state, or the transport dropped).
    #[default]
    Disconnected,
    /// Transport open, channel join in flight.
    Connecting,
    /// Channel joined; row changes are flowing.
    Subscribed,
}

impl ConnectionStatus {
    /// Short label for the status bar.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "offline",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Subscribed => "live",
        }
    }
}
