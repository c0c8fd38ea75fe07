// Client-side projection of one session: participants, bid log, running total.

use tracing::{debug, warn};

use super::model::{Bid, ChangeEvent, ConnectionStatus, Participant, Session};

/// Tolerance used when comparing monetary totals accumulated in floating point.
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// The client's locally held, eventually-consistent view of session state.
///
/// Fed from three directions: the snapshot loader (`replace_all`), the
/// realtime subscriber (`apply`), and the optimistic bid path
/// (`adjust_amount`). All three funnel through the same upsert/remove
/// operations so the running total is maintained in exactly one place.
///
/// The store never fails: operations on well-formed rows always succeed, and
/// everything fallible (network, validation) lives at the edges. There is no
/// interior locking — the store expects a single writer, which in this crate
/// is the app event loop.
#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<Session>,
    /// Participants in join order. Order is load-bearing: ranking ties are
    /// broken by position in this list.
    participants: Vec<Participant>,
    /// Observed bid log, newest first.
    bids: Vec<Bid>,
    /// Sum of all participants' amounts, maintained incrementally so each
    /// event costs O(1) instead of a full rescan.
    total_amount: f64,
    connection: ConnectionStatus,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation entry points
    // -----------------------------------------------------------------------

    /// Replace the session and the entire participant collection with a fresh
    /// snapshot. This is a full overwrite, never a merge: any optimistic or
    /// event-applied residue is discarded, which is what bounds drift from a
    /// noisy realtime feed.
    ///
    /// The bid log is left alone — snapshots don't carry bids, and the log is
    /// an append-only audit trail rather than part of the replaceable
    /// projection.
    pub fn replace_all(&mut self, session: Session, participants: Vec<Participant>) {
        self.total_amount = participants.iter().map(|p| p.amount).sum();
        self.session = Some(session);
        self.participants = participants;
    }

    /// Insert or update a participant row by id.
    ///
    /// An existing row is replaced in place (its rank tie-break position is
    /// preserved) and the total is adjusted by the amount difference; an
    /// unknown id is appended. Applying the same event twice is a no-op the
    /// second time, which makes at-least-once delivery safe.
    pub fn upsert_participant(&mut self, row: Participant) {
        match self.participants.iter_mut().find(|p| p.id == row.id) {
            Some(existing) => {
                self.total_amount += row.amount - existing.amount;
                *existing = row;
            }
            None => {
                self.total_amount += row.amount;
                self.participants.push(row);
            }
        }
    }

    /// Remove a participant by id, subtracting its amount from the total.
    /// Unknown ids are ignored (the row may have been removed by an earlier
    /// duplicate delivery).
    pub fn remove_participant(&mut self, id: &str) {
        if let Some(idx) = self.participants.iter().position(|p| p.id == id) {
            let removed = self.participants.remove(idx);
            self.total_amount -= removed.amount;
        }
    }

    /// Append a bid to the observed log. Amounts are NOT applied here: the
    /// corresponding participant update carries the new absolute amount, and
    /// applying both would double-count (they originate from one server
    /// transaction but arrive as separate messages).
    ///
    /// Duplicate deliveries of the same bid id are dropped.
    pub fn apply_bid(&mut self, bid: Bid) {
        if self.bids.iter().any(|b| b.id == bid.id) {
            debug!(bid_id = %bid.id, "duplicate bid event dropped");
            return;
        }
        self.bids.insert(0, bid);
    }

    /// Shift a participant's amount by `delta`, routed through the upsert path
    /// so the running total stays consistent. Used by the optimistic bid
    /// layer for both the apply (+delta) and the rollback (-delta).
    ///
    /// Returns false when no participant with that id exists, in which case
    /// nothing changes.
    pub fn adjust_amount(&mut self, participant_id: &str, delta: f64) -> bool {
        let Some(row) = self
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
        else {
            return false;
        };
        let mut updated = row;
        updated.amount += delta;
        self.upsert_participant(updated);
        true
    }

    /// Apply one decoded realtime event.
    pub fn apply(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::ParticipantInserted(row) | ChangeEvent::ParticipantUpdated(row) => {
                self.upsert_participant(row)
            }
            ChangeEvent::ParticipantDeleted { id } => self.remove_participant(&id),
            ChangeEvent::BidInserted(bid) => self.apply_bid(bid),
        }
    }

    pub fn set_connection(&mut self, status: ConnectionStatus) {
        self.connection = status;
    }

    /// Compare the server-reported aggregate against the locally maintained
    /// one after a snapshot load. Disagreement means the snapshot itself is
    /// internally inconsistent; the local sum wins, but it's worth a warning.
    pub fn check_server_total(&self, reported: f64) {
        if (reported - self.total_amount).abs() > AMOUNT_EPSILON {
            warn!(
                reported,
                local = self.total_amount,
                "server-reported total disagrees with participant sum"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// The local user's own row, located by device id.
    pub fn participant_by_device(&self, device_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.device_id.as_deref() == Some(device_id))
    }

    /// Leaderboard order: descending by amount, ties broken by join order
    /// (earlier joiner ranks higher). Deterministic for identical input —
    /// the sort is stable and the underlying list preserves join order.
    pub fn ranked(&self) -> Vec<&Participant> {
        let mut ranked: Vec<&Participant> = self.participants.iter().collect();
        ranked.sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// The rank-1 participant, but only once somebody has actually bid.
    pub fn highest_bidder(&self) -> Option<&Participant> {
        self.ranked().first().copied().filter(|p| p.amount > 0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
