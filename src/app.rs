// Application state and orchestration logic.
//
// The central event loop that coordinates realtime change events, results of
// spawned remote calls, and user commands from the TUI. The loop is the only
// writer to the projection store — the single-writer discipline that keeps a
// remote upsert and a local optimistic rollback from racing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::protocol::{BidRow, LeaderboardRow, TaskOutcome, UiUpdate, UserCommand, ViewSnapshot};
use crate::realtime::RealtimeEvent;
use crate::rpc::RpcClient;
use crate::session::error::SessionError;
use crate::session::model::{ChangeEvent, ConnectionStatus};
use crate::session::store::SessionStore;
use crate::session::validate::{
    parse_custom_amount, validate_bid_amount, validate_display_name, validate_mobile_number,
};

/// How many observed bids the view keeps around.
const RECENT_BIDS_SHOWN: usize = 20;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// One bid awaiting its backend outcome. Only one may exist at a time for the
/// local participant; a second attempt while this is set is rejected, which
/// removes the double-count ambiguity of overlapping own-bids entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBid {
    pub participant_id: String,
    pub delta: f64,
    /// Ticket issued when the bid was spawned. An outcome whose ticket no
    /// longer matches (the pending bid was cleared by a snapshot reload) is
    /// discarded instead of rolled back.
    pub ticket: u64,
}

/// The complete application state.
pub struct AppState {
    pub config: Config,
    pub store: SessionStore,
    pub db: Database,
    pub rpc: Arc<RpcClient>,
    /// Normalized code of the session this client is viewing.
    pub session_code: String,
    /// Stable identifier for this installation; keys our participant row.
    pub device_id: String,

    pub pending_bid: Option<PendingBid>,
    /// Tickets for pending bids, monotonically increasing.
    bid_ticket: u64,
    pub join_in_flight: bool,

    /// Generation of the latest snapshot fetch. Outcomes from older fetches
    /// are stale and discarded.
    snapshot_generation: u64,
    snapshot_in_flight: bool,
    /// A refresh was requested while one was already in flight; run another
    /// when the current one lands (coalesces bid-triggered refreshes).
    refresh_queued: bool,

    /// Sender that spawned tasks use to report their results back into the
    /// event loop.
    pub outcome_tx: mpsc::Sender<TaskOutcome>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        rpc: RpcClient,
        session_code: String,
        device_id: String,
        outcome_tx: mpsc::Sender<TaskOutcome>,
    ) -> Self {
        AppState {
            config,
            store: SessionStore::new(),
            db,
            rpc: Arc::new(rpc),
            session_code,
            device_id,
            pending_bid: None,
            bid_ticket: 0,
            join_in_flight: false,
            snapshot_generation: 0,
            snapshot_in_flight: false,
            refresh_queued: false,
            outcome_tx,
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot loading
    // -----------------------------------------------------------------------

    /// Kick off a snapshot fetch in a spawned task. While one is already in
    /// flight the request is queued instead, so a burst of bid events
    /// produces one follow-up fetch rather than one per event.
    pub fn spawn_snapshot_refresh(&mut self) {
        if self.snapshot_in_flight {
            self.refresh_queued = true;
            return;
        }
        self.snapshot_in_flight = true;
        self.snapshot_generation += 1;

        let generation = self.snapshot_generation;
        let rpc = Arc::clone(&self.rpc);
        let code = self.session_code.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = rpc.get_session_details(&code).await;
            let _ = tx.send(TaskOutcome::Snapshot { generation, result }).await;
        });
    }

    // -----------------------------------------------------------------------
    // Optimistic mutations
    // -----------------------------------------------------------------------

    /// Validate and launch a join. No optimistic echo: the server owns the
    /// presence decision, and the event stream delivers the resulting upsert.
    fn start_join(&mut self, display_name: &str, mobile_number: &str) -> Result<(), SessionError> {
        if self.join_in_flight {
            return Err(SessionError::validation("join", "a join is already in progress"));
        }
        let name = validate_display_name(display_name)?;
        let mobile = validate_mobile_number(mobile_number)?;

        self.join_in_flight = true;
        let rpc = Arc::clone(&self.rpc);
        let code = self.session_code.clone();
        let device_id = self.device_id.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = rpc.join_session(&code, &name, &device_id, &mobile).await;
            let _ = tx
                .send(TaskOutcome::Join {
                    generation: 0,
                    display_name: name,
                    result,
                })
                .await;
        });
        Ok(())
    }

    /// Validate a bid, apply it optimistically, and launch the remote call.
    ///
    /// Phase 1 of the three-phase protocol happens here synchronously (the
    /// loop is the only store writer, so the UI reflects the bid instantly);
    /// phases 2 and 3 complete in `handle_outcome`.
    fn start_bid(&mut self, amount: f64) -> Result<(), SessionError> {
        if self.pending_bid.is_some() {
            return Err(SessionError::validation(
                "amount",
                "previous bid still confirming, hold on",
            ));
        }
        validate_bid_amount(amount, self.config.bid_limits())?;

        let participant_id = self
            .store
            .participant_by_device(&self.device_id)
            .map(|p| p.id.clone())
            .ok_or_else(|| SessionError::validation("device", "join the session before bidding"))?;

        self.store.adjust_amount(&participant_id, amount);
        self.bid_ticket += 1;
        let ticket = self.bid_ticket;
        self.pending_bid = Some(PendingBid {
            participant_id: participant_id.clone(),
            delta: amount,
            ticket,
        });

        let rpc = Arc::clone(&self.rpc);
        let code = self.session_code.clone();
        let device_id = self.device_id.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = rpc.place_bid(&code, &device_id, amount).await;
            let _ = tx
                .send(TaskOutcome::Bid {
                    generation: ticket,
                    participant_id,
                    delta: amount,
                    result,
                })
                .await;
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    /// Apply one realtime event to the projection.
    pub async fn handle_realtime_event(&mut self, event: RealtimeEvent, ui_tx: &mpsc::Sender<UiUpdate>) {
        match event {
            RealtimeEvent::Status(status) => {
                self.store.set_connection(status);
                let _ = ui_tx.send(UiUpdate::Connection(status)).await;
                // A downgraded indicator is not an error state; the UI keeps
                // working on the last known projection.
                if status == ConnectionStatus::Subscribed {
                    self.push_view(ui_tx).await;
                }
            }
            RealtimeEvent::Resynced => {
                info!("realtime channel re-joined, refreshing snapshot");
                self.spawn_snapshot_refresh();
            }
            RealtimeEvent::Change(change) => {
                if let ChangeEvent::BidInserted(ref bid) = change {
                    if let Err(e) = self.db.record_bid(bid) {
                        warn!("failed to persist observed bid: {e}");
                    }
                    // Belt and braces against a missed participant update for
                    // the same transaction: schedule one coalesced refresh.
                    self.spawn_snapshot_refresh();
                }
                self.store.apply(change);
                self.push_view(ui_tx).await;
            }
        }
    }

    /// Handle a command from the TUI.
    pub async fn handle_user_command(&mut self, cmd: UserCommand, ui_tx: &mpsc::Sender<UiUpdate>) {
        match cmd {
            UserCommand::Join {
                display_name,
                mobile_number,
            } => {
                if let Err(e) = self.start_join(&display_name, &mobile_number) {
                    let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                }
            }
            UserCommand::PlaceBid { amount } => {
                match self.start_bid(amount) {
                    Ok(()) => self.push_view(ui_tx).await,
                    Err(e) => {
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                    }
                }
            }
            UserCommand::CustomBid { raw } => {
                let amount = match parse_custom_amount(&raw, self.config.bid_limits()) {
                    Ok(a) => a,
                    Err(e) => {
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                        return;
                    }
                };
                match self.start_bid(amount) {
                    Ok(()) => self.push_view(ui_tx).await,
                    Err(e) => {
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                    }
                }
            }
            UserCommand::Refresh => self.spawn_snapshot_refresh(),
            UserCommand::Quit => {
                // Handled in the main loop.
            }
        }
    }

    /// Handle the result of a spawned remote call.
    pub async fn handle_outcome(&mut self, outcome: TaskOutcome, ui_tx: &mpsc::Sender<UiUpdate>) {
        match outcome {
            TaskOutcome::Snapshot { generation, result } => {
                if generation != self.snapshot_generation {
                    debug!(
                        generation,
                        current = self.snapshot_generation,
                        "discarding stale snapshot outcome"
                    );
                    return;
                }
                self.snapshot_in_flight = false;

                match result {
                    Ok(snapshot) => {
                        self.store.replace_all(snapshot.session, snapshot.participants);
                        self.store.check_server_total(snapshot.total_amount);
                        // The snapshot is authoritative: any optimistic
                        // residue was just overwritten, so a late bid failure
                        // must not roll back on top of it.
                        self.pending_bid = None;
                        self.push_view(ui_tx).await;
                    }
                    Err(e @ SessionError::NotFound { .. }) => {
                        // The session is gone (owner deleted it, cascading
                        // its rows); the stored audit trail goes with it.
                        if let Some(session) = self.store.session() {
                            if let Err(db_err) = self.db.clear_session(&session.id) {
                                warn!("failed to clear stored bid log: {db_err}");
                            }
                        }
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                    }
                    Err(e) => {
                        warn!("snapshot fetch failed: {e}");
                        let _ = ui_tx
                            .send(UiUpdate::Error(format!("{e} (press r to retry)")))
                            .await;
                    }
                }

                if self.refresh_queued {
                    self.refresh_queued = false;
                    self.spawn_snapshot_refresh();
                }
            }
            TaskOutcome::Join {
                display_name,
                result,
                ..
            } => {
                self.join_in_flight = false;
                match result {
                    Ok(()) => {
                        info!("joined session as {display_name}");
                        if let Err(e) = self.db.set_display_name(&display_name) {
                            warn!("failed to remember display name: {e}");
                        }
                        let _ = ui_tx
                            .send(UiUpdate::Notice(format!("joined as {display_name}")))
                            .await;
                        // No local patch: the participant insert arrives over
                        // the event stream.
                    }
                    Err(e) => {
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                    }
                }
            }
            TaskOutcome::Bid {
                generation: ticket,
                participant_id,
                delta,
                result,
            } => {
                let matches_pending = self
                    .pending_bid
                    .as_ref()
                    .is_some_and(|p| p.ticket == ticket);
                if !matches_pending {
                    // The pending slot was cleared (snapshot reload) or this
                    // outcome is from a superseded attempt; server truth has
                    // already won, so neither confirm nor rollback applies.
                    debug!(ticket, "discarding stale bid outcome");
                    return;
                }
                self.pending_bid = None;

                match result {
                    Ok(()) => {
                        // Success needs no patch: the authoritative upsert is
                        // on its way over the event stream.
                        debug!(%participant_id, delta, "bid accepted");
                        self.push_view(ui_tx).await;
                    }
                    Err(e) => {
                        // Deterministic rollback of exactly the optimistic
                        // delta.
                        self.store.adjust_amount(&participant_id, -delta);
                        warn!("bid failed, rolled back {delta}: {e}");
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                        self.push_view(ui_tx).await;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // View building
    // -----------------------------------------------------------------------

    /// Capture the projection into a render-ready snapshot.
    pub fn build_view(&self) -> ViewSnapshot {
        let my_row = self.store.participant_by_device(&self.device_id);
        let my_id = my_row.map(|p| p.id.clone());
        let leader_id = self.store.highest_bidder().map(|p| p.id.clone());

        let rows = self
            .store
            .ranked()
            .into_iter()
            .enumerate()
            .map(|(idx, p)| LeaderboardRow {
                rank: idx + 1,
                display_name: p.display_name.clone(),
                amount: p.amount,
                is_self: Some(&p.id) == my_id.as_ref(),
                is_leader: Some(&p.id) == leader_id.as_ref(),
            })
            .collect();

        let recent_bids = self
            .store
            .bids()
            .iter()
            .take(RECENT_BIDS_SHOWN)
            .map(|b| BidRow {
                display_name: self
                    .store
                    .participant(&b.participant_id)
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| "(left)".to_string()),
                delta: b.delta,
            })
            .collect();

        ViewSnapshot {
            session_code: self.session_code.clone(),
            session_title: self
                .store
                .session()
                .map(|s| s.title.clone())
                .unwrap_or_default(),
            connection: self.store.connection(),
            total_amount: self.store.total_amount(),
            participant_count: self.store.participant_count(),
            rows,
            recent_bids,
            joined_as: my_row.map(|p| p.display_name.clone()),
            bid_pending: self.pending_bid.is_some(),
            presets: self.config.bidding.presets.clone(),
        }
    }

    async fn push_view(&self, ui_tx: &mpsc::Sender<UiUpdate>) {
        let _ = ui_tx
            .send(UiUpdate::Snapshot(Box::new(self.build_view())))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on three channels using `tokio::select!`:
/// 1. Realtime events from the subscriber
/// 2. Outcomes of spawned remote calls
/// 3. User commands from the TUI
///
/// Pushes UI updates through `ui_tx` for the TUI render loop.
pub async fn run(
    mut rt_rx: mpsc::Receiver<RealtimeEvent>,
    mut outcome_rx: mpsc::Receiver<TaskOutcome>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("application event loop started");

    // Initial snapshot load for the configured session.
    state.spawn_snapshot_refresh();

    loop {
        tokio::select! {
            rt_event = rt_rx.recv() => {
                match rt_event {
                    Some(event) => state.handle_realtime_event(event, &ui_tx).await,
                    None => {
                        info!("realtime channel closed, shutting down");
                        break;
                    }
                }
            }

            outcome = outcome_rx.recv() => {
                match outcome {
                    Some(outcome) => state.handle_outcome(outcome, &ui_tx).await,
                    None => {
                        info!("outcome channel closed, shutting down");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => state.handle_user_command(cmd, &ui_tx).await,
                    None => {
                        info!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    info!("application event loop exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
