// TUI session view: layout, input handling, and widget rendering.
//
// The TUI owns a `ViewState` that mirrors the app loop's view snapshots. The
// app pushes `UiUpdate` messages over an mpsc channel; the TUI applies them
// to `ViewState` and re-renders at ~30 fps.

pub mod input;
pub mod layout;
pub mod widgets;

use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures_util::StreamExt;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use tokio::sync::mpsc;

use crate::protocol::{UiUpdate, UserCommand, ViewSnapshot};
use crate::tui::widgets::leaderboard::format_amount;

use layout::{build_layout, AppLayout};

// ---------------------------------------------------------------------------
// ViewState
// ---------------------------------------------------------------------------

/// What the input line is currently collecting.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum InputMode {
    #[default]
    Normal,
    /// Typing a custom bid amount.
    CustomAmount { buffer: String },
    /// Typing a display name for the join flow.
    JoinName { buffer: String },
    /// Typing the mobile number, name already collected.
    JoinMobile {
        display_name: String,
        buffer: String,
    },
}

/// TUI-local state that mirrors the application state for rendering.
#[derive(Debug, Default)]
pub struct ViewState {
    /// Latest full view snapshot from the app loop.
    pub view: ViewSnapshot,
    /// Transient informational message.
    pub notice: Option<String>,
    /// Last user-visible error; cleared on the next keypress.
    pub error: Option<String>,
    pub input: InputMode,
    /// Display name remembered from a previous session, used to prefill the
    /// join prompt.
    pub saved_name: Option<String>,
}

/// Apply a single UiUpdate to the ViewState.
fn apply_ui_update(state: &mut ViewState, update: UiUpdate) {
    match update {
        UiUpdate::Snapshot(view) => {
            state.view = *view;
        }
        UiUpdate::Connection(status) => {
            state.view.connection = status;
        }
        UiUpdate::Notice(text) => {
            state.notice = Some(text);
        }
        UiUpdate::Error(text) => {
            state.error = Some(text);
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the complete session view.
fn render_frame(frame: &mut Frame, state: &ViewState) {
    let layout = build_layout(frame.area());

    widgets::status_bar::render(frame, layout.status_bar, state);
    render_header(frame, &layout, state);
    widgets::leaderboard::render(frame, layout.leaderboard, state);
    widgets::bids::render(frame, layout.bids, state);
    render_input_line(frame, &layout, state);
    render_help_bar(frame, &layout);
}

fn render_header(frame: &mut Frame, layout: &AppLayout, state: &ViewState) {
    let title = if state.view.session_title.is_empty() {
        "loading session...".to_string()
    } else {
        state.view.session_title.clone()
    };
    let content = format!(
        "{title}  [{}]   total: {}",
        state.view.session_code,
        format_amount(state.view.total_amount),
    );
    let paragraph = Paragraph::new(content)
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));
    frame.render_widget(paragraph, layout.header);
}

fn render_input_line(frame: &mut Frame, layout: &AppLayout, state: &ViewState) {
    let (title, content, color) = match &state.input {
        InputMode::Normal => {
            if let Some(error) = &state.error {
                ("error", error.clone(), Color::Red)
            } else if let Some(notice) = &state.notice {
                ("info", notice.clone(), Color::Green)
            } else {
                ("", String::new(), Color::Gray)
            }
        }
        InputMode::CustomAmount { buffer } => {
            ("custom amount", format!("{buffer}_"), Color::Cyan)
        }
        InputMode::JoinName { buffer } => ("your name", format!("{buffer}_"), Color::Cyan),
        InputMode::JoinMobile { buffer, .. } => {
            ("mobile number", format!("{buffer}_"), Color::Cyan)
        }
    };

    let paragraph = Paragraph::new(content)
        .style(Style::default().fg(color))
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(paragraph, layout.input_line);
}

fn render_help_bar(frame: &mut Frame, layout: &AppLayout) {
    let text = " q:Quit | j:Join | 1-5:Quick bid | c:Custom bid | r:Refresh | Esc:Cancel";
    let paragraph = Paragraph::new(Line::from(vec![Span::styled(
        text,
        Style::default().fg(Color::White).add_modifier(Modifier::DIM),
    )]))
    .style(Style::default().bg(Color::DarkGray));
    frame.render_widget(paragraph, layout.help_bar);
}

// ---------------------------------------------------------------------------
// Main TUI loop
// ---------------------------------------------------------------------------

/// Run the TUI event loop.
///
/// 1. Initializes the terminal (raw mode, alternate screen).
/// 2. Installs a panic hook to restore the terminal on crash.
/// 3. Runs an async select loop: UI updates, keyboard input, render ticks.
/// 4. Restores the terminal on clean exit.
pub async fn run(
    mut ui_rx: mpsc::Receiver<UiUpdate>,
    cmd_tx: mpsc::Sender<UserCommand>,
    saved_name: Option<String>,
) -> anyhow::Result<()> {
    let mut terminal = ratatui::init();

    // Restore the terminal even when something panics mid-draw.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = ratatui::restore();
        original_hook(panic_info);
    }));

    let mut view_state = ViewState {
        saved_name,
        ..ViewState::default()
    };

    let mut event_stream = EventStream::new();

    let mut render_tick = tokio::time::interval(Duration::from_millis(33));
    render_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            update = ui_rx.recv() => {
                match update {
                    Some(ui_update) => apply_ui_update(&mut view_state, ui_update),
                    None => break, // app is shutting down
                }
            }

            maybe_event = event_stream.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key_event))) => {
                        if let Some(cmd) = input::handle_key(key_event, &mut view_state) {
                            let quitting = cmd == UserCommand::Quit;
                            let _ = cmd_tx.send(cmd).await;
                            if quitting {
                                break;
                            }
                        }
                    }
                    Some(Ok(_)) => {
                        // Mouse and resize events need no handling; the next
                        // render tick redraws with the new area.
                    }
                    Some(Err(_)) | None => break,
                }
            }

            _ = render_tick.tick() => {
                terminal.draw(|frame| render_frame(frame, &view_state))?;
            }
        }
    }

    ratatui::restore();

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
