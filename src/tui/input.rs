// Keyboard input handling and command dispatch.
//
// Translates crossterm key events into UserCommand messages for the app
// loop, or into local ViewState mutations (entering text, dismissing
// messages).

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::{InputMode, ViewState};
use crate::protocol::UserCommand;

/// Handle a keyboard event.
///
/// Returns `Some(UserCommand)` when the key press should be forwarded to the
/// app loop (bid, join, refresh, quit). Returns `None` when the key press was
/// handled locally by mutating `ViewState` (text entry, cancelling a prompt).
pub fn handle_key(key_event: KeyEvent, view_state: &mut ViewState) -> Option<UserCommand> {
    // Only process key press events. On Windows, crossterm emits both Press
    // and Release events for each physical keypress; ignoring non-Press
    // events prevents double-processing.
    if key_event.kind != KeyEventKind::Press {
        return None;
    }

    // Ctrl+C always quits immediately regardless of mode (escape hatch)
    if key_event.modifiers.contains(KeyModifiers::CONTROL) && key_event.code == KeyCode::Char('c')
    {
        return Some(UserCommand::Quit);
    }

    // Any keypress clears a lingering notice/error line.
    view_state.error = None;
    view_state.notice = None;

    match std::mem::replace(&mut view_state.input, InputMode::Normal) {
        InputMode::Normal => handle_normal_mode(key_event, view_state),
        InputMode::CustomAmount { buffer } => {
            handle_text_entry(key_event, view_state, buffer, TextTarget::CustomAmount)
        }
        InputMode::JoinName { buffer } => {
            handle_text_entry(key_event, view_state, buffer, TextTarget::JoinName)
        }
        InputMode::JoinMobile {
            display_name,
            buffer,
        } => handle_text_entry(
            key_event,
            view_state,
            buffer,
            TextTarget::JoinMobile { display_name },
        ),
    }
}

fn handle_normal_mode(key_event: KeyEvent, view_state: &mut ViewState) -> Option<UserCommand> {
    match key_event.code {
        KeyCode::Char('q') => Some(UserCommand::Quit),
        KeyCode::Char('r') => Some(UserCommand::Refresh),
        KeyCode::Char('j') => {
            let prefill = view_state.saved_name.clone().unwrap_or_default();
            view_state.input = InputMode::JoinName { buffer: prefill };
            None
        }
        KeyCode::Char('c') => {
            view_state.input = InputMode::CustomAmount {
                buffer: String::new(),
            };
            None
        }
        // Preset bid keys 1..=N.
        KeyCode::Char(digit @ '1'..='9') => {
            let idx = (digit as usize) - ('1' as usize);
            view_state
                .view
                .presets
                .get(idx)
                .map(|amount| UserCommand::PlaceBid { amount: *amount })
        }
        _ => None,
    }
}

/// Which prompt the text buffer belongs to.
enum TextTarget {
    CustomAmount,
    JoinName,
    JoinMobile { display_name: String },
}

fn handle_text_entry(
    key_event: KeyEvent,
    view_state: &mut ViewState,
    mut buffer: String,
    target: TextTarget,
) -> Option<UserCommand> {
    match key_event.code {
        KeyCode::Esc => {
            // Cancel the whole prompt; input stays Normal.
            None
        }
        KeyCode::Backspace => {
            buffer.pop();
            view_state.input = restore_mode(buffer, target);
            None
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            view_state.input = restore_mode(buffer, target);
            None
        }
        KeyCode::Enter => match target {
            TextTarget::CustomAmount => Some(UserCommand::CustomBid { raw: buffer }),
            TextTarget::JoinName => {
                // Advance to the mobile-number prompt.
                view_state.input = InputMode::JoinMobile {
                    display_name: buffer,
                    buffer: String::new(),
                };
                None
            }
            TextTarget::JoinMobile { display_name } => Some(UserCommand::Join {
                display_name,
                mobile_number: buffer,
            }),
        },
        _ => {
            view_state.input = restore_mode(buffer, target);
            None
        }
    }
}

fn restore_mode(buffer: String, target: TextTarget) -> InputMode {
    match target {
        TextTarget::CustomAmount => InputMode::CustomAmount { buffer },
        TextTarget::JoinName => InputMode::JoinName { buffer },
        TextTarget::JoinMobile { display_name } => InputMode::JoinMobile {
            display_name,
            buffer,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
