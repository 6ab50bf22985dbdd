//! Input processing layer: key mapping and numeric prefix accumulator.
//!
//! Pure logic, no I/O. All functions are deterministic and testable.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

const MAX_COUNT: u32 = 99_999;

/// Accumulated numeric prefix for less-style commands.
///
/// Users type digits then a command character: `5j` scrolls 5 steps down,
/// `12g` jumps to page 12.
pub(super) struct InputAccumulator {
    count: Option<u32>,
}

impl InputAccumulator {
    pub(super) fn new() -> Self {
        Self { count: None }
    }

    /// Feed a digit (0..=9). Digits that would overflow are ignored.
    fn push_digit(&mut self, d: u32) {
        let new = self.count.unwrap_or(0).saturating_mul(10).saturating_add(d);
        if new <= MAX_COUNT {
            self.count = Some(new);
        }
    }

    /// Take the accumulated count, resetting to None.
    fn take(&mut self) -> Option<u32> {
        self.count.take()
    }

    pub(super) fn reset(&mut self) {
        self.count = None;
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.count.is_some()
    }
}

/// Actions produced by key input processing.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Action {
    Quit,
    ScrollDown(u32),
    ScrollUp(u32),
    Reload,
    FirstPage,
    LastPage,
    /// 1-based page number.
    GotoPage(u32),
    CancelInput,
    /// A digit was accumulated.
    Digit,
}

/// Map a key event to an `Action`, consuming/updating the accumulator as needed.
///
/// Returns `None` for unknown keys and key releases.
pub(super) fn map_key_event(key: KeyEvent, acc: &mut InputAccumulator) -> Option<Action> {
    let KeyEvent { code, modifiers, kind, .. } = key;
    if kind == KeyEventKind::Release {
        return None;
    }

    match (code, modifiers) {
        (KeyCode::Char('q'), _) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Action::Quit),

        (KeyCode::Esc, _) => {
            acc.reset();
            Some(Action::CancelInput)
        }

        (KeyCode::Char(c @ '0'..='9'), KeyModifiers::NONE) => {
            acc.push_digit(c as u32 - '0' as u32);
            Some(Action::Digit)
        }

        (KeyCode::Char('j'), _) | (KeyCode::Down, _) => {
            Some(Action::ScrollDown(acc.take().unwrap_or(1)))
        }
        (KeyCode::Char('k'), _) | (KeyCode::Up, _) => {
            Some(Action::ScrollUp(acc.take().unwrap_or(1)))
        }

        (KeyCode::Char('r'), _) => {
            acc.reset();
            Some(Action::Reload)
        }

        (KeyCode::Char('g'), _) => match acc.take() {
            None => Some(Action::FirstPage),
            Some(n) => Some(Action::GotoPage(n)),
        },
        (KeyCode::Char('G'), _) => match acc.take() {
            None => Some(Action::LastPage),
            Some(n) => Some(Action::GotoPage(n)),
        },

        _ => None,
    }
}
