//! Remote input events and the injection capability seam.
//!
//! Events travel from the viewing client to the streamed machine and
//! are replayed there through an [`InputInjector`] supplied by the host
//! process. Injection failures are unrecoverable for the session.

use serde::{Deserialize, Serialize};

use crate::error::MiraError;

// ── Pointer events ───────────────────────────────────────────────

/// Pointer button involved in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerButton {
    /// No button (plain movement).
    None,
    Left,
    Right,
    Middle,
}

/// What the pointer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerEventKind {
    Moved,
    Pressed,
    Released,
}

/// A pointer event at absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub x: i32,
    pub y: i32,
    pub kind: PointerEventKind,
    pub button: PointerButton,
}

impl PointerEvent {
    pub fn moved(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            kind: PointerEventKind::Moved,
            button: PointerButton::None,
        }
    }

    pub fn pressed(x: i32, y: i32, button: PointerButton) -> Self {
        Self {
            x,
            y,
            kind: PointerEventKind::Pressed,
            button,
        }
    }

    pub fn released(x: i32, y: i32, button: PointerButton) -> Self {
        Self {
            x,
            y,
            kind: PointerEventKind::Released,
            button,
        }
    }
}

// ── Key events ───────────────────────────────────────────────────

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    Pressed,
    Released,
}

/// A keyboard event carrying the platform-neutral key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub code: u32,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn pressed(code: u32) -> Self {
        Self {
            code,
            action: KeyAction::Pressed,
        }
    }

    pub fn released(code: u32) -> Self {
        Self {
            code,
            action: KeyAction::Released,
        }
    }
}

// ── InputInjector ────────────────────────────────────────────────

/// Replays remote input on the streamed machine.
pub trait InputInjector: Send + Sync {
    fn inject_pointer(&self, event: PointerEvent) -> Result<(), MiraError>;
    fn inject_key(&self, event: KeyEvent) -> Result<(), MiraError>;
}
