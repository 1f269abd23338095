//! AppState — shared read-only data passed to all components during render/event.
//!
//! Components read this for loop and history state, but never mutate it.
//! The App event-loop is the only thing that writes to AppState.

use std::time::Instant;

use looper_proto::player::LoopSnapshot;

use crate::history::HistoryCoordinator;
use crate::widgets::status_bar::InputMode;

/// The full shared state of the application.
/// Components read this; only the App event-loop writes to it.
pub struct AppState {
    // ── Loop session ────────────────────────────────────────────────────────
    /// Latest snapshot broadcast by the loop core.
    pub snapshot: LoopSnapshot,

    // ── Form ────────────────────────────────────────────────────────────────
    /// Title fetched for the id currently in the URL field.
    pub video_title: Option<String>,
    /// Inline validation message shown under the form.
    pub validation_error: Option<String>,
    /// When the validation message auto-clears.
    pub validation_expires: Option<Instant>,

    // ── History ─────────────────────────────────────────────────────────────
    pub history: HistoryCoordinator,

    // ── UI mode ─────────────────────────────────────────────────────────────
    pub input_mode: InputMode,

    // ── Session ─────────────────────────────────────────────────────────────
    /// Log messages surfaced from the loop core (WARN/ERROR only).
    pub logs: Vec<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            snapshot: LoopSnapshot::default(),
            video_title: None,
            validation_error: None,
            validation_expires: None,
            history: HistoryCoordinator::new(),
            input_mode: InputMode::Normal,
            logs: Vec::new(),
        }
    }

    /// Convenience: id of the currently loaded video.
    pub fn loaded_video_id(&self) -> Option<&str> {
        self.snapshot.video_id.as_deref()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
