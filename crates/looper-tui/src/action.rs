//! Action enum — all user-initiated intents and internal events.

/// Unique identifier for a focusable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    LoopForm,
    HistoryPanel,
    HelpOverlay,
}

/// All actions that can flow through the system.
/// Components produce Actions; the App dispatches them.
#[derive(Debug, Clone)]
pub enum Action {
    // ── Loop control ─────────────────────────────────────────────────────────
    /// Form submit with the raw field values; the App validates (duration
    /// first, then URL) and either starts or restarts a loop.
    Submit { url: String, minutes: String },
    TogglePause,
    StopLoop,
    Volume(f32),

    // ── Form ─────────────────────────────────────────────────────────────────
    /// The URL field changed; triggers id extraction + title lookup.
    UrlChanged(String),

    // ── History ──────────────────────────────────────────────────────────────
    /// Replay a history entry: bump its play count and load it.
    ReplayRecord(String),
    ToggleFavorite(String),
    DeleteRecord(String),
    /// Restore every deletion still inside its undo window.
    UndoDeletes,
    CycleSort,
    RefreshHistory,

    // ── Navigation ───────────────────────────────────────────────────────────
    FocusNext,
    FocusPrev,

    // ── UI toggles ───────────────────────────────────────────────────────────
    ToggleHelp,
    CopyToClipboard(String),

    // ── System ───────────────────────────────────────────────────────────────
    Quit,
    Resize(u16, u16),
}
