//! Shared types for the player core — commands in, decoded events out.
//!
//! The embedded player (mpv over JSON IPC) reports raw property-change and
//! end-of-file events.  The driver decodes those exactly once into
//! [`PlayerEvent`]; everything past the driver boundary reasons about named
//! variants, never raw payloads.  Raw events that don't map to a variant are
//! dropped at the boundary.

use std::time::Instant;

/// Commands from the UI into the loop core.
#[derive(Debug, Clone)]
pub enum LoopCommand {
    /// Load a video and loop it until `target_minutes` of cumulative
    /// playback have elapsed.
    Load {
        video_id: String,
        title: String,
        target_minutes: u32,
    },
    /// Restart the currently loaded video from zero accumulated time
    /// (same-video resubmit) — seek + play, no reload.
    Replay { target_minutes: u32 },
    TogglePause,
    Stop,
    Volume { value: f32 },
}

/// Playback state as reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Paused,
}

/// A decoded player event.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The requested video finished loading and is ready for control.
    Ready,
    StateChange(PlayerState),
    /// Playback reached the end of the clip.
    ClipEnd,
    /// The player process or its IPC connection went away.
    Gone(String),
}

/// Health of the player process as observed by the loop core.
///
/// Transitions: Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlayerHealth {
    /// Player process does not exist yet (before first use).
    #[default]
    Absent,
    /// Process is spawning / socket not yet available.
    Starting,
    /// Socket connected, IPC responding normally.
    Running,
    /// Process exited or socket closed.
    Dead,
}

impl PlayerHealth {
    /// Short label for the status-bar badge (≤5 chars).
    pub fn badge_label(&self) -> Option<&str> {
        match self {
            PlayerHealth::Absent => None,
            PlayerHealth::Starting => Some("INIT"),
            PlayerHealth::Running => None, // normal — no badge needed
            PlayerHealth::Dead => Some("DEAD"),
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, PlayerHealth::Dead)
    }
}

/// Point-in-time view of the loop session, broadcast to the UI after every
/// transition.  Elapsed time keeps advancing between broadcasts, so the
/// display derives it from `accumulated_ms` + the open segment's age rather
/// than from a frozen number.
#[derive(Debug, Clone, Default)]
pub struct LoopSnapshot {
    pub video_id: Option<String>,
    pub title: String,
    pub target_ms: u64,
    pub accumulated_ms: u64,
    /// When the currently playing segment opened; `None` while paused or idle.
    pub segment_started: Option<Instant>,
    pub paused: bool,
    pub active: bool,
    pub volume: f32,
    pub health: PlayerHealth,
}

impl LoopSnapshot {
    /// Elapsed looping time to display at `now`.  Held at `accumulated_ms`
    /// while no segment is open.
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        match self.segment_started {
            Some(start) => self.accumulated_ms + now.duration_since(start).as_millis() as u64,
            None => self.accumulated_ms,
        }
    }
}

/// Format milliseconds as `m:ss` for the elapsed/target readout.
pub fn format_mmss(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}", minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0), "0:00");
        assert_eq!(format_mmss(61_000), "1:01");
        assert_eq!(format_mmss(600_000), "10:00");
        assert_eq!(format_mmss(599_999), "9:59");
    }

    #[test]
    fn test_snapshot_elapsed_open_segment() {
        let start = Instant::now();
        let snap = LoopSnapshot {
            accumulated_ms: 5_000,
            segment_started: Some(start),
            active: true,
            ..Default::default()
        };
        let elapsed = snap.elapsed_ms(start + Duration::from_secs(3));
        assert_eq!(elapsed, 8_000);
    }

    #[test]
    fn test_snapshot_elapsed_held_while_closed() {
        let snap = LoopSnapshot {
            accumulated_ms: 5_000,
            segment_started: None,
            paused: true,
            ..Default::default()
        };
        assert_eq!(snap.elapsed_ms(Instant::now()), 5_000);
    }
}
