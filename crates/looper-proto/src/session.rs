//! LoopSession — segment-based accounting for one loop session.
//!
//! A session tracks how much of the requested loop duration has actually
//! been watched.  Playback is split into *segments*: one uninterrupted span
//! between a play-start and the next pause or clip-end.  Time is committed
//! into `accumulated_ms` only when a segment closes, so pauses never count
//! toward the target and a clip-end restart never resets progress — only an
//! explicit new submission does.
//!
//! All transitions take `now: Instant` so the machine can be driven in tests
//! without sleeping.  The caller (the loop core) owns the session and turns
//! [`ClipEndVerdict`] into player commands.

use std::time::Instant;

use crate::player::PlayerState;

pub const MS_PER_MINUTE: u64 = 60_000;

/// What to do after a clip-end closed its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipEndVerdict {
    /// Total watched time is still short of the target: seek to the start
    /// and keep playing.  The accumulator is NOT reset.
    Continue,
    /// Target reached — the session is over until the next load.
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct LoopSession {
    target_ms: u64,
    accumulated_ms: u64,
    segment_start: Option<Instant>,
    paused: bool,
    active: bool,
}

impl LoopSession {
    /// Begin a fresh session for a newly loaded video.  The session stays
    /// inactive until the player reports ready.
    pub fn load(target_minutes: u32) -> Self {
        Self {
            target_ms: u64::from(target_minutes) * MS_PER_MINUTE,
            accumulated_ms: 0,
            segment_start: None,
            paused: false,
            active: false,
        }
    }

    /// Player finished loading: open the first segment and activate.
    pub fn player_ready(&mut self, now: Instant) {
        self.segment_start = Some(now);
        self.paused = false;
        self.active = true;
    }

    /// Playback state report from the player.
    ///
    /// Entering `Paused` flushes the open segment into the accumulator.
    /// Entering `Playing` opens a segment only when none is open — a
    /// duplicate "playing" report must not re-base an open segment, or the
    /// time since its start would be silently lost.
    pub fn state_change(&mut self, state: PlayerState, now: Instant) {
        match state {
            PlayerState::Paused => {
                if let Some(start) = self.segment_start.take() {
                    self.accumulated_ms += now.duration_since(start).as_millis() as u64;
                }
                self.paused = true;
            }
            PlayerState::Playing => {
                if self.segment_start.is_none() {
                    self.segment_start = Some(now);
                }
                self.paused = false;
            }
        }
    }

    /// The clip played to its end.  Returns `None` when no segment is open
    /// (e.g. a double-fired end event) — the event is ignored.
    ///
    /// Otherwise the segment is committed and the verdict says whether the
    /// caller should seek-and-play (Continue) or let the session rest
    /// (Finished).
    pub fn clip_end(&mut self, now: Instant) -> Option<ClipEndVerdict> {
        let start = self.segment_start.take()?;
        let session_ms = now.duration_since(start).as_millis() as u64;
        let total_ms = self.accumulated_ms + session_ms;
        self.accumulated_ms = total_ms;

        if total_ms < self.target_ms {
            Some(ClipEndVerdict::Continue)
        } else {
            self.active = false;
            Some(ClipEndVerdict::Finished)
        }
    }

    /// Same-video resubmit: restart accounting from zero without reloading
    /// the player.  The caller seeks to the start and plays.
    pub fn restart(&mut self, target_minutes: u32, now: Instant) {
        self.target_ms = u64::from(target_minutes) * MS_PER_MINUTE;
        self.accumulated_ms = 0;
        self.segment_start = Some(now);
        self.paused = false;
        self.active = true;
    }

    /// Explicit stop: close any open segment and deactivate.
    pub fn stop(&mut self, now: Instant) {
        if let Some(start) = self.segment_start.take() {
            self.accumulated_ms += now.duration_since(start).as_millis() as u64;
        }
        self.paused = false;
        self.active = false;
    }

    /// Elapsed watched time at `now`.  Held at the accumulator while no
    /// segment is open (paused, idle, or between clip-end and restart).
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        match self.segment_start {
            Some(start) => self.accumulated_ms + now.duration_since(start).as_millis() as u64,
            None => self.accumulated_ms,
        }
    }

    pub fn target_ms(&self) -> u64 {
        self.target_ms
    }

    pub fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    pub fn segment_start(&self) -> Option<Instant> {
        self.segment_start
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn test_load_derives_target_from_minutes() {
        let s = LoopSession::load(2);
        assert_eq!(s.target_ms(), 120_000);
        assert!(!s.is_active());
        assert_eq!(s.accumulated_ms(), 0);
    }

    #[test]
    fn test_ready_opens_segment_and_activates() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        assert!(s.is_active());
        assert!(!s.is_paused());
        assert_eq!(s.elapsed_ms(at(base, 5)), 5_000);
    }

    #[test]
    fn test_pause_flushes_segment_and_holds_elapsed() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.state_change(PlayerState::Paused, at(base, 10));
        assert!(s.is_paused());
        assert_eq!(s.accumulated_ms(), 10_000);
        // Display does not advance while paused.
        assert_eq!(s.elapsed_ms(at(base, 60)), 10_000);
    }

    #[test]
    fn test_resume_preserves_accumulated() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.state_change(PlayerState::Paused, at(base, 10));
        s.state_change(PlayerState::Playing, at(base, 30));
        assert!(!s.is_paused());
        // 10s before the pause + 5s after the resume; the 20s gap is not counted.
        assert_eq!(s.elapsed_ms(at(base, 35)), 15_000);
    }

    #[test]
    fn test_duplicate_playing_does_not_rebase_segment() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.state_change(PlayerState::Playing, at(base, 8));
        // The segment opened at `base` must survive the duplicate report.
        assert_eq!(s.elapsed_ms(at(base, 10)), 10_000);
    }

    #[test]
    fn test_clip_end_loops_until_target_reached() {
        // 60s target, three 20s clips: restart after the first two ends,
        // finish exactly on the third (60_000 is not < 60_000).
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);

        assert_eq!(s.clip_end(at(base, 20)), Some(ClipEndVerdict::Continue));
        assert_eq!(s.accumulated_ms(), 20_000);

        s.state_change(PlayerState::Playing, at(base, 20));
        assert_eq!(s.clip_end(at(base, 40)), Some(ClipEndVerdict::Continue));
        assert_eq!(s.accumulated_ms(), 40_000);

        s.state_change(PlayerState::Playing, at(base, 40));
        assert_eq!(s.clip_end(at(base, 60)), Some(ClipEndVerdict::Finished));
        assert_eq!(s.accumulated_ms(), 60_000);
        assert!(!s.is_active());
    }

    #[test]
    fn test_clip_end_without_open_segment_is_ignored() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        assert_eq!(s.clip_end(at(base, 20)), Some(ClipEndVerdict::Continue));
        // Double fire: no segment is open, the event is dropped.
        assert_eq!(s.clip_end(at(base, 21)), None);
        assert_eq!(s.accumulated_ms(), 20_000);
    }

    #[test]
    fn test_pause_does_not_count_toward_target() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.state_change(PlayerState::Paused, at(base, 30));
        s.state_change(PlayerState::Playing, at(base, 100));
        // 30s watched + 20s watched = 50s < 60s even though 120s of wall
        // clock have passed.
        assert_eq!(s.clip_end(at(base, 120)), Some(ClipEndVerdict::Continue));
        assert_eq!(s.accumulated_ms(), 50_000);
    }

    #[test]
    fn test_restart_resets_accumulator_only() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.clip_end(at(base, 40));
        s.restart(2, at(base, 50));
        assert_eq!(s.accumulated_ms(), 0);
        assert_eq!(s.target_ms(), 120_000);
        assert!(s.is_active());
        assert_eq!(s.elapsed_ms(at(base, 55)), 5_000);
    }

    #[test]
    fn test_stop_closes_segment_and_deactivates() {
        let base = Instant::now();
        let mut s = LoopSession::load(1);
        s.player_ready(base);
        s.stop(at(base, 7));
        assert!(!s.is_active());
        assert_eq!(s.accumulated_ms(), 7_000);
        assert_eq!(s.elapsed_ms(at(base, 99)), 7_000);
    }
}
