//! LoopCore — single-owner event loop for the loop session and the player.
//!
//! Runs embedded in the TUI process.  The UI sends `LoopCommand`s in; the
//! player driver forwards raw mpv events in; LoopCore owns the
//! `LoopSession` and the `PlayerHandle` exclusively and nothing else
//! touches them.  After each event that mutates state it broadcasts a
//! fresh `LoopSnapshot` to all listeners.
//!
//! The 10-second heartbeat only checks process liveness; everything else is
//! push-driven through observed properties (pause, eof-reached).

use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use looper_proto::config::Config;
use looper_proto::player::{LoopCommand, LoopSnapshot, PlayerEvent, PlayerHealth};
use looper_proto::session::{ClipEndVerdict, LoopSession};
use looper_proto::video::watch_url;

use crate::player::{decode_event, MpvDriver, PlayerHandle, RawEvent};
use crate::BroadcastMessage;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the LoopCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the UI.
    Command(LoopCommand),
    /// Raw player event (forwarded from the driver's reader task).
    Player(RawEvent),
    /// Heartbeat — check process liveness.
    HeartbeatTick,
}

// ── LoopCore ──────────────────────────────────────────────────────────────────

pub struct LoopCore {
    session: LoopSession,
    video_id: Option<String>,
    title: String,
    volume: f32,
    driver: MpvDriver,
    /// Live handle to the player IO tasks.  `None` until first use.
    handle: Option<PlayerHandle>,
    /// Channel to forward player events back into our own event loop.
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    health: PlayerHealth,
}

impl LoopCore {
    pub fn new(
        config: &Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let mut driver = MpvDriver::new();
        driver.last_volume = config.player.default_volume;

        Self {
            session: LoopSession::default(),
            video_id: None,
            title: String::new(),
            volume: config.player.default_volume,
            driver,
            handle: None,
            event_tx,
            broadcast_tx,
            health: PlayerHealth::Absent,
        }
    }

    /// Run the core event loop.  Returns when the event channel is closed
    /// (TUI exited).
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("LoopCore: starting event loop");

        // Kick off the heartbeat ticker — used for process liveness checks.
        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(CoreEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("LoopCore: event channel closed, shutting down");
                    break;
                }

                Some(CoreEvent::Command(cmd)) => {
                    info!("LoopCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("LoopCore: command error: {}", e);
                        self.push_log(format!("player command failed: {e}"));
                    }
                }

                Some(CoreEvent::Player(raw)) => {
                    if let Some(evt) = decode_event(&raw) {
                        self.handle_player_event(evt).await;
                    }
                }

                Some(CoreEvent::HeartbeatTick) => {
                    if self.handle.is_some() && !self.driver.process_alive() {
                        warn!("LoopCore: heartbeat: mpv process died");
                        self.handle = None;
                        self.on_player_gone("process died").await;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── player event handler ──────────────────────────────────────────────────

    async fn handle_player_event(&mut self, evt: PlayerEvent) {
        let now = Instant::now();
        match evt {
            PlayerEvent::Ready => {
                if self.video_id.is_none() {
                    return;
                }
                info!("LoopCore: player ready — starting loop session");
                self.session.player_ready(now);
                if let Some(handle) = self.handle.as_ref() {
                    if let Err(e) = handle.play().await {
                        warn!("LoopCore: play after ready failed: {}", e);
                    }
                }
                self.broadcast();
            }

            PlayerEvent::StateChange(state) => {
                // Stray property pushes arrive while idle and while the file
                // is still loading; accounting only runs on a live session.
                if !self.session.is_active() {
                    return;
                }
                self.session.state_change(state, now);
                self.broadcast();
            }

            PlayerEvent::ClipEnd => {
                match self.session.clip_end(now) {
                    None => {} // no open segment — double fire, ignored
                    Some(ClipEndVerdict::Continue) => {
                        info!(
                            "LoopCore: clip end at {}ms / {}ms — looping",
                            self.session.accumulated_ms(),
                            self.session.target_ms()
                        );
                        self.restart_clip(now).await;
                        self.broadcast();
                    }
                    Some(ClipEndVerdict::Finished) => {
                        info!(
                            "LoopCore: target reached ({}ms) — loop finished",
                            self.session.accumulated_ms()
                        );
                        self.push_log("loop target reached".to_string());
                        self.broadcast();
                    }
                }
            }

            PlayerEvent::Gone(reason) => {
                warn!("LoopCore: player gone: {}", reason);
                self.on_player_gone(&reason).await;
            }
        }
    }

    /// Seek to the start and resume.  The session's accumulator is left
    /// alone; the new segment opens immediately so a player that never
    /// flips its pause property can't stall the loop (a later duplicate
    /// "playing" report is a no-op).
    async fn restart_clip(&mut self, now: Instant) {
        if let Some(handle) = self.handle.as_ref() {
            if let Err(e) = handle.seek_to_start().await {
                warn!("LoopCore: seek to start failed: {}", e);
            }
            if let Err(e) = handle.play().await {
                warn!("LoopCore: play failed: {}", e);
            }
        }
        self.session
            .state_change(looper_proto::player::PlayerState::Playing, now);
    }

    async fn on_player_gone(&mut self, reason: &str) {
        self.session.stop(Instant::now());
        self.set_health(PlayerHealth::Dead);
        self.push_log(format!("player lost: {reason}"));
        self.broadcast();
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: LoopCommand) -> anyhow::Result<()> {
        match cmd {
            LoopCommand::Load {
                video_id,
                title,
                target_minutes,
            } => self.load(video_id, title, target_minutes).await?,
            LoopCommand::Replay { target_minutes } => self.replay(target_minutes).await?,
            LoopCommand::TogglePause => self.toggle_pause().await?,
            LoopCommand::Stop => self.stop().await?,
            LoopCommand::Volume { value } => self.set_volume(value).await?,
        }
        Ok(())
    }

    async fn load(&mut self, video_id: String, title: String, target_minutes: u32) -> anyhow::Result<()> {
        info!("LoopCore: loading {} for {} min", video_id, target_minutes);
        self.session = LoopSession::load(target_minutes);
        self.title = title;
        self.video_id = Some(video_id.clone());
        self.broadcast();

        match self.ensure_handle().await {
            Some(handle) => {
                let url = watch_url(&video_id);
                if let Err(e) = handle.load_video(&url, self.volume).await {
                    warn!("LoopCore: failed to load '{}': {}", url, e);
                    self.video_id = None;
                    self.session = LoopSession::default();
                    self.push_log(format!("could not load video: {e}"));
                    self.broadcast();
                }
            }
            None => {
                warn!("LoopCore: no player handle available for '{}'", video_id);
                self.video_id = None;
                self.session = LoopSession::default();
                self.push_log("player unavailable".to_string());
                self.broadcast();
            }
        }
        Ok(())
    }

    /// Same-video resubmit: reset accounting, seek to start, play.  The
    /// player keeps its loaded file — no reload.
    async fn replay(&mut self, target_minutes: u32) -> anyhow::Result<()> {
        if self.video_id.is_none() {
            warn!("LoopCore: replay with no loaded video");
            return Ok(());
        }
        let now = Instant::now();
        self.session.restart(target_minutes, now);
        if let Some(handle) = self.handle.as_ref() {
            handle.seek_to_start().await?;
            handle.play().await?;
        }
        self.broadcast();
        Ok(())
    }

    async fn toggle_pause(&mut self) -> anyhow::Result<()> {
        if self.video_id.is_none() {
            return Ok(());
        }
        if let Some(handle) = self.handle.as_ref() {
            // Use the session's observed pause state rather than an IPC
            // round-trip (avoids a timeout if mpv is buffering).
            handle.set_pause(!self.session.is_paused()).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        info!("LoopCore: stopping playback");
        if let Some(handle) = self.handle.as_ref() {
            handle.stop().await?;
        }
        self.session.stop(Instant::now());
        self.video_id = None;
        self.title.clear();
        self.broadcast();
        Ok(())
    }

    async fn set_volume(&mut self, value: f32) -> anyhow::Result<()> {
        self.volume = value.clamp(0.0, 1.0);
        self.driver.last_volume = self.volume;
        if let Some(handle) = self.handle.as_ref() {
            handle.set_volume(self.volume).await?;
        }
        self.broadcast();
        Ok(())
    }

    // ── handle management ─────────────────────────────────────────────────────

    async fn ensure_handle(&mut self) -> Option<PlayerHandle> {
        // If we have a handle, check that the process is still alive
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("LoopCore: mpv process died, dropping handle");
            self.handle = None;
            self.set_health(PlayerHealth::Dead);
        }

        if self.handle.is_none() {
            // Single forwarder task per connection.
            let (event_tx, mut event_rx) = mpsc::channel::<RawEvent>(64);
            let core_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = event_rx.recv().await {
                    if core_tx.send(CoreEvent::Player(evt)).await.is_err() {
                        break;
                    }
                }
            });

            // Try to reconnect to an existing socket first, then spawn fresh.
            let handle = match self.driver.try_reconnect(event_tx.clone()).await {
                Some(h) => {
                    info!("LoopCore: reconnected to existing mpv socket");
                    h
                }
                None => {
                    self.set_health(PlayerHealth::Starting);
                    self.broadcast();
                    match self.driver.spawn_and_connect(event_tx).await {
                        Ok(h) => h,
                        Err(e) => {
                            warn!("LoopCore: failed to start mpv: {}", e);
                            self.set_health(PlayerHealth::Dead);
                            self.broadcast();
                            return None;
                        }
                    }
                }
            };

            self.set_health(PlayerHealth::Running);

            // Register property observations on the fresh handle.
            let h_clone = handle.clone();
            tokio::spawn(async move {
                h_clone.observe_loop_properties().await;
            });

            self.handle = Some(handle);
        }

        self.handle.clone()
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn set_health(&mut self, health: PlayerHealth) {
        if self.health != health {
            info!("LoopCore: player health {:?} → {:?}", self.health, health);
            self.health = health;
        }
    }

    fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            video_id: self.video_id.clone(),
            title: self.title.clone(),
            target_ms: self.session.target_ms(),
            accumulated_ms: self.session.accumulated_ms(),
            segment_started: self.session.segment_start(),
            paused: self.session.is_paused(),
            active: self.session.is_active(),
            volume: self.volume,
            health: self.health.clone(),
        }
    }

    fn broadcast(&self) {
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::SessionUpdated(self.snapshot()));
    }

    fn push_log(&self, message: String) {
        let _ = self.broadcast_tx.send(BroadcastMessage::Log(message));
    }

    async fn cleanup(&mut self) {
        info!("LoopCore: cleanup — killing mpv");
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
    }
}
