//! App — component-based event loop.
//!
//! Architecture:
//! - `App` owns all components and `AppState` (shared read-only data for components).
//! - A `tokio::mpsc` channel carries `AppMessage` events in from background tasks.
//! - The event loop draws each frame, then awaits the next message.
//! - Components return `Vec<Action>`; App dispatches each Action.
//! - Commands to the loop core flow out through a separate `cmd_tx` channel.
//!
//! Every remote call is a spawned task that reports back as an `AppMessage`,
//! so a failure can never unwind the UI — it lands here and becomes a toast
//! plus, where an optimistic update was made, a compensating transition.

use std::io;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use looper_proto::config::Config;
use looper_proto::history::{HistoryClient, HistoryRecord, SavePlay};
use looper_proto::player::{LoopCommand, LoopSnapshot};
use looper_proto::video::{extract_video_id, fetch_video_title};

use crate::core::CoreEvent;
use crate::history::UNDO_WINDOW_SECS;
use crate::BroadcastMessage;

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    components::{
        header::Header, help_overlay::HelpOverlay, history_panel::HistoryPanel,
        loop_form::LoopForm, player_panel::PlayerPanel,
    },
    focus::FocusRing,
    widgets::{
        status_bar::{self, InputMode},
        toast::{Severity, ToastManager},
    },
};

/// Inline validation messages auto-clear after this long.
const VALIDATION_CLEAR: Duration = Duration::from_secs(3);

// ── Internal event bus ────────────────────────────────────────────────────────

enum AppMessage {
    Event(Event),
    SessionUpdated(LoopSnapshot),
    CoreLog(String),
    /// oEmbed lookup settled for the id the URL field resolved to at spawn.
    TitleFetched {
        video_id: String,
        title: Option<String>,
    },
    SaveFinished {
        video_id: String,
        result: Result<(), String>,
    },
    HistoryFetched {
        seq: u64,
        result: Result<Vec<HistoryRecord>, String>,
    },
    FavoriteFinished {
        video_id: String,
        result: Result<(), String>,
    },
    DeleteFinished {
        record: HistoryRecord,
        result: Result<(), String>,
    },
    UndoFinished {
        ids: Vec<String>,
        result: Result<(), String>,
    },
    UndoExpired {
        video_id: String,
    },
}

// ── App ───────────────────────────────────────────────────────────────────────

pub struct App {
    // ── Shared state (passed read-only to components) ─────────────────────────
    pub state: AppState,

    // ── Components ────────────────────────────────────────────────────────────
    header: Header,
    loop_form: LoopForm,
    player_panel: PlayerPanel,
    history_panel: HistoryPanel,
    help_overlay: HelpOverlay,

    focus: FocusRing,

    // ── Session bookkeeping ───────────────────────────────────────────────────
    cmd_tx: mpsc::Sender<CoreEvent>,
    client: HistoryClient,
    oembed_endpoint: String,

    /// Sender handed to spawned background tasks; set in run().
    msg_tx: Option<mpsc::Sender<AppMessage>>,

    /// Whether to quit on next iteration.
    should_quit: bool,

    /// Toast notification manager.
    toast: ToastManager,
}

impl App {
    pub fn new(config: &Config, cmd_tx: mpsc::Sender<CoreEvent>) -> Self {
        Self {
            state: AppState::new(),
            header: Header::new(),
            loop_form: LoopForm::new(),
            player_panel: PlayerPanel::new(),
            history_panel: HistoryPanel::new(),
            help_overlay: HelpOverlay::new(),
            focus: FocusRing::new(vec![ComponentId::LoopForm, ComponentId::HistoryPanel]),
            cmd_tx,
            client: HistoryClient::new(config.api.base_url.clone(), config.api.user_id.clone()),
            oembed_endpoint: config.oembed.endpoint.clone(),
            msg_tx: None,
            should_quit: false,
            toast: ToastManager::new(),
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(
        mut self,
        mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    ) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let (tx, mut rx) = mpsc::channel::<AppMessage>(1024);
        self.msg_tx = Some(tx.clone());

        // ── Background task: keyboard events ──────────────────────────────────
        let event_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: broadcast receiver (LoopCore → AppMessage) ───────
        let bc_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        let app_msg = match msg {
                            BroadcastMessage::SessionUpdated(snap) => {
                                AppMessage::SessionUpdated(snap)
                            }
                            BroadcastMessage::Log(s) => AppMessage::CoreLog(s),
                        };
                        if bc_tx.send(app_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // History is visible from the start — fetch immediately.
        self.spawn_refresh();

        // ── Periodic timers ───────────────────────────────────────────────────
        // Toast expiry + component maintenance: 100ms
        let mut ui_tick = tokio::time::interval(Duration::from_millis(100));
        ui_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Elapsed readout cadence: 1 Hz while the loop is running.
        let mut elapsed_tick = tokio::time::interval(Duration::from_secs(1));
        elapsed_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            self.state.input_mode = if self.loop_form.is_editing() {
                InputMode::Edit
            } else {
                InputMode::Normal
            };

            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => {
                    self.handle_message(msg).await;
                    // Drain whatever queued up behind it before redrawing.
                    let mut drained = 0usize;
                    while drained < 64 {
                        match rx.try_recv() {
                            Ok(next) => {
                                drained += 1;
                                self.handle_message(next).await;
                            }
                            Err(_) => break,
                        }
                    }
                    needs_redraw = true;
                }

                _ = ui_tick.tick() => {
                    self.toast.tick();
                    // Inline validation messages expire on their own.
                    if let Some(expires) = self.state.validation_expires {
                        if Instant::now() >= expires {
                            self.state.validation_error = None;
                            self.state.validation_expires = None;
                        }
                    }
                    let tick_actions: Vec<Action> = {
                        let s = &self.state;
                        let mut all = Vec::new();
                        all.extend(self.loop_form.tick(s));
                        all.extend(self.history_panel.tick(s));
                        all.extend(self.help_overlay.tick(s));
                        all
                    };
                    for action in tick_actions {
                        self.dispatch(action).await;
                    }
                    needs_redraw = true;
                }

                _ = elapsed_tick.tick() => {
                    if self.state.snapshot.active && !self.state.snapshot.paused {
                        needs_redraw = true;
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    // ── Message handler ───────────────────────────────────────────────────────

    async fn handle_message(&mut self, msg: AppMessage) {
        match msg {
            AppMessage::Event(ev) => match ev {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        return;
                    }
                    let actions = self.handle_key(key);
                    for a in actions {
                        self.dispatch(a).await;
                    }
                }
                Event::Resize(w, h) => {
                    self.dispatch(Action::Resize(w, h)).await;
                }
                _ => {}
            },

            AppMessage::SessionUpdated(snap) => {
                self.state.snapshot = snap;
            }

            AppMessage::CoreLog(s) => {
                self.push_log(s);
            }

            AppMessage::TitleFetched { video_id, title } => {
                // Only apply if the URL field still resolves to the same id —
                // a slow lookup must not overwrite a fresher field.
                if extract_video_id(self.loop_form.url_value()).as_deref() == Some(video_id.as_str()) {
                    self.state.video_title = title;
                }
            }

            AppMessage::SaveFinished { video_id, result } => match result {
                Ok(()) => {
                    self.toast
                        .resolve_spinner(Severity::Success, "Saved to history");
                    self.spawn_refresh();
                }
                Err(e) => {
                    warn!("save failed for {}: {}", video_id, e);
                    self.toast.resolve_spinner(Severity::Error, "Couldn't save");
                    self.push_log(format!("save failed: {e}"));
                }
            },

            AppMessage::HistoryFetched { seq, result } => {
                self.state.history.apply_refresh(seq, result);
            }

            AppMessage::FavoriteFinished { video_id, result } => match result {
                Ok(()) => {
                    self.toast.success("Favorite updated");
                    // Never trust the local negation as final truth — refetch.
                    self.spawn_refresh();
                }
                Err(e) => {
                    warn!("favorite toggle failed for {}: {}", video_id, e);
                    self.toast.error("Could not update favorite");
                }
            },

            AppMessage::DeleteFinished { record, result } => match result {
                Ok(()) => {
                    let video_id = record.video_id.clone();
                    let expires_at = Instant::now() + Duration::from_secs(UNDO_WINDOW_SECS);
                    let abort = self.spawn_undo_expiry(video_id.clone());
                    self.state.history.enroll_undo(record, expires_at, abort);
                    self.toast.success("Removed from history");
                }
                Err(e) => {
                    warn!("delete failed for {}: {}", record.video_id, e);
                    // Compensating action: the optimistic removal is undone.
                    self.state.history.reinsert(record);
                    self.toast.error("Could not remove from history");
                }
            },

            AppMessage::UndoFinished { ids, result } => match result {
                Ok(()) => {
                    self.state.history.clear_undo(&ids);
                    self.toast.success(if ids.len() == 1 {
                        "Restored".to_string()
                    } else {
                        format!("Restored {} entries", ids.len())
                    });
                    self.spawn_refresh();
                }
                Err(e) => {
                    warn!("undo restore failed: {}", e);
                    // Entries stay enrolled; the user can press u again.
                    self.toast.error("Could not restore — press u to retry");
                }
            },

            AppMessage::UndoExpired { video_id } => {
                self.state.history.expire_undo(&video_id);
            }
        }
    }

    // ── Key handling ──────────────────────────────────────────────────────────

    fn handle_key(&mut self, key: KeyEvent) -> Vec<Action> {
        if key.code == KeyCode::Char('c') && key.modifiers == KeyModifiers::CONTROL {
            return vec![Action::Quit];
        }

        // Help overlay captures all keys when visible
        if self.help_overlay.visible {
            let actions = self.help_overlay.handle_key(key, &self.state);
            if !actions.is_empty() {
                return actions;
            }
            return vec![Action::ToggleHelp];
        }

        // While a form field is being edited, everything goes to the form.
        // (Checked live, not via input_mode — several keys can drain in one
        // pass before the mode is re-synced.)
        if self.loop_form.is_editing() {
            return self.loop_form.handle_key(key, &self.state);
        }

        // Global keys — Normal mode
        match key.code {
            KeyCode::Char('q') if key.modifiers == KeyModifiers::NONE => {
                return vec![Action::Quit];
            }
            KeyCode::Char('?') => return vec![Action::ToggleHelp],
            // Jump into the form from anywhere
            KeyCode::Char('e') | KeyCode::Char('i') => {
                self.focus.set(ComponentId::LoopForm);
                return self.loop_form.handle_key(key, &self.state);
            }
            KeyCode::Tab => return vec![Action::FocusNext],
            KeyCode::BackTab => return vec![Action::FocusPrev],
            KeyCode::Char(' ') => return vec![Action::TogglePause],
            KeyCode::Char('S') => return vec![Action::StopLoop],
            KeyCode::Right | KeyCode::Char('+') | KeyCode::Char('=') => {
                let new_vol = (self.state.snapshot.volume + 0.05).min(1.0);
                return vec![Action::Volume(new_vol)];
            }
            KeyCode::Left | KeyCode::Char('-') => {
                let new_vol = (self.state.snapshot.volume - 0.05).max(0.0);
                return vec![Action::Volume(new_vol)];
            }
            _ => {}
        }

        // Dispatch to the focused component
        match self.focus.current() {
            Some(ComponentId::LoopForm) => self.loop_form.handle_key(key, &self.state),
            Some(ComponentId::HistoryPanel) => self.history_panel.handle_key(key, &self.state),
            _ => vec![],
        }
    }

    // ── Action dispatch ───────────────────────────────────────────────────────

    async fn dispatch(&mut self, action: Action) {
        match &action {
            Action::Submit { url, minutes } => {
                self.submit(url.clone(), minutes.clone()).await;
            }

            Action::UrlChanged(url) => {
                // Editing the field counts as correcting the last complaint.
                self.state.validation_error = None;
                self.state.validation_expires = None;
                match extract_video_id(url) {
                    Some(video_id) => self.spawn_title_fetch(video_id),
                    None => self.state.video_title = None,
                }
            }

            Action::ReplayRecord(video_id) => {
                self.replay_record(video_id.clone()).await;
            }

            Action::ToggleFavorite(video_id) => {
                if let Some(desired) = self.state.history.negated_favorite(video_id) {
                    self.spawn_favorite(video_id.clone(), desired);
                }
            }

            Action::DeleteRecord(video_id) => {
                // Optimistic: drop it from the visible list before the call.
                if let Some(record) = self.state.history.remove_local(video_id) {
                    self.spawn_delete(record);
                }
            }

            Action::UndoDeletes => {
                // Timers are aborted before anything is removed, so an expiry
                // can't fire while the restores are in flight.
                let ids = self.state.history.arm_undo();
                if !ids.is_empty() {
                    self.spawn_undo(ids);
                }
            }

            Action::CycleSort => {
                let next = self.state.history.sort().next();
                self.state.history.set_sort(next);
                self.spawn_refresh();
            }

            Action::RefreshHistory => self.spawn_refresh(),

            Action::TogglePause => self.send_command(LoopCommand::TogglePause).await,
            Action::StopLoop => self.send_command(LoopCommand::Stop).await,
            Action::Volume(value) => {
                self.send_command(LoopCommand::Volume { value: *value }).await
            }

            Action::FocusNext => {
                self.focus.next();
            }
            Action::FocusPrev => {
                self.focus.prev();
            }

            Action::CopyToClipboard(text) => {
                match arboard::Clipboard::new().and_then(|mut cb| cb.set_text(text.clone())) {
                    Ok(()) => self.toast.success("Copied url"),
                    Err(e) => {
                        warn!("clipboard copy failed: {}", e);
                        self.toast.error("Copy failed");
                    }
                }
            }

            Action::ToggleHelp => {} // handled by the overlay's on_action below
            Action::Quit => self.should_quit = true,
            Action::Resize(_, _) => {}
        }

        // Let components react to the action regardless of focus.
        let follow_ups: Vec<Action> = {
            let s = &self.state;
            let mut all = Vec::new();
            all.extend(self.loop_form.on_action(&action, s));
            all.extend(self.history_panel.on_action(&action, s));
            all.extend(self.help_overlay.on_action(&action, s));
            all
        };
        for a in follow_ups {
            Box::pin(self.dispatch(a)).await;
        }
    }

    /// Validate and start (or restart) a loop.  Duration is checked before
    /// the URL; either failure shows the inline message and starts nothing.
    async fn submit(&mut self, url: String, minutes: String) {
        let (video_id, target_minutes) =
            match crate::components::loop_form::validate(&url, &minutes) {
                Ok(ok) => ok,
                Err(message) => {
                    self.state.validation_error = Some(message);
                    self.state.validation_expires = Some(Instant::now() + VALIDATION_CLEAR);
                    return;
                }
            };
        self.state.validation_error = None;
        self.state.validation_expires = None;

        let title = self.state.video_title.clone().unwrap_or_default();

        // Fire-and-forget save; the loop starts regardless of its outcome.
        self.toast.spinner("Saving…");
        self.spawn_save(video_id.clone(), title.clone(), target_minutes);

        if self.state.loaded_video_id() == Some(video_id.as_str()) {
            // Same video: explicit restart without reloading the player.
            self.send_command(LoopCommand::Replay { target_minutes }).await;
        } else {
            self.send_command(LoopCommand::Load {
                video_id,
                title,
                target_minutes,
            })
            .await;
        }
    }

    /// Replay a history entry: bump its play count and load it with its
    /// saved duration.
    async fn replay_record(&mut self, video_id: String) {
        let Some(record) = self.state.history.find(&video_id).cloned() else {
            return;
        };
        self.state.video_title = Some(record.title.clone());

        self.toast.spinner("Saving…");
        self.spawn_save(record.video_id.clone(), record.title.clone(), record.loop_duration);

        let target_minutes = record.loop_duration;
        if self.state.loaded_video_id() == Some(video_id.as_str()) {
            self.send_command(LoopCommand::Replay { target_minutes }).await;
        } else {
            self.send_command(LoopCommand::Load {
                video_id: record.video_id,
                title: record.title,
                target_minutes,
            })
            .await;
        }
    }

    async fn send_command(&mut self, cmd: LoopCommand) {
        if self.cmd_tx.send(CoreEvent::Command(cmd)).await.is_err() {
            warn!("loop core is gone — dropping command");
        }
    }

    fn push_log(&mut self, message: String) {
        info!("core: {}", message);
        self.state.logs.push(message);
        let overflow = self.state.logs.len().saturating_sub(100);
        if overflow > 0 {
            self.state.logs.drain(..overflow);
        }
    }

    // ── Spawned remote calls ──────────────────────────────────────────────────

    fn tx(&self) -> mpsc::Sender<AppMessage> {
        self.msg_tx.clone().expect("run() sets msg_tx before use")
    }

    fn spawn_refresh(&mut self) {
        let seq = self.state.history.begin_refresh();
        let sort = self.state.history.sort();
        let client = self.client.clone();
        let tx = self.tx();
        tokio::spawn(async move {
            let result = client.list(sort).await.map_err(|e| e.to_string());
            let _ = tx.send(AppMessage::HistoryFetched { seq, result }).await;
        });
    }

    fn spawn_save(&self, video_id: String, title: String, loop_duration: u32) {
        let client = self.client.clone();
        let tx = self.tx();
        let play = SavePlay {
            video_id: video_id.clone(),
            title,
            loop_duration,
            user_id: client.user_id().to_string(),
        };
        tokio::spawn(async move {
            let result = client.save(&play).await.map(|_| ()).map_err(|e| e.to_string());
            let _ = tx.send(AppMessage::SaveFinished { video_id, result }).await;
        });
    }

    fn spawn_favorite(&self, video_id: String, desired: bool) {
        let client = self.client.clone();
        let tx = self.tx();
        tokio::spawn(async move {
            let result = client
                .set_favorite(&video_id, desired)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            let _ = tx
                .send(AppMessage::FavoriteFinished { video_id, result })
                .await;
        });
    }

    fn spawn_delete(&self, record: HistoryRecord) {
        let client = self.client.clone();
        let tx = self.tx();
        tokio::spawn(async move {
            let result = client
                .delete(&record.video_id)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(AppMessage::DeleteFinished { record, result }).await;
        });
    }

    /// Restore every armed id concurrently; one failure fails the batch.
    fn spawn_undo(&self, ids: Vec<String>) {
        let client = self.client.clone();
        let tx = self.tx();
        tokio::spawn(async move {
            let calls = ids.iter().map(|id| client.restore(id));
            let result = join_all(calls)
                .await
                .into_iter()
                .find_map(|r| r.err())
                .map_or(Ok(()), |e| Err(e.to_string()));
            let _ = tx.send(AppMessage::UndoFinished { ids, result }).await;
        });
    }

    fn spawn_title_fetch(&self, video_id: String) {
        let endpoint = self.oembed_endpoint.clone();
        let tx = self.tx();
        tokio::spawn(async move {
            let title = fetch_video_title(&endpoint, &video_id).await;
            let _ = tx.send(AppMessage::TitleFetched { video_id, title }).await;
        });
    }

    /// Schedule the undo-window expiry for one deleted record.  The returned
    /// handle is stored in the undo entry so a user restore can abort it.
    fn spawn_undo_expiry(&self, video_id: String) -> tokio::task::AbortHandle {
        let tx = self.tx();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(UNDO_WINDOW_SECS)).await;
            let _ = tx.send(AppMessage::UndoExpired { video_id }).await;
        })
        .abort_handle()
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        let area = frame.area();

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // header
                Constraint::Min(0),    // main
                Constraint::Length(1), // keys bar
            ])
            .split(area);

        self.header.draw(frame, rows[0]);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[1]);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(7), Constraint::Min(4)])
            .split(columns[0]);

        let form_focused = self.focus.is_focused(ComponentId::LoopForm);
        let history_focused = self.focus.is_focused(ComponentId::HistoryPanel);

        self.loop_form.draw(frame, left[0], form_focused, &self.state);
        self.player_panel.draw(frame, left[1], &self.state);
        self.history_panel
            .draw(frame, columns[1], history_focused, &self.state);

        status_bar::draw_keys_bar(
            frame,
            rows[2],
            self.state.input_mode,
            &self.state.snapshot.health,
        );

        self.help_overlay.draw(frame, area, false, &self.state);
        self.toast.draw(frame, area);
    }
}
