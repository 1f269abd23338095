//! mpv IPC driver with separated reader/writer tasks.
//!
//! mpv plays the role of the video embed: we issue imperative commands
//! (load, seek, play) and it pushes property-change events back.  Raw JSON
//! events are decoded exactly once, here, into `PlayerEvent`; the loop core
//! never inspects payloads.
//!
//! ```text
//!   MpvDriver::spawn_and_connect()
//!         │
//!         ├── writer_task   ← receives PlayerRequest via mpsc, serialises → socket
//!         └── reader_task   ← reads JSON lines from socket
//!                                ├── response (has request_id) → matched oneshot::Sender
//!                                └── event / property-change   → event_tx channel
//! ```
//!
//! Platform notes:
//! - Unix:   Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use looper_proto::player::{PlayerEvent, PlayerState};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

/// Fixed observe_property IDs.  We match on these in property-change events.
pub const OBS_PAUSE: u64 = 1;
pub const OBS_EOF_REACHED: u64 = 2;

// ── internal channel types ────────────────────────────────────────────────────

struct PlayerRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// A raw mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub raw: Value,
}

impl RawEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Decode a raw mpv event into the named event the loop core consumes.
/// Anything that doesn't map to a variant is dropped here.
pub fn decode_event(evt: &RawEvent) -> Option<PlayerEvent> {
    if let Some((obs_id, data)) = evt.as_property_change() {
        return match obs_id {
            OBS_PAUSE => match data.as_bool() {
                Some(true) => Some(PlayerEvent::StateChange(PlayerState::Paused)),
                Some(false) => Some(PlayerEvent::StateChange(PlayerState::Playing)),
                None => None,
            },
            // With --keep-open the file stays loaded at its end and this
            // property flips to true — the clip-end signal.
            OBS_EOF_REACHED => match data.as_bool() {
                Some(true) => Some(PlayerEvent::ClipEnd),
                _ => None,
            },
            _ => None,
        };
    }

    match evt.event_name() {
        Some("file-loaded") => Some(PlayerEvent::Ready),
        Some("end-file") => {
            let reason = evt
                .raw
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            match reason {
                // keep-open normally swallows natural eof; cover the
                // configurations where it still unloads.
                "eof" => Some(PlayerEvent::ClipEnd),
                "error" | "network" | "quit" => Some(PlayerEvent::Gone(reason.to_string())),
                _ => None,
            }
        }
        _ => None,
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerRequest>,
}

impl PlayerHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PlayerRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    pub socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: looper_proto::platform::mpv_socket_name(),
            process: None,
            last_volume: 0.7,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            match child.try_wait() {
                Ok(None) => true, // Still running
                Ok(Some(status)) => {
                    if let Some(code) = status.code() {
                        warn!("mpv process exited with code: {}", code);
                    } else {
                        warn!("mpv process terminated by signal");
                    }
                    false
                }
                Err(e) => {
                    warn!("mpv process_alive check failed: {}", e);
                    false
                }
            }
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_args(&self) -> Vec<String> {
        vec![
            // Video stays on — the mpv window IS the embed.
            "--idle=yes".to_string(),
            looper_proto::platform::mpv_socket_arg(),
            "--quiet".to_string(),
            // Hold the last frame instead of unloading, so a clip-end restart
            // is a seek + play rather than a reload.  keep-open-pause=no keeps
            // the pause property out of it: a synthetic pause at eof would
            // close the open segment before the eof-reached event lands.
            "--keep-open=yes".to_string(),
            "--keep-open-pause=no".to_string(),
            format!(
                "--volume={}",
                (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
            ),
        ]
    }

    // ── spawn / reconnect ─────────────────────────────────────────────────────

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<RawEvent>,
    ) -> anyhow::Result<PlayerHandle> {
        // Kill stale process
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = looper_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        // mpv stderr log file for debugging crashes
        let stderr_path = looper_proto::platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;
        info!("mpv: logging stderr to {:?}", stderr_path);

        let child = tokio::process::Command::new(&mpv_binary)
            .args(self.spawn_args())
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(Self::start_io_tasks(stream, event_tx))
    }

    /// Try to connect to an already-running mpv socket without spawning.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<RawEvent>) -> Option<PlayerHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                Some(Self::start_io_tasks(stream, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<RawEvent>) -> PlayerHandle {
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerRequest>(64);

        let pending_w = pending.clone();
        tokio::spawn(writer_task(write_half, cmd_rx, pending_w));
        tokio::spawn(reader_task(reader, pending, event_tx));

        PlayerHandle { tx: cmd_tx }
    }

    // ── Windows ───────────────────────────────────────────────────────────────

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<RawEvent>,
    ) -> anyhow::Result<PlayerHandle> {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        info!("mpv: spawning new process");
        let mpv_binary = looper_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .args(self.spawn_args())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            match ClientOptions::new().open(&pipe_path) {
                Ok(client) => {
                    info!("mpv: connected to named pipe");
                    return Ok(Self::start_io_tasks_windows(client, event_tx));
                }
                Err(_) => continue,
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<RawEvent>) -> Option<PlayerHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                Some(Self::start_io_tasks_windows(client, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect to named pipe: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    fn start_io_tasks_windows(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
        event_tx: mpsc::Sender<RawEvent>,
    ) -> PlayerHandle {
        use tokio::io::split;
        let (read_half, write_half) = split(pipe);
        let reader = BufReader::new(read_half);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerRequest>(64);

        let pending_w = pending.clone();
        tokio::spawn(writer_task(write_half, cmd_rx, pending_w));
        tokio::spawn(reader_task(reader, pending, event_tx));

        PlayerHandle { tx: cmd_tx }
    }
}

impl Default for MpvDriver {
    fn default() -> Self {
        Self::new()
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    event_tx: mpsc::Sender<RawEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                // Fail all pending requests
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    // This is a command response — route to pending request
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    // Unsolicited event / property-change
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(RawEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PlayerRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            // Remove and fail the request we just registered
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── convenience wrappers (used by LoopCore) ───────────────────────────────────

impl PlayerHandle {
    /// Load a video by URL and set the starting volume.
    pub async fn load_video(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        debug!("mpv: sending loadfile command for url={}", url);
        self.send(json!(["loadfile", url])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct]))
            .await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// The embed's "play" control.
    pub async fn play(&self) -> anyhow::Result<()> {
        self.set_pause(false).await
    }

    /// The embed's "seek to start" control, used for loop restarts.
    pub async fn seek_to_start(&self) -> anyhow::Result<()> {
        self.send(json!(["set_property", "time-pos", 0.0])).await?;
        Ok(())
    }

    /// Register observe_property for the properties the loop core needs.
    /// Must be called after every fresh connection (connect or reconnect).
    pub async fn observe_loop_properties(&self) {
        let props = [(OBS_PAUSE, "pause"), (OBS_EOF_REACHED, "eof-reached")];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    /// Health-check: returns Ok(()) if mpv is responsive.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "volume"])).await?;
        Ok(())
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: Value) -> RawEvent {
        RawEvent { raw: json }
    }

    #[test]
    fn test_decode_pause_property() {
        let evt = raw(json!({"event": "property-change", "id": OBS_PAUSE, "data": true}));
        assert!(matches!(
            decode_event(&evt),
            Some(PlayerEvent::StateChange(PlayerState::Paused))
        ));

        let evt = raw(json!({"event": "property-change", "id": OBS_PAUSE, "data": false}));
        assert!(matches!(
            decode_event(&evt),
            Some(PlayerEvent::StateChange(PlayerState::Playing))
        ));
    }

    #[test]
    fn test_decode_eof_reached() {
        let evt = raw(json!({"event": "property-change", "id": OBS_EOF_REACHED, "data": true}));
        assert!(matches!(decode_event(&evt), Some(PlayerEvent::ClipEnd)));

        // Flipping back to false is not a clip end.
        let evt = raw(json!({"event": "property-change", "id": OBS_EOF_REACHED, "data": false}));
        assert!(decode_event(&evt).is_none());
    }

    #[test]
    fn test_decode_file_loaded_is_ready() {
        let evt = raw(json!({"event": "file-loaded"}));
        assert!(matches!(decode_event(&evt), Some(PlayerEvent::Ready)));
    }

    #[test]
    fn test_decode_end_file_reasons() {
        let evt = raw(json!({"event": "end-file", "reason": "eof"}));
        assert!(matches!(decode_event(&evt), Some(PlayerEvent::ClipEnd)));

        let evt = raw(json!({"event": "end-file", "reason": "error"}));
        assert!(matches!(decode_event(&evt), Some(PlayerEvent::Gone(r)) if r == "error"));
    }

    #[test]
    fn test_unrecognized_events_are_dropped_at_boundary() {
        // Unknown observation id, null payload, unknown event name: all dropped.
        let evt = raw(json!({"event": "property-change", "id": 42, "data": true}));
        assert!(decode_event(&evt).is_none());

        let evt = raw(json!({"event": "property-change", "id": OBS_PAUSE, "data": null}));
        assert!(decode_event(&evt).is_none());

        let evt = raw(json!({"event": "idle"}));
        assert!(decode_event(&evt).is_none());
    }
}
