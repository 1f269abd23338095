//! PlayerPanel — elapsed/target readout for the running loop session.
//!
//! Pure display: the mpv window shows the video itself; this panel mirrors
//! the accounting.  Elapsed time is derived from the latest snapshot at
//! draw time, so the 1 Hz redraw tick is all it takes to keep it moving.

use std::time::Instant;

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use looper_proto::player::format_mmss;

use crate::{
    app_state::AppState,
    theme::{C_MUTED, C_PLAYING, C_PRIMARY, C_SECONDARY, C_TOAST_WARNING},
    widgets::pane_chrome::{pane_chrome, Badge},
};

pub struct PlayerPanel;

impl PlayerPanel {
    pub fn new() -> Self {
        Self
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, state: &AppState) {
        let snap = &state.snapshot;
        let badge = snap.health.badge_label().map(|text| Badge {
            text,
            color: crate::theme::C_BADGE_ERR,
        });
        let block = pane_chrome("player", false, badge);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let mut lines: Vec<Line> = Vec::new();

        match &snap.video_id {
            None => {
                lines.push(Line::from(Span::styled(
                    "no video loaded — press e to enter a url",
                    Style::default().fg(C_MUTED),
                )));
            }
            Some(video_id) => {
                let title = if snap.title.is_empty() {
                    video_id.as_str()
                } else {
                    snap.title.as_str()
                };
                lines.push(Line::from(Span::styled(
                    title.to_string(),
                    Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD),
                )));

                let elapsed = format_mmss(snap.elapsed_ms(Instant::now()));
                let target = format_mmss(snap.target_ms);
                if snap.active {
                    let (status, color) = if snap.paused {
                        ("paused", C_TOAST_WARNING)
                    } else {
                        ("looping", C_PLAYING)
                    };
                    lines.push(Line::from(vec![
                        Span::styled(
                            format!("{status} "),
                            Style::default().fg(color).add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            format!("for {} / {}", elapsed, target),
                            Style::default().fg(C_SECONDARY),
                        ),
                    ]));
                } else if snap.target_ms > 0 && snap.accumulated_ms >= snap.target_ms {
                    lines.push(Line::from(vec![
                        Span::styled(
                            "done ",
                            Style::default().fg(C_PLAYING).add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            format!("— looped for {}", elapsed),
                            Style::default().fg(C_SECONDARY),
                        ),
                    ]));
                } else {
                    lines.push(Line::from(Span::styled(
                        "loading…",
                        Style::default().fg(C_SECONDARY),
                    )));
                }

                lines.push(Line::from(Span::styled(
                    format!("vol {:>3.0}%", snap.volume * 100.0),
                    Style::default().fg(C_MUTED),
                )));
            }
        }

        // Surface the core's last complaint (load failures, player loss).
        if let Some(log) = state.logs.last() {
            lines.push(Line::from(Span::styled(
                log.clone(),
                Style::default().fg(C_MUTED),
            )));
        }

        frame.render_widget(Paragraph::new(lines), inner);
    }
}

impl Default for PlayerPanel {
    fn default() -> Self {
        Self::new()
    }
}
