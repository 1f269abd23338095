//! HistoryPanel — the play-history list.
//!
//! Each row shows:  ★  Title  ·  minutes  ·  play count
//!
//! Keybindings (when focused):
//!   j/k ↑↓   — navigate
//!   Enter    — replay the selected entry
//!   f        — toggle favorite
//!   d        — delete (undoable for 10s)
//!   u        — undo pending deletes
//!   s        — cycle sort (recent / plays / added)
//!   y        — copy watch url to clipboard
//!   r        — refresh

use std::time::Instant;

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use unicode_width::UnicodeWidthStr;

use looper_proto::history::HistoryRecord;
use looper_proto::video::watch_url;

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{
        style_selected_focused, C_ERROR, C_FAVORITE, C_MUTED, C_PRIMARY, C_SECONDARY, C_UNDO,
    },
    widgets::pane_chrome::pane_chrome,
};

pub struct HistoryPanel {
    pub selected: usize,
    scroll_offset: usize,
}

impl HistoryPanel {
    pub fn new() -> Self {
        Self {
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn selected_record<'a>(&self, state: &'a AppState) -> Option<&'a HistoryRecord> {
        state.history.records().get(self.selected)
    }

    fn clamp_selection(&mut self, state: &AppState) {
        let len = state.history.records().len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }
}

impl Component for HistoryPanel {
    fn id(&self) -> ComponentId {
        ComponentId::HistoryPanel
    }

    fn handle_key(&mut self, key: KeyEvent, state: &AppState) -> Vec<Action> {
        if key.kind == KeyEventKind::Release {
            return vec![];
        }

        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                vec![]
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let len = state.history.records().len();
                self.selected = (self.selected + 1).min(len.saturating_sub(1));
                vec![]
            }
            KeyCode::Enter => match self.selected_record(state) {
                Some(rec) => vec![Action::ReplayRecord(rec.video_id.clone())],
                None => vec![],
            },
            KeyCode::Char('f') => match self.selected_record(state) {
                Some(rec) => vec![Action::ToggleFavorite(rec.video_id.clone())],
                None => vec![],
            },
            KeyCode::Char('d') => match self.selected_record(state) {
                Some(rec) => vec![Action::DeleteRecord(rec.video_id.clone())],
                None => vec![],
            },
            KeyCode::Char('u') => vec![Action::UndoDeletes],
            KeyCode::Char('s') => vec![Action::CycleSort],
            KeyCode::Char('y') => match self.selected_record(state) {
                Some(rec) => vec![Action::CopyToClipboard(watch_url(&rec.video_id))],
                None => vec![],
            },
            KeyCode::Char('r') => vec![Action::RefreshHistory],
            _ => vec![],
        }
    }

    fn tick(&mut self, state: &AppState) -> Vec<Action> {
        self.clamp_selection(state);
        vec![]
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, focused: bool, state: &AppState) {
        self.clamp_selection(state);

        let title = format!("history · {}", state.history.sort().label());
        let block = pane_chrome(&title, focused, None);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        if inner.height == 0 {
            return;
        }

        let mut lines: Vec<Line> = Vec::new();

        // Undo banner while deletions are inside their window
        let pending = state.history.pending_undo_view();
        if !pending.is_empty() {
            let now = Instant::now();
            let secs_left = pending
                .iter()
                .map(|(_, _, exp)| exp.saturating_duration_since(now).as_secs())
                .max()
                .unwrap_or(0);
            let what = if pending.len() == 1 {
                let title = pending[0].1;
                format!("removed \"{}\"", truncate(title, 24))
            } else {
                format!("removed {} entries", pending.len())
            };
            lines.push(Line::from(Span::styled(
                format!(" {} — u to undo ({}s) ", what, secs_left),
                Style::default().fg(C_UNDO).add_modifier(Modifier::BOLD),
            )));
        }

        if state.history.loading {
            lines.push(Line::from(Span::styled(
                "Loading…",
                Style::default().fg(C_SECONDARY),
            )));
        }
        if let Some(err) = &state.history.error {
            lines.push(Line::from(Span::styled(
                truncate(err, inner.width as usize),
                Style::default().fg(C_ERROR),
            )));
        }

        let records = state.history.records();
        if records.is_empty() && !state.history.loading {
            lines.push(Line::from(Span::styled(
                "No history yet",
                Style::default().fg(C_MUTED),
            )));
        }

        // Keep the selection in the visible window
        let rows_avail = (inner.height as usize).saturating_sub(lines.len());
        if rows_avail > 0 {
            if self.selected < self.scroll_offset {
                self.scroll_offset = self.selected;
            } else if self.selected >= self.scroll_offset + rows_avail {
                self.scroll_offset = self.selected + 1 - rows_avail;
            }

            for (i, rec) in records
                .iter()
                .enumerate()
                .skip(self.scroll_offset)
                .take(rows_avail)
            {
                lines.push(self.record_row(rec, i == self.selected, focused, inner.width));
            }
        }

        frame.render_widget(Paragraph::new(lines), inner);
    }
}

impl HistoryPanel {
    fn record_row(&self, rec: &HistoryRecord, selected: bool, focused: bool, width: u16) -> Line<'static> {
        let star = if rec.is_favorite { "★ " } else { "  " };
        let meta = format!(" {}m · {}×", rec.loop_duration, rec.play_count);
        let title_width = (width as usize)
            .saturating_sub(star.width() + meta.width() + 2)
            .max(8);
        let title = truncate(&rec.title, title_width);

        let base = if selected && focused {
            style_selected_focused()
        } else if selected {
            Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(C_PRIMARY)
        };

        Line::from(vec![
            Span::styled(star.to_string(), Style::default().fg(C_FAVORITE)),
            Span::styled(format!("{:<title_width$}", title), base),
            Span::styled(meta, Style::default().fg(C_SECONDARY)),
        ])
    }
}

/// Truncate to a display width, appending an ellipsis when cut.
fn truncate(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut w = 0;
    for ch in s.chars() {
        let cw = UnicodeWidthStr::width(ch.to_string().as_str());
        if w + cw + 1 > max_width {
            break;
        }
        out.push(ch);
        w += cw;
    }
    out.push('…');
    out
}

impl Default for HistoryPanel {
    fn default() -> Self {
        Self::new()
    }
}
