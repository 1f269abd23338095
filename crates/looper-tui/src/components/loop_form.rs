//! LoopForm — URL + loop-duration fields and submit handling.
//!
//! Keybindings (when focused):
//!   e/i      — start editing (URL field)
//!   Enter    — submit (also while editing)
//!   Tab      — while editing: switch URL ⇄ minutes field
//!   Esc      — stop editing

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tui_input::{backend::crossterm::EventHandler, Input};

use looper_proto::video::{extract_video_id, watch_url};

use crate::{
    action::{Action, ComponentId},
    app_state::AppState,
    component::Component,
    theme::{C_ERROR, C_INPUT_FG, C_MUTED, C_PRIMARY, C_SECONDARY},
    widgets::pane_chrome::pane_chrome,
};

/// Validate a submission.  Duration is checked before the URL, matching the
/// order the inline messages are expected in.
pub fn validate(url: &str, minutes: &str) -> Result<(String, u32), String> {
    let minutes: u32 = match minutes.trim().parse() {
        Ok(m) if m > 0 => m,
        _ => return Err("Please enter a valid loop duration (in minutes).".to_string()),
    };
    match extract_video_id(url) {
        Some(video_id) => Ok((video_id, minutes)),
        None => Err("Please enter a valid YouTube URL.".to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Url,
    Minutes,
}

pub struct LoopForm {
    url: Input,
    minutes: Input,
    field: Field,
    editing: bool,
}

impl LoopForm {
    pub fn new() -> Self {
        Self {
            url: Input::default(),
            minutes: Input::default(),
            field: Field::Url,
            editing: false,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn url_value(&self) -> &str {
        self.url.value()
    }

    fn submit_action(&self) -> Action {
        Action::Submit {
            url: self.url.value().to_string(),
            minutes: self.minutes.value().to_string(),
        }
    }
}

impl Component for LoopForm {
    fn id(&self) -> ComponentId {
        ComponentId::LoopForm
    }

    fn handle_key(&mut self, key: KeyEvent, _state: &AppState) -> Vec<Action> {
        if key.kind == KeyEventKind::Release {
            return vec![];
        }

        if self.editing {
            match key.code {
                KeyCode::Esc => {
                    self.editing = false;
                    return vec![];
                }
                KeyCode::Enter => {
                    self.editing = false;
                    return vec![self.submit_action()];
                }
                KeyCode::Tab | KeyCode::BackTab | KeyCode::Down | KeyCode::Up => {
                    self.field = match self.field {
                        Field::Url => Field::Minutes,
                        Field::Minutes => Field::Url,
                    };
                    return vec![];
                }
                _ => {
                    let event = ratatui::crossterm::event::Event::Key(key);
                    match self.field {
                        Field::Url => {
                            let before = self.url.value().to_string();
                            self.url.handle_event(&event);
                            if self.url.value() != before {
                                return vec![Action::UrlChanged(self.url.value().to_string())];
                            }
                        }
                        Field::Minutes => {
                            self.minutes.handle_event(&event);
                        }
                    }
                    return vec![];
                }
            }
        }

        match key.code {
            KeyCode::Char('e') | KeyCode::Char('i') => {
                self.editing = true;
                self.field = Field::Url;
                vec![]
            }
            KeyCode::Enter => vec![self.submit_action()],
            _ => vec![],
        }
    }

    fn on_action(&mut self, action: &Action, state: &AppState) -> Vec<Action> {
        // Replaying a history entry fills the form the way loading it by
        // hand would, so a plain Enter afterwards restarts the same loop.
        if let Action::ReplayRecord(video_id) = action {
            if let Some(record) = state.history.find(video_id) {
                self.url = Input::new(watch_url(&record.video_id));
                self.minutes = Input::new(record.loop_duration.to_string());
                self.editing = false;
            }
        }
        vec![]
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect, focused: bool, state: &AppState) {
        let block = pane_chrome("loop", focused, None);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let field_style = |field: Field| {
            if self.editing && self.field == field {
                Style::default().fg(C_INPUT_FG)
            } else {
                Style::default().fg(C_PRIMARY)
            }
        };

        let url_display = if self.url.value().is_empty() && !self.editing {
            Span::styled("https://www.youtube.com/watch?v=…", Style::default().fg(C_MUTED))
        } else {
            Span::styled(self.url.value().to_string(), field_style(Field::Url))
        };

        let mut lines = vec![
            Line::from(vec![
                Span::styled("url      ", Style::default().fg(C_SECONDARY)),
                url_display,
            ]),
            Line::from(vec![
                Span::styled("minutes  ", Style::default().fg(C_SECONDARY)),
                Span::styled(self.minutes.value().to_string(), field_style(Field::Minutes)),
            ]),
        ];

        if let Some(title) = &state.video_title {
            lines.push(Line::from(Span::styled(
                format!("♪ {}", title),
                Style::default().fg(C_SECONDARY).add_modifier(Modifier::ITALIC),
            )));
        } else {
            lines.push(Line::from(""));
        }

        if let Some(err) = &state.validation_error {
            lines.push(Line::from(Span::styled(
                err.clone(),
                Style::default().fg(C_ERROR),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                if self.editing {
                    "Enter to loop · Tab switches field · Esc done"
                } else {
                    "e to edit · Enter to loop"
                },
                Style::default().fg(C_MUTED),
            )));
        }

        frame.render_widget(Paragraph::new(lines), inner);

        // Cursor in the active field while editing
        if self.editing {
            let (input, row) = match self.field {
                Field::Url => (&self.url, 0u16),
                Field::Minutes => (&self.minutes, 1u16),
            };
            let scroll = input.visual_scroll(inner.width.saturating_sub(10) as usize);
            let x = inner.x + 9 + (input.visual_cursor().saturating_sub(scroll)) as u16;
            if row < inner.height {
                frame.set_cursor_position((x.min(inner.x + inner.width.saturating_sub(1)), inner.y + row));
            }
        }
    }
}

impl Default for LoopForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_URL: &str = "https://www.youtube.com/watch?v=abcdefghijk";

    #[test]
    fn test_valid_submission() {
        let (video_id, minutes) = validate(GOOD_URL, "2").unwrap();
        assert_eq!(video_id, "abcdefghijk");
        assert_eq!(minutes, 2);
    }

    #[test]
    fn test_duration_checked_before_url() {
        // Both fields bad: the duration message wins.
        let err = validate("not-a-url", "").unwrap_err();
        assert!(err.contains("loop duration"), "got: {err}");
    }

    #[test]
    fn test_missing_duration_with_valid_url() {
        let err = validate(GOOD_URL, "").unwrap_err();
        assert!(err.contains("loop duration"));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        assert!(validate(GOOD_URL, "0").is_err());
        assert!(validate(GOOD_URL, "-3").is_err());
        assert!(validate(GOOD_URL, "abc").is_err());
    }

    #[test]
    fn test_invalid_url_with_valid_duration() {
        let err = validate("not-a-url", "5").unwrap_err();
        assert!(err.contains("YouTube URL"), "got: {err}");
    }
}
