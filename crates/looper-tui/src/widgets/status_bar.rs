//! Status bar — bottom line with mode, keybindings, and player health badge.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use looper_proto::player::PlayerHealth;

use crate::theme::{C_BADGE_ERR, C_MODE_EDIT, C_MODE_NORMAL, C_MUTED};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    Normal,
    /// Keystrokes go to a form field.
    Edit,
}

impl InputMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Edit => "EDIT",
        }
    }

    pub fn color(self) -> ratatui::style::Color {
        match self {
            Self::Normal => C_MODE_NORMAL,
            Self::Edit => C_MODE_EDIT,
        }
    }
}

/// Draw the keybindings footer bar (one row).
pub fn draw_keys_bar(frame: &mut Frame, area: Rect, mode: InputMode, health: &PlayerHealth) {
    let mut spans = vec![Span::styled(
        format!(" {} ", mode.label()),
        Style::default().fg(mode.color()).add_modifier(Modifier::BOLD),
    )];

    if let Some(badge) = health.badge_label() {
        spans.push(Span::styled(
            format!("[{}] ", badge),
            Style::default().fg(C_BADGE_ERR).add_modifier(Modifier::BOLD),
        ));
    }

    let keys = match mode {
        InputMode::Normal => {
            " Tab panes  e edit url  Enter loop/replay  Space pause  S stop  ←→ vol  j/k select  f fav  d del  u undo  s sort  y copy  r refresh  ? help  q quit"
        }
        InputMode::Edit => " type url/minutes  Tab next field  Enter loop  Esc done",
    };

    spans.push(Span::styled(keys, Style::default().fg(C_MUTED)));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
