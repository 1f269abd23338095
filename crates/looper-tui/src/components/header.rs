//! Header — app title and tagline.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::theme::{C_ACCENT, C_SECONDARY};

pub struct Header;

impl Header {
    pub fn new() -> Self {
        Self
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        if area.height == 0 {
            return;
        }
        let line = Line::from(vec![
            Span::styled(
                " looper ",
                Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                "— when one listen isn't enough …",
                Style::default().fg(C_SECONDARY),
            ),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
