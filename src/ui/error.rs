//! Error display: a full-screen error page and an in-place alert box.

use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap},
};
use std::io::{self, Stdout};

const ALERT_BG: Color = Color::Rgb(255, 0, 0);
const ALERT_FG: Color = Color::Rgb(255, 255, 255);

/// Full-screen red page for errors that end a command.
pub struct ErrorScreen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl ErrorScreen {
    /// Creates a new error screen and enters alternate screen mode.
    ///
    /// # Errors
    /// - If terminal cannot be initialized
    /// - If raw mode cannot be enabled
    /// - If alternate screen cannot be entered
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(ErrorScreen { terminal })
    }

    /// Shows `error_message` centered on a red screen until a key is pressed.
    ///
    /// # Errors
    /// - If terminal rendering fails
    pub fn show_error(&mut self, error_message: &str) -> anyhow::Result<()> {
        loop {
            self.terminal.draw(|frame| {
                let area = frame.area();
                frame.render_widget(Block::default().style(Style::default().bg(ALERT_BG)), area);

                let padding_x = area.width / 10;
                let text = Text::styled(error_message, Style::default().fg(ALERT_FG).bg(ALERT_BG));
                let paragraph = Paragraph::new(text)
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true });

                let centered_area = Rect {
                    x: area.x + padding_x,
                    y: area.y + area.height / 3,
                    width: area.width.saturating_sub(padding_x * 2),
                    height: area.height - area.height / 3,
                };
                frame.render_widget(paragraph, centered_area);
            })?;

            if event::poll(std::time::Duration::from_millis(100))? {
                if let Event::Key(_) = event::read()? {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Cleans up terminal state and exits alternate screen mode.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled
    /// - If cursor cannot be shown
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for ErrorScreen {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Area of `width` x `height` centered in `area`, clipped to it.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Draws a red alert box over whatever is on screen.
///
/// `message` may span several lines; `choices` is shown on the last line.
pub fn render_alert(frame: &mut Frame, area: Rect, title: &str, message: &str, choices: &str) {
    let longest = message
        .lines()
        .chain(std::iter::once(choices))
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0) as u16;
    let lines = message.lines().count() as u16;
    let alert_area = centered(area, longest.saturating_add(6), lines + 5);

    let block = Block::default()
        .title(format!(" {title} "))
        .borders(Borders::ALL)
        .padding(Padding::horizontal(2))
        .style(Style::default().bg(ALERT_BG).fg(ALERT_FG));

    let mut text = Text::from(message);
    text.push_line(Line::default());
    text.push_line(Line::from(choices).bold());

    frame.render_widget(Clear, alert_area);
    frame.render_widget(
        Paragraph::new(text)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        alert_area,
    );
}
