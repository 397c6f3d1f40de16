//! Terminal user interface for a live capture.
//!
//! Shows the accumulation rate, a top-down view of the cloud so far, a
//! status footer and, when the frame source fails, an alert offering a
//! restart.

use crate::error::FrameSourceError;
use crate::orchestrator::CaptureStatus;
use crate::recording::{PointCloudSnapshot, RecorderState, SnapshotIndicator};
use crate::tasks::TaskCounts;
use crate::ui::render_alert;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    widgets::{
        canvas::{Canvas, Points},
        Block, Paragraph, Sparkline,
    },
};
use std::io::{stdout, Stdout};
use std::time::{Duration, Instant};

/// Most points drawn in the cloud view.
const MAX_DRAWN_POINTS: usize = 6000;

const FG: Color = Color::Rgb(185, 207, 212);
const BG: Color = Color::Rgb(0, 0, 0);

/// Operator command read from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    /// No key or an unbound key
    Continue,
    /// Start or stop a session (`r`, Enter)
    ToggleRecord,
    /// Capture a still on the next frame (`s`, Space)
    Snapshot,
    /// Restart a failed frame source (`R`)
    RestartSource,
    /// Leave, exporting an active session (`q`, Esc, Ctrl+C)
    Quit,
}

/// Maps a key press to a command.
pub fn command_for(key: KeyEvent) -> CaptureCommand {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => CaptureCommand::Quit,
        KeyCode::Char('r') | KeyCode::Enter => CaptureCommand::ToggleRecord,
        KeyCode::Char('s') | KeyCode::Char(' ') => CaptureCommand::Snapshot,
        KeyCode::Char('R') => CaptureCommand::RestartSource,
        KeyCode::Char('q') | KeyCode::Esc => CaptureCommand::Quit,
        _ => CaptureCommand::Continue,
    }
}

/// Everything one frame of the UI shows.
pub struct CaptureView<'a> {
    pub status: &'a CaptureStatus,
    pub tasks: TaskCounts,
    pub failure: Option<&'a FrameSourceError>,
    pub can_restart: bool,
    pub message: Option<&'a str>,
}

/// Screen state kept between frames.
#[derive(Debug, Default)]
struct ViewState {
    rate_history: Vec<u64>,
    cloud: Vec<(f64, f64)>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
    recording_for: Option<Duration>,
}

impl ViewState {
    /// Projects the cloud onto the ground plane, thinned to `MAX_DRAWN_POINTS`.
    fn set_cloud(&mut self, cloud: &PointCloudSnapshot) {
        let step = (cloud.len() / MAX_DRAWN_POINTS).max(1);
        self.cloud = cloud
            .iter()
            .step_by(step)
            .map(|p| (p.position[0] as f64, -(p.position[2] as f64)))
            .collect();

        if let Some((min, max)) = cloud.bounds() {
            let pad = 0.1;
            self.x_bounds = [min[0] as f64 - pad, max[0] as f64 + pad];
            self.y_bounds = [-(max[2] as f64) - pad, -(min[2] as f64) + pad];
        }
    }
}

fn render(frame: &mut Frame, state: &ViewState, view: &CaptureView) {
    let area = frame.area();
    let footer_height = 1;
    let content_height = area.height.saturating_sub(footer_height);
    let rate_height = content_height / 4;

    let rate_area = Rect {
        height: rate_height,
        ..area
    };
    let rate = Sparkline::default()
        .data(&state.rate_history)
        .style(Style::default().bg(BG).fg(Color::Rgb(206, 224, 220)));
    frame.render_widget(rate, rate_area);

    let cloud_area = Rect {
        y: area.y + rate_height,
        height: content_height.saturating_sub(rate_height),
        ..area
    };
    let points = Points {
        coords: &state.cloud,
        color: FG,
    };
    let canvas = Canvas::default()
        .block(Block::default().style(Style::default().bg(BG)))
        .marker(symbols::Marker::Braille)
        .x_bounds(state.x_bounds)
        .y_bounds(state.y_bounds)
        .paint(|ctx| ctx.draw(&points));
    frame.render_widget(canvas, cloud_area);

    let footer_area = Rect {
        y: area.y + content_height,
        height: footer_height,
        ..area
    };
    frame.render_widget(
        Paragraph::new(footer_line(state, view)).style(Style::default().fg(FG).bg(BG)),
        footer_area,
    );

    if let Some(failure) = view.failure {
        let choices = if view.can_restart {
            "R restart source   q quit"
        } else {
            "q quit"
        };
        render_alert(frame, area, "Frame source failed", &failure.message(), choices);
    }
}

fn footer_line<'a>(state: &ViewState, view: &'a CaptureView) -> Line<'a> {
    let status = view.status;
    let indicator = match status.state {
        RecorderState::Recording => Span::styled("● REC ", Style::default().fg(Color::Red)),
        RecorderState::Idle => Span::styled("○ idle ", Style::default().fg(FG)),
    };

    let mut spans = vec![indicator];
    if let Some(elapsed) = state.recording_for {
        let secs = elapsed.as_secs();
        spans.push(Span::raw(format!("{}:{:02} / ", secs / 60, secs % 60)));
    }
    spans.push(Span::raw(format!(
        "{} pts / {} frames",
        status.point_count, status.frames_accumulated
    )));
    if status.snapshot == SnapshotIndicator::Armed {
        spans.push(Span::styled(" / ◉ snap", Style::default().fg(Color::Yellow)));
    }
    let in_flight = view.tasks.in_flight();
    if in_flight > 0 {
        spans.push(Span::raw(format!(" / saving {in_flight}")));
    }
    if let Some(message) = view.message {
        spans.push(Span::raw(" / "));
        spans.push(Span::raw(message));
    }
    Line::from(spans)
}

/// Terminal UI for a capture.
pub struct DepthcapTui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    state: ViewState,
    last_sample_time: Instant,
    sample_interval: Duration,
    last_point_count: usize,
    terminal_width: usize,
    recording_start_time: Option<Instant>,
}

impl DepthcapTui {
    /// Creates a new TUI instance and enters alternate screen mode.
    ///
    /// # Errors
    /// - If terminal cannot be initialized
    /// - If raw mode cannot be enabled
    /// - If alternate screen cannot be entered
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        let terminal_width = terminal.size()?.width as usize;

        Ok(DepthcapTui {
            terminal,
            state: ViewState {
                rate_history: vec![0; terminal_width],
                x_bounds: [-1.0, 1.0],
                y_bounds: [-1.0, 1.0],
                ..ViewState::default()
            },
            last_sample_time: Instant::now(),
            sample_interval: Duration::from_millis(100),
            last_point_count: 0,
            terminal_width,
            recording_start_time: None,
        })
    }

    /// Replaces the cloud shown in the top-down view.
    pub fn set_cloud(&mut self, cloud: &PointCloudSnapshot) {
        self.state.set_cloud(cloud);
    }

    /// Draws one frame.
    ///
    /// # Errors
    /// - If terminal rendering fails
    pub fn render(&mut self, view: &CaptureView) -> anyhow::Result<()> {
        self.track_recording(view.status);

        if self.last_sample_time.elapsed() >= self.sample_interval {
            let added = view.status.point_count.saturating_sub(self.last_point_count);
            self.state.rate_history.push(added as u64);
            self.last_point_count = view.status.point_count;
            self.last_sample_time = Instant::now();
        }

        self.terminal_width = self.terminal.size()?.width as usize;
        let width = self.terminal_width;
        let history = &mut self.state.rate_history;
        if history.len() > width {
            let excess = history.len() - width;
            history.drain(..excess);
        } else if history.len() < width {
            let missing = width - history.len();
            history.splice(0..0, std::iter::repeat(0).take(missing));
        }

        let state = &self.state;
        self.terminal.draw(|frame| render(frame, state, view))?;
        Ok(())
    }

    fn track_recording(&mut self, status: &CaptureStatus) {
        match (status.state, self.recording_start_time) {
            (RecorderState::Recording, None) => {
                self.recording_start_time = Some(Instant::now());
                self.last_point_count = 0;
                self.state.cloud.clear();
            }
            (RecorderState::Idle, Some(_)) => self.recording_start_time = None,
            _ => {}
        }
        self.state.recording_for = self.recording_start_time.map(|t| t.elapsed());
    }

    /// Reads one key press, waiting at most a frame's time.
    ///
    /// # Errors
    /// - If event polling fails
    pub fn handle_input(&mut self) -> anyhow::Result<CaptureCommand> {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                let command = command_for(key);
                if command != CaptureCommand::Continue {
                    tracing::debug!("Key {:?}: {:?}", key.code, command);
                }
                return Ok(command);
            }
        }
        Ok(CaptureCommand::Continue)
    }

    /// Cleans up terminal state and exits alternate screen mode.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled
    /// - If cursor cannot be shown
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            crossterm::terminal::LeaveAlternateScreen
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{ColoredPoint, PointBuffer};
    use ratatui::backend::TestBackend;

    fn screen_text(status: &CaptureStatus, failure: Option<&FrameSourceError>, can_restart: bool) -> String {
        let state = ViewState {
            rate_history: vec![0; 80],
            x_bounds: [-1.0, 1.0],
            y_bounds: [-1.0, 1.0],
            recording_for: Some(Duration::from_secs(75)),
            ..ViewState::default()
        };
        let view = CaptureView {
            status,
            tasks: TaskCounts {
                started: 3,
                finished: 1,
            },
            failure,
            can_restart,
            message: Some("saved pointcloud.ply"),
        };
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|frame| render(frame, &state, &view)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn test_key_bindings() {
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(command_for(key(KeyCode::Char('r'))), CaptureCommand::ToggleRecord);
        assert_eq!(command_for(key(KeyCode::Enter)), CaptureCommand::ToggleRecord);
        assert_eq!(command_for(key(KeyCode::Char(' '))), CaptureCommand::Snapshot);
        assert_eq!(command_for(key(KeyCode::Char('R'))), CaptureCommand::RestartSource);
        assert_eq!(command_for(key(KeyCode::Esc)), CaptureCommand::Quit);
        assert_eq!(
            command_for(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            CaptureCommand::Quit
        );
        assert_eq!(command_for(key(KeyCode::Char('x'))), CaptureCommand::Continue);
    }

    #[test]
    fn test_footer_shows_recording_state() {
        let status = CaptureStatus {
            state: RecorderState::Recording,
            point_count: 4200,
            frames_accumulated: 42,
            snapshot: SnapshotIndicator::Armed,
            ..CaptureStatus::default()
        };
        let text = screen_text(&status, None, false);
        assert!(text.contains("REC"));
        assert!(text.contains("1:15"));
        assert!(text.contains("4200 pts / 42 frames"));
        assert!(text.contains("snap"));
        assert!(text.contains("saving 2"));
        assert!(text.contains("saved pointcloud.ply"));
    }

    #[test]
    fn test_failure_alert_offers_restart_only_when_recoverable() {
        let status = CaptureStatus::default();
        let error = FrameSourceError::new("Session interrupted");
        assert!(screen_text(&status, Some(&error), true).contains("R restart source"));

        let fatal = FrameSourceError::new("No sensor").fatal();
        let text = screen_text(&status, Some(&fatal), false);
        assert!(text.contains("No sensor"));
        assert!(!text.contains("R restart source"));
    }

    #[test]
    fn test_cloud_projection_is_thinned() {
        let mut buffer = PointBuffer::new();
        let points: Vec<ColoredPoint> = (0..MAX_DRAWN_POINTS * 3)
            .map(|i| ColoredPoint {
                position: [i as f32 * 0.001, 0.0, -1.0],
                color: [255, 255, 255],
            })
            .collect();
        buffer.extend_from_slice(&points);

        let mut state = ViewState::default();
        state.set_cloud(&buffer.snapshot());
        assert_eq!(state.cloud.len(), MAX_DRAWN_POINTS);
        assert!(state.x_bounds[0] < 0.0 && state.x_bounds[1] > 17.0);
        assert_eq!(state.cloud[0], (0.0, 1.0));
    }
}
