//! Terminal browser for exported artifacts.
//!
//! Artifacts are grouped under their session, newest session first. Tab
//! narrows the list to point clouds or stills; the footer shows the size and
//! location of the highlighted artifact. Enter returns its path so the
//! caller can open it.

use crate::export::ArtifactKind;
use crate::history::ExportEntry;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, HighlightSpacing, List, ListItem, ListState, Padding, Paragraph},
};
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

const BG: Color = Color::Rgb(0, 0, 0);
const FG: Color = Color::Rgb(255, 255, 255);
const DIM_FG: Color = Color::Rgb(100, 100, 100);
const HIGHLIGHT_BG: Color = Color::Rgb(20, 20, 20);
const SESSION_FG: Color = Color::Rgb(185, 207, 212);
const MISSING_FG: Color = Color::Rgb(200, 90, 90);

/// Which artifacts the list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    PointClouds,
    /// Color and depth snapshots
    Stills,
}

impl KindFilter {
    fn next(self) -> Self {
        match self {
            Self::All => Self::PointClouds,
            Self::PointClouds => Self::Stills,
            Self::Stills => Self::All,
        }
    }

    fn admits(self, kind: ArtifactKind) -> bool {
        match self {
            Self::All => true,
            Self::PointClouds => kind == ArtifactKind::PointCloud,
            Self::Stills => kind != ArtifactKind::PointCloud,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::All => " All exports ",
            Self::PointClouds => " Point clouds ",
            Self::Stills => " Snapshots ",
        }
    }
}

/// One line of the list: a session heading or an artifact under it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Row {
    Session { name: String, artifacts: usize },
    /// Index into the viewer's entries
    Artifact(usize),
}

/// Groups the entries `filter` admits by session. Sessions keep the order
/// in which they first appear, as do artifacts within a session.
fn build_rows(entries: &[ExportEntry], filter: KindFilter) -> Vec<Row> {
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        if !filter.admits(entry.kind) {
            continue;
        }
        match groups.iter_mut().find(|(session, _)| *session == entry.session) {
            Some((_, members)) => members.push(index),
            None => groups.push((entry.session.as_str(), vec![index])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(session, members)| {
            let heading = Row::Session {
                name: session.to_string(),
                artifacts: members.len(),
            };
            std::iter::once(heading).chain(members.into_iter().map(Row::Artifact))
        })
        .collect()
}

/// Nearest artifact row after (or before) `from`, skipping headings.
/// Stays put at either end.
fn step_selection(rows: &[Row], from: Option<usize>, forward: bool) -> Option<usize> {
    let is_artifact = |i: &usize| matches!(rows[*i], Row::Artifact(_));
    let found = match (from, forward) {
        (None, _) => (0..rows.len()).find(is_artifact),
        (Some(at), true) => (at + 1..rows.len()).find(is_artifact),
        (Some(at), false) => (0..at).rev().find(is_artifact),
    };
    found.or(from)
}

/// Human-readable file size.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Footer text for the highlighted artifact.
fn describe(entry: &ExportEntry) -> String {
    let mut parts = vec![entry.kind.to_string(), format_size(entry.bytes)];
    if let Some(points) = entry.point_count {
        parts.push(format!("{points} points"));
    }
    parts.push(entry.path.display().to_string());
    parts.join("  ·  ")
}

/// Interactive viewer for export history entries.
pub struct HistoryViewer {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    entries: Vec<ExportEntry>,
    /// Whether each entry's file is still on disk
    present: Vec<bool>,
    filter: KindFilter,
    rows: Vec<Row>,
    list_state: ListState,
}

impl HistoryViewer {
    /// Takes over the terminal. `entries` are expected newest first.
    pub fn new(entries: Vec<ExportEntry>) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let present = entries.iter().map(|entry| entry.path.exists()).collect();
        let mut viewer = Self {
            terminal,
            entries,
            present,
            filter: KindFilter::default(),
            rows: Vec::new(),
            list_state: ListState::default(),
        };
        viewer.apply_filter(KindFilter::default());
        Ok(viewer)
    }

    fn apply_filter(&mut self, filter: KindFilter) {
        self.filter = filter;
        self.rows = build_rows(&self.entries, filter);
        self.list_state.select(step_selection(&self.rows, None, true));
    }

    fn selected_entry(&self) -> Option<&ExportEntry> {
        match self.rows.get(self.list_state.selected()?)? {
            Row::Artifact(index) => self.entries.get(*index),
            Row::Session { .. } => None,
        }
    }

    /// Runs the viewer loop, returning the path chosen for opening.
    pub fn run(&mut self) -> Result<Option<PathBuf>> {
        tracing::debug!("History viewer started with {} entries", self.entries.len());

        let chosen = loop {
            self.draw()?;
            if !event::poll(Duration::from_millis(250))? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if let Some(outcome) = self.handle_key(key) {
                break outcome;
            }
        };

        self.cleanup()?;
        Ok(chosen)
    }

    /// `Some` ends the loop with the given choice.
    fn handle_key(&mut self, key: KeyEvent) -> Option<Option<PathBuf>> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Some(None),
            KeyCode::Up | KeyCode::Char('k') => {
                let at = step_selection(&self.rows, self.list_state.selected(), false);
                self.list_state.select(at);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let at = step_selection(&self.rows, self.list_state.selected(), true);
                self.list_state.select(at);
            }
            KeyCode::Tab => {
                self.apply_filter(self.filter.next());
                tracing::debug!("History filter: {:?}", self.filter);
            }
            KeyCode::Enter => {
                let entry = self.selected_entry()?;
                tracing::info!("Opening {} from history", entry.kind);
                return Some(Some(entry.path.clone()));
            }
            _ => {}
        }
        None
    }

    fn list_items(&self) -> Vec<ListItem<'static>> {
        self.rows
            .iter()
            .map(|row| match row {
                Row::Session { name, artifacts } => ListItem::new(Line::from(vec![
                    Span::styled(name.clone(), Style::default().fg(SESSION_FG).bold()),
                    Span::styled(format!("  {artifacts} artifacts"), Style::default().fg(DIM_FG)),
                ])),
                Row::Artifact(index) => {
                    let entry = &self.entries[*index];
                    let mut spans = vec![
                        Span::raw("  "),
                        Span::styled(
                            entry.created_at.format("%H:%M:%S").to_string(),
                            Style::default().fg(DIM_FG),
                        ),
                        Span::raw("  "),
                        Span::styled(entry.kind.to_string(), Style::default().fg(FG)),
                    ];
                    if let Some(points) = entry.point_count {
                        spans.push(Span::styled(format!("  {points} pts"), Style::default().fg(DIM_FG)));
                    }
                    if !self.present[*index] {
                        spans.push(Span::styled("  missing", Style::default().fg(MISSING_FG)));
                    }
                    ListItem::new(Line::from(spans))
                }
            })
            .collect()
    }

    fn draw(&mut self) -> Result<()> {
        let items = self.list_items();
        let title = self.filter.title();
        let detail = self
            .selected_entry()
            .map(describe)
            .unwrap_or_else(|| "nothing to show for this filter".to_string());
        let list_state = &mut self.list_state;

        self.terminal.draw(|frame| {
            let outer = Block::default()
                .padding(Padding::uniform(1))
                .style(Style::default().fg(FG).bg(BG));
            let area = frame.area();
            let inner = outer.inner(area);
            frame.render_widget(outer, area);

            let [list_area, detail_area, help_area] = Layout::vertical([
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .areas(inner);

            let list = List::new(items)
                .block(Block::default().title(title).borders(Borders::ALL))
                .highlight_style(Style::default().bg(HIGHLIGHT_BG))
                .highlight_symbol("> ")
                .highlight_spacing(HighlightSpacing::Always);
            frame.render_stateful_widget(list, list_area, list_state);

            frame.render_widget(Paragraph::new(detail).style(Style::default().fg(DIM_FG)), detail_area);
            frame.render_widget(
                Paragraph::new("↑↓ select, tab filter, ↵ open, esc/q exit")
                    .alignment(Alignment::Center)
                    .style(Style::default().fg(DIM_FG)),
                help_area,
            );
        })?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for HistoryViewer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn entry(kind: ArtifactKind, session: &str) -> ExportEntry {
        ExportEntry {
            id: 1,
            kind,
            path: PathBuf::from("/tmp/x"),
            session: session.to_string(),
            point_count: (kind == ArtifactKind::PointCloud).then_some(300),
            bytes: 4096,
            created_at: Local::now(),
        }
    }

    fn entries() -> Vec<ExportEntry> {
        vec![
            entry(ArtifactKind::PointCloud, "20240102-040000"),
            entry(ArtifactKind::Snapshot, "20240102-040000"),
            entry(ArtifactKind::Snapshot, "snapshots"),
            entry(ArtifactKind::DepthSnapshot, "20240102-040000"),
            entry(ArtifactKind::PointCloud, "20240102-030000"),
        ]
    }

    fn heading(name: &str, artifacts: usize) -> Row {
        Row::Session {
            name: name.to_string(),
            artifacts,
        }
    }

    #[test]
    fn test_rows_group_by_session_in_first_seen_order() {
        let rows = build_rows(&entries(), KindFilter::All);
        assert_eq!(
            rows,
            vec![
                heading("20240102-040000", 3),
                Row::Artifact(0),
                Row::Artifact(1),
                Row::Artifact(3),
                heading("snapshots", 1),
                Row::Artifact(2),
                heading("20240102-030000", 1),
                Row::Artifact(4),
            ]
        );
    }

    #[test]
    fn test_filters_drop_empty_sessions() {
        let clouds = build_rows(&entries(), KindFilter::PointClouds);
        assert_eq!(clouds.len(), 4);
        assert!(!clouds.contains(&heading("snapshots", 1)));

        let stills = build_rows(&entries(), KindFilter::Stills);
        assert_eq!(
            stills,
            vec![
                heading("20240102-040000", 2),
                Row::Artifact(1),
                Row::Artifact(3),
                heading("snapshots", 1),
                Row::Artifact(2),
            ]
        );
        assert_eq!(KindFilter::Stills.next(), KindFilter::All);
    }

    #[test]
    fn test_selection_skips_headings() {
        let rows = build_rows(&entries(), KindFilter::All);
        assert_eq!(step_selection(&rows, None, true), Some(1));
        assert_eq!(step_selection(&rows, Some(3), true), Some(5));
        assert_eq!(step_selection(&rows, Some(5), false), Some(3));
        assert_eq!(step_selection(&rows, Some(7), true), Some(7));
        assert_eq!(step_selection(&rows, Some(1), false), Some(1));
        assert_eq!(step_selection(&[], None, true), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(4096), "4.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn test_describe_includes_points_for_clouds_only() {
        let cloud = describe(&entry(ArtifactKind::PointCloud, "s"));
        assert!(cloud.contains("300 points"));
        assert!(cloud.contains("4.0 KB"));
        assert!(!describe(&entry(ArtifactKind::Snapshot, "s")).contains("points"));
    }
}
