//! Export history storage and retrieval using SQLite.
//!
//! Every artifact the exporter finalizes is recorded with its kind, path and
//! session so earlier captures can be listed and reopened.

use crate::export::{ArtifactKind, ExportArtifact};
use anyhow::Result;
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// File name of the history database inside the data directory.
pub const DATABASE_FILE: &str = "exports.db";

/// A recorded export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    pub id: i64,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub session: String,
    pub point_count: Option<usize>,
    pub bytes: u64,
    pub created_at: DateTime<Local>,
}

/// Manages the export history database.
pub struct ExportHistory {
    database_path: PathBuf,
    /// Opened on first use
    connection: Option<Connection>,
}

impl ExportHistory {
    /// Creates a history handle for the given data directory.
    ///
    /// The database is not touched until the first query.
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            database_path: data_dir.join(DATABASE_FILE),
            connection: None,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Opens the database and creates the table if necessary.
    ///
    /// # Errors
    /// - If the data directory cannot be created
    /// - If the database file cannot be opened
    /// - If table creation fails
    fn get_connection(&mut self) -> Result<&Connection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                if let Some(parent) = self.database_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let connection = Connection::open(&self.database_path)?;
                connection.execute(
                    "CREATE TABLE IF NOT EXISTS exports (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        kind TEXT NOT NULL,
                        path TEXT NOT NULL,
                        session TEXT NOT NULL,
                        point_count INTEGER,
                        bytes INTEGER NOT NULL,
                        created_at TEXT NOT NULL
                    )",
                    [],
                )?;
                connection
            }
        };
        let connection: &Connection = self.connection.insert(connection);
        Ok(connection)
    }

    /// Records a finalized artifact.
    ///
    /// # Errors
    /// - If database connection fails
    /// - If insertion fails
    pub fn record(&mut self, artifact: &ExportArtifact) -> Result<i64> {
        let connection = self.get_connection()?;
        connection.execute(
            "INSERT INTO exports (kind, path, session, point_count, bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.kind.as_str(),
                artifact.path.to_string_lossy(),
                artifact.session,
                artifact.point_count.map(|n| n as i64),
                artifact.bytes as i64,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        let id = connection.last_insert_rowid();

        tracing::debug!("Export #{} recorded: {}", id, artifact.path.display());
        Ok(id)
    }

    /// All exports, most recent first.
    ///
    /// # Errors
    /// - If database connection fails
    /// - If query execution fails
    /// - If a stored row cannot be decoded
    pub fn get_all_exports(&mut self) -> Result<Vec<ExportEntry>> {
        let connection = self.get_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, kind, path, session, point_count, bytes, created_at
             FROM exports ORDER BY created_at DESC, id DESC",
        )?;
        let entries = statement
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Most recent export of `kind`, if any.
    pub fn latest(&mut self, kind: ArtifactKind) -> Result<Option<ExportEntry>> {
        let connection = self.get_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, kind, path, session, point_count, bytes, created_at
             FROM exports WHERE kind = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )?;
        let entry = statement
            .query_row(params![kind.as_str()], entry_from_row)
            .optional()?;
        Ok(entry)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ExportEntry> {
    let kind_str = row.get::<_, String>(1)?;
    let kind = ArtifactKind::parse(&kind_str)
        .ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("Unknown kind {kind_str}")))?;
    let timestamp_str = row.get::<_, String>(6)?;
    let created_at = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|_| rusqlite::Error::InvalidParameterName("Invalid timestamp format".to_string()))?;

    Ok(ExportEntry {
        id: row.get(0)?,
        kind,
        path: PathBuf::from(row.get::<_, String>(2)?),
        session: row.get(3)?,
        point_count: row.get::<_, Option<i64>>(4)?.map(|n| n as usize),
        bytes: row.get::<_, i64>(5)? as u64,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn artifact(kind: ArtifactKind, path: &str, age_secs: i64) -> ExportArtifact {
        ExportArtifact {
            kind,
            path: PathBuf::from(path),
            session: "20240102-030405".to_string(),
            point_count: (kind == ArtifactKind::PointCloud).then_some(300),
            bytes: 4_700,
            created_at: Local::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_record_and_list_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let mut history = ExportHistory::new(dir.path()).unwrap();
        history.record(&artifact(ArtifactKind::PointCloud, "/a/pointcloud.ply", 60)).unwrap();
        history.record(&artifact(ArtifactKind::Snapshot, "/a/snapshot.png", 0)).unwrap();

        let entries = history.get_all_exports().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ArtifactKind::Snapshot);
        assert_eq!(entries[0].point_count, None);
        assert_eq!(entries[1].path, PathBuf::from("/a/pointcloud.ply"));
        assert_eq!(entries[1].point_count, Some(300));
        assert!(history.database_path().is_file());
    }

    #[test]
    fn test_latest_filters_by_kind() {
        let dir = TempDir::new().unwrap();
        let mut history = ExportHistory::new(dir.path()).unwrap();
        assert!(history.latest(ArtifactKind::PointCloud).unwrap().is_none());

        history.record(&artifact(ArtifactKind::PointCloud, "/old.ply", 120)).unwrap();
        history.record(&artifact(ArtifactKind::PointCloud, "/new.ply", 10)).unwrap();
        history.record(&artifact(ArtifactKind::Snapshot, "/snap.png", 0)).unwrap();

        let latest = history.latest(ArtifactKind::PointCloud).unwrap().unwrap();
        assert_eq!(latest.path, PathBuf::from("/new.ply"));
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        ExportHistory::new(dir.path())
            .unwrap()
            .record(&artifact(ArtifactKind::DepthSnapshot, "/d.png", 0))
            .unwrap();

        let mut reopened = ExportHistory::new(dir.path()).unwrap();
        assert_eq!(reopened.get_all_exports().unwrap().len(), 1);
    }
}
