//! SQLite profile store (`profiles/<name>/state.db`).
//!
//! Several processes share this file: interactive frontends register
//! heartbeats and own the status column while they are alive, and the
//! notifier writes statuses only when none are.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{GroupRecord, Instance, InstanceRow, StatusRow, Storage};
use crate::config::InstanceConfig;
use crate::error::{DeckError, Result};
use crate::instance::TmuxInstance;
use crate::status::SessionStatus;
use crate::tmux::TmuxAdapter;

/// Heartbeats older than this do not count as alive.
const HEARTBEAT_ALIVE_SECS: i64 = 30;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS instances (
    id                TEXT PRIMARY KEY,
    title             TEXT NOT NULL,
    project_path      TEXT NOT NULL,
    group_path        TEXT NOT NULL DEFAULT 'my-sessions',
    sort_order        INTEGER NOT NULL DEFAULT 0,
    command           TEXT NOT NULL DEFAULT '',
    wrapper           TEXT NOT NULL DEFAULT '',
    tool              TEXT NOT NULL DEFAULT 'shell',
    status            TEXT NOT NULL DEFAULT 'error',
    tmux_session      TEXT NOT NULL DEFAULT '',
    created_at        INTEGER NOT NULL,
    last_accessed     INTEGER NOT NULL DEFAULT 0,
    parent_session_id TEXT NOT NULL DEFAULT '',
    worktree_path     TEXT NOT NULL DEFAULT '',
    worktree_repo     TEXT NOT NULL DEFAULT '',
    worktree_branch   TEXT NOT NULL DEFAULT '',
    tool_data         TEXT NOT NULL DEFAULT '{}',
    acknowledged      INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS groups (
    path         TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    expanded     INTEGER NOT NULL DEFAULT 1,
    sort_order   INTEGER NOT NULL DEFAULT 0,
    default_path TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS instance_heartbeats (
    pid        INTEGER PRIMARY KEY,
    started    INTEGER NOT NULL,
    heartbeat  INTEGER NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0
);
";

pub struct SqliteStorage {
    path: PathBuf,
    conn: Connection,
    tmux: Arc<dyn TmuxAdapter>,
    windows: InstanceConfig,
}

impl SqliteStorage {
    pub fn open(
        path: &Path,
        tmux: Arc<dyn TmuxAdapter>,
        windows: InstanceConfig,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| DeckError::io("creating profile dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|err| DeckError::sqlite("opening profile db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| DeckError::sqlite("enabling WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| DeckError::sqlite("setting synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| DeckError::sqlite("setting busy_timeout", err))?;
        conn.execute_batch(SCHEMA)
            .map_err(|err| DeckError::sqlite("creating schema", err))?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            tmux,
            windows,
        })
    }

    pub fn load_instance_rows(&self) -> Result<Vec<InstanceRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, project_path, group_path, sort_order, command, tool, \
                        status, tmux_session, created_at, parent_session_id, acknowledged \
                 FROM instances ORDER BY sort_order, id",
            )
            .map_err(|err| DeckError::sqlite("preparing instances query", err))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(InstanceRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    project_path: row.get(2)?,
                    group_path: row.get(3)?,
                    sort_order: row.get(4)?,
                    command: row.get(5)?,
                    tool: row.get(6)?,
                    status: SessionStatus::parse(&row.get::<_, String>(7)?),
                    tmux_session: row.get(8)?,
                    created_at: row.get(9)?,
                    parent_session_id: row.get(10)?,
                    acknowledged: row.get::<_, i64>(11)? != 0,
                })
            })
            .map_err(|err| DeckError::sqlite("reading instance rows", err))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| DeckError::sqlite("decoding instance row", err))
    }

    pub fn load_groups(&self) -> Result<Vec<GroupRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT path, name, expanded, sort_order, default_path \
                 FROM groups ORDER BY sort_order, path",
            )
            .map_err(|err| DeckError::sqlite("preparing groups query", err))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(GroupRecord {
                    path: row.get(0)?,
                    name: row.get(1)?,
                    expanded: row.get::<_, i64>(2)? != 0,
                    sort_order: row.get(3)?,
                    default_path: row.get(4)?,
                })
            })
            .map_err(|err| DeckError::sqlite("reading group rows", err))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| DeckError::sqlite("decoding group row", err))
    }

    pub fn upsert_instance(&self, row: &InstanceRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO instances \
                    (id, title, project_path, group_path, sort_order, command, tool, status, \
                     tmux_session, created_at, parent_session_id, acknowledged) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                 ON CONFLICT(id) DO UPDATE SET \
                    title = excluded.title, \
                    project_path = excluded.project_path, \
                    group_path = excluded.group_path, \
                    sort_order = excluded.sort_order, \
                    command = excluded.command, \
                    tool = excluded.tool, \
                    status = excluded.status, \
                    tmux_session = excluded.tmux_session, \
                    parent_session_id = excluded.parent_session_id, \
                    acknowledged = excluded.acknowledged",
                params![
                    row.id,
                    row.title,
                    row.project_path,
                    row.group_path,
                    row.sort_order,
                    row.command,
                    row.tool,
                    row.status.as_str(),
                    row.tmux_session,
                    row.created_at,
                    row.parent_session_id,
                    row.acknowledged as i64,
                ],
            )
            .map_err(|err| DeckError::sqlite("upserting instance", err))?;
        Ok(())
    }

    pub fn upsert_group(&self, group: &GroupRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO groups (path, name, expanded, sort_order, default_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group.path,
                    group.name,
                    group.expanded as i64,
                    group.sort_order,
                    group.default_path,
                ],
            )
            .map_err(|err| DeckError::sqlite("upserting group", err))?;
        Ok(())
    }

    /// Records a frontend heartbeat at `heartbeat` (epoch seconds).
    pub fn record_heartbeat(&self, pid: u32, heartbeat: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO instance_heartbeats (pid, started, heartbeat, is_primary) \
                 VALUES (?1, ?2, ?2, 0) \
                 ON CONFLICT(pid) DO UPDATE SET heartbeat = excluded.heartbeat",
                params![pid, heartbeat],
            )
            .map_err(|err| DeckError::sqlite("recording heartbeat", err))?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn load_with_groups(&self) -> Result<(Vec<Box<dyn Instance>>, Vec<GroupRecord>)> {
        let instances = self
            .load_instance_rows()?
            .into_iter()
            .map(|row| {
                Box::new(TmuxInstance::new(
                    row,
                    Arc::clone(&self.tmux),
                    self.windows.clone(),
                )) as Box<dyn Instance>
            })
            .collect();
        Ok((instances, self.load_groups()?))
    }

    fn alive_instance_count(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - HEARTBEAT_ALIVE_SECS;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM instance_heartbeats WHERE heartbeat >= ?1",
                params![cutoff],
                |row| row.get(0),
            )
            .map_err(|err| DeckError::sqlite("counting heartbeats", err))?;
        Ok(count.max(0) as usize)
    }

    fn read_all_statuses(&self) -> Result<HashMap<String, StatusRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, status, tool, acknowledged FROM instances")
            .map_err(|err| DeckError::sqlite("preparing status query", err))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    StatusRow {
                        status: SessionStatus::parse(&row.get::<_, String>(1)?),
                        tool: row.get(2)?,
                        acknowledged: row.get::<_, i64>(3)? != 0,
                    },
                ))
            })
            .map_err(|err| DeckError::sqlite("reading status rows", err))?;

        rows.collect::<std::result::Result<HashMap<_, _>, _>>()
            .map_err(|err| DeckError::sqlite("decoding status row", err))
    }

    fn write_status(&self, id: &str, status: SessionStatus, tool: &str) -> Result<()> {
        let status = status.as_str();
        self.conn
            .execute(
                "UPDATE instances \
                 SET status = ?1, tool = ?2, \
                     acknowledged = CASE WHEN ?1 = 'running' THEN 0 ELSE acknowledged END \
                 WHERE id = ?3",
                params![status, tool, id],
            )
            .map_err(|err| DeckError::sqlite("writing status", err))?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let checkpoint = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
        if let Err(err) = checkpoint {
            debug!(error = %err, path = %self.path.display(), "WAL checkpoint failed");
        }
        let SqliteStorage { conn, .. } = *self;
        conn.close()
            .map_err(|(_, err)| DeckError::sqlite("closing profile db", err))
    }
}
