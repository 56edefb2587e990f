use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recast_core::{
    CommitGroup, CommitHash, CommitRecord, CommitStatus, HashMapping, MappingSource, SessionState,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod maintenance;

pub use maintenance::{ConsistencyProblem, GroupRow, STATE_SNAPSHOT_VERSION, StateSnapshot, StoreStatistics};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored value is invalid: {0}")]
    InvalidValue(String),
    #[error("commit {0} is not known to the store")]
    UnknownCommit(CommitHash),
    #[error("commit {hash} cannot move from {from} to {to}")]
    StatusRegression {
        hash: CommitHash,
        from: CommitStatus,
        to: CommitStatus,
    },
    #[error("unsupported state snapshot version {0}")]
    UnsupportedSnapshot(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub group_id: usize,
    pub message: String,
    pub fallback: bool,
}

/// Everything one replay step changes, written as a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStepRecord {
    pub statuses: Vec<(CommitHash, CommitStatus)>,
    pub mappings: Vec<HashMapping>,
    pub session: SessionState,
}

pub trait Store {
    fn upsert_commit(&self, record: &CommitRecord) -> Result<(), StoreError>;
    fn replace_commits(&self, records: &[CommitRecord]) -> Result<(), StoreError>;
    fn get_commit(&self, hash: &str) -> Result<Option<CommitRecord>, StoreError>;
    fn list_commits(&self) -> Result<Vec<CommitRecord>, StoreError>;
    fn list_commits_by_status(&self, status: CommitStatus)
    -> Result<Vec<CommitRecord>, StoreError>;
    fn update_commit_status(&self, hash: &str, status: CommitStatus) -> Result<(), StoreError>;

    fn save_mapping(&self, old_hash: &str, new_hash: &str) -> Result<(), StoreError>;
    fn mapped_hash(&self, old_hash: &str) -> Result<Option<CommitHash>, StoreError>;
    fn all_mappings(&self) -> Result<Vec<HashMapping>, StoreError>;

    fn save_groups(&self, groups: &[CommitGroup]) -> Result<(), StoreError>;
    fn load_groups(&self) -> Result<Vec<CommitGroup>, StoreError>;
    fn save_group_message(&self, message: &GroupMessage) -> Result<(), StoreError>;
    fn group_messages(&self) -> Result<Vec<GroupMessage>, StoreError>;

    fn save_session(&self, session: &SessionState) -> Result<(), StoreError>;
    fn load_session(&self) -> Result<Option<SessionState>, StoreError>;
    fn clear_session(&self) -> Result<(), StoreError>;
    fn can_resume(&self) -> Result<bool, StoreError>;

    fn record_step(&self, step: &ReplayStepRecord) -> Result<(), StoreError>;
    fn finalize_rewrite(&self, pairs: &[HashMapping], processed: usize) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) the state database. Relative `database` paths are
    /// resolved against `workspace_root`.
    pub fn open(
        workspace_root: impl AsRef<Path>,
        database: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let database = database.as_ref();
        let path = if database.is_absolute() {
            database.to_path_buf()
        } else {
            workspace_root.as_ref().join(database)
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn count_with_status(&self, status: CommitStatus) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn upsert_commit(&self, record: &CommitRecord) -> Result<(), StoreError> {
        insert_commit(&self.conn, record)
    }

    fn replace_commits(&self, records: &[CommitRecord]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM commits", [])?;
        for record in records {
            insert_commit(&tx, record)?;
        }
        tx.commit()?;

        tracing::debug!(commits = records.len(), "replaced scanned commit set");
        Ok(())
    }

    fn get_commit(&self, hash: &str) -> Result<Option<CommitRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE hash = ?1"
        ))?;

        let raw = stmt.query_row(params![hash], read_commit_row).optional()?;
        raw.map(RawCommit::into_record).transpose()
    }

    fn list_commits(&self) -> Result<Vec<CommitRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits ORDER BY commit_date ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map([], read_commit_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(RawCommit::into_record)
            .collect()
    }

    fn list_commits_by_status(
        &self,
        status: CommitStatus,
    ) -> Result<Vec<CommitRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE status = ?1 ORDER BY commit_date ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![status.as_str()], read_commit_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(RawCommit::into_record)
            .collect()
    }

    fn update_commit_status(&self, hash: &str, status: CommitStatus) -> Result<(), StoreError> {
        advance_status(&self.conn, hash, status)
    }

    fn save_mapping(&self, old_hash: &str, new_hash: &str) -> Result<(), StoreError> {
        upsert_mapping(&self.conn, old_hash, new_hash)
    }

    fn mapped_hash(&self, old_hash: &str) -> Result<Option<CommitHash>, StoreError> {
        let new_hash = self
            .conn
            .query_row(
                "SELECT new_hash FROM hash_mapping WHERE old_hash = ?1",
                params![old_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(new_hash)
    }

    fn all_mappings(&self) -> Result<Vec<HashMapping>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT old_hash, new_hash FROM hash_mapping ORDER BY old_hash ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(HashMapping {
                old_hash: row.get(0)?,
                new_hash: row.get(1)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn save_groups(&self, groups: &[CommitGroup]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM commit_groups", [])?;
        tx.execute("DELETE FROM group_messages", [])?;
        for group in groups {
            for (order, (member, similarity)) in
                group.members.iter().zip(&group.similarities).enumerate()
            {
                insert_group_row(
                    &tx,
                    &GroupRow {
                        group_id: group.id,
                        commit_hash: member.hash.clone(),
                        group_order: order,
                        similarity: *similarity,
                    },
                )?;
            }
        }
        tx.commit()?;

        tracing::debug!(groups = groups.len(), "saved commit groups");
        Ok(())
    }

    fn load_groups(&self) -> Result<Vec<CommitGroup>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT g.group_id, g.similarity,
                   c.hash, c.parent_hash, c.message, c.diff_content, c.modified_files,
                   c.author, c.author_email, c.commit_date, c.tree_hash, c.status
            FROM commit_groups g
            JOIN commits c ON c.hash = g.commit_hash
            ORDER BY g.group_id ASC, g.group_order ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let group_id: i64 = row.get(0)?;
            let similarity: f64 = row.get(1)?;
            let raw = read_commit_columns(row, 2)?;
            Ok((group_id as usize, similarity, raw))
        })?;

        let mut groups: Vec<CommitGroup> = Vec::new();
        for row in rows {
            let (group_id, similarity, raw) = row?;
            let record = raw.into_record()?;
            match groups.last_mut() {
                Some(group) if group.id == group_id => {
                    group.members.push(record);
                    group.similarities.push(similarity);
                }
                _ => groups.push(CommitGroup {
                    id: group_id,
                    members: vec![record],
                    similarities: vec![similarity],
                }),
            }
        }

        Ok(groups)
    }

    fn save_group_message(&self, message: &GroupMessage) -> Result<(), StoreError> {
        insert_group_message(&self.conn, message)
    }

    fn group_messages(&self) -> Result<Vec<GroupMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT group_id, message, fallback FROM group_messages ORDER BY group_id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let group_id: i64 = row.get(0)?;
            Ok(GroupMessage {
                group_id: group_id as usize,
                message: row.get(1)?,
                fallback: row.get(2)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn save_session(&self, session: &SessionState) -> Result<(), StoreError> {
        write_session(&self.conn, session)
    }

    fn load_session(&self) -> Result<Option<SessionState>, StoreError> {
        let session = self
            .conn
            .query_row(
                r#"
                SELECT branch, backup_branch, current_position, total_commits,
                       processed_commits, scratch_ref, scratch_tip
                FROM session_state
                WHERE id = 1
                "#,
                [],
                |row| {
                    let total: i64 = row.get(3)?;
                    let processed: i64 = row.get(4)?;
                    Ok(SessionState {
                        branch: row.get(0)?,
                        backup_branch: row.get(1)?,
                        current_position: row.get(2)?,
                        total_commits: total as usize,
                        processed_commits: processed as usize,
                        scratch_ref: row.get(5)?,
                        scratch_tip: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM session_state", [])?;
        Ok(())
    }

    fn can_resume(&self) -> Result<bool, StoreError> {
        let Some(session) = self.load_session()? else {
            return Ok(false);
        };
        if self.count_with_status(CommitStatus::Pending)? > 0 {
            return Ok(true);
        }
        // Fully replayed but the branch was never swapped.
        Ok(session.scratch_tip.is_some() && self.count_with_status(CommitStatus::Rewritten)? > 0)
    }

    fn record_step(&self, step: &ReplayStepRecord) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for (hash, status) in &step.statuses {
            advance_status(&tx, hash, *status)?;
        }
        for mapping in &step.mappings {
            upsert_mapping(&tx, &mapping.old_hash, &mapping.new_hash)?;
        }
        write_session(&tx, &step.session)?;
        tx.commit()?;
        Ok(())
    }

    fn finalize_rewrite(&self, pairs: &[HashMapping], processed: usize) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for pair in pairs {
            upsert_mapping(&tx, &pair.old_hash, &pair.new_hash)?;
        }
        let promoted = tx.execute(
            "UPDATE commits SET status = ?1 WHERE status = ?2",
            params![CommitStatus::Done.as_str(), CommitStatus::Rewritten.as_str()],
        )?;
        tx.execute(
            r#"
            UPDATE session_state
            SET processed_commits = ?1,
                last_updated = CAST(strftime('%s', 'now') AS INTEGER)
            WHERE id = 1
            "#,
            params![processed as i64],
        )?;
        tx.commit()?;

        tracing::debug!(promoted, mappings = pairs.len(), "finalized rewrite state");
        Ok(())
    }
}

impl MappingSource for SqliteStore {
    type Error = StoreError;

    fn mapped_hash(&self, old_hash: &str) -> Result<Option<CommitHash>, Self::Error> {
        Store::mapped_hash(self, old_hash)
    }
}

const COMMIT_COLUMNS: &str = "hash, parent_hash, message, diff_content, modified_files, author, author_email, commit_date, tree_hash, status";

struct RawCommit {
    hash: String,
    parent_hash: Option<String>,
    message: String,
    diff_content: String,
    modified_files: String,
    author: String,
    author_email: String,
    commit_date: i64,
    tree_hash: String,
    status: String,
}

impl RawCommit {
    fn into_record(self) -> Result<CommitRecord, StoreError> {
        let status = self
            .status
            .parse::<CommitStatus>()
            .map_err(StoreError::InvalidValue)?;
        let modified_files = serde_json::from_str(&self.modified_files)?;
        Ok(CommitRecord {
            hash: self.hash,
            parent_hash: self.parent_hash,
            message: self.message,
            diff_content: self.diff_content,
            modified_files,
            author: self.author,
            author_email: self.author_email,
            commit_date: self.commit_date,
            tree_hash: self.tree_hash,
            status,
        })
    }
}

fn read_commit_row(row: &Row<'_>) -> rusqlite::Result<RawCommit> {
    read_commit_columns(row, 0)
}

fn read_commit_columns(row: &Row<'_>, offset: usize) -> rusqlite::Result<RawCommit> {
    Ok(RawCommit {
        hash: row.get(offset)?,
        parent_hash: row.get(offset + 1)?,
        message: row.get(offset + 2)?,
        diff_content: row.get(offset + 3)?,
        modified_files: row.get(offset + 4)?,
        author: row.get(offset + 5)?,
        author_email: row.get(offset + 6)?,
        commit_date: row.get(offset + 7)?,
        tree_hash: row.get(offset + 8)?,
        status: row.get(offset + 9)?,
    })
}

pub(crate) fn insert_commit(conn: &Connection, record: &CommitRecord) -> Result<(), StoreError> {
    let modified_files = serde_json::to_string(&record.modified_files)?;
    conn.execute(
        r#"
        INSERT INTO commits (
            hash, parent_hash, message, diff_content, modified_files,
            author, author_email, commit_date, tree_hash, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(hash) DO UPDATE SET
            parent_hash = excluded.parent_hash,
            message = excluded.message,
            diff_content = excluded.diff_content,
            modified_files = excluded.modified_files,
            author = excluded.author,
            author_email = excluded.author_email,
            commit_date = excluded.commit_date,
            tree_hash = excluded.tree_hash,
            status = excluded.status
        "#,
        params![
            record.hash,
            record.parent_hash,
            record.message,
            record.diff_content,
            modified_files,
            record.author,
            record.author_email,
            record.commit_date,
            record.tree_hash,
            record.status.as_str(),
        ],
    )?;
    Ok(())
}

fn advance_status(conn: &Connection, hash: &str, next: CommitStatus) -> Result<(), StoreError> {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM commits WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(StoreError::UnknownCommit(hash.to_owned()));
    };
    let current = current
        .parse::<CommitStatus>()
        .map_err(StoreError::InvalidValue)?;

    if !current.can_advance_to(next) {
        return Err(StoreError::StatusRegression {
            hash: hash.to_owned(),
            from: current,
            to: next,
        });
    }

    conn.execute(
        "UPDATE commits SET status = ?1 WHERE hash = ?2",
        params![next.as_str(), hash],
    )?;
    Ok(())
}

pub(crate) fn upsert_mapping(
    conn: &Connection,
    old_hash: &str,
    new_hash: &str,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO hash_mapping (old_hash, new_hash) VALUES (?1, ?2)
        ON CONFLICT(old_hash) DO UPDATE SET new_hash = excluded.new_hash
        "#,
        params![old_hash, new_hash],
    )?;
    Ok(())
}

pub(crate) fn insert_group_row(conn: &Connection, row: &GroupRow) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO commit_groups (group_id, commit_hash, group_order, similarity)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![
            row.group_id as i64,
            row.commit_hash,
            row.group_order as i64,
            row.similarity
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_group_message(
    conn: &Connection,
    message: &GroupMessage,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO group_messages (group_id, message, fallback) VALUES (?1, ?2, ?3)
        ON CONFLICT(group_id) DO UPDATE SET
            message = excluded.message,
            fallback = excluded.fallback
        "#,
        params![message.group_id as i64, message.message, message.fallback],
    )?;
    Ok(())
}

pub(crate) fn write_session(conn: &Connection, session: &SessionState) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO session_state (
            id, branch, backup_branch, current_position, total_commits,
            processed_commits, scratch_ref, scratch_tip, last_updated
        ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, CAST(strftime('%s', 'now') AS INTEGER))
        ON CONFLICT(id) DO UPDATE SET
            branch = excluded.branch,
            backup_branch = excluded.backup_branch,
            current_position = excluded.current_position,
            total_commits = excluded.total_commits,
            processed_commits = excluded.processed_commits,
            scratch_ref = excluded.scratch_ref,
            scratch_tip = excluded.scratch_tip,
            last_updated = excluded.last_updated
        "#,
        params![
            session.branch,
            session.backup_branch,
            session.current_position,
            session.total_commits as i64,
            session.processed_commits as i64,
            session.scratch_ref,
            session.scratch_tip,
        ],
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            hash TEXT PRIMARY KEY,
            parent_hash TEXT,
            message TEXT NOT NULL,
            diff_content TEXT NOT NULL,
            modified_files TEXT NOT NULL,
            author TEXT NOT NULL,
            author_email TEXT NOT NULL,
            commit_date INTEGER NOT NULL,
            tree_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE TABLE IF NOT EXISTS hash_mapping (
            old_hash TEXT PRIMARY KEY,
            new_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commit_groups (
            group_id INTEGER NOT NULL,
            commit_hash TEXT NOT NULL,
            group_order INTEGER NOT NULL,
            similarity REAL NOT NULL,
            PRIMARY KEY (group_id, group_order)
        );

        CREATE TABLE IF NOT EXISTS group_messages (
            group_id INTEGER PRIMARY KEY,
            message TEXT NOT NULL,
            fallback INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS session_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            branch TEXT NOT NULL,
            backup_branch TEXT,
            current_position TEXT,
            total_commits INTEGER NOT NULL DEFAULT 0,
            processed_commits INTEGER NOT NULL DEFAULT 0,
            scratch_ref TEXT,
            scratch_tip TEXT,
            last_updated INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_commits_status ON commits(status);
        CREATE INDEX IF NOT EXISTS idx_commits_parent ON commits(parent_hash);
        CREATE INDEX IF NOT EXISTS idx_mapping_new_hash ON hash_mapping(new_hash);
        CREATE INDEX IF NOT EXISTS idx_groups_commit ON commit_groups(commit_hash);
        "#,
    )?;

    Ok(())
}
