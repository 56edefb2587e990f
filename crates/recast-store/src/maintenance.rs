use std::fmt;

use recast_core::{CommitHash, CommitRecord, CommitStatus, HashMapping, SessionState};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::{
    GroupMessage, SqliteStore, Store, StoreError, insert_commit, insert_group_message,
    insert_group_row, upsert_mapping, write_session,
};

pub const STATE_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub group_id: usize,
    pub commit_hash: CommitHash,
    pub group_order: usize,
    pub similarity: f64,
}

/// Portable copy of every table, used by `export-state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub commits: Vec<CommitRecord>,
    pub mappings: Vec<HashMapping>,
    pub groups: Vec<GroupRow>,
    pub messages: Vec<GroupMessage>,
    pub session: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreStatistics {
    pub total_commits: usize,
    pub pending: usize,
    pub merged: usize,
    pub rewritten: usize,
    pub done: usize,
    pub skipped: usize,
    pub groups: usize,
    pub mappings: usize,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyProblem {
    UnknownMappedCommit(CommitHash),
    UnknownGroupMember { group_id: usize, hash: CommitHash },
    UnknownSessionPosition(CommitHash),
}

impl fmt::Display for ConsistencyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMappedCommit(hash) => {
                write!(f, "hash mapping references unknown commit {hash}")
            }
            Self::UnknownGroupMember { group_id, hash } => {
                write!(f, "group {group_id} references unknown commit {hash}")
            }
            Self::UnknownSessionPosition(hash) => {
                write!(f, "session position {hash} is not a known commit")
            }
        }
    }
}

impl SqliteStore {
    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let mut stats = StoreStatistics::default();

        let mut stmt = self
            .conn()
            .prepare("SELECT status, COUNT(*) FROM commits GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            let status = status
                .parse::<CommitStatus>()
                .map_err(StoreError::InvalidValue)?;
            match status {
                CommitStatus::Pending => stats.pending = count,
                CommitStatus::Merged => stats.merged = count,
                CommitStatus::Rewritten => stats.rewritten = count,
                CommitStatus::Done => stats.done = count,
                CommitStatus::Skipped => stats.skipped = count,
            }
            stats.total_commits += count;
        }

        stats.groups = self.count("SELECT COUNT(DISTINCT group_id) FROM commit_groups")?;
        stats.mappings = self.count("SELECT COUNT(*) FROM hash_mapping")?;

        stats.progress_percent = match self.load_session()? {
            Some(session) => session.progress_percent(),
            None if stats.total_commits > 0 => {
                (stats.done + stats.skipped) as f64 * 100.0 / stats.total_commits as f64
            }
            None => 0.0,
        };

        Ok(stats)
    }

    pub fn validate_consistency(&self) -> Result<Vec<ConsistencyProblem>, StoreError> {
        let mut problems = Vec::new();

        let mut stmt = self.conn().prepare(
            r#"
            SELECT m.old_hash
            FROM hash_mapping m
            LEFT JOIN commits c ON c.hash = m.old_hash
            WHERE c.hash IS NULL
            ORDER BY m.old_hash
            "#,
        )?;
        let orphans = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for hash in orphans {
            problems.push(ConsistencyProblem::UnknownMappedCommit(hash?));
        }

        let mut stmt = self.conn().prepare(
            r#"
            SELECT g.group_id, g.commit_hash
            FROM commit_groups g
            LEFT JOIN commits c ON c.hash = g.commit_hash
            WHERE c.hash IS NULL
            ORDER BY g.group_id, g.group_order
            "#,
        )?;
        let members = stmt.query_map([], |row| {
            let group_id: i64 = row.get(0)?;
            Ok((group_id as usize, row.get::<_, String>(1)?))
        })?;
        for member in members {
            let (group_id, hash) = member?;
            problems.push(ConsistencyProblem::UnknownGroupMember { group_id, hash });
        }

        if let Some(session) = self.load_session()?
            && let Some(position) = session.current_position
            && self.get_commit(&position)?.is_none()
        {
            problems.push(ConsistencyProblem::UnknownSessionPosition(position));
        }

        Ok(problems)
    }

    pub fn export_state(&self) -> Result<StateSnapshot, StoreError> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT group_id, commit_hash, group_order, similarity
            FROM commit_groups
            ORDER BY group_id ASC, group_order ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let group_id: i64 = row.get(0)?;
            let group_order: i64 = row.get(2)?;
            Ok(GroupRow {
                group_id: group_id as usize,
                commit_hash: row.get(1)?,
                group_order: group_order as usize,
                similarity: row.get(3)?,
            })
        })?;
        let groups = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(StateSnapshot {
            version: STATE_SNAPSHOT_VERSION,
            commits: self.list_commits()?,
            mappings: self.all_mappings()?,
            groups,
            messages: self.group_messages()?,
            session: self.load_session()?,
        })
    }

    /// Replaces every table with the snapshot contents in one transaction.
    pub fn import_state(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        if snapshot.version != STATE_SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshot(snapshot.version));
        }

        let tx = self.conn().unchecked_transaction()?;
        clear_tables(&tx)?;
        for commit in &snapshot.commits {
            insert_commit(&tx, commit)?;
        }
        for mapping in &snapshot.mappings {
            upsert_mapping(&tx, &mapping.old_hash, &mapping.new_hash)?;
        }
        for row in &snapshot.groups {
            insert_group_row(&tx, row)?;
        }
        for message in &snapshot.messages {
            insert_group_message(&tx, message)?;
        }
        if let Some(session) = &snapshot.session {
            write_session(&tx, session)?;
        }
        tx.commit()?;

        tracing::info!(commits = snapshot.commits.len(), "imported state snapshot");
        Ok(())
    }

    /// Forgets all rewrite progress while keeping the scanned commits.
    pub fn reset_progress(&self) -> Result<(), StoreError> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE commits SET status = ?1",
            params![CommitStatus::Pending.as_str()],
        )?;
        tx.execute("DELETE FROM hash_mapping", [])?;
        tx.execute("DELETE FROM commit_groups", [])?;
        tx.execute("DELETE FROM group_messages", [])?;
        tx.execute("DELETE FROM session_state", [])?;
        tx.commit()?;

        tracing::info!("reset rewrite progress");
        Ok(())
    }

    pub fn reset_all(&self) -> Result<(), StoreError> {
        let tx = self.conn().unchecked_transaction()?;
        clear_tables(&tx)?;
        tx.commit()?;

        tracing::info!("cleared all recorded state");
        Ok(())
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn().query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn clear_tables(conn: &rusqlite::Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        DELETE FROM commits;
        DELETE FROM hash_mapping;
        DELETE FROM commit_groups;
        DELETE FROM group_messages;
        DELETE FROM session_state;
        "#,
    )?;
    Ok(())
}
