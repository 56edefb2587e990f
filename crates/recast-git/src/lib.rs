use recast_core::{CommitHash, CommitRecord};
use thiserror::Error;

mod cli;
mod conflict;
mod history;

pub use cli::GitCli;
pub use conflict::{ConflictEntry, ConflictKind, Resolution, parse_unmerged};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("failed to read repository: {0}")]
    Read(String),
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("reference {0} does not exist")]
    MissingRef(String),
    #[error("HEAD is detached; check out a branch first")]
    DetachedHead,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoStatus {
    pub branch: Option<String>,
    /// Tracked files differ from HEAD. Untracked files are ignored.
    pub dirty: bool,
    pub has_upstream: bool,
    pub ahead: usize,
    pub behind: usize,
}

impl RepoStatus {
    /// The remote holds no commits the local branch lacks.
    pub fn is_synced(&self) -> bool {
        self.behind == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Apply the change as a new commit on the scratch tip.
    NewCommit,
    /// Apply the change into the scratch tip commit.
    Fold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Applied { tip: CommitHash },
    Conflict(Vec<ConflictEntry>),
}

/// Version-control operations the rewrite needs.
///
/// Replay operations act on the checked-out scratch branch.
pub trait Vcs {
    fn current_branch(&self) -> Result<String, VcsError>;
    fn repo_status(&self, check_upstream: bool) -> Result<RepoStatus, VcsError>;
    /// First-parent history of `branch`, oldest first.
    fn list_commits(&self, branch: &str) -> Result<Vec<CommitRecord>, VcsError>;
    fn diff(&self, parent: Option<&str>, hash: &str) -> Result<String, VcsError>;
    fn resolve_ref(&self, name: &str) -> Result<Option<CommitHash>, VcsError>;

    fn create_backup_ref(&self, branch: &str, name: &str) -> Result<String, VcsError>;
    fn create_scratch_ref(&self, scratch: &str, base: &str) -> Result<(), VcsError>;
    fn replay_onto(
        &self,
        scratch: &str,
        commit: &str,
        mode: ReplayMode,
    ) -> Result<ReplayOutcome, VcsError>;
    fn resolve_conflict(&self, entry: &ConflictEntry) -> Result<(), VcsError>;
    fn continue_replay(&self, commit: &str, mode: ReplayMode) -> Result<CommitHash, VcsError>;
    fn abort_replay(&self) -> Result<(), VcsError>;
    fn set_message(&self, scratch: &str, message: &str) -> Result<CommitHash, VcsError>;

    fn checkout(&self, branch: &str) -> Result<(), VcsError>;
    /// Points `branch` at `target`. When `expected_old` is set the update
    /// fails unless the branch still points there.
    fn reset_branch(
        &self,
        branch: &str,
        target: &str,
        expected_old: Option<&str>,
    ) -> Result<(), VcsError>;
    fn delete_ref(&self, name: &str) -> Result<(), VcsError>;
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, VcsError>;

    fn integrity_check(&self) -> Result<bool, VcsError>;
    fn upstream_remote(&self, branch: &str) -> Result<Option<String>, VcsError>;
    fn force_push(&self, remote: &str, branch: &str) -> Result<(), VcsError>;
    fn gc(&self) -> Result<(), VcsError>;
}
