#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use recast::MessagePlanner;
use recast_core::{CommitHash, CommitRecord, CommitStatus};
use recast_git::{
    ConflictEntry, ConflictKind, RepoStatus, ReplayMode, ReplayOutcome, Vcs, VcsError,
};
use recast_infer::{MockGenerator, RetryPolicy};

pub const BRANCH: &str = "main";
pub const SCRATCH: &str = "recast/scratch/main";

pub fn original_hash(index: usize) -> String {
    format!("c{index:02}{}", "0".repeat(37))
}

/// Linear history: commit `i` (1-based) is the child of commit `i - 1`.
/// Each entry is `(message, diff, path)`.
pub fn linear_history(specs: &[(&str, &str, &str)]) -> Vec<CommitRecord> {
    specs
        .iter()
        .enumerate()
        .map(|(offset, (message, diff, path))| {
            let index = offset + 1;
            CommitRecord {
                hash: original_hash(index),
                parent_hash: (index > 1).then(|| original_hash(index - 1)),
                message: (*message).to_owned(),
                diff_content: (*diff).to_owned(),
                modified_files: vec![(*path).to_owned()],
                author: "Dev".to_owned(),
                author_email: "dev@example.com".to_owned(),
                commit_date: 1_700_000_000 + index as i64 * 60,
                tree_hash: format!("tree{index}"),
                status: CommitStatus::Pending,
            }
        })
        .collect()
}

/// `count` commits that never cluster together.
pub fn distinct_history(count: usize) -> Vec<CommitRecord> {
    let specs: Vec<(String, String, String)> = (1..=count)
        .map(|index| {
            (
                format!("change {index}"),
                format!("+fn handler_{index}() -> u32 {{ {index} }}\n"),
                format!("src/m{index}/lib.rs"),
            )
        })
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = specs
        .iter()
        .map(|(message, diff, path)| (message.as_str(), diff.as_str(), path.as_str()))
        .collect();
    linear_history(&borrowed)
}

pub fn planner() -> MessagePlanner {
    MessagePlanner::with_generator(
        Arc::new(MockGenerator),
        RetryPolicy {
            attempt_timeout: Duration::from_secs(1),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(1),
        },
        2000,
        "mock",
        "mock",
    )
    .expect("planner")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub hash: CommitHash,
    pub parent: Option<CommitHash>,
    pub message: String,
    /// Original commits whose changes this commit carries.
    pub sources: Vec<CommitHash>,
}

#[derive(Default)]
struct FakeState {
    commits: HashMap<CommitHash, FakeCommit>,
    branches: BTreeMap<String, CommitHash>,
    head: String,
    history: Vec<CommitRecord>,
    conflicts: HashSet<CommitHash>,
    failures: HashSet<CommitHash>,
    in_progress: Option<CommitHash>,
    resolved: Vec<ConflictEntry>,
    counter: usize,
    mutations: usize,
    upstream: Option<String>,
    pushes: Vec<(String, String)>,
    dirty: bool,
    fail_swap: bool,
    fail_push: bool,
    fail_gc: bool,
    corrupt: bool,
}

impl FakeState {
    fn tip(&self) -> Result<CommitHash, VcsError> {
        self.branches
            .get(&self.head)
            .cloned()
            .ok_or_else(|| VcsError::MissingRef(self.head.clone()))
    }

    fn commit(&self, hash: &str) -> Result<FakeCommit, VcsError> {
        self.commits
            .get(hash)
            .cloned()
            .ok_or_else(|| VcsError::MissingRef(hash.to_owned()))
    }

    fn resolve(&self, name: &str) -> Option<CommitHash> {
        self.branches
            .get(name)
            .cloned()
            .or_else(|| self.commits.contains_key(name).then(|| name.to_owned()))
    }

    fn next_hash(&mut self) -> CommitHash {
        self.counter += 1;
        format!("rw{:06}{}", self.counter, "0".repeat(32))
    }

    fn write_tip(&mut self, parent: Option<CommitHash>, message: String, sources: Vec<CommitHash>) -> CommitHash {
        let hash = self.next_hash();
        self.commits.insert(
            hash.clone(),
            FakeCommit {
                hash: hash.clone(),
                parent,
                message,
                sources,
            },
        );
        let head = self.head.clone();
        self.branches.insert(head, hash.clone());
        hash
    }

    fn apply(&mut self, commit: &str, mode: ReplayMode) -> Result<CommitHash, VcsError> {
        let original = self.commit(commit)?;
        let tip = self.commit(&self.tip()?)?;
        let hash = match mode {
            ReplayMode::NewCommit => {
                self.write_tip(Some(tip.hash), original.message, vec![commit.to_owned()])
            }
            ReplayMode::Fold => {
                let mut sources = tip.sources;
                sources.push(commit.to_owned());
                self.write_tip(tip.parent, tip.message, sources)
            }
        };
        Ok(hash)
    }
}

/// In-memory repository: branches, commit graph and replay bookkeeping.
pub struct FakeVcs {
    state: Mutex<FakeState>,
}

impl FakeVcs {
    pub fn new(history: Vec<CommitRecord>) -> Self {
        let mut state = FakeState {
            head: BRANCH.to_owned(),
            ..FakeState::default()
        };
        for record in &history {
            state.commits.insert(
                record.hash.clone(),
                FakeCommit {
                    hash: record.hash.clone(),
                    parent: record.parent_hash.clone(),
                    message: record.message.clone(),
                    sources: vec![record.hash.clone()],
                },
            );
        }
        if let Some(last) = history.last() {
            state.branches.insert(BRANCH.to_owned(), last.hash.clone());
        }
        state.history = history;
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake vcs lock")
    }

    pub fn inject_conflict(&self, hash: &str) {
        self.lock().conflicts.insert(hash.to_owned());
    }

    pub fn fail_replay_of(&self, hash: &str) {
        self.lock().failures.insert(hash.to_owned());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Guarded branch updates (the swap) fail while set.
    pub fn fail_swap(&self, fail: bool) {
        self.lock().fail_swap = fail;
    }

    pub fn fail_push(&self) {
        self.lock().fail_push = true;
    }

    pub fn fail_gc(&self) {
        self.lock().fail_gc = true;
    }

    pub fn corrupt(&self) {
        self.lock().corrupt = true;
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.lock().dirty = dirty;
    }

    pub fn set_upstream(&self, remote: &str) {
        self.lock().upstream = Some(remote.to_owned());
    }

    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    pub fn head(&self) -> String {
        self.lock().head.clone()
    }

    pub fn branch_tip(&self, name: &str) -> Option<CommitHash> {
        self.lock().branches.get(name).cloned()
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.lock().pushes.clone()
    }

    pub fn resolved_conflicts(&self) -> Vec<ConflictEntry> {
        self.lock().resolved.clone()
    }

    /// First-parent chain of `branch`, oldest first.
    pub fn log(&self, branch: &str) -> Vec<FakeCommit> {
        let state = self.lock();
        let mut chain = Vec::new();
        let mut cursor = state.branches.get(branch).cloned();
        while let Some(hash) = cursor {
            let Some(commit) = state.commits.get(&hash) else {
                break;
            };
            cursor = commit.parent.clone();
            chain.push(commit.clone());
        }
        chain.reverse();
        chain
    }
}

impl Vcs for FakeVcs {
    fn current_branch(&self) -> Result<String, VcsError> {
        Ok(self.lock().head.clone())
    }

    fn repo_status(&self, _check_upstream: bool) -> Result<RepoStatus, VcsError> {
        let state = self.lock();
        Ok(RepoStatus {
            branch: Some(state.head.clone()),
            dirty: state.dirty,
            has_upstream: state.upstream.is_some(),
            ahead: 0,
            behind: 0,
        })
    }

    fn list_commits(&self, branch: &str) -> Result<Vec<CommitRecord>, VcsError> {
        let state = self.lock();
        if !state.branches.contains_key(branch) {
            return Err(VcsError::MissingRef(branch.to_owned()));
        }
        Ok(state.history.clone())
    }

    fn diff(&self, _parent: Option<&str>, hash: &str) -> Result<String, VcsError> {
        let state = self.lock();
        Ok(state
            .history
            .iter()
            .find(|record| record.hash == hash)
            .map(|record| record.diff_content.clone())
            .unwrap_or_default())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<CommitHash>, VcsError> {
        Ok(self.lock().resolve(name))
    }

    fn create_backup_ref(&self, branch: &str, name: &str) -> Result<String, VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        let tip = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::MissingRef(branch.to_owned()))?;
        if state.branches.contains_key(name) {
            return Err(VcsError::Command {
                command: "branch".to_owned(),
                stderr: format!("a branch named '{name}' already exists"),
            });
        }
        state.branches.insert(name.to_owned(), tip);
        Ok(name.to_owned())
    }

    fn create_scratch_ref(&self, scratch: &str, base: &str) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        let base = state
            .resolve(base)
            .ok_or_else(|| VcsError::MissingRef(base.to_owned()))?;
        state.branches.insert(scratch.to_owned(), base);
        state.head = scratch.to_owned();
        Ok(())
    }

    fn replay_onto(
        &self,
        scratch: &str,
        commit: &str,
        mode: ReplayMode,
    ) -> Result<ReplayOutcome, VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if state.head != scratch {
            return Err(VcsError::Command {
                command: "cherry-pick".to_owned(),
                stderr: format!("{scratch} is not checked out"),
            });
        }
        if state.failures.contains(commit) {
            return Err(VcsError::Command {
                command: "cherry-pick".to_owned(),
                stderr: format!("simulated failure replaying {commit}"),
            });
        }
        if state.conflicts.contains(commit) {
            state.in_progress = Some(commit.to_owned());
            return Ok(ReplayOutcome::Conflict(vec![ConflictEntry {
                path: "src/shared.rs".to_owned(),
                kind: ConflictKind::Content,
            }]));
        }
        let tip = state.apply(commit, mode)?;
        Ok(ReplayOutcome::Applied { tip })
    }

    fn resolve_conflict(&self, entry: &ConflictEntry) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if state.in_progress.is_none() {
            return Err(VcsError::Command {
                command: "checkout --ours".to_owned(),
                stderr: "no replay in progress".to_owned(),
            });
        }
        state.resolved.push(entry.clone());
        Ok(())
    }

    fn continue_replay(&self, commit: &str, mode: ReplayMode) -> Result<CommitHash, VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if state.in_progress.take().as_deref() != Some(commit) {
            return Err(VcsError::Command {
                command: "commit".to_owned(),
                stderr: format!("{commit} is not being replayed"),
            });
        }
        state.apply(commit, mode)
    }

    fn abort_replay(&self) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        state.in_progress = None;
        Ok(())
    }

    fn set_message(&self, _scratch: &str, message: &str) -> Result<CommitHash, VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        let tip = state.commit(&state.tip()?)?;
        Ok(state.write_tip(tip.parent, message.to_owned(), tip.sources))
    }

    fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if !state.branches.contains_key(branch) {
            return Err(VcsError::MissingRef(branch.to_owned()));
        }
        state.head = branch.to_owned();
        Ok(())
    }

    fn reset_branch(
        &self,
        branch: &str,
        target: &str,
        expected_old: Option<&str>,
    ) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        let target = state
            .resolve(target)
            .ok_or_else(|| VcsError::MissingRef(target.to_owned()))?;
        let current = state.branches.get(branch).cloned();
        if state.fail_swap && expected_old.is_some() {
            return Err(VcsError::Command {
                command: "update-ref".to_owned(),
                stderr: format!("cannot lock ref 'refs/heads/{branch}'"),
            });
        }
        if let Some(expected) = expected_old
            && current.as_deref() != Some(expected)
        {
            return Err(VcsError::Command {
                command: "update-ref".to_owned(),
                stderr: format!("{branch} moved, expected {expected}"),
            });
        }
        state.branches.insert(branch.to_owned(), target);
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        state
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VcsError::MissingRef(name.to_owned()))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, VcsError> {
        Ok(self
            .lock()
            .branches
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn integrity_check(&self) -> Result<bool, VcsError> {
        Ok(!self.lock().corrupt)
    }

    fn upstream_remote(&self, _branch: &str) -> Result<Option<String>, VcsError> {
        Ok(self.lock().upstream.clone())
    }

    fn force_push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if state.fail_push {
            return Err(VcsError::Command {
                command: "push".to_owned(),
                stderr: "stale info".to_owned(),
            });
        }
        state.pushes.push((remote.to_owned(), branch.to_owned()));
        Ok(())
    }

    fn gc(&self) -> Result<(), VcsError> {
        let mut state = self.lock();
        state.mutations += 1;
        if state.fail_gc {
            return Err(VcsError::Command {
                command: "gc".to_owned(),
                stderr: "unable to write new pack".to_owned(),
            });
        }
        Ok(())
    }
}
