use recast_config::ConflictPolicy;
use recast_core::{CommitHash, CommitRecord};
use recast_git::{ConflictEntry, ReplayMode, ReplayOutcome, Vcs, VcsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied {
        tip: CommitHash,
    },
    /// Conflicts were settled with the prefer-destination policy.
    Resolved {
        tip: CommitHash,
        conflicts: Vec<ConflictEntry>,
    },
    Skipped {
        conflicts: Vec<ConflictEntry>,
    },
}

impl StepOutcome {
    pub fn tip(&self) -> Option<&str> {
        match self {
            Self::Applied { tip } | Self::Resolved { tip, .. } => Some(tip),
            Self::Skipped { .. } => None,
        }
    }

    pub fn conflicts(&self) -> &[ConflictEntry] {
        match self {
            Self::Applied { .. } => &[],
            Self::Resolved { conflicts, .. } | Self::Skipped { conflicts } => conflicts,
        }
    }
}

enum StepState {
    Attempt,
    Conflict(Vec<ConflictEntry>),
    FallbackResolve(Vec<ConflictEntry>),
    Continue(Vec<ConflictEntry>),
    Abort(Vec<ConflictEntry>),
}

/// Replays one commit onto the checked-out scratch branch.
///
/// A conflict never fails the step: it is either resolved with the fixed
/// per-category policy or the replay is aborted and the commit skipped.
/// Errors are reserved for git failures that leave the scratch state unknown.
pub fn replay_commit(
    vcs: &dyn Vcs,
    scratch: &str,
    commit: &CommitRecord,
    mode: ReplayMode,
    policy: ConflictPolicy,
) -> Result<StepOutcome, VcsError> {
    let mut state = StepState::Attempt;

    loop {
        state = match state {
            StepState::Attempt => match vcs.replay_onto(scratch, &commit.hash, mode)? {
                ReplayOutcome::Applied { tip } => return Ok(StepOutcome::Applied { tip }),
                ReplayOutcome::Conflict(conflicts) => StepState::Conflict(conflicts),
            },
            StepState::Conflict(conflicts) => {
                for entry in &conflicts {
                    tracing::warn!(
                        commit = commit.short_hash(),
                        path = %entry.path,
                        kind = entry.kind.as_str(),
                        "replay conflict"
                    );
                }
                match policy {
                    ConflictPolicy::Skip => StepState::Abort(conflicts),
                    ConflictPolicy::PreferDestination => StepState::FallbackResolve(conflicts),
                }
            }
            StepState::FallbackResolve(conflicts) => {
                match conflicts.iter().try_for_each(|entry| vcs.resolve_conflict(entry)) {
                    Ok(()) => StepState::Continue(conflicts),
                    Err(err) => {
                        tracing::warn!(
                            commit = commit.short_hash(),
                            error = %err,
                            "prefer-destination resolution failed"
                        );
                        StepState::Abort(conflicts)
                    }
                }
            }
            StepState::Continue(conflicts) => match vcs.continue_replay(&commit.hash, mode) {
                Ok(tip) => {
                    tracing::warn!(
                        commit = commit.short_hash(),
                        conflicts = conflicts.len(),
                        "kept destination side for conflicting paths"
                    );
                    return Ok(StepOutcome::Resolved { tip, conflicts });
                }
                Err(err) => {
                    tracing::warn!(
                        commit = commit.short_hash(),
                        error = %err,
                        "could not continue replay after resolving conflicts"
                    );
                    StepState::Abort(conflicts)
                }
            },
            StepState::Abort(conflicts) => {
                vcs.abort_replay()?;
                tracing::warn!(commit = commit.short_hash(), "skipped commit after conflict");
                return Ok(StepOutcome::Skipped { conflicts });
            }
        };
    }
}
