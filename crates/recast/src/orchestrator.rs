use std::collections::{HashMap, HashSet};

use recast_config::RecastConfig;
use recast_core::{
    CommitGroup, CommitHash, CommitRecord, CommitStatus, HashMapping, SessionState, file_patterns,
    group_statistics, short_hash, validate_groups,
};
use recast_git::{ReplayMode, Vcs, VcsError};
use recast_store::{GroupMessage, ReplayStepRecord, SqliteStore, Store};

use crate::context::RunContext;
use crate::error::RewriteError;
use crate::grouping::{cluster_and_persist, plan_groups, settings_from_config};
use crate::messages::MessagePlanner;
use crate::replay::{StepOutcome, replay_commit};
use crate::report::{PushOutcome, RewritePlan, RewriteReport, StatusReport};

pub const SCRATCH_REF_PREFIX: &str = "recast/scratch/";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn scratch_ref_for(branch: &str) -> String {
    format!("{SCRATCH_REF_PREFIX}{branch}")
}

/// Drives a rewrite: backup, scan, cluster, plan messages, replay onto a
/// scratch branch, swap the branch pointer, then finalize and verify.
///
/// Every replay step is recorded in the store before the next one starts, so
/// an interrupted run continues from the last recorded scratch tip.
pub struct RewriteOrchestrator<'a> {
    vcs: &'a dyn Vcs,
    store: &'a SqliteStore,
    planner: &'a MessagePlanner,
    config: &'a RecastConfig,
}

impl<'a> RewriteOrchestrator<'a> {
    pub fn new(
        vcs: &'a dyn Vcs,
        store: &'a SqliteStore,
        planner: &'a MessagePlanner,
        config: &'a RecastConfig,
    ) -> Self {
        Self {
            vcs,
            store,
            planner,
            config,
        }
    }

    /// The configured branch, or the checked-out one.
    pub fn target_branch(&self) -> Result<String, RewriteError> {
        match &self.config.repository.branch {
            Some(branch) => Ok(branch.clone()),
            None => Ok(self.vcs.current_branch()?),
        }
    }

    /// Groups and messages for the current history. Issues no mutating git
    /// calls and writes nothing to the store.
    pub fn preview(&self, ctx: &mut RunContext<'_>) -> Result<RewritePlan, RewriteError> {
        let span = ctx.span();
        let _guard = span.enter();

        let branch = self.target_branch()?;
        let commits = self.vcs.list_commits(&branch)?;
        let settings = settings_from_config(&self.config.clustering)?;
        let groups = plan_groups(self.store, &commits, settings)?;
        let violations = validate_groups(&groups, self.store, settings)?;
        let messages = self.planner.plan(&groups);

        tracing::info!(
            branch = %branch,
            commits = commits.len(),
            groups = groups.len(),
            provider = self.planner.provider_name(),
            model = self.planner.model_name(),
            "computed rewrite plan"
        );

        Ok(RewritePlan {
            statistics: group_statistics(&groups),
            patterns: file_patterns(&groups),
            branch,
            groups,
            messages,
            violations,
        })
    }

    /// Continues an interrupted rewrite when one exists, otherwise starts a
    /// fresh one.
    pub fn run(&self, ctx: &mut RunContext<'_>) -> Result<RewriteReport, RewriteError> {
        if self.store.can_resume()? {
            writeln!(ctx.out, "Found an interrupted rewrite; resuming it.")?;
            return self.resume(ctx);
        }

        let span = ctx.span();
        let _guard = span.enter();

        let branch = self.target_branch()?;
        self.check_repository(&branch)?;
        let original_tip = self
            .vcs
            .resolve_ref(&branch)?
            .ok_or_else(|| VcsError::MissingRef(branch.clone()))?;

        let commits = self.vcs.list_commits(&branch)?;
        let root = unique_root(&branch, &commits)?;

        let backup = self.create_backup(&branch)?;
        writeln!(ctx.out, "Created backup {backup}")?;
        self.store.replace_commits(&commits)?;

        let settings = settings_from_config(&self.config.clustering)?;
        let groups = cluster_and_persist(self.store, &commits, settings)?;
        let messages = self.planner.plan_persisted(self.store, &groups)?;

        let scratch = scratch_ref_for(&branch);
        let mut session = SessionState::new(branch.clone(), Some(backup), commits.len());
        session.scratch_ref = Some(scratch.clone());
        session.scratch_tip = Some(root.clone());
        self.store.save_session(&session)?;
        self.vcs.create_scratch_ref(&scratch, &root)?;

        tracing::info!(
            branch = %branch,
            commits = commits.len(),
            groups = groups.len(),
            "starting rewrite"
        );
        self.replay_and_finish(ctx, session, &groups, &messages, &original_tip, false)
    }

    pub fn resume(&self, ctx: &mut RunContext<'_>) -> Result<RewriteReport, RewriteError> {
        let span = ctx.span();
        let _guard = span.enter();

        if !self.store.can_resume()? {
            return Err(RewriteError::NothingToResume);
        }
        let Some(mut session) = self.store.load_session()? else {
            return Err(RewriteError::NothingToResume);
        };

        let scratch = session
            .scratch_ref
            .clone()
            .unwrap_or_else(|| scratch_ref_for(&session.branch));
        if self.on_branch(&scratch) {
            self.vcs.abort_replay()?;
        }
        self.check_repository(&session.branch)?;

        let backup = session.backup_branch.clone().ok_or_else(|| {
            RewriteError::FatalOrchestration("interrupted session has no backup ref".to_owned())
        })?;
        let original_tip = self
            .vcs
            .resolve_ref(&backup)?
            .ok_or_else(|| RewriteError::BackupMissing(backup.clone()))?;

        let groups = self.store.load_groups()?;
        let messages = self.planner.plan_persisted(self.store, &groups)?;

        let base = match &session.scratch_tip {
            Some(tip) => tip.clone(),
            None => unique_root(&session.branch, &self.store.list_commits()?)?,
        };
        self.vcs.create_scratch_ref(&scratch, &base)?;
        session.scratch_ref = Some(scratch);
        session.scratch_tip = Some(base);

        let replay_pending = groups
            .iter()
            .flat_map(|group| &group.members)
            .any(|member| member.status == CommitStatus::Pending);
        if replay_pending {
            writeln!(
                ctx.out,
                "Resuming rewrite of {} at {}/{}",
                session.branch, session.processed_commits, session.total_commits
            )?;
        } else {
            writeln!(
                ctx.out,
                "All commits of {} were replayed; finishing the branch swap",
                session.branch
            )?;
        }
        tracing::info!(
            branch = %session.branch,
            processed = session.processed_commits,
            total = session.total_commits,
            "resuming rewrite"
        );
        self.replay_and_finish(ctx, session, &groups, &messages, &original_tip, true)
    }

    /// Points the session branch (or the target branch) back at `backup`.
    /// Backups themselves are never deleted.
    pub fn rollback(
        &self,
        ctx: &mut RunContext<'_>,
        backup: &str,
    ) -> Result<CommitHash, RewriteError> {
        let span = ctx.span();
        let _guard = span.enter();

        let target = self
            .vcs
            .resolve_ref(backup)?
            .ok_or_else(|| RewriteError::BackupMissing(backup.to_owned()))?;

        let session = self.store.load_session()?;
        let branch = match &session {
            Some(session) => session.branch.clone(),
            None => self.target_branch()?,
        };
        let scratch = session
            .as_ref()
            .and_then(|session| session.scratch_ref.clone())
            .unwrap_or_else(|| scratch_ref_for(&branch));

        if self.on_branch(&scratch) {
            self.vcs.abort_replay()?;
            self.vcs.checkout(&branch)?;
        }
        let status = self.vcs.repo_status(false)?;
        if self.config.repository.require_clean && status.dirty {
            return Err(RewriteError::RepoState(
                "working tree has uncommitted changes to tracked files".to_owned(),
            ));
        }

        self.vcs.reset_branch(&branch, &target, None)?;
        if self.vcs.resolve_ref(&scratch)?.is_some() {
            self.vcs.delete_ref(&scratch)?;
        }
        self.store.clear_session()?;

        tracing::info!(branch = %branch, backup, target = %target, "rolled back branch");
        writeln!(ctx.out, "Reset {branch} to {backup} ({})", short_hash(&target))?;
        Ok(target)
    }

    pub fn status(&self) -> Result<StatusReport, RewriteError> {
        Ok(StatusReport {
            session: self.store.load_session()?,
            statistics: self.store.statistics()?,
            resumable: self.store.can_resume()?,
            problems: self.store.validate_consistency()?,
        })
    }

    pub fn list_backups(&self) -> Result<Vec<String>, RewriteError> {
        Ok(self.vcs.list_refs(self.config.backup.ref_prefix())?)
    }

    /// Drops recorded progress (or everything with `all`) and the scratch
    /// branch of an abandoned session.
    pub fn reset(&self, ctx: &mut RunContext<'_>, all: bool) -> Result<(), RewriteError> {
        if let Some(session) = self.store.load_session()?
            && let Some(scratch) = &session.scratch_ref
        {
            if self.on_branch(scratch) {
                self.vcs.abort_replay()?;
                self.vcs.checkout(&session.branch)?;
            }
            if self.vcs.resolve_ref(scratch)?.is_some() {
                self.vcs.delete_ref(scratch)?;
            }
        }

        if all {
            self.store.reset_all()?;
            writeln!(ctx.out, "Cleared all recorded state")?;
        } else {
            self.store.reset_progress()?;
            writeln!(ctx.out, "Cleared rewrite progress")?;
        }
        Ok(())
    }

    fn replay_and_finish(
        &self,
        ctx: &mut RunContext<'_>,
        mut session: SessionState,
        groups: &[CommitGroup],
        messages: &[GroupMessage],
        original_tip: &str,
        resumed: bool,
    ) -> Result<RewriteReport, RewriteError> {
        let scratch = session
            .scratch_ref
            .clone()
            .unwrap_or_else(|| scratch_ref_for(&session.branch));

        let mut report = RewriteReport {
            branch: session.branch.clone(),
            backup_ref: session.backup_branch.clone(),
            resumed,
            groups: groups.len(),
            ..RewriteReport::default()
        };
        for message in messages.iter().filter(|message| message.fallback) {
            report.fallback_messages += 1;
            report.warnings.push(format!(
                "group {} uses a fallback message: {}",
                message.group_id, message.message
            ));
        }

        let replayed = self.replay_groups(ctx, &mut session, &scratch, groups, messages, &mut report);
        let tip = match replayed.and_then(|()| {
            session.scratch_tip.clone().ok_or_else(|| {
                RewriteError::FatalOrchestration("replay produced no scratch tip".to_owned())
            })
        }) {
            Ok(tip) => tip,
            Err(err) => {
                self.recover_after_failure(&session.branch);
                return Err(err);
            }
        };

        if let Err(err) = self.swap_branch(&session.branch, &scratch, &tip, original_tip) {
            tracing::error!(branch = %session.branch, tip = %tip, error = %err, "branch swap failed");
            self.recover_after_failure(&session.branch);
            return Err(RewriteError::FatalOrchestration(format!(
                "could not move {} to the rewritten history: {err}",
                session.branch
            )));
        }
        writeln!(ctx.out, "Updated {} to {}", session.branch, short_hash(&tip))?;

        let rewritten: HashSet<CommitHash> = self
            .store
            .list_commits_by_status(CommitStatus::Rewritten)?
            .into_iter()
            .map(|commit| commit.hash)
            .collect();
        let pairs: Vec<HashMapping> = self
            .store
            .all_mappings()?
            .into_iter()
            .filter(|pair| rewritten.contains(&pair.old_hash))
            .collect();
        self.store
            .finalize_rewrite(&pairs, session.processed_commits)?;

        report.skipped = self
            .store
            .list_commits_by_status(CommitStatus::Skipped)?
            .into_iter()
            .map(|commit| commit.hash)
            .collect();
        report.replayed = pairs.len();
        report.new_commits = pairs
            .iter()
            .map(|pair| pair.new_hash.as_str())
            .collect::<HashSet<_>>()
            .len();
        report.mappings = pairs;
        report.final_tip = Some(tip);

        self.store.clear_session()?;

        self.finalize(&session.branch, &mut report);
        self.verify(&mut report);

        tracing::info!(
            branch = %report.branch,
            replayed = report.replayed,
            skipped = report.skipped.len(),
            warnings = report.warning_count(),
            "rewrite complete"
        );
        Ok(report)
    }

    fn replay_groups(
        &self,
        ctx: &mut RunContext<'_>,
        session: &mut SessionState,
        scratch: &str,
        groups: &[CommitGroup],
        messages: &[GroupMessage],
        report: &mut RewriteReport,
    ) -> Result<(), RewriteError> {
        let messages: HashMap<usize, &str> = messages
            .iter()
            .map(|message| (message.group_id, message.message.as_str()))
            .collect();
        let policy = self.config.replay.conflict_policy;

        for group in groups {
            let Some(last_index) = group.len().checked_sub(1) else {
                continue;
            };
            let mut applied: Vec<CommitHash> = group
                .members
                .iter()
                .filter(|member| member.status == CommitStatus::Merged)
                .map(|member| member.hash.clone())
                .collect();

            for (index, member) in group.members.iter().enumerate() {
                if member.status != CommitStatus::Pending {
                    continue;
                }

                let mode = if applied.is_empty() {
                    ReplayMode::NewCommit
                } else {
                    ReplayMode::Fold
                };
                // The scratch branch starts at the root, so the root is applied as is.
                let outcome = if member.is_root() {
                    StepOutcome::Applied {
                        tip: session
                            .scratch_tip
                            .clone()
                            .unwrap_or_else(|| member.hash.clone()),
                    }
                } else {
                    replay_commit(self.vcs, scratch, member, mode, policy)?
                };

                let mut statuses = Vec::new();
                let mut mappings = Vec::new();
                let label = match &outcome {
                    StepOutcome::Applied { .. } => {
                        applied.push(member.hash.clone());
                        "applied"
                    }
                    StepOutcome::Resolved { conflicts, .. } => {
                        applied.push(member.hash.clone());
                        report.resolved.push(member.hash.clone());
                        report.warnings.push(format!(
                            "commit {} kept the destination side of {} conflicting paths",
                            member.short_hash(),
                            conflicts.len()
                        ));
                        "resolved"
                    }
                    StepOutcome::Skipped { conflicts } => {
                        statuses.push((member.hash.clone(), CommitStatus::Skipped));
                        report.warnings.push(format!(
                            "commit {} skipped after {} conflicting paths",
                            member.short_hash(),
                            conflicts.len()
                        ));
                        "skipped"
                    }
                };
                if let Some(tip) = outcome.tip() {
                    session.scratch_tip = Some(tip.to_owned());
                }

                if index == last_index && !applied.is_empty() {
                    let message = messages.get(&group.id).copied().ok_or_else(|| {
                        RewriteError::FatalOrchestration(format!(
                            "no message planned for group {}",
                            group.id
                        ))
                    })?;
                    let tip = self.vcs.set_message(scratch, message)?;
                    for hash in &applied {
                        statuses.push((hash.clone(), CommitStatus::Rewritten));
                        mappings.push(HashMapping {
                            old_hash: hash.clone(),
                            new_hash: tip.clone(),
                        });
                    }
                    session.scratch_tip = Some(tip);
                } else if outcome.tip().is_some() {
                    statuses.push((member.hash.clone(), CommitStatus::Merged));
                }

                session.current_position = Some(member.hash.clone());
                session.processed_commits += 1;
                self.store.record_step(&ReplayStepRecord {
                    statuses,
                    mappings,
                    session: session.clone(),
                })?;

                tracing::debug!(
                    commit = member.short_hash(),
                    group = group.id,
                    outcome = label,
                    "recorded replay step"
                );
                writeln!(
                    ctx.out,
                    "[{}/{}] {} {label}",
                    session.processed_commits,
                    session.total_commits,
                    member.short_hash()
                )?;
            }
        }
        Ok(())
    }

    fn swap_branch(
        &self,
        branch: &str,
        scratch: &str,
        tip: &str,
        original_tip: &str,
    ) -> Result<(), VcsError> {
        // A resumed swap may find the pointer already moved.
        if self.vcs.resolve_ref(branch)?.as_deref() != Some(tip) {
            self.vcs.reset_branch(branch, tip, Some(original_tip))?;
        }
        self.vcs.checkout(branch)?;
        if self.vcs.resolve_ref(scratch)?.is_some() {
            self.vcs.delete_ref(scratch)?;
        }
        tracing::info!(branch, tip, "swapped branch to rewritten history");
        Ok(())
    }

    fn finalize(&self, branch: &str, report: &mut RewriteReport) {
        let finalize = self.config.finalize;

        if finalize.push {
            report.push = match self.vcs.upstream_remote(branch) {
                Ok(Some(remote)) => match self.vcs.force_push(&remote, branch) {
                    Ok(()) => PushOutcome::Pushed { remote },
                    Err(err) => {
                        tracing::warn!(remote = %remote, error = %err, "push failed");
                        report
                            .warnings
                            .push(format!("push to {remote} failed: {err}"));
                        PushOutcome::Failed {
                            remote,
                            error: err.to_string(),
                        }
                    }
                },
                Ok(None) => PushOutcome::NoUpstream,
                Err(err) => {
                    tracing::warn!(error = %err, "could not read upstream remote");
                    report
                        .warnings
                        .push(format!("could not read the upstream of {branch}: {err}"));
                    PushOutcome::Failed {
                        remote: "upstream".to_owned(),
                        error: err.to_string(),
                    }
                }
            };
        }

        if finalize.gc
            && let Err(err) = self.vcs.gc()
        {
            tracing::warn!(error = %err, "garbage collection failed");
            report
                .warnings
                .push(format!("garbage collection failed: {err}"));
        }
    }

    fn verify(&self, report: &mut RewriteReport) {
        if !self.config.finalize.verify_integrity {
            return;
        }

        let passed = match self.vcs.integrity_check() {
            Ok(passed) => passed,
            Err(err) => {
                tracing::warn!(error = %err, "integrity check could not run");
                false
            }
        };
        if !passed {
            report.warnings.push(
                "repository integrity check failed; inspect the repository or roll back".to_owned(),
            );
        }
        report.integrity = Some(passed);
    }

    fn check_repository(&self, branch: &str) -> Result<(), RewriteError> {
        let repository = &self.config.repository;
        let status = self.vcs.repo_status(repository.remote_sync_check)?;

        if repository.require_clean && status.dirty {
            return Err(RewriteError::RepoState(
                "working tree has uncommitted changes to tracked files".to_owned(),
            ));
        }
        if repository.remote_sync_check && status.has_upstream && !status.is_synced() {
            return Err(RewriteError::RepoState(format!(
                "{branch} is {} commits behind its upstream",
                status.behind
            )));
        }
        Ok(())
    }

    fn create_backup(&self, branch: &str) -> Result<String, RewriteError> {
        let timestamp = chrono::Local::now()
            .format(BACKUP_TIMESTAMP_FORMAT)
            .to_string();
        let name = self.config.backup.render(branch, &timestamp);
        Ok(self.vcs.create_backup_ref(branch, &name)?)
    }

    fn on_branch(&self, branch: &str) -> bool {
        self.vcs.current_branch().ok().as_deref() == Some(branch)
    }

    fn recover_after_failure(&self, branch: &str) {
        if let Err(err) = self.vcs.abort_replay() {
            tracing::warn!(error = %err, "failed to abort in-flight replay");
        }
        if let Err(err) = self.vcs.checkout(branch) {
            tracing::warn!(branch, error = %err, "failed to return to original branch");
        }
    }
}

/// The single commit without a parent, where the scratch branch starts.
fn unique_root(branch: &str, commits: &[CommitRecord]) -> Result<CommitHash, RewriteError> {
    let roots: Vec<&CommitRecord> = commits.iter().filter(|commit| commit.is_root()).collect();
    match roots.as_slice() {
        [root] => Ok(root.hash.clone()),
        _ => Err(RewriteError::NoUniqueRoot {
            branch: branch.to_owned(),
            found: roots.len(),
        }),
    }
}
