mod support;

use std::error::Error;

use recast::report::PushOutcome;
use recast::{MessagePlanner, RewriteError, RewriteOrchestrator, RunContext};
use recast_config::{ConflictPolicy, RecastConfig};
use recast_core::{CommitStatus, HashMapping};
use recast_store::{SqliteStore, Store};
use tempfile::TempDir;

use support::{BRANCH, FakeVcs, SCRATCH, distinct_history, linear_history, original_hash, planner};

type TestResult = Result<(), Box<dyn Error>>;

struct Fixture {
    _temp: TempDir,
    store: SqliteStore,
    planner: MessagePlanner,
    config: RecastConfig,
}

impl Fixture {
    fn new() -> Result<Self, Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let config = RecastConfig::default();
        let store = SqliteStore::open(temp.path(), &config.storage.database)?;
        Ok(Self {
            _temp: temp,
            store,
            planner: planner(),
            config,
        })
    }

    fn orchestrator<'a>(&'a self, vcs: &'a FakeVcs) -> RewriteOrchestrator<'a> {
        RewriteOrchestrator::new(vcs, &self.store, &self.planner, &self.config)
    }
}

fn statuses(store: &SqliteStore, status: CommitStatus) -> Result<Vec<String>, Box<dyn Error>> {
    Ok(store
        .list_commits_by_status(status)?
        .into_iter()
        .map(|commit| commit.hash)
        .collect())
}

#[test]
fn conflicting_commit_is_skipped_and_the_rest_are_rewritten() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(10));
    let conflicted = original_hash(5);
    vcs.inject_conflict(&conflicted);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = fixture.orchestrator(&vcs).run(&mut ctx)?;

    assert_eq!(report.skipped, vec![conflicted.clone()]);
    assert!(report.warning_count() > 0);
    assert!(report.mapped_hash(&conflicted).is_none());
    for index in (1..=10).filter(|index| *index != 5) {
        assert!(
            report.mapped_hash(&original_hash(index)).is_some(),
            "commit {index} should be mapped"
        );
    }
    assert_eq!(report.replayed, 9);
    assert_eq!(report.new_commits, 9);
    assert_eq!(report.integrity, Some(true));

    let log = vcs.log(BRANCH);
    assert_eq!(log.len(), 9);
    assert!(log.iter().all(|commit| !commit.sources.contains(&conflicted)));
    assert_eq!(vcs.head(), BRANCH);
    assert!(vcs.branch_tip(SCRATCH).is_none());

    let backup = report.backup_ref.clone().ok_or("missing backup ref")?;
    assert_eq!(vcs.branch_tip(&backup), Some(original_hash(10)));

    assert_eq!(statuses(&fixture.store, CommitStatus::Done)?.len(), 9);
    assert_eq!(statuses(&fixture.store, CommitStatus::Skipped)?, vec![conflicted]);
    assert!(fixture.store.load_session()?.is_none());

    let text = String::from_utf8(out)?;
    assert!(text.contains("Created backup backup/main-"));
    assert!(text.contains("[5/10]"));
    Ok(())
}

#[test]
fn similar_commits_fold_into_one_rewritten_commit() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(linear_history(&[
        ("initial", "+# Project\n", "README.md"),
        ("wip retry", "+retry();\n", "src/net/client.rs"),
        ("wip retry", "+retry();\n", "src/net/client.rs"),
        ("wip retry", "+retry();\n", "src/net/client.rs"),
        ("docs", "+Usage notes.\n", "docs/usage.md"),
    ]));

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = fixture.orchestrator(&vcs).run(&mut ctx)?;

    assert_eq!(report.groups, 3);
    assert_eq!(report.replayed, 5);
    assert_eq!(report.new_commits, 3);

    let folded = report.mapped_hash(&original_hash(2)).ok_or("missing mapping")?;
    assert_eq!(report.mapped_hash(&original_hash(3)), Some(folded));
    assert_eq!(report.mapped_hash(&original_hash(4)), Some(folded));

    let log = vcs.log(BRANCH);
    assert_eq!(log.len(), 3);
    assert_eq!(
        log[1].sources,
        vec![original_hash(2), original_hash(3), original_hash(4)]
    );

    let planned = fixture
        .store
        .group_messages()?
        .into_iter()
        .find(|message| message.group_id == 1)
        .ok_or("missing group message")?;
    assert_eq!(log[1].message, planned.message);
    assert_eq!(statuses(&fixture.store, CommitStatus::Done)?.len(), 5);
    Ok(())
}

#[test]
fn preview_changes_nothing() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(4));

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let plan = fixture.orchestrator(&vcs).preview(&mut ctx)?;

    assert_eq!(plan.branch, BRANCH);
    assert_eq!(plan.groups.len(), 4);
    assert_eq!(plan.messages.len(), 4);
    assert_eq!(plan.statistics.total_commits, 4);

    assert_eq!(vcs.mutations(), 0);
    assert_eq!(vcs.branch_tip(BRANCH), Some(original_hash(4)));
    assert!(fixture.store.list_commits()?.is_empty());
    assert!(fixture.store.load_groups()?.is_empty());
    assert!(fixture.store.load_session()?.is_none());
    Ok(())
}

#[test]
fn rollback_restores_the_original_tip() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(3));
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = orchestrator.run(&mut ctx)?;
    assert_ne!(vcs.branch_tip(BRANCH), Some(original_hash(3)));

    let backup = report.backup_ref.ok_or("missing backup ref")?;
    assert_eq!(orchestrator.list_backups()?, vec![backup.clone()]);

    let restored = orchestrator.rollback(&mut ctx, &backup)?;
    assert_eq!(restored, original_hash(3));
    assert_eq!(vcs.branch_tip(BRANCH), Some(original_hash(3)));
    assert_eq!(vcs.branch_tip(&backup), Some(original_hash(3)));

    let missing = orchestrator.rollback(&mut ctx, "backup/main-19700101-000000");
    assert!(matches!(missing, Err(RewriteError::BackupMissing(_))));
    Ok(())
}

#[test]
fn resume_without_a_session_reports_nothing_to_resume() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(3));

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let result = fixture.orchestrator(&vcs).resume(&mut ctx);

    assert!(matches!(result, Err(RewriteError::NothingToResume)));
    assert_eq!(vcs.mutations(), 0);
    Ok(())
}

#[test]
fn interrupted_rewrite_resumes_with_only_pending_commits() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(10));
    vcs.fail_replay_of(&original_hash(6));
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let failed = orchestrator.run(&mut ctx);
    assert!(matches!(failed, Err(RewriteError::Vcs(_))));

    assert_eq!(vcs.head(), BRANCH);
    assert_eq!(vcs.branch_tip(BRANCH), Some(original_hash(10)));
    assert!(fixture.store.can_resume()?);
    let session = fixture.store.load_session()?.ok_or("missing session")?;
    assert_eq!(session.processed_commits, 5);
    assert_eq!(session.current_position, Some(original_hash(5)));

    let before: Vec<HashMapping> = fixture.store.all_mappings()?;
    assert_eq!(before.len(), 5);
    assert_eq!(statuses(&fixture.store, CommitStatus::Pending)?.len(), 5);

    vcs.clear_failures();
    let report = orchestrator.resume(&mut ctx)?;

    assert!(report.resumed);
    assert_eq!(report.replayed, 10);
    for mapping in &before {
        assert_eq!(
            report.mapped_hash(&mapping.old_hash),
            Some(mapping.new_hash.as_str())
        );
    }
    assert_eq!(vcs.log(BRANCH).len(), 10);
    assert_eq!(statuses(&fixture.store, CommitStatus::Done)?.len(), 10);
    assert!(fixture.store.load_session()?.is_none());

    let text = String::from_utf8(out)?;
    assert!(text.contains("Resuming rewrite of main at 5/10"));
    assert!(text.contains("[6/10]"));
    Ok(())
}

#[test]
fn dirty_working_tree_stops_before_any_backup() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(3));
    vcs.set_dirty(true);
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let result = orchestrator.run(&mut ctx);

    assert!(matches!(result, Err(RewriteError::RepoState(_))));
    assert!(orchestrator.list_backups()?.is_empty());
    assert!(fixture.store.load_session()?.is_none());
    Ok(())
}

#[test]
fn prefer_destination_keeps_conflicting_commits() -> TestResult {
    let mut fixture = Fixture::new()?;
    fixture.config.replay.conflict_policy = ConflictPolicy::PreferDestination;
    let vcs = FakeVcs::new(distinct_history(6));
    let conflicted = original_hash(4);
    vcs.inject_conflict(&conflicted);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = fixture.orchestrator(&vcs).run(&mut ctx)?;

    assert!(report.skipped.is_empty());
    assert_eq!(report.resolved, vec![conflicted.clone()]);
    assert!(report.mapped_hash(&conflicted).is_some());
    assert!(report.warning_count() > 0);
    assert_eq!(vcs.resolved_conflicts().len(), 1);
    assert_eq!(vcs.log(BRANCH).len(), 6);
    Ok(())
}

#[test]
fn finalize_pushes_to_the_upstream_remote() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(2));
    vcs.set_upstream("origin");

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = fixture.orchestrator(&vcs).run(&mut ctx)?;

    assert_eq!(
        report.push,
        PushOutcome::Pushed {
            remote: "origin".to_owned()
        }
    );
    assert_eq!(vcs.pushes(), vec![("origin".to_owned(), BRANCH.to_owned())]);
    Ok(())
}

#[test]
fn status_reports_progress_of_an_interrupted_rewrite() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(4));
    vcs.fail_replay_of(&original_hash(3));
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    assert!(orchestrator.run(&mut ctx).is_err());

    let status = orchestrator.status()?;
    assert!(status.resumable);
    assert!(status.problems.is_empty());
    assert_eq!(status.statistics.pending, 2);
    assert_eq!(status.statistics.rewritten, 2);

    orchestrator.reset(&mut ctx, false)?;
    assert!(vcs.branch_tip(SCRATCH).is_none());
    assert!(!fixture.store.can_resume()?);
    Ok(())
}

#[test]
fn failed_branch_swap_is_finished_by_the_next_run() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(4));
    vcs.fail_swap(true);
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let failed = orchestrator.run(&mut ctx);
    assert!(matches!(failed, Err(RewriteError::FatalOrchestration(_))));

    assert_eq!(vcs.head(), BRANCH);
    assert_eq!(vcs.branch_tip(BRANCH), Some(original_hash(4)));
    assert!(statuses(&fixture.store, CommitStatus::Pending)?.is_empty());
    assert!(fixture.store.can_resume()?);
    assert!(orchestrator.status()?.resumable);
    let scratch_tip = fixture
        .store
        .load_session()?
        .and_then(|session| session.scratch_tip)
        .ok_or("missing scratch tip")?;

    vcs.fail_swap(false);
    let report = orchestrator.run(&mut ctx)?;

    assert!(report.resumed);
    assert_eq!(report.replayed, 4);
    assert_eq!(report.final_tip.as_deref(), Some(scratch_tip.as_str()));
    assert_eq!(vcs.branch_tip(BRANCH), Some(scratch_tip));
    assert_eq!(vcs.log(BRANCH).len(), 4);
    assert!(vcs.branch_tip(SCRATCH).is_none());
    assert_eq!(orchestrator.list_backups()?.len(), 1);
    assert_eq!(statuses(&fixture.store, CommitStatus::Done)?.len(), 4);
    assert!(fixture.store.load_session()?.is_none());

    let text = String::from_utf8(out)?;
    assert!(text.contains("finishing the branch swap"));
    Ok(())
}

#[test]
fn finalize_failures_are_reported_and_the_rewrite_stands() -> TestResult {
    let fixture = Fixture::new()?;
    let vcs = FakeVcs::new(distinct_history(3));
    vcs.set_upstream("origin");
    vcs.fail_push();
    vcs.fail_gc();
    vcs.corrupt();

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let report = fixture.orchestrator(&vcs).run(&mut ctx)?;

    assert!(matches!(
        &report.push,
        PushOutcome::Failed { remote, .. } if remote == "origin"
    ));
    assert_eq!(report.integrity, Some(false));
    assert_eq!(report.warning_count(), 3);
    assert!(report.warnings.iter().any(|w| w.starts_with("push to origin failed")));
    assert!(report.warnings.iter().any(|w| w.starts_with("garbage collection failed")));
    assert!(report.warnings.iter().any(|w| w.contains("integrity check failed")));

    let tip = report.final_tip.clone().ok_or("missing final tip")?;
    assert_eq!(vcs.branch_tip(BRANCH), Some(tip));
    assert!(vcs.pushes().is_empty());
    assert_eq!(statuses(&fixture.store, CommitStatus::Done)?.len(), 3);
    assert!(fixture.store.load_session()?.is_none());

    let text = String::from_utf8(out)?;
    assert!(text.contains("push: failed to update origin"));
    assert!(text.contains("integrity check: FAILED"));
    Ok(())
}

#[test]
fn history_without_a_unique_root_creates_no_backup() -> TestResult {
    let fixture = Fixture::new()?;
    let mut history = distinct_history(3);
    history[2].parent_hash = None;
    let vcs = FakeVcs::new(history);
    let orchestrator = fixture.orchestrator(&vcs);

    let mut out = Vec::new();
    let mut ctx = RunContext::new("test-session", &mut out);
    let result = orchestrator.run(&mut ctx);

    assert!(matches!(
        result,
        Err(RewriteError::NoUniqueRoot { found: 2, .. })
    ));
    assert_eq!(vcs.mutations(), 0);
    assert!(orchestrator.list_backups()?.is_empty());
    assert!(fixture.store.list_commits()?.is_empty());
    Ok(())
}
