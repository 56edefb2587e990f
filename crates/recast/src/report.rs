use std::io::{self, Write};

use recast_core::{
    CommitGroup, CommitHash, FilePatterns, GroupStatistics, GroupViolation, HashMapping,
    SessionState, short_hash,
};
use recast_store::{ConsistencyProblem, GroupMessage, StoreStatistics};

/// What a rewrite would do, computed without touching the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RewritePlan {
    pub branch: String,
    pub groups: Vec<CommitGroup>,
    pub messages: Vec<GroupMessage>,
    pub statistics: GroupStatistics,
    pub patterns: FilePatterns,
    pub violations: Vec<GroupViolation>,
}

impl RewritePlan {
    pub fn message_for(&self, group_id: usize) -> Option<&GroupMessage> {
        self.messages
            .iter()
            .find(|message| message.group_id == group_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PushOutcome {
    #[default]
    Disabled,
    NoUpstream,
    Pushed {
        remote: String,
    },
    Failed {
        remote: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RewriteReport {
    pub branch: String,
    pub backup_ref: Option<String>,
    pub resumed: bool,
    pub groups: usize,
    /// Original commits whose changes made it into the new history.
    pub replayed: usize,
    pub new_commits: usize,
    pub skipped: Vec<CommitHash>,
    /// Commits kept after settling conflicts in favour of the destination.
    pub resolved: Vec<CommitHash>,
    pub fallback_messages: usize,
    pub warnings: Vec<String>,
    pub mappings: Vec<HashMapping>,
    pub final_tip: Option<CommitHash>,
    pub integrity: Option<bool>,
    pub push: PushOutcome,
}

impl RewriteReport {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn mapped_hash(&self, old_hash: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.old_hash == old_hash)
            .map(|mapping| mapping.new_hash.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub session: Option<SessionState>,
    pub statistics: StoreStatistics,
    pub resumable: bool,
    pub problems: Vec<ConsistencyProblem>,
}

pub fn render_plan(plan: &RewritePlan, dry_run: bool, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "Plan for {}: {} commits in {} groups ({} merged, {} single)",
        plan.branch,
        plan.statistics.total_commits,
        plan.statistics.total_groups,
        plan.statistics.merged_groups,
        plan.statistics.single_commits
    )?;

    for group in &plan.groups {
        let message = plan
            .message_for(group.id)
            .map(|message| message.message.as_str())
            .unwrap_or("(no message)");
        writeln!(out, "\ngroup {} ({} commits): {message}", group.id, group.len())?;
        for (member, score) in group.members.iter().zip(&group.similarities) {
            let first_line = member.message.lines().next().unwrap_or_default();
            writeln!(out, "  {} {score:.2} {first_line}", member.short_hash())?;
        }
    }

    if !plan.patterns.most_modified.is_empty() {
        writeln!(out, "\nMost modified files ({} unique):", plan.patterns.unique_files)?;
        for (path, count) in &plan.patterns.most_modified {
            writeln!(out, "  {count:>4}  {path}")?;
        }
    }

    for violation in &plan.violations {
        writeln!(out, "warning: {violation}")?;
    }

    if dry_run {
        writeln!(out, "\nDry run: no changes were made. Use --apply to rewrite.")?;
    }
    Ok(())
}

pub fn render_report(report: &RewriteReport, out: &mut dyn Write) -> io::Result<()> {
    let verb = if report.resumed { "Resumed" } else { "Rewrote" };
    writeln!(
        out,
        "{verb} {}: {} groups, {} commits replayed into {} new commits",
        report.branch, report.groups, report.replayed, report.new_commits
    )?;

    if let Some(tip) = &report.final_tip {
        writeln!(out, "new tip: {}", short_hash(tip))?;
    }
    if !report.skipped.is_empty() {
        let skipped = report
            .skipped
            .iter()
            .map(|hash| short_hash(hash))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "skipped after conflicts: {skipped}")?;
    }
    if report.fallback_messages > 0 {
        writeln!(out, "fallback messages used: {}", report.fallback_messages)?;
    }

    match &report.push {
        PushOutcome::Disabled => {}
        PushOutcome::NoUpstream => writeln!(out, "push: no upstream configured")?,
        PushOutcome::Pushed { remote } => writeln!(out, "push: updated {remote}")?,
        PushOutcome::Failed { remote, error } => {
            writeln!(out, "push: failed to update {remote}: {error}")?
        }
    }
    match report.integrity {
        Some(true) => writeln!(out, "integrity check: passed")?,
        Some(false) => writeln!(out, "integrity check: FAILED")?,
        None => {}
    }

    if !report.warnings.is_empty() {
        writeln!(out, "{} warnings:", report.warning_count())?;
        for warning in &report.warnings {
            writeln!(out, "  - {warning}")?;
        }
    }

    if let Some(backup) = &report.backup_ref {
        writeln!(out, "backup: {backup} (undo with `recast rollback {backup}`)")?;
    }
    Ok(())
}

pub fn render_status(status: &StatusReport, out: &mut dyn Write) -> io::Result<()> {
    match &status.session {
        Some(session) => {
            writeln!(out, "session: branch {}", session.branch)?;
            if let Some(backup) = &session.backup_branch {
                writeln!(out, "backup: {backup}")?;
            }
            if let Some(position) = &session.current_position {
                writeln!(out, "last replayed: {}", short_hash(position))?;
            }
            writeln!(
                out,
                "progress: {}/{} ({:.1}%)",
                session.processed_commits,
                session.total_commits,
                session.progress_percent()
            )?;
        }
        None => writeln!(out, "session: none")?,
    }

    let stats = &status.statistics;
    writeln!(
        out,
        "commits: {} total, {} pending, {} merged, {} rewritten, {} done, {} skipped",
        stats.total_commits, stats.pending, stats.merged, stats.rewritten, stats.done, stats.skipped
    )?;
    writeln!(out, "groups: {}, mappings: {}", stats.groups, stats.mappings)?;

    if status.resumable {
        writeln!(out, "an interrupted rewrite can be continued with `recast resume`")?;
    }
    for problem in &status.problems {
        writeln!(out, "inconsistent state: {problem}")?;
    }
    Ok(())
}

pub fn render_backups(backups: &[String], out: &mut dyn Write) -> io::Result<()> {
    if backups.is_empty() {
        return writeln!(out, "no backups found");
    }
    for backup in backups {
        writeln!(out, "{backup}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_mentions_skips_warnings_and_rollback() {
        let report = RewriteReport {
            branch: "main".to_owned(),
            backup_ref: Some("backup/main-20240101-000000".to_owned()),
            groups: 9,
            replayed: 9,
            new_commits: 9,
            skipped: vec!["c5c5c5c5c5c5".to_owned()],
            warnings: vec!["commit c5c5c5c5 skipped after 1 conflicts".to_owned()],
            integrity: Some(true),
            push: PushOutcome::NoUpstream,
            ..RewriteReport::default()
        };

        let mut out = Vec::new();
        render_report(&report, &mut out).expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("skipped after conflicts: c5c5c5c5"));
        assert!(text.contains("1 warnings:"));
        assert!(text.contains("integrity check: passed"));
        assert!(text.contains("recast rollback backup/main-20240101-000000"));
    }

    #[test]
    fn empty_backup_listing_says_so() {
        let mut out = Vec::new();
        render_backups(&[], &mut out).expect("render");
        assert_eq!(String::from_utf8(out).expect("utf8"), "no backups found\n");
    }
}
