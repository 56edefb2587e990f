use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use recast_core::{CommitHash, CommitRecord, CommitStatus};

use crate::conflict::{ConflictEntry, Resolution, parse_unmerged};
use crate::history::{first_parent_history, head_branch, open_repo, resolve};
use crate::{RepoStatus, ReplayMode, ReplayOutcome, Vcs, VcsError};

/// [`Vcs`] over a working copy: gix for history reads, the `git` binary for
/// everything that mutates refs, the index, or the working tree.
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn open(workspace: impl AsRef<Path>) -> Result<Self, VcsError> {
        let repo = gix::discover(workspace.as_ref())
            .map_err(|err| VcsError::NotARepository(err.to_string()))?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| VcsError::NotARepository("repository has no working tree".to_owned()))?;
        Ok(Self { workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcsError> {
        tracing::trace!(args = ?args, "running git");
        Command::new("git")
            .arg("-C")
            .arg(&self.workdir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| VcsError::Spawn {
                command: command_name(args),
                source,
            })
    }

    fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(VcsError::Command {
                command: command_name(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn head(&self) -> Result<CommitHash, VcsError> {
        Ok(self.git(&["rev-parse", "--verify", "HEAD"])?.trim().to_owned())
    }

    fn modified_files(&self, parent: Option<&str>, hash: &str) -> Result<Vec<String>, VcsError> {
        let listing = match parent {
            Some(parent) => self.git(&["diff", "--name-only", "--no-renames", parent, hash])?,
            None => self.git(&["ls-tree", "-r", "--name-only", hash])?,
        };
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn parent_count(&self, commit: &str) -> Result<usize, VcsError> {
        let line = self.git(&["rev-list", "--parents", "-n", "1", commit])?;
        Ok(line.split_whitespace().count().saturating_sub(1))
    }

    fn unmerged_entries(&self) -> Result<Vec<ConflictEntry>, VcsError> {
        let status = self.git(&["status", "--porcelain", "-z", "--untracked-files=no"])?;
        Ok(parse_unmerged(&status))
    }

    fn exists_in_head(&self, path: &str) -> Result<bool, VcsError> {
        let spec = format!("HEAD:{path}");
        Ok(self.run(&["cat-file", "-e", &spec])?.status.success())
    }

    fn clear_pick_state(&self) -> Result<(), VcsError> {
        // a leftover CHERRY_PICK_HEAD blocks `commit --amend`
        let _ = self.run(&["update-ref", "-d", "CHERRY_PICK_HEAD"])?;
        Ok(())
    }

    fn amend_head(&self) -> Result<CommitHash, VcsError> {
        self.clear_pick_state()?;
        self.git(&["commit", "-q", "--amend", "--no-edit", "--allow-empty"])?;
        self.head()
    }
}

impl Vcs for GitCli {
    fn current_branch(&self) -> Result<String, VcsError> {
        head_branch(&open_repo(&self.workdir)?)
    }

    fn repo_status(&self, check_upstream: bool) -> Result<RepoStatus, VcsError> {
        let output = self.git(&["status", "--porcelain=v2", "--branch", "--untracked-files=no"])?;
        let mut status = RepoStatus::default();

        for line in output.lines() {
            if let Some(head) = line.strip_prefix("# branch.head ") {
                if head != "(detached)" {
                    status.branch = Some(head.to_owned());
                }
            } else if line.starts_with("# branch.upstream ") {
                status.has_upstream = true;
            } else if let Some(counts) = line.strip_prefix("# branch.ab ") {
                if check_upstream {
                    for count in counts.split_whitespace() {
                        if let Some(ahead) = count.strip_prefix('+') {
                            status.ahead = ahead.parse().unwrap_or(0);
                        } else if let Some(behind) = count.strip_prefix('-') {
                            status.behind = behind.parse().unwrap_or(0);
                        }
                    }
                }
            } else if !line.starts_with('#') && !line.trim().is_empty() {
                status.dirty = true;
            }
        }

        Ok(status)
    }

    fn list_commits(&self, branch: &str) -> Result<Vec<CommitRecord>, VcsError> {
        let repo = open_repo(&self.workdir)?;
        let tip = resolve(&repo, branch).ok_or_else(|| VcsError::MissingRef(branch.to_owned()))?;
        let history = first_parent_history(&repo, tip)?;

        let mut commits = Vec::with_capacity(history.len());
        for meta in history {
            let diff_content = self.diff(meta.parent.as_deref(), &meta.hash)?;
            let modified_files = self.modified_files(meta.parent.as_deref(), &meta.hash)?;
            commits.push(CommitRecord {
                hash: meta.hash,
                parent_hash: meta.parent,
                message: meta.message,
                diff_content,
                modified_files,
                author: meta.author,
                author_email: meta.author_email,
                commit_date: meta.timestamp,
                tree_hash: meta.tree,
                status: CommitStatus::Pending,
            });
        }

        tracing::debug!(branch, commits = commits.len(), "scanned branch history");
        Ok(commits)
    }

    fn diff(&self, parent: Option<&str>, hash: &str) -> Result<String, VcsError> {
        match parent {
            Some(parent) => self.git(&["diff", "--no-color", "--no-ext-diff", parent, hash]),
            None => Ok(self.modified_files(None, hash)?.join("\n")),
        }
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<CommitHash>, VcsError> {
        let repo = open_repo(&self.workdir)?;
        Ok(resolve(&repo, name).map(|id| id.to_string().to_ascii_lowercase()))
    }

    fn create_backup_ref(&self, branch: &str, name: &str) -> Result<String, VcsError> {
        self.git(&["branch", name, branch])?;
        tracing::info!(branch, backup = name, "created backup ref");
        Ok(name.to_owned())
    }

    fn create_scratch_ref(&self, scratch: &str, base: &str) -> Result<(), VcsError> {
        self.git(&["checkout", "-q", "-B", scratch, base])?;
        Ok(())
    }

    fn replay_onto(
        &self,
        scratch: &str,
        commit: &str,
        mode: ReplayMode,
    ) -> Result<ReplayOutcome, VcsError> {
        let mut args = match mode {
            ReplayMode::NewCommit => vec!["cherry-pick", "--allow-empty", "--keep-redundant-commits"],
            ReplayMode::Fold => vec!["cherry-pick", "--no-commit"],
        };
        if self.parent_count(commit)? > 1 {
            args.extend(["--mainline", "1"]);
        }
        args.push(commit);

        let output = self.run(&args)?;
        if !output.status.success() {
            let conflicts = self.unmerged_entries()?;
            if conflicts.is_empty() {
                return Err(VcsError::Command {
                    command: "cherry-pick".to_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                });
            }
            tracing::debug!(scratch, commit, conflicts = conflicts.len(), "replay conflicted");
            return Ok(ReplayOutcome::Conflict(conflicts));
        }

        let tip = match mode {
            ReplayMode::NewCommit => self.head()?,
            ReplayMode::Fold => self.amend_head()?,
        };
        Ok(ReplayOutcome::Applied { tip })
    }

    fn resolve_conflict(&self, entry: &ConflictEntry) -> Result<(), VcsError> {
        let path = entry.path.as_str();
        let keep = match entry.kind.resolution() {
            Resolution::KeepDestination => true,
            Resolution::KeepDestinationIfPresent => self.exists_in_head(path)?,
            Resolution::Remove => false,
        };

        if keep {
            self.git(&["checkout", "--ours", "--", path])?;
            self.git(&["add", "--", path])?;
        } else {
            self.git(&["rm", "-q", "-f", "--ignore-unmatch", "--", path])?;
        }

        tracing::warn!(
            path,
            kind = entry.kind.as_str(),
            kept_destination = keep,
            "resolved conflict in favour of the destination"
        );
        Ok(())
    }

    fn continue_replay(&self, commit: &str, mode: ReplayMode) -> Result<CommitHash, VcsError> {
        match mode {
            ReplayMode::NewCommit => {
                self.git(&["commit", "-q", "--allow-empty", "--no-edit", "-C", commit])?;
                self.clear_pick_state()?;
                self.head()
            }
            ReplayMode::Fold => self.amend_head(),
        }
    }

    fn abort_replay(&self) -> Result<(), VcsError> {
        let _ = self.run(&["cherry-pick", "--abort"])?;
        self.clear_pick_state()?;
        self.git(&["reset", "-q", "--hard", "HEAD"])?;
        Ok(())
    }

    fn set_message(&self, scratch: &str, message: &str) -> Result<CommitHash, VcsError> {
        self.clear_pick_state()?;
        self.git(&["commit", "-q", "--amend", "--allow-empty", "-m", message])?;
        let tip = self.head()?;
        tracing::debug!(scratch, tip = %tip, "set replayed commit message");
        Ok(tip)
    }

    fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        self.git(&["checkout", "-q", branch])?;
        Ok(())
    }

    fn reset_branch(
        &self,
        branch: &str,
        target: &str,
        expected_old: Option<&str>,
    ) -> Result<(), VcsError> {
        let checked_out = head_branch(&open_repo(&self.workdir)?).ok();
        if checked_out.as_deref() == Some(branch) {
            if let Some(expected) = expected_old {
                let current = self.head()?;
                if current != expected {
                    return Err(VcsError::Command {
                        command: "reset".to_owned(),
                        stderr: format!("{branch} moved to {current}, expected {expected}"),
                    });
                }
            }
            self.git(&["reset", "-q", "--hard", target])?;
            return Ok(());
        }

        let full_name = format!("refs/heads/{branch}");
        let mut args = vec!["update-ref", full_name.as_str(), target];
        if let Some(expected) = expected_old {
            args.push(expected);
        }
        self.git(&args)?;
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<(), VcsError> {
        let full_name = format!("refs/heads/{name}");
        self.git(&["update-ref", "-d", &full_name])?;
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, VcsError> {
        let listing = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        let mut refs = listing
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(prefix))
            .map(str::to_owned)
            .collect::<Vec<_>>();
        refs.sort();
        Ok(refs)
    }

    fn integrity_check(&self) -> Result<bool, VcsError> {
        let output = self.run(&["fsck", "--no-reflogs"])?;
        if !output.status.success() {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "repository integrity check failed"
            );
        }
        Ok(output.status.success())
    }

    fn upstream_remote(&self, branch: &str) -> Result<Option<String>, VcsError> {
        let key = format!("branch.{branch}.remote");
        let output = self.run(&["config", "--get", &key])?;
        if !output.status.success() {
            return Ok(None);
        }
        let remote = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok((!remote.is_empty()).then_some(remote))
    }

    fn force_push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.git(&["push", "--force-with-lease", remote, branch])?;
        Ok(())
    }

    fn gc(&self) -> Result<(), VcsError> {
        self.git(&["gc", "-q", "--prune=now"])?;
        Ok(())
    }
}

fn command_name(args: &[&str]) -> String {
    args.iter()
        .find(|arg| !arg.starts_with('-'))
        .map(|arg| (*arg).to_owned())
        .unwrap_or_else(|| "git".to_owned())
}
