use serde::{Deserialize, Serialize};

pub mod clustering;
pub mod similarity;

pub use clustering::{
    ClusterError, ClusterSettings, FilePatterns, GroupStatistics, GroupViolation, MappingCache,
    MappingSource, cluster_commits, file_patterns, group_statistics, validate_groups,
};
pub use similarity::{diff_similarity, path_similarity, similarity};

pub type CommitHash = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    #[default]
    Pending,
    Merged,
    Rewritten,
    Done,
    Skipped,
}

impl CommitStatus {
    pub const ALL: [CommitStatus; 5] = [
        Self::Pending,
        Self::Merged,
        Self::Rewritten,
        Self::Done,
        Self::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Merged => "merged",
            Self::Rewritten => "rewritten",
            Self::Done => "done",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses only move forward through pending, merged, rewritten, done.
    /// A commit can be skipped before it is rewritten, and skipped is terminal.
    pub fn can_advance_to(self, next: CommitStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Skipped, _) | (Self::Done, _) => false,
            (Self::Pending | Self::Merged, Self::Skipped) => true,
            (_, Self::Skipped) => false,
            (current, next) => next.rank() > current.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Merged => 1,
            Self::Rewritten => 2,
            Self::Done => 3,
            Self::Skipped => 4,
        }
    }
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommitStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "merged" => Ok(Self::Merged),
            "rewritten" => Ok(Self::Rewritten),
            "done" => Ok(Self::Done),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!(
                "invalid commit status '{other}', expected one of: pending, merged, rewritten, done, skipped"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: CommitHash,
    pub parent_hash: Option<CommitHash>,
    pub message: String,
    pub diff_content: String,
    pub modified_files: Vec<String>,
    pub author: String,
    pub author_email: String,
    pub commit_date: i64,
    pub tree_hash: String,
    #[serde(default)]
    pub status: CommitStatus,
}

impl CommitRecord {
    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }

    pub fn is_root(&self) -> bool {
        self.parent_hash.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashMapping {
    pub old_hash: CommitHash,
    pub new_hash: CommitHash,
}

/// An ordered run of commits collapsed into one replayed commit.
///
/// `similarities[i]` is the score between member `i` and member `i - 1`;
/// index 0 is always 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitGroup {
    pub id: usize,
    pub members: Vec<CommitRecord>,
    pub similarities: Vec<f64>,
}

impl CommitGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn first(&self) -> Option<&CommitRecord> {
        self.members.first()
    }

    pub fn last(&self) -> Option<&CommitRecord> {
        self.members.last()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.members.iter().any(|commit| commit.hash == hash)
    }

    pub fn hashes(&self) -> Vec<CommitHash> {
        self.members.iter().map(|commit| commit.hash.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub branch: String,
    pub backup_branch: Option<String>,
    pub current_position: Option<CommitHash>,
    pub total_commits: usize,
    pub processed_commits: usize,
    #[serde(default)]
    pub scratch_ref: Option<String>,
    #[serde(default)]
    pub scratch_tip: Option<CommitHash>,
}

impl SessionState {
    pub fn new(branch: impl Into<String>, backup_branch: Option<String>, total: usize) -> Self {
        Self {
            branch: branch.into(),
            backup_branch,
            current_position: None,
            total_commits: total,
            processed_commits: 0,
            scratch_ref: None,
            scratch_tip: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_commits == 0 {
            return 0.0;
        }
        self.processed_commits as f64 * 100.0 / self.total_commits as f64
    }
}

pub fn short_hash(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(8)
        .map(|(index, _)| index)
        .unwrap_or(hash.len());
    &hash[..end]
}

/// Correlation id for one orchestration run.
pub fn session_id(branch: &str, started_at: i64) -> String {
    let material = format!("{branch}\n{started_at}");
    let mut hex = blake3::hash(material.as_bytes()).to_hex().to_string();
    hex.truncate(12);
    hex
}
