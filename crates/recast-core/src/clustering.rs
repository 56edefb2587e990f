use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::similarity::similarity;
use crate::{CommitGroup, CommitHash, CommitRecord, short_hash};

const MOST_MODIFIED_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("similarity threshold {0} is outside (0, 1]")]
    InvalidThreshold(f64),
    #[error("max group size must be at least 1")]
    InvalidGroupSize,
    #[error("hash mapping lookup failed: {0}")]
    Mapping(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Read access to the durable old-hash to new-hash mapping.
pub trait MappingSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn mapped_hash(&self, old_hash: &str) -> Result<Option<CommitHash>, Self::Error>;
}

impl MappingSource for HashMap<CommitHash, CommitHash> {
    type Error = Infallible;

    fn mapped_hash(&self, old_hash: &str) -> Result<Option<CommitHash>, Self::Error> {
        Ok(self.get(old_hash).cloned())
    }
}

/// Read-through cache over a [`MappingSource`], scoped to one clustering pass.
pub struct MappingCache<'a, S: MappingSource + ?Sized> {
    source: &'a S,
    entries: HashMap<CommitHash, Option<CommitHash>>,
}

impl<'a, S: MappingSource + ?Sized> MappingCache<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&mut self, old_hash: &str) -> Result<Option<CommitHash>, ClusterError> {
        if let Some(cached) = self.entries.get(old_hash) {
            return Ok(cached.clone());
        }

        let resolved = self
            .source
            .mapped_hash(old_hash)
            .map_err(|err| ClusterError::Mapping(Box::new(err)))?;
        self.entries.insert(old_hash.to_owned(), resolved.clone());
        Ok(resolved)
    }

    pub fn cached_len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub threshold: f64,
    pub max_group_size: usize,
}

impl ClusterSettings {
    pub fn new(threshold: f64, max_group_size: usize) -> Result<Self, ClusterError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ClusterError::InvalidThreshold(threshold));
        }
        if max_group_size == 0 {
            return Err(ClusterError::InvalidGroupSize);
        }
        Ok(Self {
            threshold,
            max_group_size,
        })
    }
}

/// Groups consecutive similar commits in one forward pass over commit date order.
///
/// A commit joins the open group only when it is the child of the group's last
/// member (directly or through the rewrite mapping), the group has room, and
/// the pair similarity is strictly greater than the threshold.
pub fn cluster_commits<S: MappingSource + ?Sized>(
    commits: &[CommitRecord],
    mapping: &S,
    settings: ClusterSettings,
) -> Result<Vec<CommitGroup>, ClusterError> {
    let mut ordered = commits.to_vec();
    ordered.sort_by_key(|commit| commit.commit_date);

    let mut cache = MappingCache::new(mapping);
    let mut groups = Vec::new();
    let mut members: Vec<CommitRecord> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();

    for commit in ordered {
        let Some(last) = members.last() else {
            members.push(commit);
            scores.push(1.0);
            continue;
        };

        let joins = if !is_continuous(&commit, last, &mut cache)? {
            None
        } else if members.len() >= settings.max_group_size {
            None
        } else {
            let score = pair_similarity(&commit, last);
            (score > settings.threshold).then_some(score)
        };

        match joins {
            Some(score) => {
                members.push(commit);
                scores.push(score);
            }
            None => {
                groups.push(CommitGroup {
                    id: groups.len(),
                    members: std::mem::take(&mut members),
                    similarities: std::mem::take(&mut scores),
                });
                members.push(commit);
                scores.push(1.0);
            }
        }
    }

    if !members.is_empty() {
        groups.push(CommitGroup {
            id: groups.len(),
            members,
            similarities: scores,
        });
    }

    Ok(groups)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupViolation {
    Oversized {
        group: usize,
        size: usize,
        max: usize,
    },
    Discontinuous {
        group: usize,
        from: CommitHash,
        to: CommitHash,
    },
    BelowThreshold {
        group: usize,
        index: usize,
        similarity: f64,
        threshold: f64,
    },
}

impl fmt::Display for GroupViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversized { group, size, max } => {
                write!(f, "group {group} exceeds the size limit: {size} > {max}")
            }
            Self::Discontinuous { group, from, to } => write!(
                f,
                "group {group} is not continuous: {} -> {}",
                short_hash(from),
                short_hash(to)
            ),
            Self::BelowThreshold {
                group,
                index,
                similarity,
                threshold,
            } => write!(
                f,
                "group {group} member {index} similarity too low: {similarity:.3} <= {threshold}"
            ),
        }
    }
}

/// Re-walks produced groups and reports constraint violations without fixing them.
pub fn validate_groups<S: MappingSource + ?Sized>(
    groups: &[CommitGroup],
    mapping: &S,
    settings: ClusterSettings,
) -> Result<Vec<GroupViolation>, ClusterError> {
    let mut cache = MappingCache::new(mapping);
    let mut violations = Vec::new();

    for (position, group) in groups.iter().enumerate() {
        if group.len() > settings.max_group_size {
            violations.push(GroupViolation::Oversized {
                group: position,
                size: group.len(),
                max: settings.max_group_size,
            });
        }

        for (index, pair) in group.members.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            if !is_continuous(current, previous, &mut cache)? {
                violations.push(GroupViolation::Discontinuous {
                    group: position,
                    from: previous.hash.clone(),
                    to: current.hash.clone(),
                });
            }

            let score = pair_similarity(current, previous);
            if score <= settings.threshold {
                violations.push(GroupViolation::BelowThreshold {
                    group: position,
                    index: index + 1,
                    similarity: score,
                    threshold: settings.threshold,
                });
            }
        }
    }

    Ok(violations)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GroupStatistics {
    pub total_groups: usize,
    pub total_commits: usize,
    pub single_commits: usize,
    pub merged_groups: usize,
    pub average_group_size: f64,
}

pub fn group_statistics(groups: &[CommitGroup]) -> GroupStatistics {
    if groups.is_empty() {
        return GroupStatistics::default();
    }

    let total_commits = groups.iter().map(CommitGroup::len).sum::<usize>();
    let single_commits = groups.iter().filter(|group| group.len() == 1).count();

    GroupStatistics {
        total_groups: groups.len(),
        total_commits,
        single_commits,
        merged_groups: groups.len() - single_commits,
        average_group_size: total_commits as f64 / groups.len() as f64,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilePatterns {
    pub most_modified: Vec<(String, usize)>,
    pub single_group_files: Vec<String>,
    pub unique_files: usize,
}

pub fn file_patterns(groups: &[CommitGroup]) -> FilePatterns {
    let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
    let mut group_counts: BTreeMap<&str, usize> = BTreeMap::new();

    for group in groups {
        let mut seen_in_group = Vec::<&str>::new();
        for commit in &group.members {
            for path in &commit.modified_files {
                *frequency.entry(path.as_str()).or_default() += 1;
                if !seen_in_group.contains(&path.as_str()) {
                    seen_in_group.push(path.as_str());
                }
            }
        }
        for path in seen_in_group {
            *group_counts.entry(path).or_default() += 1;
        }
    }

    let mut most_modified = frequency
        .iter()
        .map(|(path, count)| ((*path).to_owned(), *count))
        .collect::<Vec<_>>();
    most_modified.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    most_modified.truncate(MOST_MODIFIED_LIMIT);

    let single_group_files = group_counts
        .iter()
        .filter(|(_, count)| **count == 1)
        .map(|(path, _)| (*path).to_owned())
        .collect();

    FilePatterns {
        most_modified,
        single_group_files,
        unique_files: frequency.len(),
    }
}

fn is_continuous<S: MappingSource + ?Sized>(
    commit: &CommitRecord,
    previous: &CommitRecord,
    cache: &mut MappingCache<'_, S>,
) -> Result<bool, ClusterError> {
    let Some(parent) = commit.parent_hash.as_deref() else {
        return Ok(false);
    };
    if parent == previous.hash {
        return Ok(true);
    }
    Ok(cache
        .lookup(&previous.hash)?
        .is_some_and(|mapped| mapped == parent))
}

fn pair_similarity(commit: &CommitRecord, previous: &CommitRecord) -> f64 {
    similarity(
        &commit.diff_content,
        &previous.diff_content,
        &commit.modified_files,
        &previous.modified_files,
    )
}
