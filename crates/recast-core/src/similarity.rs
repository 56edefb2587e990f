use std::collections::HashSet;
use std::hash::Hash;

pub const PATH_WEIGHT: f64 = 0.4;
pub const DIFF_WEIGHT: f64 = 0.6;

/// Weighted pair score in `[0.0, 1.0]`.
pub fn similarity(diff_a: &str, diff_b: &str, paths_a: &[String], paths_b: &[String]) -> f64 {
    PATH_WEIGHT * path_similarity(paths_a, paths_b) + DIFF_WEIGHT * diff_similarity(diff_a, diff_b)
}

/// Jaccard index over the directories of the touched paths.
pub fn path_similarity(paths_a: &[String], paths_b: &[String]) -> f64 {
    let dirs_a = paths_a.iter().map(|path| dirname(path)).collect::<HashSet<_>>();
    let dirs_b = paths_b.iter().map(|path| dirname(path)).collect::<HashSet<_>>();
    jaccard(&dirs_a, &dirs_b)
}

/// Average of a lowercased word-token Jaccard and a case-sensitive line Jaccard.
pub fn diff_similarity(diff_a: &str, diff_b: &str) -> f64 {
    match (diff_a.is_empty(), diff_b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }

    (word_similarity(diff_a, diff_b) + line_similarity(diff_a, diff_b)) / 2.0
}

fn word_similarity(diff_a: &str, diff_b: &str) -> f64 {
    let lower_a = diff_a.to_lowercase();
    let lower_b = diff_b.to_lowercase();
    let words_a = lower_a.split_whitespace().collect::<HashSet<_>>();
    let words_b = lower_b.split_whitespace().collect::<HashSet<_>>();
    jaccard(&words_a, &words_b)
}

fn line_similarity(diff_a: &str, diff_b: &str) -> f64 {
    jaccard(&content_lines(diff_a), &content_lines(diff_b))
}

fn content_lines(diff: &str) -> HashSet<&str> {
    diff.split('\n')
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !is_header_line(line))
        .collect()
}

fn is_header_line(line: &str) -> bool {
    line.starts_with("+++") || line.starts_with("---") || line.starts_with("@@")
}

fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn jaccard<T: Eq + Hash>(left: &HashSet<T>, right: &HashSet<T>) -> f64 {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let intersection = left.intersection(right).count();
            let union = left.union(right).count();
            intersection as f64 / union as f64
        }
    }
}
