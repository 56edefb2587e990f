pub const CONVENTIONAL_TYPES: [&str; 11] = [
    "feat", "fix", "docs", "style", "refactor", "test", "chore", "perf", "ci", "build", "revert",
];

const MAX_MESSAGE_CHARS: usize = 100;

const FALLBACK_RULES: [(&[&str], &str); 6] = [
    (&["fix", "bug", "error", "issue"], "fix: resolve issues"),
    (
        &["feature", "add", "new", "implement"],
        "feat: add new feature",
    ),
    (&["refactor", "clean", "improve"], "refactor: improve code"),
    (&["doc", "readme", "comment"], "docs: update documentation"),
    (&["test", "spec"], "test: add tests"),
    (&["style", "format", "lint"], "style: format code"),
];
const FALLBACK_DEFAULT: &str = "chore: update files";

const PREFIX_RULES: [(&[&str], &str); 5] = [
    (&["fix", "bug", "error"], "fix"),
    (&["feature", "add", "new"], "feat"),
    (&["refactor", "clean"], "refactor"),
    (&["doc", "readme"], "docs"),
    (&["test"], "test"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageWarning {
    Empty,
    TooLong(usize),
    MultiLine,
}

/// Deterministic message used when no generator answer is available.
pub fn fallback_message(keyword_text: &str) -> String {
    let text = keyword_text.to_lowercase();
    FALLBACK_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(_, message)| *message)
        .unwrap_or(FALLBACK_DEFAULT)
        .to_owned()
}

/// Reduces generator output to a single `type: summary` line.
///
/// Returns `None` when nothing usable is left after cleanup.
pub fn normalize_message(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(clean_line)
        .find(|line| !line.is_empty())?;

    if has_conventional_prefix(&line) {
        return Some(line);
    }

    Some(format!("{}: {line}", infer_type(&line)))
}

pub fn has_conventional_prefix(message: &str) -> bool {
    let Some((head, _)) = message.split_once(':') else {
        return false;
    };
    let head = head.trim().to_lowercase();
    let head = head.strip_suffix('!').unwrap_or(&head);
    let kind = match head.split_once('(') {
        Some((kind, scope)) if scope.ends_with(')') => kind,
        Some(_) => return false,
        None => head,
    };
    CONVENTIONAL_TYPES.contains(&kind)
}

pub fn infer_type(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    PREFIX_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(_, kind)| *kind)
        .unwrap_or("chore")
}

pub fn validate_message(message: &str) -> Vec<MessageWarning> {
    let mut warnings = Vec::new();
    if message.trim().is_empty() {
        warnings.push(MessageWarning::Empty);
        return warnings;
    }
    let chars = message.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        warnings.push(MessageWarning::TooLong(chars));
    }
    if message.contains('\n') {
        warnings.push(MessageWarning::MultiLine);
    }
    warnings
}

fn clean_line(line: &str) -> String {
    let line = line.trim();
    if line.starts_with("```") {
        return String::new();
    }
    line.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_owned()
}
