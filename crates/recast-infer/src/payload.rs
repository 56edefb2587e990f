use recast_core::CommitRecord;

const FILE_SUMMARY_LIMIT: usize = 5;
const NO_CODE_CHANGES: &str = "(no code changes)";
const NO_FILES_CHANGED: &str = "(no files changed)";

/// Input for one group's message: diff excerpts, touched files, and the
/// original messages of its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPayload {
    pub diff_excerpts: Vec<String>,
    pub files: Vec<String>,
    pub original_messages: Vec<String>,
}

impl GroupPayload {
    pub fn from_commits(commits: &[CommitRecord], diff_char_budget: usize) -> Self {
        let multi = commits.len() > 1;
        let mut files: Vec<String> = Vec::new();
        let mut diff_excerpts = Vec::with_capacity(commits.len());
        let mut original_messages = Vec::with_capacity(commits.len());

        for commit in commits {
            let excerpt = if commit.diff_content.is_empty() {
                NO_CODE_CHANGES.to_owned()
            } else {
                truncate_chars(&commit.diff_content, diff_char_budget)
            };
            if multi {
                diff_excerpts.push(format!("Commit {}:\n{excerpt}", commit.short_hash()));
            } else {
                diff_excerpts.push(excerpt);
            }

            for path in &commit.modified_files {
                if !files.contains(path) {
                    files.push(path.clone());
                }
            }
            original_messages.push(commit.message.clone());
        }

        Self {
            diff_excerpts,
            files,
            original_messages,
        }
    }

    pub fn diff_content(&self) -> String {
        self.diff_excerpts.join("\n\n")
    }

    pub fn file_summary(&self) -> String {
        if self.files.is_empty() {
            return NO_FILES_CHANGED.to_owned();
        }
        if self.files.len() <= FILE_SUMMARY_LIMIT {
            return self.files.join(", ");
        }
        format!(
            "{} and {} files total",
            self.files[..FILE_SUMMARY_LIMIT].join(", "),
            self.files.len()
        )
    }

    pub fn original_messages(&self) -> String {
        self.original_messages.join("\n")
    }

    pub fn render_prompt(&self, template: &str) -> String {
        template
            .replace("{diff_content}", &self.diff_content())
            .replace("{file_list}", &self.file_summary())
            .replace("{original_messages}", &self.original_messages())
    }

    /// Lowercased payload text scanned by the keyword fallback.
    pub fn keyword_text(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.diff_content(),
            self.files.join("\n"),
            self.original_messages()
        )
        .to_lowercase()
    }
}

fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
