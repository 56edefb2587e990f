use std::path::Path;

use recast_core::CommitHash;

use crate::VcsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitMeta {
    pub hash: CommitHash,
    pub parent: Option<CommitHash>,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: i64,
    pub tree: String,
}

pub(crate) fn open_repo(workdir: &Path) -> Result<gix::Repository, VcsError> {
    gix::open(workdir).map_err(|err| VcsError::NotARepository(err.to_string()))
}

pub(crate) fn head_branch(repo: &gix::Repository) -> Result<String, VcsError> {
    let name = repo
        .head_name()
        .map_err(|err| VcsError::Read(err.to_string()))?;
    let Some(name) = name else {
        return Err(VcsError::DetachedHead);
    };
    Ok(name.shorten().to_string())
}

pub(crate) fn resolve(repo: &gix::Repository, spec: &str) -> Option<gix::ObjectId> {
    repo.rev_parse_single(spec).ok().map(|id| id.detach())
}

/// Walks first parents from `tip` back to the root and returns oldest first.
pub(crate) fn first_parent_history(
    repo: &gix::Repository,
    tip: gix::ObjectId,
) -> Result<Vec<CommitMeta>, VcsError> {
    let mut history = Vec::new();
    let mut next = Some(tip);

    while let Some(id) = next {
        let commit = repo
            .find_commit(id)
            .map_err(|err| VcsError::Read(err.to_string()))?;

        let parent = commit.parent_ids().next().map(|parent| parent.detach());
        let (author, author_email) = commit
            .author()
            .map(|signature| {
                (
                    decode_text(signature.name.as_ref()),
                    decode_text(signature.email.as_ref()),
                )
            })
            .unwrap_or_default();
        let timestamp = commit.time().map(|time| time.seconds).unwrap_or(0);
        let tree = commit
            .tree_id()
            .map(|tree| tree.to_string())
            .map_err(|err| VcsError::Read(err.to_string()))?;
        let message = String::from_utf8_lossy(commit.message_raw_sloppy().as_ref())
            .trim_end()
            .to_owned();

        history.push(CommitMeta {
            hash: id.to_string().to_ascii_lowercase(),
            parent: parent.map(|parent| parent.to_string().to_ascii_lowercase()),
            message,
            author,
            author_email,
            timestamp,
            tree,
        });
        next = parent;
    }

    history.reverse();
    Ok(history)
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}
