use recast_config::ConfigError;
use recast_core::ClusterError;
use recast_git::VcsError;
use recast_infer::InferError;
use recast_store::StoreError;
use thiserror::Error;

/// Failures that stop a rewrite. Replay conflicts, generation failures,
/// push failures and integrity problems are reported, not raised.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("repository is not ready for a rewrite: {0}")]
    RepoState(String),
    #[error("rewrite aborted: {0}")]
    FatalOrchestration(String),
    #[error("git operation failed: {0}")]
    Vcs(#[from] VcsError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("clustering failed: {0}")]
    Cluster(#[from] ClusterError),
    #[error("message generator unavailable: {0}")]
    Inference(#[from] InferError),
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no interrupted rewrite to resume")]
    NothingToResume,
    #[error("expected exactly one root commit on {branch}, found {found}")]
    NoUniqueRoot { branch: String, found: usize },
    #[error("backup ref {0} does not exist")]
    BackupMissing(String),
}
