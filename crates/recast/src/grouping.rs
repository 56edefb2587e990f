use recast_config::ClusteringConfig;
use recast_core::{ClusterSettings, CommitGroup, CommitRecord, cluster_commits, validate_groups};
use recast_store::{SqliteStore, Store};

use crate::error::RewriteError;

pub fn settings_from_config(config: &ClusteringConfig) -> Result<ClusterSettings, RewriteError> {
    Ok(ClusterSettings::new(
        config.similarity_threshold,
        config.max_group_size,
    )?)
}

/// Clusters `commits` against the stored hash mapping without writing anything.
pub fn plan_groups(
    store: &SqliteStore,
    commits: &[CommitRecord],
    settings: ClusterSettings,
) -> Result<Vec<CommitGroup>, RewriteError> {
    Ok(cluster_commits(commits, store, settings)?)
}

/// Clusters `commits` and replaces the stored grouping in one transaction.
pub fn cluster_and_persist(
    store: &SqliteStore,
    commits: &[CommitRecord],
    settings: ClusterSettings,
) -> Result<Vec<CommitGroup>, RewriteError> {
    let groups = plan_groups(store, commits, settings)?;

    for violation in validate_groups(&groups, store, settings)? {
        tracing::warn!(%violation, "clustering produced an inconsistent group");
    }

    store.save_groups(&groups)?;
    tracing::info!(
        commits = commits.len(),
        groups = groups.len(),
        threshold = settings.threshold,
        max_group_size = settings.max_group_size,
        "clustered commit history"
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use recast_core::CommitStatus;
    use tempfile::tempdir;

    use super::*;

    fn commit(hash: &str, parent: Option<&str>, date: i64) -> CommitRecord {
        CommitRecord {
            hash: hash.to_owned(),
            parent_hash: parent.map(str::to_owned),
            message: format!("wip {hash}"),
            diff_content: "+same change\n".to_owned(),
            modified_files: vec!["src/lib.rs".to_owned()],
            author: "Dev".to_owned(),
            author_email: "dev@example.com".to_owned(),
            commit_date: date,
            tree_hash: String::new(),
            status: CommitStatus::Pending,
        }
    }

    #[test]
    fn persisted_groups_round_trip_through_the_store() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let store = SqliteStore::open(temp.path(), "state.sqlite")?;
        let commits = vec![
            commit("a1", None, 1),
            commit("b2", Some("a1"), 2),
            commit("c3", Some("b2"), 3),
        ];
        store.replace_commits(&commits)?;

        let settings = settings_from_config(&ClusteringConfig::default())?;
        let groups = cluster_and_persist(&store, &commits, settings)?;

        assert_eq!(groups.len(), 1);
        assert_eq!(store.load_groups()?, groups);
        Ok(())
    }

    #[test]
    fn rewritten_parents_keep_continuity_through_the_mapping()
    -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let store = SqliteStore::open(temp.path(), "state.sqlite")?;
        let commits = vec![commit("a1", None, 1), commit("b2", Some("new-a1"), 2)];
        store.replace_commits(&commits)?;

        let settings = settings_from_config(&ClusteringConfig::default())?;
        assert_eq!(plan_groups(&store, &commits, settings)?.len(), 2);

        store.save_mapping("a1", "new-a1")?;
        assert_eq!(plan_groups(&store, &commits, settings)?.len(), 1);
        Ok(())
    }

    #[test]
    fn invalid_cluster_settings_are_rejected() {
        let config = ClusteringConfig {
            similarity_threshold: 1.5,
            max_group_size: 10,
        };
        assert!(matches!(
            settings_from_config(&config),
            Err(RewriteError::Cluster(_))
        ));
    }
}
