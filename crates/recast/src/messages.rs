use std::collections::HashMap;
use std::sync::Arc;

use recast_config::InferenceConfig;
use recast_core::CommitGroup;
use recast_infer::{GroupPayload, MessageGenerator, MessageService, RetryPolicy, load_generator};
use recast_store::{GroupMessage, SqliteStore, Store};
use tokio::runtime::Runtime;

use crate::error::RewriteError;

/// Produces one commit message per group. Generation always resolves to a
/// message: the service falls back to the keyword taxonomy when the
/// generator keeps failing.
pub struct MessagePlanner {
    service: MessageService,
    runtime: Runtime,
    diff_char_budget: usize,
    provider_name: String,
    model_name: String,
}

impl MessagePlanner {
    pub fn from_config(config: &InferenceConfig) -> Result<Self, RewriteError> {
        let loaded = load_generator(config)?;
        Self::with_generator(
            Arc::from(loaded.generator),
            RetryPolicy::from_config(config),
            config.diff_char_budget,
            loaded.provider_name,
            loaded.model_name,
        )
    }

    pub fn with_generator(
        generator: Arc<dyn MessageGenerator>,
        policy: RetryPolicy,
        diff_char_budget: usize,
        provider_name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Result<Self, RewriteError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            service: MessageService::new(generator, policy),
            runtime,
            diff_char_budget,
            provider_name: provider_name.into(),
            model_name: model_name.into(),
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn message_for(&self, group: &CommitGroup) -> GroupMessage {
        let payload = GroupPayload::from_commits(&group.members, self.diff_char_budget);
        let generated = self.runtime.block_on(self.service.message_for(&payload));

        tracing::debug!(
            group = group.id,
            commits = group.len(),
            attempts = generated.attempts,
            fallback = generated.fallback,
            provider = %self.provider_name,
            "generated group message"
        );

        GroupMessage {
            group_id: group.id,
            message: generated.message,
            fallback: generated.fallback,
        }
    }

    /// Messages for every group, without touching the store.
    pub fn plan(&self, groups: &[CommitGroup]) -> Vec<GroupMessage> {
        groups.iter().map(|group| self.message_for(group)).collect()
    }

    /// Reuses messages already stored for `groups` and generates and stores
    /// the missing ones.
    pub fn plan_persisted(
        &self,
        store: &SqliteStore,
        groups: &[CommitGroup],
    ) -> Result<Vec<GroupMessage>, RewriteError> {
        let mut stored: HashMap<usize, GroupMessage> = store
            .group_messages()?
            .into_iter()
            .map(|message| (message.group_id, message))
            .collect();

        let mut messages = Vec::with_capacity(groups.len());
        for group in groups {
            let message = match stored.remove(&group.id) {
                Some(message) => message,
                None => {
                    let message = self.message_for(group);
                    store.save_group_message(&message)?;
                    message
                }
            };
            messages.push(message);
        }
        Ok(messages)
    }
}
