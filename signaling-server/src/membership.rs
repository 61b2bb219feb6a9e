use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use peer_calls_protocol::{ConversationId, UserId};
use tokio::sync::RwLock;

/// Conversation membership, owned by the chat application.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn is_participant(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool;

    /// Members of the conversation, empty if it does not exist.
    async fn members(&self, conversation_id: &ConversationId) -> Vec<UserId>;
}

/// In-memory membership table.
#[derive(Default)]
pub struct StaticMembership {
    conversations: RwLock<HashMap<ConversationId, Vec<UserId>>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_conversation(
        &self,
        conversation_id: ConversationId,
        members: impl IntoIterator<Item = UserId>,
    ) {
        self.conversations
            .write()
            .await
            .insert(conversation_id, members.into_iter().collect());
    }

    /// Load a table shaped like `{"conversation-id": ["user-a", "user-b"]}`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let conversations: HashMap<ConversationId, Vec<UserId>> =
            serde_json::from_str(json).context("malformed membership table")?;
        Ok(Self {
            conversations: RwLock::new(conversations),
        })
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read membership file {}", path.display()))?;
        Self::from_json(&json)
    }

    pub async fn remove_member(&self, conversation_id: &ConversationId, user_id: &UserId) {
        if let Some(members) = self.conversations.write().await.get_mut(conversation_id) {
            members.retain(|member| member != user_id);
        }
    }
}

#[async_trait]
impl Membership for StaticMembership {
    async fn is_participant(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map_or(false, |members| members.contains(user_id))
    }

    async fn members(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use peer_calls_protocol::UserId;

    use super::{Membership, StaticMembership};

    #[tokio::test]
    async fn table_loads_from_json() {
        let membership =
            StaticMembership::from_json(r#"{"conv-1": ["alice", "bob"]}"#).unwrap();
        assert!(membership.is_participant(&"alice".into(), &"conv-1".into()).await);
        assert!(!membership.is_participant(&"carol".into(), &"conv-1".into()).await);
        assert!(membership.members(&"conv-2".into()).await.is_empty());

        membership.remove_member(&"conv-1".into(), &"bob".into()).await;
        assert_eq!(membership.members(&"conv-1".into()).await, vec![UserId::from("alice")]);
        assert!(StaticMembership::from_json("[1, 2]").is_err());
    }
}
