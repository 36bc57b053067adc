use crate::traits::{ConversationStore, MessageRole, StoredMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store. Conversations are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_history(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let conversations = self.conversations.read().await;
        let mut messages = conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn append(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> anyhow::Result<()> {
        let message = StoredMessage::new(conversation_id, role, content);
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }
}
