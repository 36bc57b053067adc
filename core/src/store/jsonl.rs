use crate::traits::{ConversationStore, MessageRole, StoredMessage};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One JSON-lines file per conversation under `dir`.
///
/// File names are the md5 of the conversation id, so any id is safe to use
/// as a path component.
pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        let digest = md5::compute(conversation_id.as_bytes());
        self.dir.join(format!("{digest:x}.jsonl"))
    }
}

#[async_trait]
impl ConversationStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn load_history(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let path = self.conversation_path(conversation_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut messages = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!(
                    file = %path.display(),
                    line = number + 1,
                    "Skipping unreadable message: {}",
                    e
                ),
            }
        }

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
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create store directory {}", self.dir.display()))?;

        let path = self.conversation_path(conversation_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
