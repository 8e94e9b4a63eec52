//! Context Manager (spec §4.3, `[C3-CONTEXT]`).
//!
//! Maintains per-(user, session) conversation logs with token-budgeted
//! truncation and session expiry. Grounded on the teacher's
//! `orchestrator::session::SessionManager` shape (per-key state behind a
//! lock, expiry sweep) but reworked around spec §3's `Conversation` /
//! `ConversationMessage` data model instead of the teacher's own session
//! type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(OrchestratorError::Validation(format!(
                "invalid conversation role: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    pub metadata: serde_json::Value,
    pub created_at: SystemTime,
}

/// Estimated token count: `ceil(len(content) / 4)` plus a small fixed
/// overhead per role, per spec §4.3.
fn estimate_tokens(role: Role, content: &str) -> usize {
    let overhead = match role {
        Role::System => 4,
        Role::User => 3,
        Role::Assistant => 3,
        Role::Tool => 5,
    };
    content.chars().count().div_ceil(4) + overhead
}

struct Conversation {
    user_id: String,
    session_id: String,
    messages: Vec<ConversationMessage>,
    max_context_tokens: usize,
    last_active: SystemTime,
}

impl Conversation {
    fn new(user_id: String, session_id: String, max_context_tokens: usize) -> Self {
        Self {
            user_id,
            session_id,
            messages: Vec::new(),
            max_context_tokens,
            last_active: SystemTime::now(),
        }
    }

    fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    /// Truncates from the oldest non-system message forward until the total
    /// is within budget. System messages are never evicted (spec §4.3, §8
    /// invariant 1), and the most recently appended message is never
    /// evicted either: a single new message larger than the whole budget
    /// must still be retained (spec §8 boundary test), not silently
    /// dropped along with everything else.
    fn truncate(&mut self) {
        loop {
            if self.total_tokens() <= self.max_context_tokens {
                break;
            }
            let non_system_count = self.messages.iter().filter(|m| m.role != Role::System).count();
            if non_system_count <= 1 {
                break; // would otherwise evict the message just appended
            }
            match self.messages.iter().position(|m| m.role != Role::System) {
                Some(idx) => {
                    self.messages.remove(idx);
                }
                None => break, // only system messages remain; nothing more to evict
            }
        }
    }

    fn push(&mut self, role: Role, content: String, metadata: serde_json::Value) {
        let token_count = estimate_tokens(role, &content);
        self.messages.push(ConversationMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            token_count,
            metadata,
            created_at: SystemTime::now(),
        });
        self.truncate();
        self.last_active = SystemTime::now();
    }
}

/// Ordered snapshot returned by [`ContextManager::get_conversation_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<ConversationMessage>,
}

/// Per-session summary returned by [`ContextManager::get_conversation_history`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub session_id: String,
    pub message_count: usize,
    pub total_tokens: usize,
    pub last_active: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub active_users: usize,
    pub memory_usage_mb: f64,
    pub evictions: u64,
}

type Key = (String, String);

/// Per-(user, session) conversation memory. Mutations on a single
/// conversation are serialized by a per-key lock; distinct keys proceed in
/// parallel (spec §4.3 "Concurrency").
pub struct ContextManager {
    default_max_tokens: usize,
    session_timeout: Duration,
    conversations: RwLock<HashMap<Key, Arc<Mutex<Conversation>>>>,
    evictions: std::sync::atomic::AtomicU64,
}

impl ContextManager {
    pub fn new(default_max_tokens: usize, session_timeout: Duration) -> Self {
        Self {
            default_max_tokens,
            session_timeout,
            conversations: RwLock::new(HashMap::new()),
            evictions: std::sync::atomic::AtomicU64::new(0),
        }
    }

    async fn get_or_create(&self, user_id: &str, session_id: &str) -> Arc<Mutex<Conversation>> {
        {
            let read = self.conversations.read().await;
            if let Some(conv) = read.get(&(user_id.to_string(), session_id.to_string())) {
                return conv.clone();
            }
        }
        let mut write = self.conversations.write().await;
        write
            .entry((user_id.to_string(), session_id.to_string()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(Conversation::new(
                    user_id.to_string(),
                    session_id.to_string(),
                    self.default_max_tokens,
                )))
            })
            .clone()
    }

    /// Appends a message, creating the conversation if missing, then
    /// truncates from the oldest non-system message until the budget holds.
    pub async fn add_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: &str,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let role = Role::parse(role)?;
        let conv = self.get_or_create(user_id, session_id).await;
        let mut conv = conv.lock().await;
        conv.push(role, content.into(), metadata);
        Ok(())
    }

    /// Ordered snapshot of the conversation; unknown sessions return an
    /// empty snapshot rather than failing (spec §4.3 "Failure").
    pub async fn get_conversation_context(
        &self,
        user_id: &str,
        session_id: &str,
        include_system: bool,
    ) -> ConversationSnapshot {
        let key = (user_id.to_string(), session_id.to_string());
        let read = self.conversations.read().await;
        let Some(conv) = read.get(&key) else {
            return ConversationSnapshot { messages: Vec::new() };
        };
        let conv = conv.clone();
        drop(read);
        let conv = conv.lock().await;
        let messages = conv
            .messages
            .iter()
            .filter(|m| include_system || m.role != Role::System)
            .cloned()
            .collect();
        ConversationSnapshot { messages }
    }

    /// Per-session summaries ordered by `last_active` descending, bounded by
    /// `limit`.
    pub async fn get_conversation_history(&self, user_id: &str, limit: usize) -> Vec<ConversationSummary> {
        let read = self.conversations.read().await;
        let mut summaries = Vec::new();
        for ((uid, sid), conv) in read.iter() {
            if uid != user_id {
                continue;
            }
            let conv = conv.lock().await;
            summaries.push(ConversationSummary {
                user_id: uid.clone(),
                session_id: sid.clone(),
                message_count: conv.messages.len(),
                total_tokens: conv.total_tokens(),
                last_active: conv.last_active,
            });
        }
        summaries.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        summaries.truncate(limit);
        summaries
    }

    /// Removes conversations whose `last_active` predates the configured
    /// session timeout.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = SystemTime::now();
        let mut write = self.conversations.write().await;
        let mut expired_keys = Vec::new();
        for (key, conv) in write.iter() {
            let conv = conv.lock().await;
            if now
                .duration_since(conv.last_active)
                .unwrap_or(Duration::ZERO)
                > self.session_timeout
            {
                expired_keys.push(key.clone());
            }
        }
        for key in &expired_keys {
            write.remove(key);
        }
        self.evictions
            .fetch_add(expired_keys.len() as u64, std::sync::atomic::Ordering::Relaxed);
        expired_keys.len()
    }

    pub async fn get_stats(&self) -> ContextStats {
        let read = self.conversations.read().await;
        let mut total_messages = 0;
        let mut active_users = std::collections::HashSet::new();
        let mut approx_bytes: usize = 0;
        for ((uid, _), conv) in read.iter() {
            active_users.insert(uid.clone());
            let conv = conv.lock().await;
            total_messages += conv.messages.len();
            approx_bytes += conv
                .messages
                .iter()
                .map(|m| m.content.len() + 64)
                .sum::<usize>();
        }
        ContextStats {
            total_conversations: read.len(),
            total_messages,
            active_users: active_users.len(),
            memory_usage_mb: approx_bytes as f64 / (1024.0 * 1024.0),
            evictions: self.evictions.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn add_message_then_read_back() {
        let mgr = ContextManager::new(1000, Duration::from_secs(3600));
        mgr.add_message("u1", "s1", "user", "hello", json!({})).await.unwrap();
        let ctx = mgr.get_conversation_context("u1", "s1", true).await;
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn unknown_session_returns_empty_snapshot() {
        let mgr = ContextManager::new(1000, Duration::from_secs(3600));
        let ctx = mgr.get_conversation_context("nobody", "nowhere", true).await;
        assert!(ctx.messages.is_empty());
    }

    #[tokio::test]
    async fn invalid_role_is_rejected() {
        let mgr = ContextManager::new(1000, Duration::from_secs(3600));
        let err = mgr
            .add_message("u1", "s1", "narrator", "hi", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn truncation_preserves_system_messages_and_respects_budget() {
        // Budget of 10 tokens, single new message sized over budget retains
        // only that message plus any system messages (spec §8 boundary test).
        let mgr = ContextManager::new(10, Duration::from_secs(3600));
        mgr.add_message("u1", "s1", "system", "sys", json!({})).await.unwrap();
        mgr.add_message("u1", "s1", "user", "a", json!({})).await.unwrap();
        mgr.add_message("u1", "s1", "user", "b", json!({})).await.unwrap();
        mgr.add_message("u1", "s1", "user", "c", json!({})).await.unwrap();

        let ctx = mgr.get_conversation_context("u1", "s1", true).await;
        let total: usize = ctx.messages.iter().map(|m| m.token_count).sum();
        assert!(total <= 10, "budget exceeded: {total}");
        assert!(
            ctx.messages.iter().any(|m| m.role == Role::System),
            "system message must survive truncation"
        );
        // The most recent user message must always survive.
        assert!(ctx.messages.iter().any(|m| m.content == "c"));
    }

    #[tokio::test]
    async fn oversized_single_message_is_retained_not_dropped() {
        // Spec §8 boundary test: a single new message sized B+1 against a
        // budget of B must still be retained (plus any system messages),
        // never evicted down to an empty conversation.
        let mgr = ContextManager::new(4, Duration::from_secs(3600));
        mgr.add_message("u1", "s1", "user", "this content is definitely longer than four tokens", json!({}))
            .await
            .unwrap();
        let ctx = mgr.get_conversation_context("u1", "s1", true).await;
        assert_eq!(ctx.messages.len(), 1, "the just-added turn must survive truncation");
        assert!(ctx.messages[0].content.starts_with("this content"));
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_interfere() {
        let mgr = Arc::new(ContextManager::new(1000, Duration::from_secs(3600)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("s{i}");
                mgr.add_message("u1", &session, "user", format!("msg-{i}"), json!({}))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let history = mgr.get_conversation_history("u1", 100).await;
        assert_eq!(history.len(), 8);
    }

    #[tokio::test]
    async fn cleanup_expired_sessions_evicts_stale_conversations() {
        let mgr = ContextManager::new(1000, Duration::from_millis(10));
        mgr.add_message("u1", "s1", "user", "hi", json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let evicted = mgr.cleanup_expired_sessions().await;
        assert_eq!(evicted, 1);
        let stats = mgr.get_stats().await;
        assert_eq!(stats.total_conversations, 0);
        assert_eq!(stats.evictions, 1);
    }
}
