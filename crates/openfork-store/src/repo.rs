// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{
    MessageId, MessagePart, MessageRecord, MessageRole, PartRecord, Project, Session, SubSession,
};

/// A message to append; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<String>,
    pub tool_call_id: Option<String>,
}

impl NewMessage {
    pub fn text(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(
        session_id: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create_project(&self, project: Project) -> StoreResult<()>;
    async fn get_project(&self, id: &str) -> StoreResult<Project>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: Session) -> StoreResult<()>;
    async fn get_session(&self, id: &str) -> StoreResult<Session>;
    async fn touch_session(&self, id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append_message(&self, message: NewMessage) -> StoreResult<MessageRecord>;
    async fn get_message(&self, id: MessageId) -> StoreResult<MessageRecord>;

    /// All messages of a session in id order, compacted included.
    async fn list_by_session(&self, session_id: &str) -> StoreResult<Vec<MessageRecord>>;

    /// Messages not retired by compaction, in id order.
    async fn list_active_by_session(&self, session_id: &str) -> StoreResult<Vec<MessageRecord>>;

    /// Messages with `id > after`, in id order.  Used when loading history
    /// past a compaction boundary.
    async fn list_after(&self, session_id: &str, after: MessageId) -> StoreResult<Vec<MessageRecord>>;

    /// Flag a set of messages as retired by compaction.
    async fn mark_compacted(&self, ids: &[MessageId]) -> StoreResult<()>;

    /// Rewrite a message's content (used when its tool part is pruned).
    async fn update_content(&self, id: MessageId, content: String) -> StoreResult<()>;
}

#[async_trait]
pub trait PartRepository: Send + Sync {
    async fn append_part(
        &self,
        session_id: &str,
        message_id: MessageId,
        part: MessagePart,
    ) -> StoreResult<PartRecord>;

    /// All parts of a session ordered by `(message_id, order_index)`.
    async fn list_parts_by_session(&self, session_id: &str) -> StoreResult<Vec<PartRecord>>;

    /// Replace a stored part's payload in place (id unchanged).
    async fn replace_part(&self, record: PartRecord) -> StoreResult<()>;

    /// The latest compaction boundary part of a session, if any.
    async fn get_most_recent_compaction(&self, session_id: &str) -> StoreResult<Option<PartRecord>>;
}

#[async_trait]
pub trait SubSessionRepository: Send + Sync {
    async fn create_subsession(&self, sub: SubSession) -> StoreResult<()>;
    async fn get_subsession(&self, id: &str) -> StoreResult<SubSession>;
    async fn update_subsession(&self, sub: SubSession) -> StoreResult<()>;
    async fn list_by_parent(&self, parent_session_id: &str) -> StoreResult<Vec<SubSession>>;
}
