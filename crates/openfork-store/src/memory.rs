// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::repo::{
    MessageRepository, NewMessage, PartRepository, ProjectRepository, SessionRepository,
    SubSessionRepository,
};
use crate::types::{
    MessageId, MessagePart, MessageRecord, PartRecord, Project, Session, SubSession,
};

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    sessions: HashMap<String, Session>,
    messages: Vec<MessageRecord>,
    parts: Vec<PartRecord>,
    subsessions: HashMap<String, SubSession>,
    next_message_id: MessageId,
    next_part_id: i64,
}

/// In-memory repository.  The reference backend for tests and embedders that
/// do not need durability; writes within a session are serialized by the
/// inner lock.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next_message_id: 1, next_part_id: 1, ..Default::default() }),
        }
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn create_project(&self, project: Project) -> StoreResult<()> {
        self.inner.lock().unwrap().projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &str) -> StoreResult<Project> {
        self.inner
            .lock()
            .unwrap()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("project", id))
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, session: Session) -> StoreResult<()> {
        self.inner.lock().unwrap().sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StoreResult<Session> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    async fn touch_session(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("session", id))?;
        session.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn append_message(&self, message: NewMessage) -> StoreResult<MessageRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_message_id;
        inner.next_message_id += 1;
        let record = MessageRecord {
            id,
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            tool_calls: message.tool_calls,
            tool_call_id: message.tool_call_id,
            is_compacted: false,
            created_at: Utc::now(),
        };
        inner.messages.push(record.clone());
        Ok(record)
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<MessageRecord> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("message", id.to_string()))
    }

    async fn list_by_session(&self, session_id: &str) -> StoreResult<Vec<MessageRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_active_by_session(&self, session_id: &str) -> StoreResult<Vec<MessageRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && !m.is_compacted)
            .cloned()
            .collect())
    }

    async fn list_after(&self, session_id: &str, after: MessageId) -> StoreResult<Vec<MessageRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.id > after)
            .cloned()
            .collect())
    }

    async fn mark_compacted(&self, ids: &[MessageId]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for m in inner.messages.iter_mut() {
            if ids.contains(&m.id) {
                m.is_compacted = true;
            }
        }
        Ok(())
    }

    async fn update_content(&self, id: MessageId, content: String) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::not_found("message", id.to_string()))?;
        message.content = content;
        Ok(())
    }
}

#[async_trait]
impl PartRepository for InMemoryStore {
    async fn append_part(
        &self,
        session_id: &str,
        message_id: MessageId,
        part: MessagePart,
    ) -> StoreResult<PartRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_part_id;
        inner.next_part_id += 1;
        let order_index = inner
            .parts
            .iter()
            .filter(|p| p.message_id == message_id)
            .count() as i32;
        let record = PartRecord {
            id,
            session_id: session_id.to_string(),
            message_id,
            order_index,
            part,
            updated_at: Utc::now(),
        };
        inner.parts.push(record.clone());
        Ok(record)
    }

    async fn list_parts_by_session(&self, session_id: &str) -> StoreResult<Vec<PartRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut parts: Vec<PartRecord> = inner
            .parts
            .iter()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        parts.sort_by_key(|p| (p.message_id, p.order_index));
        Ok(parts)
    }

    async fn replace_part(&self, record: PartRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .parts
            .iter_mut()
            .find(|p| p.id == record.id)
            .ok_or_else(|| StoreError::not_found("part", record.id.to_string()))?;
        *slot = record;
        Ok(())
    }

    async fn get_most_recent_compaction(&self, session_id: &str) -> StoreResult<Option<PartRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .parts
            .iter()
            .filter(|p| p.session_id == session_id && p.part.as_compaction().is_some())
            .max_by_key(|p| p.id)
            .cloned())
    }
}

#[async_trait]
impl SubSessionRepository for InMemoryStore {
    async fn create_subsession(&self, sub: SubSession) -> StoreResult<()> {
        self.inner.lock().unwrap().subsessions.insert(sub.id.clone(), sub);
        Ok(())
    }

    async fn get_subsession(&self, id: &str) -> StoreResult<SubSession> {
        self.inner
            .lock()
            .unwrap()
            .subsessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("subsession", id))
    }

    async fn update_subsession(&self, sub: SubSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.subsessions.contains_key(&sub.id) {
            return Err(StoreError::not_found("subsession", sub.id));
        }
        inner.subsessions.insert(sub.id.clone(), sub);
        Ok(())
    }

    async fn list_by_parent(&self, parent_session_id: &str) -> StoreResult<Vec<SubSession>> {
        let inner = self.inner.lock().unwrap();
        let mut subs: Vec<SubSession> = inner
            .subsessions
            .values()
            .filter(|s| s.parent_session_id == parent_session_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
