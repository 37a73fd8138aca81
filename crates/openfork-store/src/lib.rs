// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod error;
pub mod memory;
pub mod repo;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use repo::{
    MessageRepository, NewMessage, PartRepository, ProjectRepository, SessionRepository,
    SubSessionRepository,
};
pub use types::{
    CompactionPart, MessageId, MessagePart, MessageRecord, MessageRole, PartId, PartRecord,
    Project, Session, SubSession, SubSessionStatus, ToolPart, ToolStatus,
};
