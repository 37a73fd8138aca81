// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod mock;
pub mod provider;
pub mod resolver;
pub mod types;

pub use mock::{ScriptedProvider, ScriptedTurn};
pub use provider::{ChatProvider, ChunkStream};
pub use resolver::{ModelInfo, ProviderResolver, StaticResolver};
pub use types::{
    ChatChunk, ChatRequest, ChatResponse, ChatRole, ToolCallDelta, ToolCallRequest,
    ToolDefinition, Usage, WireMessage,
};
