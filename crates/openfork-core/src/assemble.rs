// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tracing::warn;

use openfork_model::{ToolCallDelta, ToolCallRequest};

/// Assembles streamed tool-call fragments into complete requests.
///
/// Providers send the call id (and usually the name) only on the first
/// fragment of a call; every later fragment carries just an arguments chunk
/// and no index.  Assembly therefore keys on arrival order: a fragment with
/// an id opens a new entry, a fragment without one appends to the newest.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: Vec<PendingCall>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        if delta.id.as_deref().is_some_and(|id| !id.is_empty()) {
            self.pending.push(PendingCall {
                id: delta.id.clone().unwrap_or_default(),
                name: delta.name.clone().unwrap_or_default(),
                arguments: delta.arguments.clone().unwrap_or_default(),
            });
            return;
        }

        match self.pending.last_mut() {
            Some(current) => {
                if let Some(name) = &delta.name {
                    if current.name.is_empty() {
                        current.name = name.clone();
                    }
                }
                if let Some(arguments) = &delta.arguments {
                    current.arguments.push_str(arguments);
                }
            }
            None => {
                warn!("tool-call fragment arrived before any call was opened; dropped");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Emit the assembled calls in arrival order.  Calls the model never
    /// named cannot be dispatched and are dropped; empty argument buffers
    /// become `{}` so providers always see an object.
    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.pending
            .into_iter()
            .filter_map(|call| {
                if call.name.is_empty() {
                    warn!(call_id = %call.id, "dropping tool call with empty name");
                    return None;
                }
                let arguments = if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                Some(ToolCallRequest { id: call.id, name: call.name, arguments })
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
