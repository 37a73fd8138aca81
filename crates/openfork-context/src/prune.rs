// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;
use tracing::debug;

use openfork_store::{MessagePart, PartRecord};

/// Output room assumed reserved for the model's reply.
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 16_384;
/// Newest tokens that pruning never touches.
pub const PRUNE_PROTECT_TOKENS: usize = 40_000;
/// Leading characters kept from each pruned tool output.
pub const PRUNE_OUTPUT_RETAIN_CHARS: usize = 2_000;
/// Pruning stops once this many tokens were reclaimed.
pub const PRUNE_MINIMUM_TOKENS: usize = 20_000;

/// Accounting for one pruning pass.
#[derive(Debug)]
pub struct PruneOutcome {
    /// Cloned part list with older tool outputs shortened.
    pub parts: Vec<PartRecord>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub parts_pruned: usize,
    pub was_pruned: bool,
}

/// L2: shorten old tool outputs while protecting recent content.
///
/// Pruning only happens when the session is both close to the window
/// (`current ≥ limit − DEFAULT_MAX_OUTPUT_TOKENS`) and large enough to be
/// worth it (`current ≥ PRUNE_PROTECT_TOKENS`).  The protection boundary is
/// found by accumulating per-part estimates newest-first until the next part
/// would exceed [`PRUNE_PROTECT_TOKENS`]; everything at or after it is
/// immutable.  Older unpruned tool outputs longer than
/// [`PRUNE_OUTPUT_RETAIN_CHARS`] are clipped until at least
/// [`PRUNE_MINIMUM_TOKENS`] were reclaimed or the candidates run out.
pub fn prune_parts(parts: &[PartRecord], current_tokens: usize, context_limit: usize) -> PruneOutcome {
    let near_limit = current_tokens >= context_limit.saturating_sub(DEFAULT_MAX_OUTPUT_TOKENS);
    let worth_it = current_tokens >= PRUNE_PROTECT_TOKENS;
    if !near_limit || !worth_it {
        return PruneOutcome {
            parts: parts.to_vec(),
            tokens_before: current_tokens,
            tokens_after: current_tokens,
            parts_pruned: 0,
            was_pruned: false,
        };
    }

    // Protection boundary: parts[boundary..] hold the newest
    // PRUNE_PROTECT_TOKENS worth of content.
    let mut boundary = parts.len();
    let mut protected = 0usize;
    for (index, record) in parts.iter().enumerate().rev() {
        let tokens = record.part.approx_tokens();
        if protected + tokens > PRUNE_PROTECT_TOKENS {
            break;
        }
        protected += tokens;
        boundary = index;
    }

    let mut result = Vec::with_capacity(parts.len());
    let mut removed = 0usize;
    let mut pruned_count = 0usize;
    let mut done = false;

    for (index, record) in parts.iter().enumerate() {
        if done || index >= boundary {
            result.push(record.clone());
            continue;
        }
        let tool = match &record.part {
            MessagePart::Tool(t) if !t.is_pruned && t.output.len() > PRUNE_OUTPUT_RETAIN_CHARS => t,
            _ => {
                result.push(record.clone());
                continue;
            }
        };

        let before = record.part.approx_tokens();
        let mut clipped = tool.clone();
        let kept: String = tool.output.chars().take(PRUNE_OUTPUT_RETAIN_CHARS).collect();
        clipped.output = format!(
            "{kept}\n\n[Output pruned: kept first {PRUNE_OUTPUT_RETAIN_CHARS} chars]"
        );
        clipped.is_pruned = true;

        let mut updated = record.clone();
        updated.part = MessagePart::Tool(clipped);
        updated.updated_at = Utc::now();
        removed += before.saturating_sub(updated.part.approx_tokens());
        pruned_count += 1;
        result.push(updated);

        if removed >= PRUNE_MINIMUM_TOKENS {
            done = true;
        }
    }

    debug!(removed, pruned_count, "pruned old tool outputs");
    PruneOutcome {
        parts: result,
        tokens_before: current_tokens,
        tokens_after: current_tokens.saturating_sub(removed),
        parts_pruned: pruned_count,
        was_pruned: pruned_count > 0,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
