// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Three-layer token management.
//!
//! - **L1** ([`truncate`]): per-tool output truncation with disk spillover.
//! - **L2** ([`prune`]): lazy pruning of old tool outputs, protecting the
//!   most recent content.
//! - **L3** ([`compact`]): LLM-generated conversation compaction behind a
//!   persistent boundary part.

pub mod compact;
pub mod estimate;
pub mod manager;
pub mod prune;
pub mod truncate;

pub use compact::{CompactionOutcome, Compactor, SUMMARY_FOOTER, SUMMARY_HEADER};
pub use estimate::{estimate_messages, estimate_request, estimate_text};
pub use manager::ContextManager;
pub use prune::{prune_parts, PruneOutcome};
pub use truncate::{cleanup_spill_older_than, tool_char_cap, truncate_tool_output, TruncationResult};
