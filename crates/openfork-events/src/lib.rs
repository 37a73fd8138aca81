// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod bus;
pub mod event;

pub use bus::{EventBus, EventReceiver, FLUSH_INTERVAL};
pub use event::OrchestratorEvent;
