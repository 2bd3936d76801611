// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state types.
//!
//! # State Transitions
//!
//! ```text
//!          start()                 shutdown()
//! Created ─────────→ Running ─────────────────→ ShuttingDown ──→ Stopped
//!    │
//!    │ (invalid config)
//!    ↓
//! Failed
//! ```
//!
//! - **Created**: after `ReplicationEngine::new()`. No tasks running.
//! - **Running**: forward syncer and reconciler tasks spawned.
//! - **ShuttingDown**: `shutdown()` called. Tasks are draining.
//! - **Stopped**: both tasks finished (or timed out). Safe to drop.
//! - **Failed**: `start()` rejected the configuration.

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Created => "Created",
            EngineState::Running => "Running",
            EngineState::ShuttingDown => "ShuttingDown",
            EngineState::Stopped => "Stopped",
            EngineState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
