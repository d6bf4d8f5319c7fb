//! Recovery-mode state machine
//!
//! Per-topic machine that switches a subscription into catch-up mode when
//! backlog appears and back once the backlog has cleared and a minimum
//! dwell time has passed.
//!
//! State Machine:
//! ```text
//! [NORMAL] ──has_backlog──→ [RECOVERING]
//!     ↑                          │
//!     │                          ├── has_backlog ──→ [RECOVERING]
//!     │                          │
//!     └── !has_backlog && dwell >= min_dwell ──┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Operating mode of one topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecoveryMode {
    /// Default throughput settings
    #[default]
    Normal,
    /// Catch-up: larger queues and batches, non-essential callbacks suppressed
    Recovering,
}

impl RecoveryMode {
    fn to_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Recovering => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::Recovering
        } else {
            Self::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Recovering => "recovering",
        }
    }
}

/// Lock-free mode flag shared between the recovery manager (writer) and the
/// worker pool and subscriber (readers).
#[derive(Clone, Debug, Default)]
pub struct ModeFlag(Arc<AtomicU8>);

impl ModeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> RecoveryMode {
        RecoveryMode::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Swap in `mode`, returning true when the value changed.
    pub fn store(&self, mode: RecoveryMode) -> bool {
        let next = mode.to_u8();
        self.0
            .compare_exchange(1 - next, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_recovering(&self) -> bool {
        self.load() == RecoveryMode::Recovering
    }
}

/// A mode change produced by [`RecoveryStateMachine::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: RecoveryMode,
    pub to: RecoveryMode,
}

/// Deterministic recovery state machine for one topic.
#[derive(Debug)]
pub struct RecoveryStateMachine {
    mode: RecoveryMode,
    min_dwell: Duration,
    entered_recovering: Option<Instant>,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl RecoveryStateMachine {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            mode: RecoveryMode::Normal,
            min_dwell,
            entered_recovering: None,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    /// Time spent in the current recovering episode.
    pub fn dwell(&self, now: Instant) -> Duration {
        self.entered_recovering
            .map(|entered| now.saturating_duration_since(entered))
            .unwrap_or_default()
    }

    /// Feed one backlog observation taken at `now`.
    pub fn observe(&mut self, has_backlog: bool, now: Instant) -> Option<Transition> {
        let next = self.next_mode(has_backlog, now);
        self.apply(next, now)
    }

    /// Operator override, bypassing dwell time.
    pub fn force(&mut self, mode: RecoveryMode, now: Instant) -> Option<Transition> {
        self.apply(mode, now)
    }

    /// Pure transition function.
    fn next_mode(&self, has_backlog: bool, now: Instant) -> RecoveryMode {
        match (self.mode, has_backlog) {
            (RecoveryMode::Normal, true) => RecoveryMode::Recovering,
            (RecoveryMode::Normal, false) => RecoveryMode::Normal,
            (RecoveryMode::Recovering, true) => RecoveryMode::Recovering,
            (RecoveryMode::Recovering, false) => {
                if self.dwell(now) >= self.min_dwell {
                    RecoveryMode::Normal
                } else {
                    RecoveryMode::Recovering
                }
            }
        }
    }

    fn apply(&mut self, next: RecoveryMode, now: Instant) -> Option<Transition> {
        if next == self.mode {
            return None;
        }
        let transition = Transition {
            from: self.mode,
            to: next,
        };
        self.mode = next;
        self.entered_recovering = match next {
            RecoveryMode::Recovering => Some(now),
            RecoveryMode::Normal => None,
        };
        self.transition_count += 1;
        self.last_transition = Some(now);
        Some(transition)
    }
}

/// Throughput knobs for the current mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryTuning {
    /// Multiplier applied to each worker's queue capacity.
    pub queue_multiplier: usize,
    /// Multiplier applied to transport poll batch sizes.
    pub batch_multiplier: usize,
    /// Skip per-message `Message` callbacks.
    pub suppress_callbacks: bool,
}

impl RecoveryTuning {
    pub fn normal() -> Self {
        Self {
            queue_multiplier: 1,
            batch_multiplier: 1,
            suppress_callbacks: false,
        }
    }

    pub fn for_mode(mode: RecoveryMode, queue_multiplier: usize, batch_multiplier: usize) -> Self {
        match mode {
            RecoveryMode::Normal => Self::normal(),
            RecoveryMode::Recovering => Self {
                queue_multiplier: queue_multiplier.max(1),
                batch_multiplier: batch_multiplier.max(1),
                suppress_callbacks: true,
            },
        }
    }
}
