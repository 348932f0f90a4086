//! Evaluation progress and cooperative cancellation.
//!
//! The engine calls every [`EvalHandler`] subscribed to an image after
//! each batch of computed scanlines, on the thread driving the evaluation,
//! and checks the image's [`KillSwitch`] right after. A handler that wants
//! evaluation to stop flips the switch; the engine then abandons the
//! remaining work and fails with the switch's reason.

use crate::error::{EngineError, Error, EvaluationTimeout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Snapshot passed to progress handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Whole seconds since evaluation started.
    pub run: u64,
    /// Estimated whole seconds remaining.
    pub eta: u64,
    /// Total pixels to compute.
    pub tpels: u64,
    /// Pixels computed so far.
    pub npels: u64,
    /// `npels` as a percentage of `tpels`.
    pub percent: u32,
}

/// Progress subscriber. Must not block.
pub type EvalHandler = Box<dyn FnMut(&Progress, &KillSwitch) + Send>;

/// Per-image abort flag, shared by clones of the same handle.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    state: Arc<KillState>,
}

#[derive(Debug, Default)]
struct KillState {
    killed: AtomicBool,
    reason: OnceLock<EvaluationTimeout>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort evaluation without a specific reason.
    pub fn kill(&self) {
        self.state.killed.store(true, Ordering::Release);
    }

    /// Abort evaluation because a deadline passed.
    ///
    /// Only the first reason is kept. Returns `false` if one was already set.
    pub fn kill_with(&self, reason: EvaluationTimeout) -> bool {
        let first = self.state.reason.set(reason).is_ok();
        self.kill();
        first
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<EvaluationTimeout> {
        self.state.reason.get().copied()
    }

    /// The error evaluation fails with once killed.
    pub fn to_error(&self) -> Error {
        match self.reason() {
            Some(timeout) => Error::EvaluationTimeout(timeout),
            None => Error::Engine(EngineError::Killed),
        }
    }
}
