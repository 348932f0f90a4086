//! Wall-clock budget for a single evaluation.
//!
//! A [`DeadlineGuard`] watches the progress notifications of one image and
//! flips its kill switch the first time the reported run time reaches the
//! budget. Cancellation is cooperative: the engine only notices at its next
//! checkpoint, so a timeout can overshoot by up to one batch of rows or one
//! band of a resize. Decoding happens before the guard is installed and is
//! not covered.
//!
//! ```text
//! Armed(deadline) ──run ≥ deadline──▶ Disarmed   (kill switch set)
//!        │
//!        └──────evaluation complete──▶ Disarmed
//! ```

use crate::engine::{ImageHandle, KillSwitch, Progress};
use crate::error::EvaluationTimeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Watching, with the budget in whole seconds.
    Armed(u64),
    Disarmed,
}

/// One-shot timeout observer, owned by the evaluation hook of one image.
#[derive(Debug)]
pub struct DeadlineGuard {
    state: GuardState,
}

impl DeadlineGuard {
    /// A guard for `deadline` seconds. Zero gives an inert guard.
    pub fn new(deadline: u64) -> Self {
        let state = if deadline > 0 {
            GuardState::Armed(deadline)
        } else {
            GuardState::Disarmed
        };
        Self { state }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, GuardState::Armed(_))
    }

    /// Handle one progress notification.
    ///
    /// Returns `true` only for the call that fired the timeout.
    pub fn observe(&mut self, progress: &Progress, kill: &KillSwitch) -> bool {
        let GuardState::Armed(deadline) = self.state else {
            return false;
        };

        if progress.run >= deadline {
            let timeout = EvaluationTimeout {
                deadline,
                run: progress.run,
                percent: progress.percent,
            };
            log::warn!("{timeout}");
            kill.kill_with(timeout);
            self.state = GuardState::Disarmed;
            return true;
        }

        if progress.tpels > 0 && progress.npels >= progress.tpels {
            self.state = GuardState::Disarmed;
        }
        false
    }
}

/// Attach a guard for `deadline` seconds to `image`'s evaluation.
///
/// With a zero deadline nothing is attached.
pub fn install_deadline(image: &impl ImageHandle, deadline: u64) {
    if deadline == 0 {
        return;
    }
    log::debug!("evaluation deadline set to {deadline}s");
    let mut guard = DeadlineGuard::new(deadline);
    image.on_eval(Box::new(move |progress: &Progress, kill: &KillSwitch| {
        guard.observe(progress, kill);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RasterImage;
    use crate::engine::raster::tests::coordinate_strip;
    use crate::error::Error;

    fn at(run: u64, percent: u32) -> Progress {
        Progress {
            run,
            eta: 0,
            tpels: 100,
            npels: u64::from(percent),
            percent,
        }
    }

    // =========================================================================
    // DeadlineGuard
    // =========================================================================

    #[test]
    fn zero_deadline_is_inert() {
        let mut guard = DeadlineGuard::new(0);
        let kill = KillSwitch::new();
        assert_eq!(guard.state(), GuardState::Disarmed);
        assert!(!guard.observe(&at(1000, 50), &kill));
        assert!(!kill.is_killed());
    }

    #[test]
    fn under_budget_keeps_running() {
        let mut guard = DeadlineGuard::new(5);
        let kill = KillSwitch::new();
        for run in 0..5 {
            assert!(!guard.observe(&at(run, 10), &kill));
        }
        assert!(guard.is_armed());
        assert!(!kill.is_killed());
    }

    #[test]
    fn fires_exactly_once() {
        let mut guard = DeadlineGuard::new(2);
        let kill = KillSwitch::new();

        assert!(guard.observe(&at(3, 41), &kill));
        for _ in 0..5 {
            assert!(!guard.observe(&at(3, 41), &kill));
        }

        assert!(kill.is_killed());
        assert_eq!(guard.state(), GuardState::Disarmed);
        let reason = kill.reason().unwrap();
        assert_eq!((reason.deadline, reason.run, reason.percent), (2, 3, 41));
        assert_eq!(
            reason.to_string(),
            "Maximum image processing time of 2 seconds exceeded with 3 seconds. \
             Operation was canceled after 41% completion"
        );
    }

    #[test]
    fn completion_disarms() {
        let mut guard = DeadlineGuard::new(2);
        let kill = KillSwitch::new();
        assert!(!guard.observe(&at(1, 100), &kill));
        assert_eq!(guard.state(), GuardState::Disarmed);
        assert!(!guard.observe(&at(9, 100), &kill));
        assert!(!kill.is_killed());
    }

    // =========================================================================
    // install_deadline
    // =========================================================================

    #[test]
    fn install_with_zero_attaches_nothing() {
        let img = coordinate_strip(4, 4);
        install_deadline(&img, 0);
        assert_eq!(img.eval_handler_count(), 0);
    }

    #[test]
    fn install_attaches_a_handler() {
        let img = coordinate_strip(4, 4);
        install_deadline(&img, 10);
        assert_eq!(img.eval_handler_count(), 1);
        assert!(img.evaluate().is_ok());
    }

    #[test]
    fn timeout_aborts_evaluation() {
        let img: RasterImage = coordinate_strip(8, 64);
        let mut guard = DeadlineGuard::new(2);
        // Report an inflated run time instead of waiting on the wall clock
        img.on_eval(Box::new(move |p: &Progress, kill: &KillSwitch| {
            guard.observe(&Progress { run: 3, ..*p }, kill);
        }));

        let err = img.evaluate().unwrap_err();
        match err {
            Error::EvaluationTimeout(t) => {
                assert_eq!((t.deadline, t.run), (2, 3));
                assert_eq!(t.percent, 25);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn timeout_fires_during_resize() {
        let img = coordinate_strip(64, 256).resize(32, 128).unwrap();
        let mut guard = DeadlineGuard::new(1);
        img.on_eval(Box::new(move |p: &Progress, kill: &KillSwitch| {
            guard.observe(&Progress { run: 2, ..*p }, kill);
        }));

        match img.evaluate().unwrap_err() {
            // No output row was finished yet
            Error::EvaluationTimeout(t) => assert_eq!((t.deadline, t.run, t.percent), (1, 2, 0)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
