//! Client-side session phase machine.
//!
//! [`Phase`] decides which operations are allowed before any shared memory
//! is touched, and records the outcome once the hand-off completes.
//!
//! ```text
//!                 reset ok                step ok (not done)
//! AwaitingReset ───────────▶ Running ◀───────────────┐
//!                            │   │ └─────────────────┘
//!                   reset ok │   │ step ok (done)
//!                            │   ▼
//!                          EpisodeOver ── reset ok ──▶ Running
//!
//! any op fails ──▶ Faulted(fault)      close (any outcome) ──▶ Closed
//! ```

use pursuit_shm::Opcode;

use crate::error::Misuse;

/// What a failed operation says about the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The server answered with an error code and is still waiting for
    /// instructions, so CLOSE can still be delivered.
    Declared,
    /// The server timed out, crashed or the lock failed; it cannot be
    /// trusted to answer CLOSE.
    Unresponsive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Connected, no reset yet.
    #[default]
    AwaitingReset,
    /// An episode is in progress.
    Running,
    /// The last step ended the episode.
    EpisodeOver,
    /// An operation failed; only close is allowed.
    Faulted(Fault),
    Closed,
}

impl Phase {
    /// Check that `opcode` may be issued now.
    pub fn admit(&self, opcode: Opcode) -> Result<(), Misuse> {
        match (self, opcode) {
            (Phase::Closed, _) => Err(Misuse::AfterClose),
            (Phase::Faulted(_), Opcode::Close) => Ok(()),
            (Phase::Faulted(_), _) => Err(Misuse::AfterFatalError),
            (Phase::AwaitingReset, Opcode::Step) => Err(Misuse::StepBeforeReset),
            (Phase::EpisodeOver, Opcode::Step) => Err(Misuse::EpisodeFinished),
            _ => Ok(()),
        }
    }

    /// Record a successful hand-off. `episode_done` only matters for STEP.
    pub fn succeeded(&mut self, opcode: Opcode, episode_done: bool) {
        *self = match opcode {
            Opcode::ResetRespawn | Opcode::ResetNewGame => Phase::Running,
            Opcode::Step if episode_done => Phase::EpisodeOver,
            Opcode::Step => Phase::Running,
            Opcode::Close => Phase::Closed,
        };
    }

    /// Record a failed hand-off.
    pub fn failed(&mut self, opcode: Opcode, fault: Fault) {
        *self = match opcode {
            Opcode::Close => Phase::Closed,
            _ => Phase::Faulted(fault),
        };
    }

    /// Whether close should still hand CLOSE to the server.
    pub fn close_reaches_server(&self) -> bool {
        !matches!(self, Phase::Faulted(Fault::Unresponsive) | Phase::Closed)
    }

    pub fn is_closed(&self) -> bool {
        *self == Phase::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_requires_a_reset() {
        let phase = Phase::default();
        assert_eq!(phase.admit(Opcode::Step), Err(Misuse::StepBeforeReset));
        assert_eq!(phase.admit(Opcode::ResetRespawn), Ok(()));
        assert_eq!(phase.admit(Opcode::Close), Ok(()));
    }

    #[test]
    fn done_step_requires_another_reset() {
        let mut phase = Phase::default();
        phase.succeeded(Opcode::ResetNewGame, false);
        assert_eq!(phase, Phase::Running);

        phase.succeeded(Opcode::Step, false);
        assert_eq!(phase, Phase::Running);

        phase.succeeded(Opcode::Step, true);
        assert_eq!(phase, Phase::EpisodeOver);
        assert_eq!(phase.admit(Opcode::Step), Err(Misuse::EpisodeFinished));

        phase.succeeded(Opcode::ResetRespawn, false);
        assert_eq!(phase.admit(Opcode::Step), Ok(()));
    }

    #[test]
    fn fault_only_allows_close() {
        let mut phase = Phase::Running;
        phase.failed(Opcode::Step, Fault::Declared);
        assert_eq!(phase.admit(Opcode::ResetNewGame), Err(Misuse::AfterFatalError));
        assert_eq!(phase.admit(Opcode::Close), Ok(()));
        assert!(phase.close_reaches_server());

        phase.failed(Opcode::ResetNewGame, Fault::Unresponsive);
        assert!(!phase.close_reaches_server());
    }

    #[test]
    fn closed_is_terminal_whatever_the_outcome() {
        let mut ok = Phase::Running;
        ok.succeeded(Opcode::Close, false);
        assert!(ok.is_closed());

        let mut failed = Phase::Running;
        failed.failed(Opcode::Close, Fault::Unresponsive);
        assert!(failed.is_closed());

        for opcode in [Opcode::ResetRespawn, Opcode::Step, Opcode::Close] {
            assert_eq!(failed.admit(opcode), Err(Misuse::AfterClose));
        }
    }
}
