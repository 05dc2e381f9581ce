//! Error types for session operations.

use std::fmt;
use std::io;
use std::time::Duration;

use pursuit_shm::{Channel, Opcode, ServerErrorCode, ServerInfo};

use crate::decoder::{Handoff, HandshakeStage};
use crate::launcher::LaunchFailure;
use crate::phase::Fault;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a session operation can report.
///
/// None of these are retried internally. Apart from [`Error::InvalidOpcodeUse`]
/// they all leave the session unusable: close it and connect a new one.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The launcher could not be started or exited non-zero. No session exists.
    #[error("failed to launch the game server: {0}")]
    ProcessLaunchFailure(#[from] LaunchFailure),

    /// The server did not answer a handshake hand-off in time. No session exists.
    #[error("handshake timed out after {waited:?} waiting for {stage}")]
    HandshakeTimeout {
        stage: HandshakeStage,
        waited: Duration,
    },

    /// The server did not hand the turn back in time.
    #[error("{opcode} timed out after {waited:?}")]
    TurnTimeout { opcode: Opcode, waited: Duration },

    /// The server answered with an error code.
    #[error("server failed {handoff}: {code}")]
    ServerError { handoff: Handoff, code: ServerErrorCode },

    /// The server handed the turn back without writing a return code.
    #[error("server released the turn without answering {handoff}")]
    SilentCrash { handoff: Handoff },

    /// A named lock or segment could not be created.
    #[error("failed to create {name}: {source}")]
    ResourceCreationFailure {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The call is not allowed in the session's current state.
    /// Shared memory was not touched.
    #[error("invalid use of the session: {0}")]
    InvalidOpcodeUse(#[from] Misuse),

    /// The server announced a shape no segment can be sized from.
    #[error(
        "server announced an unusable shape: {}x{}x{} with {} actions",
        .0.obs_height, .0.obs_width, .0.obs_channels, .0.action_count
    )]
    InvalidServerInfo(ServerInfo),

    /// An OS call on a lock or segment failed for a reason other than a timeout.
    #[error("failed to {operation}: {source}")]
    Sync {
        operation: SyncOperation,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Whether closing this session and connecting a fresh one may help.
    ///
    /// `true` when a connected server failed an operation, and for OS-level
    /// synchronization failures. `false` for caller mistakes and for launch
    /// or handshake failures, including a server that errors or dies while
    /// the handshake is still running.
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            Error::TurnTimeout { .. }
                | Error::ServerError {
                    handoff: Handoff::Operation(_),
                    ..
                }
                | Error::SilentCrash {
                    handoff: Handoff::Operation(_)
                }
                | Error::Sync { .. }
        )
    }

    /// The declared server error code, if any.
    pub fn server_code(&self) -> Option<ServerErrorCode> {
        match self {
            Error::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// What this failure says about the server, for a session that hits it.
    pub(crate) fn fault(&self) -> Fault {
        match self {
            // The server answered, so it is still waiting for instructions.
            Error::ServerError { .. } => Fault::Declared,
            _ => Fault::Unresponsive,
        }
    }

    pub(crate) fn creation(name: impl fmt::Display, source: io::Error) -> Self {
        Error::ResourceCreationFailure {
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn sync(operation: SyncOperation, source: io::Error) -> Self {
        Error::Sync { operation, source }
    }
}

/// Caller mistakes reported as [`Error::InvalidOpcodeUse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    #[error("step called before the first reset")]
    StepBeforeReset,
    #[error("step called after the episode ended; reset first")]
    EpisodeFinished,
    #[error("the session is closed")]
    AfterClose,
    #[error("the session hit a fatal error; only close is allowed")]
    AfterFatalError,
    #[error("expected {expected} action flags, got {got}")]
    ActionLength { expected: usize, got: usize },
}

/// OS-level operation named by [`Error::Sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    HandOff,
    AwaitTurn,
    Read(Channel),
    Write(Channel),
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::HandOff => f.write_str("hand off the turn"),
            SyncOperation::AwaitTurn => f.write_str("wait for the turn"),
            SyncOperation::Read(channel) => write!(f, "read {channel}"),
            SyncOperation::Write(channel) => write!(f, "write {channel}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restartable_split() {
        let timeout = Error::TurnTimeout {
            opcode: Opcode::Step,
            waited: Duration::from_secs(10),
        };
        let declared = Error::ServerError {
            handoff: Handoff::Operation(Opcode::Step),
            code: ServerErrorCode::SimulationTooSlow,
        };
        let crash = Error::SilentCrash {
            handoff: Handoff::Operation(Opcode::ResetNewGame),
        };
        assert!(timeout.is_restartable());
        assert!(declared.is_restartable());
        assert!(crash.is_restartable());

        assert!(!Error::InvalidOpcodeUse(Misuse::AfterClose).is_restartable());
        assert!(!Error::HandshakeTimeout {
            stage: HandshakeStage::ServerInfo,
            waited: Duration::from_secs(30),
        }
        .is_restartable());
    }

    #[test]
    fn handshake_failures_are_not_restartable() {
        let declared = Error::ServerError {
            handoff: Handoff::Handshake(HandshakeStage::Attach),
            code: ServerErrorCode::NativeFault,
        };
        let crash = Error::SilentCrash {
            handoff: Handoff::Handshake(HandshakeStage::ServerInfo),
        };
        assert!(!declared.is_restartable());
        assert!(!crash.is_restartable());
    }

    #[test]
    fn only_declared_errors_leave_the_server_alive() {
        let declared = Error::ServerError {
            handoff: Handoff::Operation(Opcode::Step),
            code: ServerErrorCode::NativeFault,
        };
        assert_eq!(declared.fault(), Fault::Declared);
        assert_eq!(declared.server_code(), Some(ServerErrorCode::NativeFault));

        let crash = Error::SilentCrash {
            handoff: Handoff::Operation(Opcode::Step),
        };
        assert_eq!(crash.fault(), Fault::Unresponsive);
        assert_eq!(crash.server_code(), None);
    }

    #[test]
    fn messages_name_the_condition() {
        let err = Error::ServerError {
            handoff: Handoff::Operation(Opcode::Step),
            code: ServerErrorCode::StepBeforeReset,
        };
        assert_eq!(
            err.to_string(),
            "server failed STEP: step called before reset (0x06)"
        );
        let misuse = Error::from(Misuse::ActionLength { expected: 5, got: 2 });
        assert_eq!(
            misuse.to_string(),
            "invalid use of the session: expected 5 action flags, got 2"
        );
    }
}
