//! Turns the outcome of one hand-off into a verdict.
//!
//! | turn wait | return code        | verdict              |
//! |-----------|--------------------|----------------------|
//! | timed out | (not read)         | `TimedOut`           |
//! | granted   | `0xFF` (sentinel)  | `SilentCrash`        |
//! | granted   | `0x00`             | `Success`            |
//! | granted   | anything else      | `ServerError(code)`  |
//!
//! Every verdict other than `Success` is terminal for the session.

use std::fmt;
use std::time::Duration;

use pursuit_shm::{Opcode, ReturnCode, ServerErrorCode, TurnWait};

use crate::error::{Error, Result};

/// Handshake hand-offs carry no instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Wait for the server to publish its [`ServerInfo`](pursuit_shm::ServerInfo).
    ServerInfo,
    /// Let the server attach to the segments sized from it.
    Attach,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandshakeStage::ServerInfo => "server info",
            HandshakeStage::Attach => "segment attach",
        })
    }
}

/// What a hand-off was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Handshake(HandshakeStage),
    Operation(Opcode),
}

impl fmt::Display for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handoff::Handshake(stage) => write!(f, "handshake ({stage})"),
            Handoff::Operation(opcode) => write!(f, "{opcode}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    ServerError(ServerErrorCode),
    TimedOut,
    SilentCrash,
}

/// Classify a completed or abandoned hand-off.
///
/// `code` is ignored when the wait timed out.
pub fn classify(wait: TurnWait, code: ReturnCode) -> Verdict {
    match (wait, code) {
        (TurnWait::TimedOut, _) => Verdict::TimedOut,
        (TurnWait::Granted, ReturnCode::NotAcknowledged) => Verdict::SilentCrash,
        (TurnWait::Granted, ReturnCode::Acknowledged) => Verdict::Success,
        (TurnWait::Granted, ReturnCode::Error(code)) => Verdict::ServerError(code),
    }
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }

    /// Map to the session error for `handoff`; `waited` is the bound that elapsed.
    pub fn into_result(self, handoff: Handoff, waited: Duration) -> Result<()> {
        match self {
            Verdict::Success => Ok(()),
            Verdict::ServerError(code) => Err(Error::ServerError { handoff, code }),
            Verdict::SilentCrash => Err(Error::SilentCrash { handoff }),
            Verdict::TimedOut => Err(match handoff {
                Handoff::Handshake(stage) => Error::HandshakeTimeout { stage, waited },
                Handoff::Operation(opcode) => Error::TurnTimeout { opcode, waited },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Handoff = Handoff::Operation(Opcode::Step);
    const TEN: Duration = Duration::from_secs(10);

    #[test]
    fn timeout_wins_over_any_code() {
        for byte in [0x00, 0x03, 0xFF] {
            assert_eq!(
                classify(TurnWait::TimedOut, ReturnCode::from_byte(byte)),
                Verdict::TimedOut
            );
        }
    }

    #[test]
    fn sentinel_means_silent_crash() {
        let verdict = classify(TurnWait::Granted, ReturnCode::NotAcknowledged);
        assert_eq!(verdict, Verdict::SilentCrash);
        assert!(matches!(
            verdict.into_result(STEP, TEN),
            Err(Error::SilentCrash { handoff }) if handoff == STEP
        ));
    }

    #[test]
    fn declared_codes_are_server_errors() {
        for raw in 1..=6u8 {
            let verdict = classify(TurnWait::Granted, ReturnCode::from_byte(raw));
            match verdict.into_result(STEP, TEN) {
                Err(Error::ServerError { code, .. }) => assert_eq!(code.to_byte(), raw),
                other => panic!("code {raw}: unexpected {other:?}"),
            }
        }
        assert_eq!(
            classify(TurnWait::Granted, ReturnCode::from_byte(0x40)),
            Verdict::ServerError(ServerErrorCode::Unrecognized(0x40))
        );
    }

    #[test]
    fn ack_is_success() {
        let verdict = classify(TurnWait::Granted, ReturnCode::Acknowledged);
        assert!(verdict.is_success());
        assert!(verdict.into_result(STEP, TEN).is_ok());
    }

    #[test]
    fn timeout_kind_follows_the_handoff() {
        let handshake = Verdict::TimedOut
            .into_result(Handoff::Handshake(HandshakeStage::Attach), TEN)
            .unwrap_err();
        assert!(matches!(
            handshake,
            Error::HandshakeTimeout { stage: HandshakeStage::Attach, .. }
        ));

        let turn = Verdict::TimedOut.into_result(STEP, TEN).unwrap_err();
        assert!(matches!(
            turn,
            Error::TurnTimeout { opcode: Opcode::Step, waited } if waited == TEN
        ));
    }
}
