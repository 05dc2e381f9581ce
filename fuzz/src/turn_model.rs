//! In-memory model of one session's turn hand-off for property-based testing.
//!
//! The two lock posts collapse into a single turn owner and the segments into
//! a return-code byte plus a write log. The client side runs the real
//! [`Phase`] machine and [`classify`], so the properties check the code the
//! session actually uses:
//!
//! - only the side holding the turn writes
//! - a hand-off answered by the sentinel is a silent crash
//! - a rejected call never touches shared memory
//! - after an unresponsive server, nothing but local cleanup happens
//! - nothing is allowed after close

use pursuit::decoder::{classify, Verdict};
use pursuit::phase::{Fault, Phase};
use pursuit_shm::layout::{ACKNOWLEDGED, NOT_ACKNOWLEDGED};
use pursuit_shm::{Opcode, ReturnCode, Side, TurnWait};

/// How the modelled server reacts to the next instruction it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    Ack,
    /// Write this byte as the return code. `0` and `0xFF` are legal here too.
    Code(u8),
    /// Hand the turn back without writing anything, then die.
    Silent,
    /// Keep the turn forever.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOp {
    Reset { new_game: bool, server: ServerBehavior },
    Step { episode_done: bool, server: ServerBehavior },
    Close { server: ServerBehavior },
}

impl TurnOp {
    fn opcode(self) -> Opcode {
        match self {
            TurnOp::Reset { new_game: true, .. } => Opcode::ResetNewGame,
            TurnOp::Reset { new_game: false, .. } => Opcode::ResetRespawn,
            TurnOp::Step { .. } => Opcode::Step,
            TurnOp::Close { .. } => Opcode::Close,
        }
    }

    fn server(self) -> ServerBehavior {
        match self {
            TurnOp::Reset { server, .. }
            | TurnOp::Step { server, .. }
            | TurnOp::Close { server } => server,
        }
    }

    fn episode_done(self) -> bool {
        matches!(self, TurnOp::Step { episode_done: true, .. })
    }
}

/// Which segments a side wrote, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub by: Side,
    pub what: &'static str,
}

#[derive(Debug)]
pub struct TurnModel {
    owner: Side,
    return_code: u8,
    server_alive: bool,
    phase: Phase,
    writes: Vec<Write>,
    hand_offs: usize,
}

impl Default for TurnModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnModel {
    /// A session right after the handshake: the client holds the turn.
    pub fn new() -> Self {
        Self {
            owner: Side::Client,
            return_code: ACKNOWLEDGED,
            server_alive: true,
            phase: Phase::default(),
            writes: Vec::new(),
            hand_offs: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn owner(&self) -> Side {
        self.owner
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn hand_offs(&self) -> usize {
        self.hand_offs
    }

    fn write(&mut self, by: Side, what: &'static str) -> Result<(), String> {
        if self.owner != by {
            return Err(format!("{by} wrote {what} while {} holds the turn", self.owner));
        }
        self.writes.push(Write { by, what });
        Ok(())
    }

    /// Apply one client call, returning the verdict if a hand-off happened.
    pub fn apply(&mut self, op: TurnOp) -> Result<Option<Verdict>, String> {
        let opcode = op.opcode();
        let writes_before = self.writes.len();

        if self.phase.admit(opcode).is_err() {
            if self.writes.len() != writes_before {
                return Err(format!("rejected {opcode} touched shared memory"));
            }
            return Ok(None);
        }

        if opcode == Opcode::Close && !self.phase.close_reaches_server() {
            self.phase.succeeded(Opcode::Close, false);
            return Ok(None);
        }
        if !self.server_alive {
            return Err(format!("{opcode} handed to a server known to be gone"));
        }

        self.write(Side::Client, "instruction")?;
        self.write(Side::Client, "return-code sentinel")?;
        self.return_code = NOT_ACKNOWLEDGED;
        self.owner = Side::Server;
        self.hand_offs += 1;

        let wait = match op.server() {
            ServerBehavior::Ack => {
                self.write(Side::Server, "outputs")?;
                self.write(Side::Server, "return code")?;
                self.return_code = ACKNOWLEDGED;
                self.owner = Side::Client;
                TurnWait::Granted
            }
            ServerBehavior::Code(byte) => {
                self.write(Side::Server, "return code")?;
                self.return_code = byte;
                self.owner = Side::Client;
                TurnWait::Granted
            }
            ServerBehavior::Silent => {
                self.server_alive = false;
                self.owner = Side::Client;
                TurnWait::Granted
            }
            ServerBehavior::Hang => {
                self.server_alive = false;
                TurnWait::TimedOut
            }
        };

        // A timed-out client must not read what the server may still be writing.
        let code = match wait {
            TurnWait::Granted => ReturnCode::from_byte(self.return_code),
            TurnWait::TimedOut => ReturnCode::NotAcknowledged,
        };
        let verdict = classify(wait, code);

        match verdict {
            Verdict::Success => self.phase.succeeded(opcode, op.episode_done()),
            Verdict::ServerError(_) => self.phase.failed(opcode, Fault::Declared),
            Verdict::TimedOut | Verdict::SilentCrash => {
                self.phase.failed(opcode, Fault::Unresponsive)
            }
        }
        if opcode == Opcode::Close && self.server_alive {
            // A server that received CLOSE stops serving whatever it answered.
            self.server_alive = false;
        }
        Ok(Some(verdict))
    }
}

/// Run `ops` against a fresh model and check every property after each call.
pub fn execute_and_verify(ops: &[TurnOp]) -> Result<(), String> {
    let mut model = TurnModel::new();

    for (i, &op) in ops.iter().enumerate() {
        let was_closed = model.phase().is_closed();
        let hand_offs = model.hand_offs();
        let verdict = model.apply(op).map_err(|e| format!("op {i} ({op:?}): {e}"))?;

        if was_closed && model.hand_offs() != hand_offs {
            return Err(format!("op {i}: hand-off after close"));
        }
        let Some(verdict) = verdict else { continue };

        let expected = match op.server() {
            ServerBehavior::Ack => Verdict::Success,
            ServerBehavior::Code(NOT_ACKNOWLEDGED) | ServerBehavior::Silent => {
                Verdict::SilentCrash
            }
            ServerBehavior::Code(ACKNOWLEDGED) => Verdict::Success,
            ServerBehavior::Code(byte) => match ReturnCode::from_byte(byte) {
                ReturnCode::Error(code) => Verdict::ServerError(code),
                other => return Err(format!("op {i}: byte {byte:#04x} decoded as {other:?}")),
            },
            ServerBehavior::Hang => Verdict::TimedOut,
        };
        if verdict != expected {
            return Err(format!("op {i}: expected {expected:?}, got {verdict:?}"));
        }

        if verdict != Verdict::TimedOut && model.owner() != Side::Client {
            return Err(format!("op {i}: client returned without the turn"));
        }
        if verdict == Verdict::TimedOut && model.owner() != Side::Server {
            return Err(format!("op {i}: timed out while holding the turn"));
        }
        if !verdict.is_success() && !matches!(model.phase(), Phase::Faulted(_) | Phase::Closed) {
            return Err(format!("op {i}: failure left phase {:?}", model.phase()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_episode() {
        let ops = [
            TurnOp::Reset { new_game: true, server: ServerBehavior::Ack },
            TurnOp::Step { episode_done: false, server: ServerBehavior::Ack },
            TurnOp::Step { episode_done: true, server: ServerBehavior::Ack },
            TurnOp::Reset { new_game: false, server: ServerBehavior::Ack },
            TurnOp::Close { server: ServerBehavior::Ack },
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn hang_skips_close_hand_off() {
        let mut model = TurnModel::new();
        model
            .apply(TurnOp::Reset { new_game: true, server: ServerBehavior::Ack })
            .unwrap();
        let verdict = model
            .apply(TurnOp::Step { episode_done: false, server: ServerBehavior::Hang })
            .unwrap();
        assert_eq!(verdict, Some(Verdict::TimedOut));
        assert_eq!(model.owner(), Side::Server);

        let hand_offs = model.hand_offs();
        assert_eq!(model.apply(TurnOp::Close { server: ServerBehavior::Ack }).unwrap(), None);
        assert_eq!(model.hand_offs(), hand_offs);
        assert!(model.phase().is_closed());
    }

    #[test]
    fn declared_error_still_closes_through_server() {
        let mut model = TurnModel::new();
        model
            .apply(TurnOp::Reset { new_game: true, server: ServerBehavior::Code(3) })
            .unwrap();
        assert_eq!(model.phase(), Phase::Faulted(Fault::Declared));
        assert_eq!(
            model.apply(TurnOp::Close { server: ServerBehavior::Ack }).unwrap(),
            Some(Verdict::Success)
        );
    }

    #[test]
    fn sentinel_written_by_server_is_a_crash() {
        let ops = [TurnOp::Reset { new_game: false, server: ServerBehavior::Code(0xFF) }];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn rejected_calls_write_nothing() {
        let mut model = TurnModel::new();
        let step = TurnOp::Step { episode_done: false, server: ServerBehavior::Ack };
        assert_eq!(model.apply(step).unwrap(), None);
        assert!(model.writes().is_empty());
        assert_eq!(model.hand_offs(), 0);
    }
}
