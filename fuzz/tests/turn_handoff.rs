//! Bolero fuzzer for turn ownership across a whole session.
//!
//! Properties tested:
//! - Only the side holding the turn writes shared memory
//! - The sentinel left in place is always read as a silent crash
//! - Calls the phase machine rejects never hand off
//! - An unresponsive server is never handed another instruction

use bolero::check;
use pursuit_fuzz::turn_model::{execute_and_verify, ServerBehavior, TurnOp};

#[test]
fn turn_handoff() {
    check!()
        .with_type::<Vec<TurnOpInput>>()
        .for_each(|ops| {
            let ops: Vec<TurnOp> = ops.iter().map(TurnOpInput::to_turn_op).collect();

            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for client calls.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum TurnOpInput {
    Reset { new_game: bool, server: BehaviorInput },
    Step { episode_done: bool, server: BehaviorInput },
    Close { server: BehaviorInput },
}

#[derive(Debug, Clone, Copy, bolero::TypeGenerator)]
enum BehaviorInput {
    Ack,
    Code(u8),
    Silent,
    Hang,
}

impl BehaviorInput {
    fn to_behavior(self) -> ServerBehavior {
        match self {
            BehaviorInput::Ack => ServerBehavior::Ack,
            BehaviorInput::Code(byte) => ServerBehavior::Code(byte),
            BehaviorInput::Silent => ServerBehavior::Silent,
            BehaviorInput::Hang => ServerBehavior::Hang,
        }
    }
}

impl TurnOpInput {
    fn to_turn_op(&self) -> TurnOp {
        match self {
            TurnOpInput::Reset { new_game, server } => TurnOp::Reset {
                new_game: *new_game,
                server: server.to_behavior(),
            },
            TurnOpInput::Step { episode_done, server } => TurnOp::Step {
                episode_done: *episode_done,
                server: server.to_behavior(),
            },
            TurnOpInput::Close { server } => TurnOp::Close {
                server: server.to_behavior(),
            },
        }
    }
}

#[test]
fn episodes_until_timeout() {
    let mut ops = Vec::new();
    for _ in 0..20 {
        ops.push(TurnOp::Reset { new_game: true, server: ServerBehavior::Ack });
        ops.push(TurnOp::Step { episode_done: false, server: ServerBehavior::Ack });
        ops.push(TurnOp::Step { episode_done: true, server: ServerBehavior::Ack });
    }
    ops.push(TurnOp::Reset { new_game: false, server: ServerBehavior::Ack });
    ops.push(TurnOp::Step { episode_done: false, server: ServerBehavior::Hang });
    // Everything after the timeout is either rejected or a local close.
    ops.push(TurnOp::Step { episode_done: false, server: ServerBehavior::Ack });
    ops.push(TurnOp::Close { server: ServerBehavior::Ack });
    ops.push(TurnOp::Close { server: ServerBehavior::Ack });
    execute_and_verify(&ops).unwrap();
}
