//! pursuit-testkit: mock game server and shared protocol scenarios.
//!
//! Provides [`MockServer`] (a thread that attaches to a session by namespace
//! and answers instructions from a script), [`MockLauncher`] (starts it in
//! place of the real launcher) and `run_*` scenarios that exercise the
//! client end to end.
//!
//! # Usage
//!
//! ```ignore
//! use pursuit_testkit::{MockLauncher, MockServer, Reply};
//!
//! let server = MockServer::new(ServerInfo::new(84, 84, 4, 5))
//!     .respond_with(|request| Reply::ack().fill(1).reward(2.5));
//! let launcher = MockLauncher::new(server);
//! let session = Session::connect_with(&pursuit_testkit::mock_paths(), config, &launcher)?;
//!
//! #[test]
//! fn end_to_end() {
//!     pursuit_testkit::run_end_to_end();
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pursuit::decoder::{Handoff, HandshakeStage};
use pursuit::phase::Phase;
use pursuit::{
    Error, Info, LaunchFailure, LauncherExit, Misuse, Opcode, PixelChannels, ResetMode,
    ServerErrorCode, ServerInfo, ServerPaths, Session, SessionConfig,
};
use pursuit_shm::{Channel, Namespace, Segment};

mod mock_launcher;
mod mock_server;

pub use mock_launcher::MockLauncher;
pub use mock_server::{
    Fault, MockServer, Reply, Request, Witness, WitnessLog, DEFAULT_IDLE_TIMEOUT,
};

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Setting up the session or the mock failed.
    Setup(String),
    /// A session call failed unexpectedly.
    Session(Error),
    /// The mock server reported a failure.
    Server(String),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Session(e) => write!(f, "session error: {}", e),
            TestError::Server(msg) => write!(f, "mock server error: {}", msg),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<Error> for TestError {
    fn from(e: Error) -> Self {
        TestError::Session(e)
    }
}

/// Paths handed to the session; the mock launcher ignores them.
pub fn mock_paths() -> ServerPaths {
    ServerPaths::new("mock-launcher", "mock-game", "mock/server.dll")
}

/// The shape used by the reference scenarios: 84x84 RGBA, five actions.
pub const REFERENCE_INFO: ServerInfo = ServerInfo::new(84, 84, 4, 5);

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), TestError> {
    if condition {
        Ok(())
    } else {
        Err(TestError::Assertion(message()))
    }
}

fn join(launcher: &MockLauncher) -> Result<(), TestError> {
    match launcher.join() {
        Some(result) => result.map_err(TestError::Server),
        None => Err(TestError::Setup("mock server was never started".into())),
    }
}

fn telemetry(index: usize) -> Info {
    Info {
        tps: 60.0,
        memory: 100.0 + index as f32,
        server_time: index as f32,
        game_time: 2.0 * index as f32,
    }
}

/// After close, no named object of `namespace` can be opened again.
#[cfg(unix)]
fn ensure_released(namespace: &Namespace) -> Result<(), TestError> {
    ensure(pursuit_shm::TurnGate::open(namespace).is_err(), || {
        format!("turn locks of {namespace} still exist")
    })?;
    ensure(
        Segment::open(namespace, Channel::ReturnCode, 1).is_err(),
        || format!("return-code segment of {namespace} still exists"),
    )
}

/// Windows removes named objects with their last handle; nothing to check.
#[cfg(not(unix))]
fn ensure_released(_namespace: &Namespace) -> Result<(), TestError> {
    Ok(())
}

// ============================================================================
// Scenarios
// ============================================================================

/// Reset into a new game, take one step, close.
///
/// The mock fills the observation with ones, answers the step with reward
/// 2.5 and no termination, and the client must report exactly that.
pub fn run_end_to_end() {
    if let Err(e) = run_end_to_end_inner() {
        panic!("run_end_to_end failed: {}", e);
    }
}

fn run_end_to_end_inner() -> Result<(), TestError> {
    let server = MockServer::new(REFERENCE_INFO).respond_with(|request| match request.opcode {
        Some(Opcode::ResetNewGame | Opcode::ResetRespawn) => {
            Reply::ack().fill(1).info(telemetry(request.index))
        }
        Some(Opcode::Step) => Reply::ack()
            .fill(1)
            .reward(2.5)
            .termination(false, false)
            .info(telemetry(request.index)),
        _ => Reply::ack(),
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;

    let reset = session.reset(ResetMode::from_new_game(true))?;
    ensure(witness.opcodes() == [Some(Opcode::ResetNewGame)], || {
        format!("expected RESET-NEW-GAME, server saw {:?}", witness.opcodes())
    })?;
    ensure(reset.observation.shape() == [84, 84, 3], || {
        format!("reset shape {:?}", reset.observation.shape())
    })?;
    ensure(reset.observation.as_bytes().iter().all(|&b| b == 1), || {
        "reset observation is not all ones".into()
    })?;
    ensure(reset.info == telemetry(0), || format!("reset info {:?}", reset.info))?;

    let actions = [true, false, false, false, false];
    let step = session.step(&actions)?;
    let seen = witness.snapshot().requests[1].actions.clone();
    ensure(seen == actions, || format!("server saw actions {:?}", seen))?;
    ensure(step.reward == 2.5, || format!("reward {}", step.reward))?;
    ensure(!step.terminated && !step.truncated, || {
        format!("terminated={} truncated={}", step.terminated, step.truncated)
    })?;
    ensure(step.info == telemetry(1), || format!("step info {:?}", step.info))?;
    ensure(step.observation.as_bytes().iter().all(|&b| b == 1), || {
        "step observation is not all ones".into()
    })?;
    ensure(session.last_info() == step.info, || "last_info not updated".into())?;

    let report = session.close()?;
    ensure(report.handed_off && report.is_clean(), || {
        format!("unclean close: {:?}", report)
    })?;
    join(&launcher)?;
    ensure(
        witness.opcodes()
            == [
                Some(Opcode::ResetNewGame),
                Some(Opcode::Step),
                Some(Opcode::Close),
            ],
        || format!("server saw {:?}", witness.opcodes()),
    )
}

/// Drive many resets and steps; the mock must never hold the turn while
/// the client does, and never write outside its own turn.
pub fn run_turn_exclusivity() {
    if let Err(e) = run_turn_exclusivity_inner() {
        panic!("run_turn_exclusivity failed: {}", e);
    }
}

fn run_turn_exclusivity_inner() -> Result<(), TestError> {
    const CALLS: usize = 40;

    let server = MockServer::new(ServerInfo::new(8, 8, 3, 4)).respond_with(|request| {
        let done = request.opcode == Some(Opcode::Step) && request.index % 7 == 6;
        Reply::ack()
            .fill(request.index as u8)
            .reward(request.index as f32)
            .termination(done, false)
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;
    ensure(!witness.holding_turn(), || "mock holds the turn after handshake".into())?;

    for call in 0..CALLS {
        match session.phase() {
            Phase::AwaitingReset | Phase::EpisodeOver => {
                session.reset(ResetMode::from_new_game(call % 2 == 0))?;
            }
            _ => {
                let actions: Vec<bool> = (0..4).map(|i| (call + i) % 3 == 0).collect();
                session.step(&actions)?;
            }
        }
        ensure(!witness.holding_turn(), || {
            format!("both sides hold the turn after call {call}")
        })?;
    }

    session.close()?;
    join(&launcher)?;

    let log = witness.snapshot();
    ensure(log.violations.is_empty(), || {
        format!("writes outside the turn: {:?}", log.violations)
    })?;
    // Two handshake turns, one per call, one for CLOSE.
    ensure(log.turns == CALLS + 3, || {
        format!("expected {} server turns, got {}", CALLS + 3, log.turns)
    })
}

/// The mock flags writes it did not make: one into a client segment while
/// the server holds the turn, one into a server segment while the client
/// does. Both land through separate handles, as a misbehaving client would.
pub fn run_foreign_writes_are_flagged() {
    if let Err(e) = run_foreign_writes_are_flagged_inner() {
        panic!("run_foreign_writes_are_flagged failed: {}", e);
    }
}

fn run_foreign_writes_are_flagged_inner() -> Result<(), TestError> {
    let published: Arc<Mutex<Option<Namespace>>> = Arc::default();
    let server_side_error: Arc<Mutex<Option<String>>> = Arc::default();

    let server = MockServer::new(REFERENCE_INFO).respond_with({
        let published = published.clone();
        let server_side_error = server_side_error.clone();
        move |request| {
            if request.index == 0 {
                let written = match published.lock().as_ref() {
                    Some(namespace) => scribble(namespace, Channel::Instruction),
                    None => Err("namespace not published".to_owned()),
                };
                if let Err(e) = written {
                    *server_side_error.lock() = Some(e);
                }
            }
            Reply::ack()
        }
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;
    *published.lock() = Some(session.namespace().clone());

    session.reset(ResetMode::NewGame)?;
    if let Some(e) = server_side_error.lock().take() {
        return Err(TestError::Setup(e));
    }
    scribble(session.namespace(), Channel::Reward).map_err(TestError::Setup)?;
    session.step(&[false; 5])?;
    session.close()?;
    join(&launcher)?;

    let violations = witness.snapshot().violations;
    ensure(
        violations
            == [
                "instruction changed during the server's turn",
                "client wrote reward",
            ],
        || format!("unexpected violations: {violations:?}"),
    )
}

/// Overwrite a fixed-size segment through a handle of its own.
fn scribble(namespace: &Namespace, channel: Channel) -> Result<(), String> {
    let len = channel
        .fixed_size()
        .ok_or_else(|| format!("{channel} has no fixed size"))?;
    Segment::open(namespace, channel, len)
        .and_then(|mut segment| segment.fill(0xEE))
        .map_err(|e| format!("write {channel}: {e}"))
}

/// Observations returned earlier must not change when the server writes
/// the next frame.
pub fn run_observation_independence() {
    if let Err(e) = run_observation_independence_inner() {
        panic!("run_observation_independence failed: {}", e);
    }
}

fn run_observation_independence_inner() -> Result<(), TestError> {
    let server = MockServer::new(ServerInfo::new(4, 4, 3, 2))
        .respond_with(|request| Reply::ack().fill(request.index as u8 + 1));
    let launcher = MockLauncher::new(server);
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;

    let first = session.reset(ResetMode::NewGame)?.observation;
    let second = session.step(&[false, true])?.observation;
    let third = session.step(&[true, false])?.observation;

    for (label, obs, value) in [("first", &first, 1u8), ("second", &second, 2), ("third", &third, 3)] {
        ensure(obs.as_bytes().iter().all(|&b| b == value), || {
            format!("{label} observation changed after later writes")
        })?;
    }

    session.close()?;
    join(&launcher)
}

/// A server that hands the turn back without a return code is reported as
/// a silent crash, well before the timeout.
pub fn run_silent_crash_detection() {
    if let Err(e) = run_silent_crash_detection_inner() {
        panic!("run_silent_crash_detection failed: {}", e);
    }
}

fn run_silent_crash_detection_inner() -> Result<(), TestError> {
    let timeout = Duration::from_secs(5);
    let server = MockServer::new(ServerInfo::new(4, 4, 3, 5)).respond_with(|request| {
        match request.opcode {
            Some(Opcode::Step) => Reply::fault(Fault::SkipReturnCode),
            _ => Reply::ack(),
        }
    });
    let launcher = MockLauncher::new(server);
    let config = SessionConfig::default().with_turn_timeout(timeout);
    let mut session = Session::connect_with(&mock_paths(), config, &launcher)?;
    session.reset(ResetMode::NewGame)?;

    let start = Instant::now();
    let result = session.step(&[false; 5]);
    let elapsed = start.elapsed();

    match result {
        Err(Error::SilentCrash {
            handoff: Handoff::Operation(Opcode::Step),
        }) => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected SilentCrash, got {:?}",
                other.map(|_| ())
            )))
        }
    }
    ensure(elapsed < timeout, || {
        format!("silent crash took {elapsed:?}, not faster than the {timeout:?} bound")
    })?;
    ensure(
        matches!(
            session.reset(ResetMode::NewGame),
            Err(Error::InvalidOpcodeUse(Misuse::AfterFatalError))
        ),
        || "session accepted a reset after a fatal error".into(),
    )?;

    let report = session.close()?;
    ensure(!report.handed_off, || "CLOSE sent to a crashed server".into())?;
    join(&launcher)
}

/// A server that never hands the turn back makes the call fail with
/// `TurnTimeout` once the bound elapses.
pub fn run_turn_timeout_bound() {
    if let Err(e) = run_turn_timeout_bound_inner() {
        panic!("run_turn_timeout_bound failed: {}", e);
    }
}

fn run_turn_timeout_bound_inner() -> Result<(), TestError> {
    let bound = Duration::from_millis(300);
    let slack = Duration::from_secs(3);
    let server = MockServer::new(ServerInfo::new(4, 4, 3, 5)).respond_with(|request| {
        match request.opcode {
            Some(Opcode::Step) => Reply::fault(Fault::NeverRelease),
            _ => Reply::ack(),
        }
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let config = SessionConfig::default().with_turn_timeout(bound);
    let mut session = Session::connect_with(&mock_paths(), config, &launcher)?;
    session.reset(ResetMode::Respawn)?;

    let start = Instant::now();
    let result = session.step(&[true; 5]);
    let elapsed = start.elapsed();

    match result {
        Err(Error::TurnTimeout {
            opcode: Opcode::Step,
            waited,
        }) if waited == bound => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected TurnTimeout, got {:?}",
                other.map(|_| ())
            )))
        }
    }
    ensure(elapsed + Duration::from_millis(20) >= bound, || {
        format!("returned after {elapsed:?}, before the {bound:?} bound")
    })?;
    ensure(elapsed < bound + slack, || {
        format!("returned after {elapsed:?}, long past the {bound:?} bound")
    })?;
    ensure(witness.holding_turn(), || "mock should still hold the turn".into())?;

    let report = session.close()?;
    ensure(!report.handed_off, || "CLOSE sent to a hung server".into())?;
    join(&launcher)
}

/// A declared error code surfaces as `ServerError`; the server is still
/// alive, so close still delivers CLOSE.
pub fn run_declared_server_error() {
    if let Err(e) = run_declared_server_error_inner() {
        panic!("run_declared_server_error failed: {}", e);
    }
}

fn run_declared_server_error_inner() -> Result<(), TestError> {
    let server = MockServer::new(ServerInfo::new(4, 4, 3, 5)).respond_with(|request| {
        match request.opcode {
            Some(Opcode::Step) => {
                Reply::fault(Fault::Code(ServerErrorCode::SimulationTooSlow))
            }
            _ => Reply::ack(),
        }
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;
    session.reset(ResetMode::NewGame)?;

    let err = match session.step(&[false; 5]) {
        Err(e) => e,
        Ok(_) => return Err(TestError::Assertion("step succeeded".into())),
    };
    ensure(
        err.server_code() == Some(ServerErrorCode::SimulationTooSlow),
        || format!("expected SimulationTooSlow, got {err}"),
    )?;
    ensure(err.is_restartable(), || "server error not restartable".into())?;

    let report = session.close()?;
    ensure(report.handed_off, || "CLOSE not sent to a live server".into())?;
    join(&launcher)?;
    ensure(witness.opcodes().last() == Some(&Some(Opcode::Close)), || {
        format!("server saw {:?}", witness.opcodes())
    })
}

/// Sessions opened back to back each get a fresh namespace, and close
/// leaves nothing of the previous one behind.
pub fn run_cleanup_idempotence() {
    if let Err(e) = run_cleanup_idempotence_inner() {
        panic!("run_cleanup_idempotence failed: {}", e);
    }
}

fn run_cleanup_idempotence_inner() -> Result<(), TestError> {
    let mut namespaces: Vec<Namespace> = Vec::new();

    for round in 0..3 {
        let launcher = MockLauncher::new(MockServer::new(REFERENCE_INFO));
        let mut session =
            Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;
        let namespace = session.namespace().clone();
        ensure(!namespaces.contains(&namespace), || {
            format!("round {round} reused namespace {namespace}")
        })?;

        session.reset(ResetMode::NewGame)?;
        let report = session.close()?;
        ensure(report.is_clean(), || {
            format!("round {round} release failures: {:?}", report.release_failures)
        })?;
        join(&launcher)?;

        ensure(
            matches!(
                session.close(),
                Err(Error::InvalidOpcodeUse(Misuse::AfterClose))
            ),
            || "second close did not fail with AfterClose".into(),
        )?;
        ensure_released(&namespace)?;
        namespaces.push(namespace);
    }
    Ok(())
}

/// Segment sizes and observation shape follow the announced server info.
pub fn run_shape_derivation() {
    if let Err(e) = run_shape_derivation_inner() {
        panic!("run_shape_derivation failed: {}", e);
    }
}

fn run_shape_derivation_inner() -> Result<(), TestError> {
    let observation_len = 84 * 84 * 4;

    for (policy, channels) in [(PixelChannels::Rgb, 3), (PixelChannels::All, 4)] {
        let launcher = MockLauncher::new(MockServer::new(REFERENCE_INFO));
        let witness = launcher.witness();
        let config = SessionConfig::default().with_pixel_channels(policy);
        let mut session = Session::connect_with(&mock_paths(), config, &launcher)?;

        ensure(
            session.segment_len(Channel::Observation) == Some(observation_len),
            || format!("observation segment is {:?}", session.segment_len(Channel::Observation)),
        )?;
        ensure(session.segment_len(Channel::Action) == Some(5), || {
            format!("action segment is {:?}", session.segment_len(Channel::Action))
        })?;
        ensure(session.action_count() == 5, || "action count".into())?;
        ensure(
            witness
                .segment_size(Channel::Observation)
                .is_some_and(|len| len >= observation_len),
            || "mock could not map the whole observation".into(),
        )?;

        let reset = session.reset(ResetMode::NewGame)?;
        ensure(reset.observation.shape() == [84, 84, channels], || {
            format!("{policy:?}: shape {:?}", reset.observation.shape())
        })?;
        ensure(session.observation_shape() == [84, 84, channels], || {
            format!("{policy:?}: session shape {:?}", session.observation_shape())
        })?;
        ensure(
            reset.observation.as_bytes().len() == 84 * 84 * channels,
            || "observation length does not match its shape".into(),
        )?;

        session.close()?;
        join(&launcher)?;
    }
    Ok(())
}

/// Caller mistakes fail fast and never reach the server.
pub fn run_misuse_is_local() {
    if let Err(e) = run_misuse_is_local_inner() {
        panic!("run_misuse_is_local failed: {}", e);
    }
}

fn run_misuse_is_local_inner() -> Result<(), TestError> {
    let server = MockServer::new(ServerInfo::new(4, 4, 3, 5)).respond_with(|request| {
        Reply::ack().termination(request.opcode == Some(Opcode::Step), false)
    });
    let launcher = MockLauncher::new(server);
    let witness = launcher.witness();
    let mut session = Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher)?;

    let expect_misuse = |result: Result<(), Error>, misuse: Misuse| {
        ensure(
            matches!(&result, Err(Error::InvalidOpcodeUse(m)) if *m == misuse),
            || format!("expected {misuse:?}, got {result:?}"),
        )
    };

    expect_misuse(session.step(&[false; 5]).map(|_| ()), Misuse::StepBeforeReset)?;
    ensure(witness.request_count() == 0, || "step before reset reached the server".into())?;

    session.reset(ResetMode::NewGame)?;
    expect_misuse(
        session.step(&[true]).map(|_| ()),
        Misuse::ActionLength { expected: 5, got: 1 },
    )?;
    ensure(witness.request_count() == 1, || "short action vector reached the server".into())?;

    let step = session.step(&[false; 5])?;
    ensure(step.terminated, || "mock should end the episode".into())?;
    expect_misuse(session.step(&[false; 5]).map(|_| ()), Misuse::EpisodeFinished)?;
    ensure(witness.request_count() == 2, || "step after done reached the server".into())?;

    session.close()?;
    join(&launcher)?;
    expect_misuse(session.reset(ResetMode::NewGame).map(|_| ()), Misuse::AfterClose)?;
    expect_misuse(session.close().map(|_| ()), Misuse::AfterClose)?;
    ensure(witness.request_count() == 3, || "calls after close reached the server".into())
}

/// A server that never answers a handshake hand-off makes connect fail with
/// `HandshakeTimeout` for that stage, leaving nothing behind.
pub fn run_handshake_stall(stage: HandshakeStage) {
    if let Err(e) = run_handshake_stall_inner(stage) {
        panic!("run_handshake_stall({stage}) failed: {}", e);
    }
}

fn run_handshake_stall_inner(stage: HandshakeStage) -> Result<(), TestError> {
    let launcher = MockLauncher::new(MockServer::new(REFERENCE_INFO).stall_at(stage));
    let config = SessionConfig::default().with_handshake_timeout(Duration::from_millis(200));

    match Session::connect_with(&mock_paths(), config, &launcher) {
        Err(Error::HandshakeTimeout { stage: got, .. }) if got == stage => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected HandshakeTimeout at {stage}, got {:?}",
                other.map(|_| ())
            )))
        }
    }
    join(&launcher)?;

    let args = launcher
        .last_launch()
        .ok_or_else(|| TestError::Setup("launcher never called".into()))?;
    ensure_released(&args.namespace)
}

/// A launcher exiting non-zero fails connect before any hand-off and
/// leaves no named object behind.
pub fn run_launch_failure() {
    if let Err(e) = run_launch_failure_inner() {
        panic!("run_launch_failure failed: {}", e);
    }
}

fn run_launch_failure_inner() -> Result<(), TestError> {
    let launcher = MockLauncher::failing(2);

    match Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher) {
        Err(Error::ProcessLaunchFailure(LaunchFailure::Exit(LauncherExit::InjectionFailed))) => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected ProcessLaunchFailure, got {:?}",
                other.map(|_| ())
            )))
        }
    }
    ensure(launcher.join().is_none(), || "a server was started".into())?;
    ensure(launcher.witness().snapshot().turns == 0, || "a hand-off happened".into())?;

    let args = launcher
        .last_launch()
        .ok_or_else(|| TestError::Setup("launcher never called".into()))?;
    ensure_released(&args.namespace)
}

/// A server announcing a zero dimension is rejected during the handshake.
pub fn run_invalid_server_info() {
    if let Err(e) = run_invalid_server_info_inner() {
        panic!("run_invalid_server_info failed: {}", e);
    }
}

fn run_invalid_server_info_inner() -> Result<(), TestError> {
    let info = ServerInfo::new(84, 0, 3, 5);
    let launcher = MockLauncher::new(
        MockServer::new(info).idle_timeout(Duration::from_millis(300)),
    );

    match Session::connect_with(&mock_paths(), SessionConfig::default(), &launcher) {
        Err(Error::InvalidServerInfo(got)) if got == info => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected InvalidServerInfo, got {:?}",
                other.map(|_| ())
            )))
        }
    }
    // The mock gives up once the client is gone; how it stops does not matter.
    let _ = launcher.join();
    Ok(())
}

/// The launcher is called once with the configured arguments and the
/// session's own namespace.
pub fn run_launcher_arguments() {
    if let Err(e) = run_launcher_arguments_inner() {
        panic!("run_launcher_arguments failed: {}", e);
    }
}

fn run_launcher_arguments_inner() -> Result<(), TestError> {
    let launcher = MockLauncher::new(MockServer::new(REFERENCE_INFO));
    let config = SessionConfig::default()
        .with_real_time(true)
        .with_frame_skip(0)
        .with_log_dir("/var/tmp/pursuit-logs");
    let mut session = Session::connect_with(&mock_paths(), config, &launcher)?;

    let launches = launcher.launches();
    ensure(launches.len() == 1, || format!("{} launches", launches.len()))?;
    let args = &launches[0];
    ensure(args.launcher.is_absolute(), || "launcher path not absolute".into())?;
    ensure(args.launcher.ends_with("mock-launcher"), || {
        format!("launcher path {}", args.launcher.display())
    })?;
    ensure(args.module.ends_with("mock/server.dll"), || {
        format!("module path {}", args.module.display())
    })?;
    ensure(args.real_time, || "real-time flag lost".into())?;
    ensure(args.frame_skip == 1, || format!("frame skip {}", args.frame_skip))?;
    ensure(
        args.log_dir == std::path::Path::new("/var/tmp/pursuit-logs"),
        || format!("log dir {}", args.log_dir.display()),
    )?;
    ensure(&args.namespace == session.namespace(), || {
        "launcher got a different namespace".into()
    })?;
    ensure(args.server_args()[2] == "true", || "real-time not passed as text".into())?;

    session.close()?;
    join(&launcher)
}
