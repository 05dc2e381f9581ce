//! The protocol client: one [`Session`] per game server.

use std::fmt;

use pursuit_shm::layout::{self, INFO_SIZE, REWARD_SIZE, TERMINATION_SIZE};
use pursuit_shm::{Channel, Info, Namespace, Opcode, ServerInfo, Termination};

use crate::config::{ServerPaths, SessionConfig};
use crate::decoder::Handoff;
use crate::error::{Misuse, Result};
use crate::handshake::{self, Established};
use crate::launcher::{LaunchFailure, LaunchReport, ProcessLauncher, ServerLauncher};
use crate::link::Link;
use crate::phase::Phase;
use crate::types::{CloseReport, Observation, ResetMode, ResetOutcome, StepOutcome};

/// A connected game server.
///
/// Every call is synchronous: it writes the request, hands the turn to the
/// server and blocks until the turn comes back or the configured timeout
/// elapses. A session is driven from one thread at a time.
///
/// Any error other than [`InvalidOpcodeUse`](crate::Error::InvalidOpcodeUse) is fatal: the only
/// call still accepted is [`close`](Session::close). Dropping a session
/// without closing it releases its named objects but sends nothing to the
/// server.
pub struct Session {
    namespace: Namespace,
    link: Link,
    server_info: ServerInfo,
    config: SessionConfig,
    phase: Phase,
    launch: LaunchReport,
    last_info: Info,
}

impl Session {
    /// Launch the server with the real launcher and complete the handshake.
    pub fn connect(paths: &ServerPaths, config: SessionConfig) -> Result<Self> {
        Self::connect_with(paths, config, &ProcessLauncher)
    }

    /// Like [`connect`](Session::connect), with a custom way of starting the server.
    pub fn connect_with(
        paths: &ServerPaths,
        config: SessionConfig,
        launcher: &dyn ServerLauncher,
    ) -> Result<Self> {
        let paths = paths.absolute().map_err(|source| LaunchFailure::Spawn {
            program: paths.launcher.clone(),
            source,
        })?;

        let Established {
            namespace,
            link,
            server_info,
            launch,
        } = handshake::establish(&paths, &config, launcher)?;

        tracing::info!(
            %namespace,
            shape = ?server_info.observation_shape(),
            actions = server_info.action_count,
            "session established"
        );
        Ok(Self {
            namespace,
            link,
            server_info,
            config,
            phase: Phase::default(),
            launch,
            last_info: Info::default(),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// What the server announced during the handshake.
    pub fn server_info(&self) -> ServerInfo {
        self.server_info
    }

    /// Shape of the observations this session returns, after the
    /// pixel-channel policy is applied.
    pub fn observation_shape(&self) -> [usize; 3] {
        let [height, width, channels] = self.server_info.observation_shape();
        [height, width, self.config.pixel_channels.retained(channels)]
    }

    pub fn action_count(&self) -> usize {
        self.server_info.action_len()
    }

    /// Size of the segment behind `channel`, while the session holds it.
    pub fn segment_len(&self, channel: Channel) -> Option<usize> {
        self.link.segment_len(channel)
    }

    /// Telemetry from the last successful operation.
    pub fn last_info(&self) -> Info {
        self.last_info
    }

    pub fn launch_report(&self) -> LaunchReport {
        self.launch
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    /// Start a new episode, either respawning or starting a new game.
    pub fn reset(&mut self, mode: ResetMode) -> Result<ResetOutcome> {
        let opcode = mode.opcode();
        self.phase.admit(opcode)?;

        let result = self.run(opcode).and_then(|()| {
            Ok(ResetOutcome {
                observation: self.read_observation()?,
                info: self.read_info()?,
            })
        });
        self.settle(opcode, result, |_| false)
    }

    /// Apply one action vector, one flag per action.
    pub fn step(&mut self, actions: &[bool]) -> Result<StepOutcome> {
        let opcode = Opcode::Step;
        self.phase.admit(opcode)?;
        if actions.len() != self.action_count() {
            return Err(Misuse::ActionLength {
                expected: self.action_count(),
                got: actions.len(),
            }
            .into());
        }

        let result = self
            .link
            .write(Channel::Action, &layout::encode_actions(actions))
            .and_then(|()| self.run(opcode))
            .and_then(|()| {
                let termination = Termination::from_bytes(
                    &self.link.read_array::<TERMINATION_SIZE>(Channel::Termination)?,
                );
                Ok(StepOutcome {
                    observation: self.read_observation()?,
                    reward: layout::decode_reward(
                        &self.link.read_array::<REWARD_SIZE>(Channel::Reward)?,
                    ),
                    terminated: termination.terminated,
                    truncated: termination.truncated,
                    info: self.read_info()?,
                })
            });
        self.settle(opcode, result, StepOutcome::is_done)
    }

    /// Send CLOSE (when the server can still answer it) and release every
    /// named object of the session.
    ///
    /// Resources are released whatever the hand-off outcome. A second close
    /// fails with [`Misuse::AfterClose`].
    pub fn close(&mut self) -> Result<CloseReport> {
        self.phase.admit(Opcode::Close)?;

        let handed_off = self.phase.close_reaches_server();
        let result = if handed_off {
            self.run(Opcode::Close)
        } else {
            tracing::debug!(namespace = %self.namespace, "server unresponsive, not sending CLOSE");
            Ok(())
        };

        match &result {
            Ok(()) => self.phase.succeeded(Opcode::Close, false),
            Err(e) => self.phase.failed(Opcode::Close, e.fault()),
        }
        let release_failures = self.link.release();
        tracing::info!(
            namespace = %self.namespace,
            failures = release_failures.len(),
            "session closed"
        );

        result.map(|()| CloseReport {
            handed_off,
            release_failures,
        })
    }

    fn run(&mut self, opcode: Opcode) -> Result<()> {
        self.link.write(Channel::Instruction, &[opcode.to_byte()])?;
        self.link
            .exchange(Handoff::Operation(opcode), self.config.turn_timeout)
    }

    /// Record the outcome of `opcode` in the phase machine.
    fn settle<T>(
        &mut self,
        opcode: Opcode,
        result: Result<T>,
        done: impl Fn(&T) -> bool,
    ) -> Result<T> {
        match &result {
            Ok(value) => self.phase.succeeded(opcode, done(value)),
            Err(e) => self.phase.failed(opcode, e.fault()),
        }
        result
    }

    fn read_observation(&self) -> Result<Observation> {
        let raw = self.link.read_vec(Channel::Observation)?;
        let shape = self.server_info.observation_shape();
        let keep = self.config.pixel_channels.retained(shape[2]);
        // The mapping may be page-rounded; only the announced bytes are pixels.
        let len = self.server_info.observation_len().unwrap_or(raw.len()).min(raw.len());
        Ok(Observation::from_raw(&raw[..len], shape, keep))
    }

    fn read_info(&mut self) -> Result<Info> {
        let info = Info::from_bytes(&self.link.read_array::<INFO_SIZE>(Channel::Info)?);
        self.last_info = info;
        Ok(info)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("namespace", &self.namespace)
            .field("server_info", &self.server_info)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.phase.is_closed() {
            tracing::debug!(namespace = %self.namespace, "session dropped without close");
            self.link.release();
        }
    }
}
