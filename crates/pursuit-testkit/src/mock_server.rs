//! In-process stand-in for the game server.
//!
//! Runs on its own thread and opens the session's named objects by
//! namespace, exactly as the real server must. A responder closure decides
//! how each instruction is answered, including injected faults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pursuit::decoder::HandshakeStage;
use pursuit_shm::layout::{
    self, ACKNOWLEDGED, INFO_SIZE, INSTRUCTION_SIZE, RETURN_CODE_SIZE, REWARD_SIZE,
    SERVER_INFO_SIZE, TERMINATION_SIZE,
};
use pursuit_shm::{
    Channel, Info, Namespace, Opcode, SegmentRegistry, ServerErrorCode, ServerInfo, Termination,
    TurnGate, TurnWait,
};

/// How long the mock waits for the client before giving up.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// One instruction as the mock saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// `None` when the instruction byte is not a known opcode.
    pub opcode: Option<Opcode>,
    pub raw_opcode: u8,
    /// Decoded action flags; empty unless the opcode is STEP.
    pub actions: Vec<bool>,
    /// Zero-based index of this instruction.
    pub index: usize,
}

/// Injected misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Take the turn and never hand it back.
    NeverRelease,
    /// Hand the turn back without writing a return code, then die.
    SkipReturnCode,
    /// Answer with an error code and keep serving.
    Code(ServerErrorCode),
}

/// How to answer one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    observation: Option<Vec<u8>>,
    fill: Option<u8>,
    reward: f32,
    termination: Termination,
    info: Info,
    fault: Option<Fault>,
}

impl Reply {
    /// Acknowledge, leaving every output segment as it is.
    pub fn ack() -> Self {
        Self {
            observation: None,
            fill: None,
            reward: 0.0,
            termination: Termination::default(),
            info: Info::default(),
            fault: None,
        }
    }

    pub fn fault(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::ack()
        }
    }

    /// Set every observation byte to `value`.
    pub fn fill(mut self, value: u8) -> Self {
        self.fill = Some(value);
        self
    }

    /// Write these exact observation bytes (truncated to the segment).
    pub fn observation(mut self, bytes: Vec<u8>) -> Self {
        self.observation = Some(bytes);
        self
    }

    pub fn reward(mut self, reward: f32) -> Self {
        self.reward = reward;
        self
    }

    pub fn termination(mut self, terminated: bool, truncated: bool) -> Self {
        self.termination = Termination {
            terminated,
            truncated,
        };
        self
    }

    pub fn info(mut self, info: Info) -> Self {
        self.info = info;
        self
    }
}

/// What the mock observed, shared with the test thread.
#[derive(Debug, Default)]
pub struct Witness {
    holding_turn: AtomicBool,
    log: Mutex<WitnessLog>,
}

#[derive(Debug, Default, Clone)]
pub struct WitnessLog {
    pub requests: Vec<Request>,
    /// Mapped size of each segment the mock opened, in open order.
    pub segment_sizes: Vec<(Channel, usize)>,
    /// Writes by the wrong side: the mock writing without the turn, anything
    /// but the mock changing a segment during its turn, or the client
    /// changing a server-written segment.
    pub violations: Vec<String>,
    /// Turns the mock was granted, handshake included.
    pub turns: usize,
    pub finished: bool,
}

impl Witness {
    /// Whether the mock currently holds the turn.
    pub fn holding_turn(&self) -> bool {
        self.holding_turn.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> WitnessLog {
        self.log.lock().clone()
    }

    pub fn opcodes(&self) -> Vec<Option<Opcode>> {
        self.log.lock().requests.iter().map(|r| r.opcode).collect()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().requests.len()
    }

    pub fn segment_size(&self, channel: Channel) -> Option<usize> {
        self.log
            .lock()
            .segment_sizes
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, len)| *len)
    }
}

type Responder = Box<dyn FnMut(&Request) -> Reply + Send>;

/// A scripted server.
pub struct MockServer {
    server_info: ServerInfo,
    responder: Responder,
    stall_at: Option<HandshakeStage>,
    idle_timeout: Duration,
    witness: Arc<Witness>,
    /// Segment contents as of the last turn boundary, kept current by `put`.
    expected: Vec<(Channel, Vec<u8>)>,
}

impl MockServer {
    /// A server announcing `server_info` and acknowledging everything.
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            server_info,
            responder: Box::new(|_| Reply::ack()),
            stall_at: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            witness: Arc::new(Witness::default()),
            expected: Vec::new(),
        }
    }

    pub fn respond_with(
        mut self,
        responder: impl FnMut(&Request) -> Reply + Send + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    /// Take the turn at `stage` of the handshake and never answer.
    pub fn stall_at(mut self, stage: HandshakeStage) -> Self {
        self.stall_at = Some(stage);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn witness(&self) -> Arc<Witness> {
        self.witness.clone()
    }

    /// Serve the session under `namespace` until CLOSE, a fault or the
    /// client going quiet. Blocks the calling thread.
    pub fn serve(mut self, namespace: &Namespace) -> Result<(), String> {
        let result = self.serve_inner(namespace);
        let mut log = self.witness.log.lock();
        log.finished = true;
        if let Err(e) = &result {
            tracing::debug!("mock server stopped: {}", e);
        }
        result
    }

    fn serve_inner(&mut self, namespace: &Namespace) -> Result<(), String> {
        let gate = TurnGate::open(namespace).map_err(|e| format!("open gate: {e}"))?;
        let mut segments = SegmentRegistry::new(namespace.clone());
        self.attach(&mut segments, Channel::ReturnCode, RETURN_CODE_SIZE)?;
        self.attach(&mut segments, Channel::ServerInfo, SERVER_INFO_SIZE)?;

        // Hand-off #1: publish the shape.
        self.take_turn(&gate, &segments)?;
        if self.stall_at == Some(HandshakeStage::ServerInfo) {
            return Ok(());
        }
        let info = self.server_info.to_bytes();
        self.put(&mut segments, Channel::ServerInfo, &info)?;
        self.put(&mut segments, Channel::ReturnCode, &[ACKNOWLEDGED])?;
        self.give_turn(&gate, &segments)?;

        // Hand-off #2: attach to the sized segments.
        self.take_turn(&gate, &segments)?;
        if self.stall_at == Some(HandshakeStage::Attach) {
            return Ok(());
        }
        let observation_len = self
            .server_info
            .observation_len()
            .ok_or("observation size overflows")?;
        for (channel, len) in [
            (Channel::Instruction, INSTRUCTION_SIZE),
            (Channel::Info, INFO_SIZE),
            (Channel::Reward, REWARD_SIZE),
            (Channel::Termination, TERMINATION_SIZE),
            (Channel::Observation, observation_len),
            (Channel::Action, self.server_info.action_len()),
        ] {
            self.attach(&mut segments, channel, len)?;
        }
        self.put(&mut segments, Channel::ReturnCode, &[ACKNOWLEDGED])?;
        self.give_turn(&gate, &segments)?;

        for index in 0.. {
            self.take_turn(&gate, &segments)?;
            let request = self.read_request(&segments, index)?;
            self.witness.log.lock().requests.push(request.clone());

            let reply = match request.opcode {
                Some(_) => (self.responder)(&request),
                None => Reply::fault(Fault::Code(ServerErrorCode::UnknownOpcode)),
            };

            match reply.fault {
                Some(Fault::NeverRelease) => return Ok(()),
                Some(Fault::SkipReturnCode) => {
                    self.give_turn(&gate, &segments)?;
                    return Ok(());
                }
                Some(Fault::Code(code)) => {
                    self.put(&mut segments, Channel::ReturnCode, &[code.to_byte()])?;
                    self.give_turn(&gate, &segments)?;
                    continue;
                }
                None => {}
            }

            self.write_reply(&mut segments, request.opcode, &reply)?;
            self.put(&mut segments, Channel::ReturnCode, &[ACKNOWLEDGED])?;
            self.give_turn(&gate, &segments)?;

            if request.opcode == Some(Opcode::Close) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn attach(
        &self,
        segments: &mut SegmentRegistry,
        channel: Channel,
        len: usize,
    ) -> Result<(), String> {
        let segment = segments
            .open(channel, len)
            .map_err(|e| format!("open {channel}: {e}"))?;
        let mapped = segment.len();
        self.witness.log.lock().segment_sizes.push((channel, mapped));
        Ok(())
    }

    fn take_turn(&mut self, gate: &TurnGate, segments: &SegmentRegistry) -> Result<(), String> {
        match gate.await_turn(self.idle_timeout) {
            Ok(TurnWait::Granted) => {
                self.witness.holding_turn.store(true, Ordering::SeqCst);
                self.witness.log.lock().turns += 1;
            }
            Ok(TurnWait::TimedOut) => return Err("client went quiet".to_owned()),
            Err(e) => return Err(format!("await turn: {e}")),
        }
        // The client may have written its own segments, never ours.
        for channel in self.changed_since_boundary(segments)? {
            if server_written(channel) {
                self.violation(format!("client wrote {channel}"));
            }
        }
        self.expected = read_all(segments)?;
        Ok(())
    }

    fn give_turn(&mut self, gate: &TurnGate, segments: &SegmentRegistry) -> Result<(), String> {
        for channel in self.changed_since_boundary(segments)? {
            self.violation(format!("{channel} changed during the server's turn"));
        }
        self.expected = read_all(segments)?;
        self.witness.holding_turn.store(false, Ordering::SeqCst);
        gate.hand_off().map_err(|e| format!("hand off: {e}"))
    }

    fn changed_since_boundary(&self, segments: &SegmentRegistry) -> Result<Vec<Channel>, String> {
        let mut changed = Vec::new();
        for (channel, bytes) in &self.expected {
            if &read(segments, *channel)? != bytes {
                changed.push(*channel);
            }
        }
        Ok(changed)
    }

    fn violation(&self, message: String) {
        tracing::debug!("mock server: {}", message);
        self.witness.log.lock().violations.push(message);
    }

    /// Write into a segment, recording a violation when not holding the turn.
    fn put(
        &mut self,
        segments: &mut SegmentRegistry,
        channel: Channel,
        bytes: &[u8],
    ) -> Result<(), String> {
        if !self.witness.holding_turn() {
            self.violation(format!("wrote {channel} without holding the turn"));
        }
        segments
            .segment_mut(channel)
            .and_then(|s| s.write(0, bytes))
            .map_err(|e| format!("write {channel}: {e}"))?;

        let now = read(segments, channel)?;
        match self.expected.iter_mut().find(|(c, _)| *c == channel) {
            Some((_, bytes)) => *bytes = now,
            None => self.expected.push((channel, now)),
        }
        Ok(())
    }

    fn read_request(&self, segments: &SegmentRegistry, index: usize) -> Result<Request, String> {
        let raw_opcode = read(segments, Channel::Instruction)?
            .first()
            .copied()
            .ok_or("empty instruction segment")?;
        let opcode = Opcode::from_byte(raw_opcode);
        let actions = if opcode == Some(Opcode::Step) {
            let mut bytes = read(segments, Channel::Action)?;
            bytes.truncate(self.server_info.action_len());
            layout::decode_actions(&bytes)
        } else {
            Vec::new()
        };
        Ok(Request {
            opcode,
            raw_opcode,
            actions,
            index,
        })
    }

    fn write_reply(
        &mut self,
        segments: &mut SegmentRegistry,
        opcode: Option<Opcode>,
        reply: &Reply,
    ) -> Result<(), String> {
        let observation_len = self.server_info.observation_len().unwrap_or(0);
        if let Some(value) = reply.fill {
            self.put(segments, Channel::Observation, &vec![value; observation_len])?;
        }
        if let Some(bytes) = &reply.observation {
            let len = bytes.len().min(observation_len);
            self.put(segments, Channel::Observation, &bytes[..len])?;
        }
        self.put(segments, Channel::Info, &reply.info.to_bytes())?;
        if opcode == Some(Opcode::Step) {
            self.put(segments, Channel::Reward, &layout::encode_reward(reply.reward))?;
            self.put(segments, Channel::Termination, &reply.termination.to_bytes())?;
        }
        Ok(())
    }
}

/// Segments only the server writes once the session is up.
fn server_written(channel: Channel) -> bool {
    matches!(
        channel,
        Channel::ServerInfo
            | Channel::Observation
            | Channel::Reward
            | Channel::Termination
            | Channel::Info
    )
}

fn read(segments: &SegmentRegistry, channel: Channel) -> Result<Vec<u8>, String> {
    segments
        .segment(channel)
        .and_then(|s| s.to_vec())
        .map_err(|e| format!("read {channel}: {e}"))
}

fn read_all(segments: &SegmentRegistry) -> Result<Vec<(Channel, Vec<u8>)>, String> {
    segments
        .channels()
        .map(|channel| Ok((channel, read(segments, channel)?)))
        .collect()
}
