//! Canonical byte layout of every named object in a session.
//!
//! This is the wire contract both processes must honor. All multi-byte
//! fields are in native byte order: the two processes always share a machine.
//!
//! ```text
//! channel        direction        size                    fields
//! ───────────────────────────────────────────────────────────────────────────
//! server-lock    hand-off gate    n/a                     binary semaphore
//! client-lock    hand-off gate    n/a                     binary semaphore
//! return-code    server→client    1                       code:i8
//! server-info    server→client    16                      h:u32 w:u32 c:u32 actions:u32
//! instruction    client→server    1                       opcode:i8
//! action         client→server    action_count            one byte per flag
//! observation    server→client    h*w*c                   raw pixels, row-major
//! reward         server→client    4                       reward:f32
//! termination    server→client    2                       terminated:i8 truncated:i8
//! info           server→client    16                      tps memory server_time game_time (f32)
//! ```
//!
//! `server-info` is height-before-width. Earlier revisions of the server
//! swapped the two; this order is the one both sides must use.

use std::fmt;

/// Size of the `return-code` segment.
pub const RETURN_CODE_SIZE: usize = 1;
/// Size of the `server-info` segment.
pub const SERVER_INFO_SIZE: usize = 16;
/// Size of the `instruction` segment.
pub const INSTRUCTION_SIZE: usize = 1;
/// Size of the `reward` segment.
pub const REWARD_SIZE: usize = 4;
/// Size of the `termination` segment.
pub const TERMINATION_SIZE: usize = 2;
/// Size of the `info` segment.
pub const INFO_SIZE: usize = 16;

const _: () = assert!(SERVER_INFO_SIZE == 4 * std::mem::size_of::<u32>());
const _: () = assert!(INFO_SIZE == 4 * std::mem::size_of::<f32>());
const _: () = assert!(REWARD_SIZE == std::mem::size_of::<f32>());

/// Return code the client writes before every hand-off ("not yet answered").
pub const NOT_ACKNOWLEDGED: u8 = 0xFF;
/// Return code of a successfully handled hand-off.
pub const ACKNOWLEDGED: u8 = 0x00;

// ============================================================================
// Channels
// ============================================================================

/// One named OS object of a session.
///
/// Every object is named `<namespace>-<channel-id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ServerLock,
    ClientLock,
    ServerInfo,
    Instruction,
    Observation,
    Info,
    Reward,
    Action,
    Termination,
    ReturnCode,
}

impl Channel {
    /// Every channel, locks first.
    pub const ALL: [Channel; 10] = [
        Channel::ServerLock,
        Channel::ClientLock,
        Channel::ServerInfo,
        Channel::Instruction,
        Channel::Observation,
        Channel::Info,
        Channel::Reward,
        Channel::Action,
        Channel::Termination,
        Channel::ReturnCode,
    ];

    /// Channel id used in object names.
    pub const fn id(self) -> &'static str {
        match self {
            Channel::ServerLock => "server-lock",
            Channel::ClientLock => "client-lock",
            Channel::ServerInfo => "server-info",
            Channel::Instruction => "instruction",
            Channel::Observation => "observation",
            Channel::Info => "info",
            Channel::Reward => "reward",
            Channel::Action => "action",
            Channel::Termination => "termination",
            Channel::ReturnCode => "return-code",
        }
    }

    /// Segment size fixed by the layout.
    ///
    /// `None` for the two locks and for the segments sized from
    /// [`ServerInfo`] (observation, action).
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Channel::ReturnCode => Some(RETURN_CODE_SIZE),
            Channel::ServerInfo => Some(SERVER_INFO_SIZE),
            Channel::Instruction => Some(INSTRUCTION_SIZE),
            Channel::Reward => Some(REWARD_SIZE),
            Channel::Termination => Some(TERMINATION_SIZE),
            Channel::Info => Some(INFO_SIZE),
            Channel::ServerLock
            | Channel::ClientLock
            | Channel::Observation
            | Channel::Action => None,
        }
    }

    /// Whether this channel is a turn lock rather than a segment.
    pub const fn is_lock(self) -> bool {
        matches!(self, Channel::ServerLock | Channel::ClientLock)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ============================================================================
// Instruction
// ============================================================================

/// Instruction written into the `instruction` segment before an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Respawn the player within the current game.
    ResetRespawn,
    /// Start a new game.
    ResetNewGame,
    /// Apply the action vector and advance the simulation.
    Step,
    /// Stop serving; the server terminates after acknowledging.
    Close,
}

impl Opcode {
    pub const fn to_byte(self) -> u8 {
        match self {
            Opcode::ResetRespawn => 1,
            Opcode::ResetNewGame => 2,
            Opcode::Step => 3,
            Opcode::Close => 0xFF,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Opcode::ResetRespawn),
            2 => Some(Opcode::ResetNewGame),
            3 => Some(Opcode::Step),
            0xFF => Some(Opcode::Close),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::ResetRespawn => "RESET-RESPAWN",
            Opcode::ResetNewGame => "RESET-NEW-GAME",
            Opcode::Step => "STEP",
            Opcode::Close => "CLOSE",
        }
    }

    pub const fn is_reset(self) -> bool {
        matches!(self, Opcode::ResetRespawn | Opcode::ResetNewGame)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Return codes
// ============================================================================

/// Condition declared by the server in the `return-code` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorCode {
    /// Unspecified fault inside the game process.
    NativeFault,
    /// The server gave up waiting for the client.
    ClientUnresponsive,
    /// A simulation update took too long.
    SimulationTooSlow,
    /// The game's back buffer uses a pixel format the server cannot copy.
    UnsupportedPixelFormat,
    /// The instruction or an action index was not understood.
    UnknownOpcode,
    /// STEP arrived before any reset.
    StepBeforeReset,
    /// A byte outside the documented set.
    Unrecognized(u8),
}

impl ServerErrorCode {
    pub const fn to_byte(self) -> u8 {
        match self {
            ServerErrorCode::NativeFault => 1,
            ServerErrorCode::ClientUnresponsive => 2,
            ServerErrorCode::SimulationTooSlow => 3,
            ServerErrorCode::UnsupportedPixelFormat => 4,
            ServerErrorCode::UnknownOpcode => 5,
            ServerErrorCode::StepBeforeReset => 6,
            ServerErrorCode::Unrecognized(raw) => raw,
        }
    }

    /// Decode an error byte. `ACKNOWLEDGED` and `NOT_ACKNOWLEDGED` are not
    /// errors and are handled by [`ReturnCode::from_byte`].
    const fn from_error_byte(byte: u8) -> Self {
        match byte {
            1 => ServerErrorCode::NativeFault,
            2 => ServerErrorCode::ClientUnresponsive,
            3 => ServerErrorCode::SimulationTooSlow,
            4 => ServerErrorCode::UnsupportedPixelFormat,
            5 => ServerErrorCode::UnknownOpcode,
            6 => ServerErrorCode::StepBeforeReset,
            raw => ServerErrorCode::Unrecognized(raw),
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            ServerErrorCode::NativeFault => "native fault in the game process",
            ServerErrorCode::ClientUnresponsive => "server timed out waiting for the client",
            ServerErrorCode::SimulationTooSlow => "simulation update too slow",
            ServerErrorCode::UnsupportedPixelFormat => "unsupported back-buffer pixel format",
            ServerErrorCode::UnknownOpcode => "unknown instruction or action",
            ServerErrorCode::StepBeforeReset => "step called before reset",
            ServerErrorCode::Unrecognized(_) => "unrecognized return code",
        }
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.to_byte())
    }
}

/// Decoded content of the `return-code` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The sentinel is still there: nobody answered.
    NotAcknowledged,
    Acknowledged,
    Error(ServerErrorCode),
}

impl ReturnCode {
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            NOT_ACKNOWLEDGED => ReturnCode::NotAcknowledged,
            ACKNOWLEDGED => ReturnCode::Acknowledged,
            other => ReturnCode::Error(ServerErrorCode::from_error_byte(other)),
        }
    }

    pub const fn to_byte(self) -> u8 {
        match self {
            ReturnCode::NotAcknowledged => NOT_ACKNOWLEDGED,
            ReturnCode::Acknowledged => ACKNOWLEDGED,
            ReturnCode::Error(code) => code.to_byte(),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Capability announcement written once by the server during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub obs_height: u32,
    pub obs_width: u32,
    pub obs_channels: u32,
    pub action_count: u32,
}

impl ServerInfo {
    pub const fn new(obs_height: u32, obs_width: u32, obs_channels: u32, action_count: u32) -> Self {
        Self {
            obs_height,
            obs_width,
            obs_channels,
            action_count,
        }
    }

    pub fn from_bytes(bytes: &[u8; SERVER_INFO_SIZE]) -> Self {
        Self {
            obs_height: u32_at(bytes, 0),
            obs_width: u32_at(bytes, 4),
            obs_channels: u32_at(bytes, 8),
            action_count: u32_at(bytes, 12),
        }
    }

    pub fn to_bytes(&self) -> [u8; SERVER_INFO_SIZE] {
        let mut out = [0u8; SERVER_INFO_SIZE];
        out[0..4].copy_from_slice(&self.obs_height.to_ne_bytes());
        out[4..8].copy_from_slice(&self.obs_width.to_ne_bytes());
        out[8..12].copy_from_slice(&self.obs_channels.to_ne_bytes());
        out[12..16].copy_from_slice(&self.action_count.to_ne_bytes());
        out
    }

    /// `(height, width, channels)` of the raw observation buffer.
    pub fn observation_shape(&self) -> [usize; 3] {
        [
            self.obs_height as usize,
            self.obs_width as usize,
            self.obs_channels as usize,
        ]
    }

    /// Size of the `observation` segment, `None` on overflow.
    pub fn observation_len(&self) -> Option<usize> {
        let [h, w, c] = self.observation_shape();
        h.checked_mul(w)?.checked_mul(c)
    }

    /// Size of the `action` segment.
    pub fn action_len(&self) -> usize {
        self.action_count as usize
    }
}

/// Telemetry written by the server on every operation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Info {
    /// Simulation ticks per second.
    pub tps: f32,
    /// Memory used by the game process, in megabytes.
    pub memory: f32,
    /// Wall-clock time spent serving, in seconds.
    pub server_time: f32,
    /// Simulated in-game time, in seconds.
    pub game_time: f32,
}

impl Info {
    pub fn from_bytes(bytes: &[u8; INFO_SIZE]) -> Self {
        Self {
            tps: f32_at(bytes, 0),
            memory: f32_at(bytes, 4),
            server_time: f32_at(bytes, 8),
            game_time: f32_at(bytes, 12),
        }
    }

    pub fn to_bytes(&self) -> [u8; INFO_SIZE] {
        let mut out = [0u8; INFO_SIZE];
        out[0..4].copy_from_slice(&self.tps.to_ne_bytes());
        out[4..8].copy_from_slice(&self.memory.to_ne_bytes());
        out[8..12].copy_from_slice(&self.server_time.to_ne_bytes());
        out[12..16].copy_from_slice(&self.game_time.to_ne_bytes());
        out
    }
}

/// Episode end flags written after STEP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Termination {
    pub terminated: bool,
    pub truncated: bool,
}

impl Termination {
    /// Any non-zero byte counts as set.
    pub fn from_bytes(bytes: &[u8; TERMINATION_SIZE]) -> Self {
        Self {
            terminated: bytes[0] != 0,
            truncated: bytes[1] != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; TERMINATION_SIZE] {
        [u8::from(self.terminated), u8::from(self.truncated)]
    }

    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

pub fn decode_reward(bytes: &[u8; REWARD_SIZE]) -> f32 {
    f32::from_ne_bytes(*bytes)
}

pub fn encode_reward(reward: f32) -> [u8; REWARD_SIZE] {
    reward.to_ne_bytes()
}

/// One byte per action flag, `1` when pressed.
pub fn encode_actions(flags: &[bool]) -> Vec<u8> {
    flags.iter().map(|&pressed| u8::from(pressed)).collect()
}

/// Inverse of [`encode_actions`]; any non-zero byte is pressed.
pub fn decode_actions(bytes: &[u8]) -> Vec<bool> {
    bytes.iter().map(|&b| b != 0).collect()
}

#[inline]
fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

#[inline]
fn f32_at(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(u32_at(bytes, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_distinct() {
        let mut ids: Vec<&str> = Channel::ALL.iter().map(|c| c.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), Channel::ALL.len());
    }

    #[test]
    fn only_sized_segments_have_fixed_size() {
        assert_eq!(Channel::ServerInfo.fixed_size(), Some(16));
        assert_eq!(Channel::Info.fixed_size(), Some(16));
        assert_eq!(Channel::Termination.fixed_size(), Some(2));
        assert_eq!(Channel::Observation.fixed_size(), None);
        assert_eq!(Channel::Action.fixed_size(), None);
        assert_eq!(Channel::ServerLock.fixed_size(), None);
        assert!(Channel::ClientLock.is_lock());
        assert!(!Channel::ReturnCode.is_lock());
    }

    #[test]
    fn server_info_is_height_first() {
        let info = ServerInfo::new(84, 96, 4, 5);
        let bytes = info.to_bytes();
        assert_eq!(&bytes[0..4], &84u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &96u32.to_ne_bytes());
        assert_eq!(ServerInfo::from_bytes(&bytes), info);
        assert_eq!(info.observation_shape(), [84, 96, 4]);
        assert_eq!(info.observation_len(), Some(84 * 96 * 4));
        assert_eq!(info.action_len(), 5);
    }

    #[test]
    fn observation_len_overflow_is_none() {
        let info = ServerInfo::new(u32::MAX, u32::MAX, u32::MAX, 1);
        assert_eq!(info.observation_len(), None);
    }

    #[test]
    fn opcode_bytes() {
        assert_eq!(Opcode::ResetRespawn.to_byte(), 1);
        assert_eq!(Opcode::ResetNewGame.to_byte(), 2);
        assert_eq!(Opcode::Step.to_byte(), 3);
        assert_eq!(Opcode::Close.to_byte(), 0xFF);
        assert_eq!(Opcode::from_byte(0xFF), Some(Opcode::Close));
        assert_eq!(Opcode::from_byte(0), None);
        assert!(Opcode::ResetNewGame.is_reset());
        assert!(!Opcode::Step.is_reset());
    }

    #[test]
    fn return_code_decoding() {
        assert_eq!(ReturnCode::from_byte(0xFF), ReturnCode::NotAcknowledged);
        assert_eq!(ReturnCode::from_byte(0), ReturnCode::Acknowledged);
        assert_eq!(
            ReturnCode::from_byte(6),
            ReturnCode::Error(ServerErrorCode::StepBeforeReset)
        );
        assert_eq!(
            ReturnCode::from_byte(0x42),
            ReturnCode::Error(ServerErrorCode::Unrecognized(0x42))
        );
        assert_eq!(ReturnCode::Error(ServerErrorCode::SimulationTooSlow).to_byte(), 3);
    }

    #[test]
    fn termination_treats_any_nonzero_as_set() {
        let t = Termination::from_bytes(&[0, 7]);
        assert!(!t.terminated);
        assert!(t.truncated);
        assert!(t.is_done());
        assert_eq!(Termination::default().to_bytes(), [0, 0]);
    }

    #[test]
    fn info_fields_in_order() {
        let info = Info {
            tps: 60.0,
            memory: 250.5,
            server_time: 12.0,
            game_time: 48.0,
        };
        let bytes = info.to_bytes();
        assert_eq!(&bytes[4..8], &250.5f32.to_ne_bytes());
        assert_eq!(Info::from_bytes(&bytes), info);
    }

    #[test]
    fn actions_one_byte_per_flag() {
        let bytes = encode_actions(&[true, false, false, true, false]);
        assert_eq!(bytes, vec![1, 0, 0, 1, 0]);
        assert_eq!(decode_actions(&[0, 2, 0]), vec![false, true, false]);
    }
}
