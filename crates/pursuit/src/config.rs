//! Session configuration.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default ceiling on one reset/step/close round trip.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default ceiling on each handshake hand-off; covers game boot.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of simulation frames per step.
pub const DEFAULT_FRAME_SKIP: u32 = 4;

/// Where the three server artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    /// Launcher executable that starts the game and injects the module.
    pub launcher: PathBuf,
    /// The game executable.
    pub payload: PathBuf,
    /// The server module loaded into the game.
    pub module: PathBuf,
}

impl ServerPaths {
    pub fn new(
        launcher: impl Into<PathBuf>,
        payload: impl Into<PathBuf>,
        module: impl Into<PathBuf>,
    ) -> Self {
        Self {
            launcher: launcher.into(),
            payload: payload.into(),
            module: module.into(),
        }
    }

    /// Resolve all three paths against the current directory.
    ///
    /// The launcher runs with a different working directory, so relative
    /// paths would not survive the hand-over.
    pub fn absolute(&self) -> io::Result<Self> {
        Ok(Self {
            launcher: std::path::absolute(&self.launcher)?,
            payload: std::path::absolute(&self.payload)?,
            module: std::path::absolute(&self.module)?,
        })
    }

    /// `logs/` next to the server module.
    pub fn default_log_dir(&self) -> PathBuf {
        self.module
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("logs")
    }
}

/// Which observation channels are handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelChannels {
    /// Keep the first three channels when the server sends more.
    #[default]
    Rgb,
    /// Keep every channel the server sends.
    All,
}

impl PixelChannels {
    /// Channel count kept out of `server_channels`.
    pub fn retained(self, server_channels: usize) -> usize {
        match self {
            PixelChannels::Rgb => server_channels.min(3),
            PixelChannels::All => server_channels,
        }
    }
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Run the game at real-time speed instead of fast-forward.
    pub real_time: bool,
    /// Simulation frames per step. Zero is treated as one.
    pub frame_skip: u32,
    /// Server log directory. `None` means [`ServerPaths::default_log_dir`].
    pub log_dir: Option<PathBuf>,
    /// Bound on the wait for each reset/step/close.
    pub turn_timeout: Duration,
    /// Bound on the wait for each handshake hand-off.
    pub handshake_timeout: Duration,
    pub pixel_channels: PixelChannels,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            real_time: false,
            frame_skip: DEFAULT_FRAME_SKIP,
            log_dir: None,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            pixel_channels: PixelChannels::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    pub fn with_frame_skip(mut self, frame_skip: u32) -> Self {
        self.frame_skip = frame_skip;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_pixel_channels(mut self, pixel_channels: PixelChannels) -> Self {
        self.pixel_channels = pixel_channels;
        self
    }

    /// Frame skip as passed to the server.
    pub fn effective_frame_skip(&self) -> u32 {
        if self.frame_skip == 0 {
            tracing::warn!("frame_skip of 0 is not supported, using 1");
            return 1;
        }
        self.frame_skip
    }

    pub(crate) fn resolve_log_dir(&self, paths: &ServerPaths) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| paths.default_log_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert!(!config.real_time);
        assert_eq!(config.frame_skip, 4);
        assert_eq!(config.turn_timeout, Duration::from_secs(10));
        assert_eq!(config.pixel_channels, PixelChannels::Rgb);
    }

    #[test]
    fn zero_frame_skip_is_clamped() {
        let config = SessionConfig::default().with_frame_skip(0);
        assert_eq!(config.effective_frame_skip(), 1);
        assert_eq!(SessionConfig::default().with_frame_skip(8).effective_frame_skip(), 8);
    }

    #[test]
    fn log_dir_defaults_next_to_module() {
        let paths = ServerPaths::new("bin/launcher", "game/game.exe", "server/mod.dll");
        assert_eq!(
            SessionConfig::default().resolve_log_dir(&paths),
            Path::new("server").join("logs")
        );
        assert_eq!(
            SessionConfig::default()
                .with_log_dir("/tmp/hp")
                .resolve_log_dir(&paths),
            PathBuf::from("/tmp/hp")
        );
    }

    #[test]
    fn absolute_paths() {
        let paths = ServerPaths::new("a", "b", "c").absolute().unwrap();
        assert!(paths.launcher.is_absolute());
        assert!(paths.payload.is_absolute());
        assert!(paths.module.is_absolute());
    }

    #[test]
    fn rgb_keeps_at_most_three_channels() {
        assert_eq!(PixelChannels::Rgb.retained(4), 3);
        assert_eq!(PixelChannels::Rgb.retained(1), 1);
        assert_eq!(PixelChannels::All.retained(4), 4);
    }
}
