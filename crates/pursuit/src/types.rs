//! Values returned by session operations.

use pursuit_shm::{Info, Opcode, ReleaseError};

/// Which reset the server performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Respawn the player within the current game.
    Respawn,
    /// Start a new game.
    #[default]
    NewGame,
}

impl ResetMode {
    pub fn from_new_game(new_game: bool) -> Self {
        if new_game {
            ResetMode::NewGame
        } else {
            ResetMode::Respawn
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            ResetMode::Respawn => Opcode::ResetRespawn,
            ResetMode::NewGame => Opcode::ResetNewGame,
        }
    }
}

/// A client-owned copy of one observation frame, row-major `(height, width, channels)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    shape: [usize; 3],
    pixels: Vec<u8>,
}

impl Observation {
    /// Copy `raw` (laid out as `server_shape`) keeping the first `keep` channels.
    pub(crate) fn from_raw(raw: &[u8], server_shape: [usize; 3], keep: usize) -> Self {
        let [height, width, channels] = server_shape;
        let keep = keep.min(channels);
        let pixels = if keep == channels {
            raw.to_vec()
        } else {
            raw.chunks_exact(channels)
                .flat_map(|pixel| &pixel[..keep])
                .copied()
                .collect()
        };
        Self {
            shape: [height, width, keep],
            pixels,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.pixels
    }

    /// Value at row `y`, column `x`, channel `c`.
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<u8> {
        let [height, width, channels] = self.shape;
        if y >= height || x >= width || c >= channels {
            return None;
        }
        self.pixels.get((y * width + x) * channels + c).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutcome {
    pub observation: Observation,
    pub info: Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Result of a close that released the session.
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Whether CLOSE was delivered to the server.
    pub handed_off: bool,
    /// Objects that could not be released. Release continued past each.
    pub release_failures: Vec<ReleaseError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.release_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_copy_drops_the_fourth_channel() {
        // 1x2 pixels, 4 channels.
        let raw = [1, 2, 3, 4, 5, 6, 7, 8];
        let obs = Observation::from_raw(&raw, [1, 2, 4], 3);
        assert_eq!(obs.shape(), [1, 2, 3]);
        assert_eq!(obs.as_bytes(), &[1, 2, 3, 5, 6, 7]);
        assert_eq!(obs.get(0, 1, 2), Some(7));
        assert_eq!(obs.get(0, 2, 0), None);
    }

    #[test]
    fn full_copy_keeps_layout() {
        let raw = [9u8; 12];
        let obs = Observation::from_raw(&raw, [2, 2, 3], 3);
        assert_eq!(obs.shape(), [2, 2, 3]);
        assert_eq!(obs.into_vec(), raw.to_vec());
    }

    #[test]
    fn reset_mode_opcodes() {
        assert_eq!(ResetMode::from_new_game(true).opcode(), Opcode::ResetNewGame);
        assert_eq!(ResetMode::from_new_game(false).opcode(), Opcode::ResetRespawn);
    }
}
