//! pursuit: turn-based shared-memory client for the Highway Pursuit game server.
//!
//! # Quick Start
//!
//! ```ignore
//! use pursuit::prelude::*;
//!
//! let paths = ServerPaths::new("launcher.exe", "HighwayPursuit.exe", "server.dll");
//! let mut session = Session::connect(&paths, SessionConfig::default())?;
//!
//! let reset = session.reset(ResetMode::NewGame)?;
//! println!("observation shape: {:?}", reset.observation.shape());
//!
//! let mut actions = vec![false; session.action_count()];
//! actions[0] = true;
//! let step = session.step(&actions)?;
//! println!("reward {} done {}", step.reward, step.is_done());
//!
//! session.close()?;
//! ```
//!
//! # Protocol
//!
//! The client creates every named object under a fresh namespace, starts the
//! server through its launcher, and then drives it one hand-off at a time:
//!
//! ```text
//! write request ─▶ return-code = 0xFF ─▶ post server-lock ─▶ wait client-lock
//!                                                                  │
//!      copy out observation, reward, termination, info ◀── read return-code
//! ```
//!
//! Only the side holding the turn touches shared memory.
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T, Error>`](Error). Errors other than
//! [`Error::InvalidOpcodeUse`] are fatal for the session; use
//! [`Error::is_restartable`] to tell failures a fresh session may recover
//! from apart from caller mistakes:
//!
//! ```ignore
//! match session.step(&actions) {
//!     Ok(step) => { /* ... */ }
//!     Err(e) if e.is_restartable() => {
//!         session.close().ok();
//!         session = Session::connect(&paths, config.clone())?;
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod launcher;
pub mod phase;

mod handshake;
mod link;
mod session;
mod types;

pub use config::{PixelChannels, ServerPaths, SessionConfig};
pub use error::{Error, Misuse, Result, SyncOperation};
pub use launcher::{
    LaunchArgs, LaunchFailure, LaunchReport, LauncherExit, ProcessLauncher, ServerLauncher,
};
pub use session::Session;
pub use types::{CloseReport, Observation, ResetMode, ResetOutcome, StepOutcome};

// Wire-level types callers see in results and errors.
pub use pursuit_shm::{Channel, Info, Namespace, Opcode, ServerErrorCode, ServerInfo};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use pursuit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Error, ResetMode, ServerPaths, Session, SessionConfig, StepOutcome};
}
