//! pursuit-shm: named shared-memory plumbing for Highway Pursuit sessions.
//!
//! A session is a set of named OS objects shared by exactly two processes:
//! the training client, which creates everything, and the game server,
//! which opens it by name. Every name is `<namespace>-<channel-id>`.
//!
//! ```text
//! ┌──────────────┐   server-lock / client-lock    ┌──────────────┐
//! │    client    │ ◀────────── turn gate ───────▶ │    server    │
//! │  (creator)   │                                │   (opener)   │
//! └──────┬───────┘                                └──────┬───────┘
//!        │        return-code  server-info  instruction  │
//!        └──────▶ action  observation  reward  ◀─────────┘
//!                 termination  info
//! ```
//!
//! Only the side holding the turn touches the segments. The byte layout
//! of each segment lives in [`layout`].

pub mod layout;
pub mod namespace;

mod gate;
mod segment;
mod sys;

pub use gate::{Side, TurnGate, TurnWait};
pub use layout::{Channel, Info, Opcode, ReturnCode, ServerErrorCode, ServerInfo, Termination};
pub use namespace::{InvalidNamespace, Namespace, ObjectName};
pub use segment::{Origin, ReleaseError, ReleaseStep, Segment, SegmentRegistry};
