//! Turn gate: two named binary semaphores that pass exclusive access to the
//! shared segments back and forth.
//!
//! ```text
//!   client                                  server
//!   ──────                                  ──────
//!   write request
//!   hand_off()  ── post server-lock ──▶     await_turn() returns
//!   await_turn()                            read request, write reply
//!        ◀── post client-lock ──            hand_off()
//!   read reply
//! ```
//!
//! Both locks start unavailable. A side only touches the segments between
//! a granted `await_turn` and its next `hand_off`.
//!
//! # Usage
//!
//! ```ignore
//! // Client: creates both locks.
//! let gate = TurnGate::create(&namespace)?;
//!
//! // Server (another process): opens them by name.
//! let gate = TurnGate::open(&namespace)?;
//!
//! // Either side, once its writes are done:
//! gate.hand_off()?;
//! match gate.await_turn(Duration::from_secs(10))? {
//!     TurnWait::Granted => { /* read the peer's writes */ }
//!     TurnWait::TimedOut => { /* peer never handed back */ }
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use crate::layout::Channel;
use crate::namespace::{Namespace, ObjectName};
use crate::segment::{ReleaseError, ReleaseStep};
use crate::sys;

/// Which end of the session a gate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// The lock this side waits on.
    pub const fn own_lock(self) -> Channel {
        match self {
            Side::Client => Channel::ClientLock,
            Side::Server => Channel::ServerLock,
        }
    }

    /// The lock this side posts to give the turn away.
    pub const fn peer_lock(self) -> Channel {
        match self {
            Side::Client => Channel::ServerLock,
            Side::Server => Channel::ClientLock,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Client => "client",
            Side::Server => "server",
        })
    }
}

/// Outcome of waiting for the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnWait {
    Granted,
    TimedOut,
}

struct Lock {
    name: ObjectName,
    sem: Option<sys::Semaphore>,
    created: bool,
}

impl Lock {
    fn create(namespace: &Namespace, channel: Channel) -> io::Result<Self> {
        let name = namespace.object_name(channel);
        let sem = sys::Semaphore::create(&name)?;
        Ok(Self {
            name,
            sem: Some(sem),
            created: true,
        })
    }

    fn open(namespace: &Namespace, channel: Channel) -> io::Result<Self> {
        let name = namespace.object_name(channel);
        let sem = sys::Semaphore::open(&name)?;
        Ok(Self {
            name,
            sem: Some(sem),
            created: false,
        })
    }

    fn sem(&self) -> io::Result<&sys::Semaphore> {
        self.sem.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{} was released", self.name))
        })
    }

    fn release(&mut self, failures: &mut Vec<ReleaseError>) {
        let Some(sem) = self.sem.take() else {
            return;
        };
        if let Err(e) = sem.close() {
            failures.push(ReleaseError::new(&self.name, ReleaseStep::Close, e));
        }
        if self.created {
            if let Err(e) = sys::unlink_semaphore(&self.name) {
                failures.push(ReleaseError::new(&self.name, ReleaseStep::Unlink, e));
            }
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let mut failures = Vec::new();
        self.release(&mut failures);
        for e in failures {
            tracing::warn!("{}", e);
        }
    }
}

/// One side's view of the two turn locks.
pub struct TurnGate {
    side: Side,
    own: Lock,
    peer: Lock,
}

impl TurnGate {
    /// Create both locks with zero availability. Called by the client.
    ///
    /// If the second lock cannot be created the first is removed again.
    pub fn create(namespace: &Namespace) -> io::Result<Self> {
        let side = Side::Client;
        let peer = Lock::create(namespace, side.peer_lock())?;
        let own = Lock::create(namespace, side.own_lock())?;
        tracing::debug!(namespace = %namespace, "created turn gate");
        Ok(Self { side, own, peer })
    }

    /// Open the locks the client created. Called by the server.
    pub fn open(namespace: &Namespace) -> io::Result<Self> {
        let side = Side::Server;
        let own = Lock::open(namespace, side.own_lock())?;
        let peer = Lock::open(namespace, side.peer_lock())?;
        tracing::debug!(namespace = %namespace, "opened turn gate");
        Ok(Self { side, own, peer })
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Give the turn to the peer. Writes made before this call are visible
    /// to the peer once its `await_turn` returns.
    pub fn hand_off(&self) -> io::Result<()> {
        let peer = self.peer.sem()?;
        fence(Ordering::Release);
        peer.post()?;
        tracing::trace!(side = %self.side, lock = %self.peer.name, "handed off turn");
        Ok(())
    }

    /// Block until the peer hands the turn back or `timeout` elapses.
    pub fn await_turn(&self, timeout: Duration) -> io::Result<TurnWait> {
        let granted = self.own.sem()?.wait_timeout(timeout)?;
        if !granted {
            tracing::trace!(side = %self.side, ?timeout, "turn wait timed out");
            return Ok(TurnWait::TimedOut);
        }
        fence(Ordering::Acquire);
        Ok(TurnWait::Granted)
    }

    /// Close both locks and, on the creating side, remove their names.
    ///
    /// Releasing twice is a no-op.
    pub fn release(&mut self) -> Vec<ReleaseError> {
        let mut failures = Vec::new();
        self.own.release(&mut failures);
        self.peer.release(&mut failures);
        failures
    }

    pub fn is_released(&self) -> bool {
        self.own.sem.is_none() && self.peer.sem.is_none()
    }
}

impl fmt::Debug for TurnGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnGate")
            .field("side", &self.side)
            .field("own", &self.own.name)
            .field("peer", &self.peer.name)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_locks_start_unavailable() {
        let ns = Namespace::generate();
        let client = TurnGate::create(&ns).unwrap();
        let server = TurnGate::open(&ns).unwrap();

        assert_eq!(
            client.await_turn(Duration::from_millis(20)).unwrap(),
            TurnWait::TimedOut
        );
        assert_eq!(
            server.await_turn(Duration::from_millis(20)).unwrap(),
            TurnWait::TimedOut
        );
    }

    #[test]
    fn test_turn_ping_pong_across_threads() {
        let ns = Namespace::generate();
        let client = TurnGate::create(&ns).unwrap();

        let server_ns = ns.clone();
        let server = thread::spawn(move || {
            let gate = TurnGate::open(&server_ns).unwrap();
            for _ in 0..5 {
                assert_eq!(
                    gate.await_turn(Duration::from_secs(5)).unwrap(),
                    TurnWait::Granted
                );
                gate.hand_off().unwrap();
            }
        });

        for _ in 0..5 {
            client.hand_off().unwrap();
            assert_eq!(
                client.await_turn(Duration::from_secs(5)).unwrap(),
                TurnWait::Granted
            );
        }
        server.join().unwrap();
    }

    #[test]
    fn test_timeout_is_bounded() {
        let ns = Namespace::generate();
        let client = TurnGate::create(&ns).unwrap();
        client.hand_off().unwrap();

        let start = Instant::now();
        let wait = client.await_turn(Duration::from_millis(100)).unwrap();
        let elapsed = start.elapsed();
        assert_eq!(wait, TurnWait::TimedOut);
        assert!(elapsed >= Duration::from_millis(90), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "returned late: {elapsed:?}");
    }

    #[test]
    fn test_release_twice_and_use_after_release() {
        let ns = Namespace::generate();
        let mut client = TurnGate::create(&ns).unwrap();
        assert!(client.release().is_empty());
        assert!(client.release().is_empty());
        assert!(client.is_released());
        assert!(client.hand_off().is_err());

        #[cfg(unix)]
        assert!(TurnGate::open(&ns).is_err());
    }

    #[test]
    fn test_sides_are_mirrored() {
        assert_eq!(Side::Client.own_lock(), Side::Server.peer_lock());
        assert_eq!(Side::Server.own_lock(), Side::Client.peer_lock());
    }
}
