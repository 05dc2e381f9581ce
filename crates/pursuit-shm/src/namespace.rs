//! Per-session resource namespace.
//!
//! Every named OS object of a session is called `<namespace>-<channel-id>`.
//! A fresh namespace per session keeps concurrent sessions (and a session
//! started right after another one closed) from colliding.

use std::fmt;

use uuid::Uuid;

use crate::layout::Channel;

/// Longest accepted namespace, in bytes.
pub const MAX_NAMESPACE_LEN: usize = 200;

/// Longest object name accepted by every backend. macOS caps POSIX
/// shared-memory and semaphore names at 31 bytes, leading `/` included.
pub const PORTABLE_NAME_LEN: usize = 30;

/// Unique prefix of one session's named objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

/// Logical name of one OS object: `<namespace>-<channel-id>`.
///
/// Backends decorate it as their naming rules require (POSIX adds a leading `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidNamespace {
    #[error("namespace is empty")]
    Empty,
    #[error("namespace is longer than {MAX_NAMESPACE_LEN} bytes")]
    TooLong,
    #[error("namespace contains {0:?}, which cannot appear in an object name")]
    ForbiddenChar(char),
}

impl Namespace {
    /// Allocate a new unique namespace: 64 random bits as 16 hex digits, so
    /// every object name stays within [`PORTABLE_NAME_LEN`].
    pub fn generate() -> Self {
        let (high, low) = Uuid::new_v4().as_u64_pair();
        let namespace = Self(format!("{:016x}", high ^ low));
        tracing::debug!(namespace = %namespace, "allocated session namespace");
        namespace
    }

    /// Accept a namespace handed over on a command line.
    ///
    /// Only ASCII alphanumerics, `-`, `_` and `.` are allowed.
    pub fn parse(raw: &str) -> Result<Self, InvalidNamespace> {
        if raw.is_empty() {
            return Err(InvalidNamespace::Empty);
        }
        if raw.len() > MAX_NAMESPACE_LEN {
            return Err(InvalidNamespace::TooLong);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(InvalidNamespace::ForbiddenChar(c));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the object behind `channel` in this namespace.
    pub fn object_name(&self, channel: Channel) -> ObjectName {
        ObjectName(format!("{}-{}", self.0, channel.id()))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ObjectName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_namespaces_differ() {
        let a = Namespace::generate();
        let b = Namespace::generate();
        assert_ne!(a, b);
        assert!(Namespace::parse(a.as_str()).is_ok());
    }

    #[test]
    fn generated_object_names_fit_posix_limits() {
        let ns = Namespace::generate();
        assert_eq!(ns.as_str().len(), 16);
        for channel in Channel::ALL {
            let name = ns.object_name(channel);
            assert!(
                name.as_str().len() <= PORTABLE_NAME_LEN,
                "{name} is {} bytes",
                name.as_str().len()
            );
            // With the leading `/` the POSIX backends add.
            assert!(format!("/{name}").len() <= 31);
        }
    }

    #[test]
    fn object_names_follow_the_pattern() {
        let ns = Namespace::parse("session-7").unwrap();
        assert_eq!(ns.object_name(Channel::ReturnCode).as_str(), "session-7-return-code");
        assert_eq!(ns.object_name(Channel::ServerLock).as_str(), "session-7-server-lock");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(Namespace::parse(""), Err(InvalidNamespace::Empty));
        assert_eq!(
            Namespace::parse("a/b"),
            Err(InvalidNamespace::ForbiddenChar('/'))
        );
        assert_eq!(
            Namespace::parse("Global\\x"),
            Err(InvalidNamespace::ForbiddenChar('\\'))
        );
        let long = "x".repeat(MAX_NAMESPACE_LEN + 1);
        assert_eq!(Namespace::parse(&long), Err(InvalidNamespace::TooLong));
    }
}
