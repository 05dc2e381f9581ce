//! Named shared-memory segments and the per-session registry that owns them.

use std::fmt;
use std::io::{self, ErrorKind};

use crate::layout::Channel;
use crate::namespace::{Namespace, ObjectName};
use crate::sys;

/// Which side brought the segment into existence.
///
/// Only the creator removes the name on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Created,
    Opened,
}

/// Step of a release that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    Unmap,
    Unlink,
    Close,
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseStep::Unmap => "unmap",
            ReleaseStep::Unlink => "unlink",
            ReleaseStep::Close => "close",
        })
    }
}

/// A named object that could not be fully released.
#[derive(Debug, thiserror::Error)]
#[error("failed to {step} {name}: {source}")]
pub struct ReleaseError {
    pub name: String,
    pub step: ReleaseStep,
    #[source]
    pub source: io::Error,
}

impl ReleaseError {
    pub(crate) fn new(name: &ObjectName, step: ReleaseStep, source: io::Error) -> Self {
        Self {
            name: name.as_str().to_owned(),
            step,
            source,
        }
    }
}

/// A named, fixed-size region of shared memory.
///
/// All accesses are bounds-checked copies; the segment never hands out
/// references into the shared region.
pub struct Segment {
    channel: Channel,
    name: ObjectName,
    origin: Origin,
    map: Option<sys::Mapping>,
}

impl Segment {
    /// Create and zero-fill a new segment of `len` bytes.
    pub fn create(namespace: &Namespace, channel: Channel, len: usize) -> io::Result<Self> {
        let name = namespace.object_name(channel);
        let map = sys::Mapping::create(&name, len)?;
        tracing::trace!(segment = %name, len, "created segment");
        Ok(Self {
            channel,
            name,
            origin: Origin::Created,
            map: Some(map),
        })
    }

    /// Attach to a segment created by the peer. It must hold at least `len` bytes.
    pub fn open(namespace: &Namespace, channel: Channel, len: usize) -> io::Result<Self> {
        let name = namespace.object_name(channel);
        let map = sys::Mapping::open(&name, len)?;
        tracing::trace!(segment = %name, len = map.len(), "opened segment");
        Ok(Self {
            channel,
            name,
            origin: Origin::Opened,
            map: Some(map),
        })
    }

    #[inline]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    #[inline]
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Mapped size in bytes; zero once released.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, sys::Mapping::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.map.is_none()
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the segment.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> io::Result<()> {
        let src = self.region(offset, dst.len())?;
        // SAFETY: region() checked that [offset, offset + len) lies inside the
        // mapping; dst is a distinct local buffer.
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// Copy the first `N` bytes out of the segment.
    pub fn read_array<const N: usize>(&self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// Copy the whole segment into an owned buffer.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; self.len()];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// Copy `src` into the segment starting at `offset`.
    pub fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<()> {
        let dst = self.region(offset, src.len())?;
        // SAFETY: region() checked the bounds; src is a distinct local buffer.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(())
    }

    /// Set every byte of the segment to `byte`.
    pub fn fill(&mut self, byte: u8) -> io::Result<()> {
        let len = self.len();
        let dst = self.region(0, len)?;
        // SAFETY: region() checked the bounds.
        unsafe { std::ptr::write_bytes(dst, byte, len) };
        Ok(())
    }

    /// Unmap the segment and, if this side created it, remove its name.
    ///
    /// Every step is attempted; all failures are returned. Releasing twice
    /// is a no-op.
    pub fn release(&mut self) -> Vec<ReleaseError> {
        let mut failures = Vec::new();
        self.release_into(&mut failures);
        failures
    }

    fn release_into(&mut self, failures: &mut Vec<ReleaseError>) {
        let Some(map) = self.map.take() else {
            return;
        };
        if let Err(e) = map.close() {
            failures.push(ReleaseError::new(&self.name, ReleaseStep::Unmap, e));
        }
        if self.origin == Origin::Created {
            if let Err(e) = sys::unlink_segment(&self.name) {
                failures.push(ReleaseError::new(&self.name, ReleaseStep::Unlink, e));
            }
        }
        tracing::trace!(segment = %self.name, "released segment");
    }

    fn region(&self, offset: usize, len: usize) -> io::Result<*mut u8> {
        let map = self.map.as_ref().ok_or_else(|| {
            io::Error::new(ErrorKind::NotConnected, format!("{} was released", self.name))
        })?;
        match offset.checked_add(len) {
            Some(end) if end <= map.len() => {
                // SAFETY: offset <= map.len(), so the result stays inside the mapping.
                Ok(unsafe { map.as_ptr().add(offset) })
            }
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "{}: access of {} bytes at offset {} exceeds {} bytes",
                    self.name,
                    len,
                    offset,
                    map.len()
                ),
            )),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        for e in self.release() {
            tracing::warn!("{}", e);
        }
    }
}

/// All segments one side holds in a session, keyed by channel.
///
/// Dropping the registry releases whatever is still held.
#[derive(Debug)]
pub struct SegmentRegistry {
    namespace: Namespace,
    segments: Vec<Segment>,
}

impl SegmentRegistry {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            segments: Vec::with_capacity(Channel::ALL.len()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Create the segment for `channel` and keep it.
    pub fn create(&mut self, channel: Channel, len: usize) -> io::Result<&mut Segment> {
        self.ensure_absent(channel)?;
        let segment = Segment::create(&self.namespace, channel, len)?;
        Ok(self.insert(segment))
    }

    /// Open the peer's segment for `channel` and keep it.
    pub fn open(&mut self, channel: Channel, len: usize) -> io::Result<&mut Segment> {
        self.ensure_absent(channel)?;
        let segment = Segment::open(&self.namespace, channel, len)?;
        Ok(self.insert(segment))
    }

    pub fn get(&self, channel: Channel) -> Option<&Segment> {
        self.segments.iter().find(|s| s.channel == channel)
    }

    pub fn get_mut(&mut self, channel: Channel) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.channel == channel)
    }

    /// Like [`get`](Self::get), but a missing channel is an error.
    pub fn segment(&self, channel: Channel) -> io::Result<&Segment> {
        self.get(channel).ok_or_else(|| missing(channel))
    }

    /// Like [`get_mut`](Self::get_mut), but a missing channel is an error.
    pub fn segment_mut(&mut self, channel: Channel) -> io::Result<&mut Segment> {
        self.get_mut(channel).ok_or_else(|| missing(channel))
    }

    /// Channels held, in creation order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.segments.iter().map(|s| s.channel)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Release every segment, newest first, and forget them.
    ///
    /// Keeps going past failures and returns all of them.
    pub fn release_all(&mut self) -> Vec<ReleaseError> {
        let mut failures = Vec::new();
        while let Some(mut segment) = self.segments.pop() {
            segment.release_into(&mut failures);
        }
        failures
    }

    fn ensure_absent(&self, channel: Channel) -> io::Result<()> {
        if self.get(channel).is_some() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("segment {channel} already registered"),
            ));
        }
        Ok(())
    }

    fn insert(&mut self, segment: Segment) -> &mut Segment {
        self.segments.push(segment);
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }
}

impl Drop for SegmentRegistry {
    fn drop(&mut self) {
        for e in self.release_all() {
            tracing::warn!("{}", e);
        }
    }
}

fn missing(channel: Channel) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("segment {channel} is not registered"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_segment_is_zeroed_and_visible_to_opener() {
        let ns = Namespace::generate();
        let mut created = Segment::create(&ns, Channel::Reward, 4).unwrap();
        assert_eq!(created.to_vec().unwrap(), vec![0; 4]);

        created.write(0, &1.5f32.to_ne_bytes()).unwrap();
        let opened = Segment::open(&ns, Channel::Reward, 4).unwrap();
        assert_eq!(opened.read_array::<4>().unwrap(), 1.5f32.to_ne_bytes());
        assert_eq!(opened.origin(), Origin::Opened);
    }

    #[test]
    fn test_out_of_bounds_access_is_rejected() {
        let ns = Namespace::generate();
        let mut seg = Segment::create(&ns, Channel::Termination, 2).unwrap();
        let err = seg.write(1, &[1, 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let mut buf = [0u8; 1];
        assert!(seg.read(usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_release_is_idempotent_and_removes_the_name() {
        let ns = Namespace::generate();
        let mut seg = Segment::create(&ns, Channel::Info, 16).unwrap();
        assert!(seg.release().is_empty());
        assert!(seg.release().is_empty());
        assert!(seg.is_released());
        assert_eq!(seg.len(), 0);
        assert!(seg.to_vec().is_err());
        assert_eq!(seg.write(0, &[1]).unwrap_err().kind(), ErrorKind::NotConnected);

        #[cfg(unix)]
        assert!(Segment::open(&ns, Channel::Info, 16).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_release_reports_unlink_failure_and_still_unmaps() {
        let ns = Namespace::generate();
        let mut seg = Segment::create(&ns, Channel::Action, 8).unwrap();
        sys::unlink_segment(seg.name()).unwrap();

        let failures = seg.release();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, ReleaseStep::Unlink);
        assert_eq!(failures[0].source.kind(), ErrorKind::NotFound);
        assert!(seg.is_released());
        assert!(seg.release().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_registry_collects_every_release_failure() {
        let ns = Namespace::generate();
        let mut registry = SegmentRegistry::new(ns.clone());
        registry.create(Channel::Reward, 4).unwrap();
        registry.create(Channel::Termination, 2).unwrap();
        sys::unlink_segment(&ns.object_name(Channel::Reward)).unwrap();
        sys::unlink_segment(&ns.object_name(Channel::Termination)).unwrap();

        let failures = registry.release_all();
        let names: Vec<&str> = failures.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [
                ns.object_name(Channel::Termination).as_str(),
                ns.object_name(Channel::Reward).as_str(),
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fill_sets_every_byte() {
        let ns = Namespace::generate();
        let mut seg = Segment::create(&ns, Channel::ReturnCode, 1).unwrap();
        seg.fill(0xFF).unwrap();
        assert_eq!(seg.read_array::<1>().unwrap(), [0xFF]);
    }

    #[test]
    fn test_registry_refuses_duplicate_channels() {
        let mut registry = SegmentRegistry::new(Namespace::generate());
        registry.create(Channel::Instruction, 1).unwrap();
        let err = registry.create(Channel::Instruction, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_release_all_empties_it() {
        let mut registry = SegmentRegistry::new(Namespace::generate());
        registry.create(Channel::ReturnCode, 1).unwrap();
        registry.create(Channel::ServerInfo, 16).unwrap();
        assert_eq!(
            registry.channels().collect::<Vec<_>>(),
            vec![Channel::ReturnCode, Channel::ServerInfo]
        );

        assert!(registry.release_all().is_empty());
        assert!(registry.is_empty());
        assert!(registry.release_all().is_empty());
        assert_eq!(
            registry.segment(Channel::ReturnCode).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
