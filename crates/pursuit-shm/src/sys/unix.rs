//! POSIX backend: `shm_open` + `mmap` segments and named semaphores.
//!
//! Names get a leading `/` as `shm_open(3)` and `sem_open(3)` require.
//! On Linux both live under `/dev/shm` (semaphores with a `sem.` prefix).

use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::time::Duration;

use crate::namespace::ObjectName;

const MODE: libc::c_uint = 0o600;

/// A mapped POSIX shared-memory object.
pub(crate) struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    // Kept open for the lifetime of the mapping.
    _fd: OwnedFd,
}

// SAFETY: the mapping is plain memory; access is serialized by the turn gate.
unsafe impl Send for Mapping {}

impl Mapping {
    /// Create a new object of exactly `len` bytes. Fails if the name exists.
    pub(crate) fn create(name: &ObjectName, len: usize) -> io::Result<Self> {
        let c_name = posix_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let raw = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                MODE,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: shm_open succeeded, raw is a fresh descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let result = libc::off_t::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "segment size exceeds off_t"))
            .and_then(|size| {
                // SAFETY: fd is a valid shm descriptor.
                if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            })
            .and_then(|()| map(fd, len));

        if result.is_err() {
            // The name was ours; don't leave it behind.
            if let Err(e) = unlink_segment(name) {
                tracing::warn!("failed to unlink {} after create error: {}", name, e);
            }
        }
        result
    }

    /// Open an existing object that must hold at least `len` bytes.
    ///
    /// The whole object is mapped, so [`Mapping::len`] reports its real size.
    pub(crate) fn open(name: &ObjectName, len: usize) -> io::Result<Self> {
        let c_name = posix_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let raw = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, MODE) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: shm_open succeeded, raw is a fresh descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: stat is plain data; fstat fills it on success.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let size = usize::try_from(st.st_size).unwrap_or(0);
        if size < len {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("{name} holds {size} bytes, expected at least {len}"),
            ));
        }

        map(fd, size)
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Unmap and close the descriptor.
    pub(crate) fn close(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: ptr/len describe a live mapping created by `map`; after this
        // call nothing reads it again (self is consumed).
        let rc = unsafe { libc::munmap(this.ptr.as_ptr().cast(), this.len) };
        // SAFETY: the fd field is read exactly once and then dropped.
        let fd = unsafe { std::ptr::read(&this._fd) };
        drop(fd);
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a live mapping created by `map`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if rc < 0 {
            tracing::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

/// Remove a segment name. Existing mappings stay valid.
pub(crate) fn unlink_segment(name: &ObjectName) -> io::Result<()> {
    let c_name = posix_name(name)?;
    // SAFETY: c_name is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn map(fd: OwnedFd, len: usize) -> io::Result<Mapping> {
    if len == 0 {
        return Err(io::Error::new(ErrorKind::InvalidInput, "cannot map an empty segment"));
    }

    // SAFETY: fd is a valid shm descriptor at least `len` bytes long.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    let ptr = NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "mmap returned null"))?;
    Ok(Mapping { ptr, len, _fd: fd })
}

/// A POSIX named semaphore.
pub(crate) struct Semaphore {
    sem: NonNull<libc::sem_t>,
}

// SAFETY: sem_t operations are thread-safe; the handle is only moved, never aliased mutably.
unsafe impl Send for Semaphore {}

impl Semaphore {
    /// Create a semaphore with zero availability. Fails if the name exists.
    pub(crate) fn create(name: &ObjectName) -> io::Result<Self> {
        let c_name = posix_name(name)?;
        // SAFETY: c_name is valid; O_CREAT takes mode and initial value.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                MODE,
                0 as libc::c_uint,
            )
        };
        Self::from_raw(sem)
    }

    /// Open a semaphore created by the other side.
    pub(crate) fn open(name: &ObjectName) -> io::Result<Self> {
        let c_name = posix_name(name)?;
        // SAFETY: c_name is valid; without O_CREAT no extra arguments are read.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::from_raw(sem)
    }

    fn from_raw(sem: *mut libc::sem_t) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(sem)
            .map(|sem| Self { sem })
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "sem_open returned null"))
    }

    pub(crate) fn post(&self) -> io::Result<()> {
        // SAFETY: sem is a live handle from sem_open.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait up to `timeout`. Returns `false` on timeout.
    ///
    /// `sem_timedwait` takes a CLOCK_REALTIME deadline, so the wait is cut
    /// into slices of at most [`REALTIME_SLICE`] and the bound is measured on
    /// the monotonic clock. A wall-clock step can shift one slice, never the
    /// whole bound.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        use std::time::Instant;

        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(false);
            }
            let deadline = realtime_deadline(remaining.min(REALTIME_SLICE))?;
            // SAFETY: sem is a live handle, deadline is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) | Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Wait up to `timeout`. Returns `false` on timeout.
    ///
    /// Platforms without `sem_timedwait` poll `sem_trywait` with a capped backoff.
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        use std::time::Instant;

        let start = Instant::now();
        let mut backoff = Duration::from_micros(50);
        loop {
            // SAFETY: sem is a live handle from sem_open.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return Err(err),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            std::thread::sleep(backoff.min(timeout - elapsed));
            backoff = (backoff * 2).min(Duration::from_millis(2));
        }
    }

    pub(crate) fn close(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: sem is a live handle; it is not used after this call.
        if unsafe { libc::sem_close(this.sem.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: sem is a live handle; it is not used after drop.
        if unsafe { libc::sem_close(self.sem.as_ptr()) } < 0 {
            tracing::warn!("sem_close failed: {}", io::Error::last_os_error());
        }
    }
}

/// Remove a semaphore name. Open handles stay valid.
pub(crate) fn unlink_semaphore(name: &ObjectName) -> io::Result<()> {
    let c_name = posix_name(name)?;
    // SAFETY: c_name is a valid NUL-terminated string.
    if unsafe { libc::sem_unlink(c_name.as_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn posix_name(name: &ObjectName) -> io::Result<CString> {
    CString::new(format!("/{}", name.as_str()))
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "object name contains NUL"))
}

/// Longest single `sem_timedwait`.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const REALTIME_SLICE: Duration = Duration::from_millis(50);

/// Absolute CLOCK_REALTIME deadline `timeout` from now, as `sem_timedwait` expects.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    // SAFETY: timespec is plain data; clock_gettime fills it on success.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let nanos = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    let secs = (now.tv_sec as i64)
        .saturating_add(i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX))
        .saturating_add(nanos / NANOS_PER_SEC)
        .min(libc::time_t::MAX as i64);

    // SAFETY: as above.
    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = secs as libc::time_t;
    deadline.tv_nsec = (nanos % NANOS_PER_SEC) as _;
    Ok(deadline)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::layout::Channel;
    use crate::namespace::Namespace;

    fn fresh(channel: Channel) -> (Namespace, ObjectName) {
        let ns = Namespace::generate();
        let name = ns.object_name(channel);
        (ns, name)
    }

    #[test]
    fn test_mapping_is_shared_between_handles() {
        let (_ns, name) = fresh(Channel::Observation);
        let created = Mapping::create(&name, 64).unwrap();
        let opened = Mapping::open(&name, 64).unwrap();
        assert_eq!(opened.len(), 64);

        unsafe {
            *created.as_ptr().add(10) = 0xAB;
            assert_eq!(*opened.as_ptr().add(10), 0xAB);
        }

        opened.close().unwrap();
        created.close().unwrap();
        unlink_segment(&name).unwrap();
    }

    #[test]
    fn test_create_rejects_existing_name() {
        let (_ns, name) = fresh(Channel::Reward);
        let first = Mapping::create(&name, 4).unwrap();
        let err = Mapping::create(&name, 4).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        drop(first);
        unlink_segment(&name).unwrap();
    }

    #[test]
    fn test_open_rejects_short_segment() {
        let (_ns, name) = fresh(Channel::Info);
        let _created = Mapping::create(&name, 4).unwrap();
        let err = Mapping::open(&name, 1 << 20).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        unlink_segment(&name).unwrap();
    }

    #[test]
    fn test_semaphore_post_then_wait() {
        let (_ns, name) = fresh(Channel::ServerLock);
        let created = Semaphore::create(&name).unwrap();
        let opened = Semaphore::open(&name).unwrap();

        opened.post().unwrap();
        assert!(created.wait_timeout(Duration::from_millis(100)).unwrap());

        opened.close().unwrap();
        created.close().unwrap();
        unlink_semaphore(&name).unwrap();
    }

    #[test]
    fn test_semaphore_starts_unavailable_and_times_out() {
        let (_ns, name) = fresh(Channel::ClientLock);
        let sem = Semaphore::create(&name).unwrap();

        let start = Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(sem);
        unlink_semaphore(&name).unwrap();
    }

    #[test]
    fn test_long_wait_is_bounded_by_the_monotonic_clock() {
        let (_ns, name) = fresh(Channel::ClientLock);
        let sem = Semaphore::create(&name).unwrap();
        let timeout = Duration::from_millis(180);

        let start = Instant::now();
        assert!(!sem.wait_timeout(timeout).unwrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout, "returned after {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_secs(2));

        drop(sem);
        unlink_semaphore(&name).unwrap();
    }

    #[test]
    fn test_post_during_a_later_slice_is_seen() {
        let (_ns, name) = fresh(Channel::ServerLock);
        let sem = Semaphore::create(&name).unwrap();

        let poster = {
            let name = name.clone();
            std::thread::spawn(move || {
                let peer = Semaphore::open(&name).unwrap();
                std::thread::sleep(Duration::from_millis(120));
                peer.post().unwrap();
            })
        };
        let start = Instant::now();
        assert!(sem.wait_timeout(Duration::from_secs(5)).unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        poster.join().unwrap();

        drop(sem);
        unlink_semaphore(&name).unwrap();
    }

    #[test]
    fn test_unlinked_semaphore_cannot_be_opened() {
        let (_ns, name) = fresh(Channel::ServerLock);
        let sem = Semaphore::create(&name).unwrap();
        unlink_semaphore(&name).unwrap();
        assert!(Semaphore::open(&name).is_err());
        drop(sem);
    }
}
