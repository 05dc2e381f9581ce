//! Win32 backend: pagefile-backed file mappings and named semaphores.
//!
//! Named kernel objects disappear with their last handle, so unlinking is a no-op.

use std::io::{self, ErrorKind};
use std::ptr::{self, NonNull};
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    CreateSemaphoreW, OpenSemaphoreW, ReleaseSemaphore, WaitForSingleObject,
    SEMAPHORE_MODIFY_STATE, SYNCHRONIZATION_SYNCHRONIZE,
};

use crate::namespace::ObjectName;

/// A mapped view of a named file mapping.
pub(crate) struct Mapping {
    handle: HANDLE,
    view: NonNull<u8>,
    len: usize,
}

// SAFETY: the view is plain memory; access is serialized by the turn gate.
unsafe impl Send for Mapping {}

impl Mapping {
    pub(crate) fn create(name: &ObjectName, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(ErrorKind::InvalidInput, "cannot map an empty segment"));
        }
        let wide = wide_name(name);
        let size = len as u64;

        // SAFETY: wide is NUL-terminated; a null security descriptor is allowed.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                wide.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: reads the calling thread's last-error value.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            close_handle(handle);
            return Err(io::Error::new(ErrorKind::AlreadyExists, format!("{name} already exists")));
        }

        map(handle, len)
    }

    pub(crate) fn open(name: &ObjectName, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(ErrorKind::InvalidInput, "cannot map an empty segment"));
        }
        let wide = wide_name(name);

        // SAFETY: wide is NUL-terminated.
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }

        map(handle, len)
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.view.as_ptr()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn close(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        let result = unmap(this.view);
        close_handle(this.handle);
        result
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = unmap(self.view) {
            tracing::warn!("UnmapViewOfFile failed: {}", e);
        }
        close_handle(self.handle);
    }
}

pub(crate) fn unlink_segment(_name: &ObjectName) -> io::Result<()> {
    Ok(())
}

fn map(handle: HANDLE, len: usize) -> io::Result<Mapping> {
    // SAFETY: handle is a live file mapping at least `len` bytes long.
    let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
    match NonNull::new(view.Value.cast::<u8>()) {
        Some(view) => Ok(Mapping { handle, view, len }),
        None => {
            let err = io::Error::last_os_error();
            close_handle(handle);
            Err(err)
        }
    }
}

fn unmap(view: NonNull<u8>) -> io::Result<()> {
    let address = MEMORY_MAPPED_VIEW_ADDRESS {
        Value: view.as_ptr().cast(),
    };
    // SAFETY: view was returned by MapViewOfFile and is unmapped once.
    if unsafe { UnmapViewOfFile(address) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A Win32 named semaphore with a maximum count of one.
pub(crate) struct Semaphore {
    handle: HANDLE,
}

// SAFETY: semaphore handles may be used from any thread.
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub(crate) fn create(name: &ObjectName) -> io::Result<Self> {
        let wide = wide_name(name);
        // SAFETY: wide is NUL-terminated; a null security descriptor is allowed.
        let handle = unsafe { CreateSemaphoreW(ptr::null(), 0, 1, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: reads the calling thread's last-error value.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            close_handle(handle);
            return Err(io::Error::new(ErrorKind::AlreadyExists, format!("{name} already exists")));
        }
        Ok(Self { handle })
    }

    pub(crate) fn open(name: &ObjectName) -> io::Result<Self> {
        let wide = wide_name(name);
        // SAFETY: wide is NUL-terminated.
        let handle = unsafe {
            OpenSemaphoreW(
                SYNCHRONIZATION_SYNCHRONIZE | SEMAPHORE_MODIFY_STATE,
                0,
                wide.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    pub(crate) fn post(&self) -> io::Result<()> {
        // SAFETY: handle is a live semaphore; the previous count is not requested.
        if unsafe { ReleaseSemaphore(self.handle, 1, ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        // INFINITE is u32::MAX; stay just below it.
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        // SAFETY: handle is a live semaphore.
        match unsafe { WaitForSingleObject(self.handle, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(crate) fn close(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: handle is live and not used afterwards.
        if unsafe { CloseHandle(this.handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        close_handle(self.handle);
    }
}

pub(crate) fn unlink_semaphore(_name: &ObjectName) -> io::Result<()> {
    Ok(())
}

fn close_handle(handle: HANDLE) {
    // SAFETY: handle is a live kernel object owned by the caller.
    if unsafe { CloseHandle(handle) } == 0 {
        tracing::warn!("CloseHandle failed: {}", io::Error::last_os_error());
    }
}

fn wide_name(name: &ObjectName) -> Vec<u16> {
    name.as_str().encode_utf16().chain(std::iter::once(0)).collect()
}
