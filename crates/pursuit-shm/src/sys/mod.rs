//! OS backends for named segments and semaphores.
//!
//! Both backends expose the same crate-private surface: `Mapping`,
//! `Semaphore`, `unlink_segment` and `unlink_semaphore`.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{unlink_segment, unlink_semaphore, Mapping, Semaphore};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{unlink_segment, unlink_semaphore, Mapping, Semaphore};
